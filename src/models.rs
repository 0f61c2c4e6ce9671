use serde::{Deserialize, Serialize};

/// One revision of a page: when it happened and who made it.
///
/// The contributor is a username, an `IP:<address>` sentinel for anonymous
/// edits, or `Unknown` when the export omits the contributor element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub timestamp: String,
    pub contributor: String,
}

/// Contributor sentinel for revisions with no username or IP.
pub const UNKNOWN_CONTRIBUTOR: &str = "Unknown";

/// A page record as it comes off the stream, before identity validation.
///
/// Any of the identity fields may be absent in a malformed export; callers
/// go through [`RawPage::into_page`] and skip records that fail it.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub id: Option<String>,
    pub title: Option<String>,
    pub ns: Option<String>,
    pub text: Option<String>,
    pub is_redirect: bool,
    pub revisions: Vec<Revision>,
}

impl RawPage {
    /// Promotes the raw record to a [`Page`], or `None` when the identifier,
    /// title, or namespace id is missing.
    pub fn into_page(self) -> Option<Page> {
        Some(Page {
            id: self.id?,
            title: self.title?,
            ns: self.ns?,
            text: self.text.unwrap_or_default(),
            is_redirect: self.is_redirect,
            revisions: self.revisions,
        })
    }
}

/// A validated page, materialized once per streaming pass and discarded
/// after its derived fields are extracted.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: String,
    pub title: String,
    /// Namespace id as it appears in the source (string key).
    pub ns: String,
    /// Latest-revision text; may be empty.
    pub text: String,
    pub is_redirect: bool,
    pub revisions: Vec<Revision>,
}

impl Page {
    pub fn byte_size(&self) -> usize {
        self.text.len()
    }

    /// Revisions ordered by timestamp (lexicographic order matches
    /// chronological order for the export's ISO-8601 timestamps).
    pub fn sorted_revisions(&self) -> Vec<Revision> {
        let mut revs = self.revisions.clone();
        revs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        revs
    }

    /// Contributor of the earliest revision, i.e. the page creator.
    pub fn earliest_contributor(&self) -> &str {
        self.revisions
            .iter()
            .min_by(|a, b| a.timestamp.cmp(&b.timestamp))
            .map(|r| r.contributor.as_str())
            .unwrap_or(UNKNOWN_CONTRIBUTOR)
    }
}

/// A bounded substring of a page's text, the unit of embedding and retrieval.
///
/// `start`/`end` are byte offsets into the original (cleaned) page text, so
/// `&text[start..end] == content` holds whenever the offset search succeeded;
/// `chunk_size`/`overlap` are measured in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    pub page_id: String,
    pub title: String,
    pub url: String,
    pub namespace: String,
    /// Zero-based index of this passage within its page.
    pub seq: usize,
    pub start: usize,
    pub end: usize,
    pub content: String,
}

impl Passage {
    /// Stable passage identifier, unique across the index.
    pub fn passage_id(&self) -> String {
        format!("{}-{}", self.page_id, self.seq)
    }
}
