use crate::config::PROGRESS_INTERVAL;
use crate::exclusions::ExclusionRules;
use crate::markup::is_redirect_text;
use crate::namespace::NamespaceCatalog;
use crate::parser::DumpReader;
use crate::stats::PipelineStats;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::{debug, info};

/// Title without its namespace prefix: the substring after the first colon
/// when one is present, otherwise the title itself.
pub fn strip_title(title: &str) -> &str {
    match title.split_once(':') {
        Some((_, rest)) => rest,
        None => title,
    }
}

/// Bidirectional title/identifier mapping built in one streaming pass.
///
/// Holds (a) canonical title → identifier, for link generation, and
/// (b) stripped title → canonical title, to undo the namespace-prefix
/// stripping a generic document loader performs. Excluded pages never enter
/// either side, so exclusion rules keep holding after reconstruction.
pub struct TitleIndex {
    title_to_id: FxHashMap<String, String>,
    stripped_to_canonical: FxHashMap<String, String>,
}

impl TitleIndex {
    pub fn build(
        path: &Path,
        catalog: &NamespaceCatalog,
        rules: &ExclusionRules,
        stats: &PipelineStats,
    ) -> Result<Self> {
        let reader = DumpReader::open(path)
            .with_context(|| format!("Failed to open export at: {}", path.display()))?;
        let pb = ProgressBar::new_spinner();

        info!("Building title index from: {}", path.display());

        let mut title_to_id = FxHashMap::default();
        let mut stripped_to_canonical: FxHashMap<String, String> = FxHashMap::default();
        let mut seen: u64 = 0;

        // Page-level skip counters belong to the chunking pass, which walks
        // the same stream; this pass only tracks collisions.
        for raw in reader {
            seen += 1;
            if seen % PROGRESS_INTERVAL == 0 {
                pb.tick();
            }

            let Some(page) = raw.into_page() else {
                continue;
            };

            if page.is_redirect || is_redirect_text(&page.text) {
                continue;
            }

            let ns_name = catalog.name_for(&page.ns, &page.title);
            if rules.is_excluded_namespace(&ns_name) || rules.is_excluded_namespace_id(&page.ns) {
                continue;
            }

            let stripped = strip_title(&page.title).to_string();
            match stripped_to_canonical.get(&stripped) {
                None => {
                    stripped_to_canonical.insert(stripped, page.title.clone());
                }
                Some(existing) => {
                    stats.inc_title_collisions();
                    // Prefer the canonical form with no namespace prefix;
                    // between two prefixed forms the first one encountered wins.
                    if existing.contains(':') && !page.title.contains(':') {
                        stripped_to_canonical.insert(stripped, page.title.clone());
                    } else {
                        debug!(
                            kept = existing.as_str(),
                            dropped = page.title.as_str(),
                            "Stripped-title collision"
                        );
                    }
                }
            }

            title_to_id.insert(page.title, page.id);
        }

        pb.finish_and_clear();

        info!(
            titles = title_to_id.len(),
            collisions = stats.collisions(),
            "Title index built"
        );

        Ok(Self {
            title_to_id,
            stripped_to_canonical,
        })
    }

    pub fn from_maps(
        title_to_id: FxHashMap<String, String>,
        stripped_to_canonical: FxHashMap<String, String>,
    ) -> Self {
        Self {
            title_to_id,
            stripped_to_canonical,
        }
    }

    pub fn maps(&self) -> (&FxHashMap<String, String>, &FxHashMap<String, String>) {
        (&self.title_to_id, &self.stripped_to_canonical)
    }

    pub fn len(&self) -> usize {
        self.title_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.title_to_id.is_empty()
    }

    pub fn resolve_id(&self, title: &str) -> Option<&str> {
        self.title_to_id.get(title).map(|s| s.as_str())
    }

    pub fn canonical_title(&self, stripped: &str) -> Option<&str> {
        self.stripped_to_canonical.get(stripped).map(|s| s.as_str())
    }

    /// Reverse lookup with a verbatim fallback: an unresolved stripped title
    /// is treated as if it were canonical. The resulting link may be wrong,
    /// which is a data-quality condition rather than an error.
    pub fn resolve_canonical<'a>(&'a self, stripped: &'a str) -> &'a str {
        match self.stripped_to_canonical.get(stripped) {
            Some(canonical) => canonical.as_str(),
            None => {
                debug!(title = stripped, "No canonical form for stripped title");
                stripped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_index(entries: Vec<(&str, &str)>) -> TitleIndex {
        let mut title_to_id = FxHashMap::default();
        let mut stripped_to_canonical: FxHashMap<String, String> = FxHashMap::default();
        for (title, id) in entries {
            title_to_id.insert(title.to_string(), id.to_string());
            let stripped = strip_title(title).to_string();
            match stripped_to_canonical.get(&stripped) {
                None => {
                    stripped_to_canonical.insert(stripped, title.to_string());
                }
                Some(existing) => {
                    if existing.contains(':') && !title.contains(':') {
                        stripped_to_canonical.insert(stripped, title.to_string());
                    }
                }
            }
        }
        TitleIndex::from_maps(title_to_id, stripped_to_canonical)
    }

    #[test]
    fn strip_title_removes_first_prefix_only() {
        assert_eq!(strip_title("User blog:Alice/My page"), "Alice/My page");
        assert_eq!(strip_title("Talk:A:B"), "A:B");
        assert_eq!(strip_title("Plain"), "Plain");
    }

    #[test]
    fn resolve_direct_title() {
        let index = make_index(vec![("Graham's number", "1"), ("TREE sequence", "2")]);
        assert_eq!(index.resolve_id("Graham's number"), Some("1"));
        assert_eq!(index.resolve_id("TREE sequence"), Some("2"));
    }

    #[test]
    fn resolve_is_case_sensitive() {
        let index = make_index(vec![("Graham's number", "1")]);
        assert_eq!(index.resolve_id("graham's number"), None);
    }

    #[test]
    fn stripped_round_trip() {
        let index = make_index(vec![("User blog:Alice/My page", "9")]);
        assert_eq!(
            index.canonical_title("Alice/My page"),
            Some("User blog:Alice/My page")
        );
        assert_eq!(
            strip_title(index.resolve_canonical("Alice/My page")),
            "Alice/My page"
        );
    }

    #[test]
    fn collision_prefers_unprefixed_form() {
        // Whichever order the colliding titles arrive, the main-namespace
        // form wins the stripped slot.
        let a = make_index(vec![("Talk:Omega", "1"), ("Omega", "2")]);
        assert_eq!(a.canonical_title("Omega"), Some("Omega"));

        let b = make_index(vec![("Omega", "2"), ("Talk:Omega", "1")]);
        assert_eq!(b.canonical_title("Omega"), Some("Omega"));
    }

    #[test]
    fn collision_between_prefixed_forms_keeps_first() {
        let index = make_index(vec![("Talk:Omega", "1"), ("User:Omega", "2")]);
        assert_eq!(index.canonical_title("Omega"), Some("Talk:Omega"));
    }

    #[test]
    fn unresolved_stripped_title_falls_back_verbatim() {
        let index = make_index(vec![("Alpha", "1")]);
        assert_eq!(index.resolve_canonical("No such page"), "No such page");
    }

    #[test]
    fn forward_lookup_keeps_all_titles() {
        // The collision policy only affects the reverse map; both canonical
        // titles keep their identifiers.
        let index = make_index(vec![("Talk:Omega", "1"), ("Omega", "2")]);
        assert_eq!(index.resolve_id("Talk:Omega"), Some("1"));
        assert_eq!(index.resolve_id("Omega"), Some("2"));
    }
}
