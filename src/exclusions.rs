use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Namespaces and contributors to drop from the pipeline.
///
/// Loaded once at startup and immutable for the rest of the run. All the
/// predicates here are pure; resolution of namespace ids to display names
/// happens in the caller via [`crate::namespace::NamespaceCatalog`].
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    namespaces: FxHashSet<String>,
    namespace_ids: FxHashSet<String>,
    contributors: FxHashSet<String>,
}

impl ExclusionRules {
    pub fn new(
        namespaces: impl IntoIterator<Item = String>,
        contributors: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            namespaces: namespaces.into_iter().collect(),
            namespace_ids: FxHashSet::default(),
            contributors: contributors.into_iter().collect(),
        }
    }

    /// Loads rules from an `exclude.md` file.
    ///
    /// Recognized line formats:
    /// - `` - `User talk:` `` — an excluded namespace display name
    /// - `` - `<username>FANDOM</username>` `` — an excluded contributor
    ///
    /// A missing file is not an error; it means nothing is excluded.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            warn!(path = %path.display(), "No exclusion file found, nothing will be excluded");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read exclusion file: {}", path.display()))?;

        let mut rules = Self::default();
        for line in content.lines() {
            let line = line.trim();
            let Some(body) = line.strip_prefix("- `").and_then(|s| s.strip_suffix('`')) else {
                continue;
            };

            if let Some(namespace) = body.strip_suffix(':') {
                rules.namespaces.insert(namespace.to_string());
            } else if let Some(rest) = body.strip_prefix("<username>") {
                if let Some(username) = rest.strip_suffix("</username>") {
                    rules.contributors.insert(username.to_string());
                }
            }
        }

        info!(
            namespaces = rules.namespaces.len(),
            contributors = rules.contributors.len(),
            "Exclusion rules loaded"
        );
        Ok(rules)
    }

    /// Registers numeric namespace ids to exclude, for exports where two
    /// different ids share a display name.
    pub fn add_namespace_ids(&mut self, ids: impl IntoIterator<Item = String>) {
        self.namespace_ids.extend(ids);
    }

    /// True when a namespace display name is excluded. MediaWiki uses spaces
    /// and underscores interchangeably in namespace names, so membership is
    /// tested against both the original and the space-normalized form.
    pub fn is_excluded_namespace(&self, name: &str) -> bool {
        if self.namespaces.contains(name) {
            return true;
        }
        let normalized = name.replace('_', " ");
        self.namespaces.contains(&normalized)
    }

    pub fn is_excluded_namespace_id(&self, ns_id: &str) -> bool {
        self.namespace_ids.contains(ns_id)
    }

    /// Title-prefix form of the namespace check, for callers that only have
    /// a canonical title.
    pub fn is_excluded_title(&self, title: &str) -> bool {
        match title.split_once(':') {
            Some((prefix, _)) => self.is_excluded_namespace(prefix),
            None => false,
        }
    }

    /// Exact-string contributor membership; no normalization.
    pub fn is_excluded_contributor(&self, name: &str) -> bool {
        self.contributors.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.namespace_ids.is_empty() && self.contributors.is_empty()
    }
}
