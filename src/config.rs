use serde::{Deserialize, Serialize};

/// Progress update interval (tick every N pages)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Version stamp for the title index cache format
pub const TITLE_CACHE_VERSION: u32 = 1;

/// Version stamp for the vector store cache format
pub const STORE_CACHE_VERSION: u32 = 1;

/// Default passage size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 1200;

/// Default overlap between adjacent passages in characters
pub const DEFAULT_CHUNK_OVERLAP: usize = 300;

/// Default number of passages embedded per batch
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Default number of passages per export part file
pub const DEFAULT_PASSAGES_PER_PART: usize = 1000;

/// Default dimension for the hashing embedder
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Default exclusion rules file
pub const DEFAULT_EXCLUDE_FILE: &str = "exclude.md";

/// Site identity used for link generation and export labeling.
///
/// Constructed once at startup and passed by reference into every component
/// that needs it; nothing reads site settings from ambient state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteConfig {
    pub name: String,
    pub base_url: String,
}

impl SiteConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Stable permalink by page identifier.
    pub fn curid_url(&self, page_id: &str) -> String {
        format!("{}/?curid={}", self.base_url, page_id)
    }

    /// Slug fallback for titles with no known identifier.
    pub fn slug_url(&self, title: &str) -> String {
        format!("{}/wiki/{}", self.base_url, title.replace(' ', "_"))
    }
}

/// Chunking parameters, measured in characters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curid_url_appends_identifier() {
        let site = SiteConfig::new("Example Wiki", "https://example.fandom.com");
        assert_eq!(site.curid_url("1234"), "https://example.fandom.com/?curid=1234");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let site = SiteConfig::new("Example Wiki", "https://example.fandom.com/");
        assert_eq!(site.curid_url("7"), "https://example.fandom.com/?curid=7");
    }

    #[test]
    fn slug_url_replaces_spaces() {
        let site = SiteConfig::new("Example Wiki", "https://example.fandom.com");
        assert_eq!(
            site.slug_url("Graham's number"),
            "https://example.fandom.com/wiki/Graham's_number"
        );
    }
}
