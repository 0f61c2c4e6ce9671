use crate::parser::open_xml_reader;
use anyhow::Result;
use quick_xml::events::Event;
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Display name given to the main namespace, whose declaration carries no text.
pub const MAIN_NAMESPACE: &str = "Main";

/// Labels used as namespace prefixes in titles without being registered in
/// the declaration header. Fandom exports do this for per-user blogs.
const PSEUDO_NAMESPACES: &[&str] = &["User blog"];

/// Mapping from namespace id (string key, as encountered in the source) to
/// display name. Built once from the export header, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct NamespaceCatalog {
    names: FxHashMap<String, String>,
}

impl NamespaceCatalog {
    /// Parses the namespace declarations preceding the first page record.
    ///
    /// A truncated or declaration-free export produces an empty catalog, in
    /// which case every lookup falls back to a synthetic label.
    pub fn parse(path: &Path) -> Result<Self> {
        let mut reader = open_xml_reader(path)?;
        let mut buf = Vec::with_capacity(4 * 1024);
        let mut names = FxHashMap::default();

        let mut pending_key: Option<String> = None;
        let mut pending_name = String::new();

        loop {
            buf.clear();
            let event = match reader.read_event_into(&mut buf) {
                Ok(ev) => ev,
                Err(e) => {
                    warn!(error = %e, "Malformed export header, using namespaces found so far");
                    break;
                }
            };

            match event {
                Event::Start(ref e) => match e.name().as_ref() {
                    b"namespace" => {
                        pending_key = attr_value(e, b"key");
                        pending_name.clear();
                    }
                    // Declarations never interleave with page data.
                    b"page" => break,
                    _ => {}
                },
                Event::Empty(ref e) => {
                    if e.name().as_ref() == b"namespace" {
                        if let Some(key) = attr_value(e, b"key") {
                            names.insert(key, MAIN_NAMESPACE.to_string());
                        }
                    }
                }
                Event::Text(ref e) => {
                    if pending_key.is_some() {
                        if let Ok(text) = e.unescape() {
                            pending_name.push_str(&text);
                        }
                    }
                }
                Event::End(ref e) => {
                    if e.name().as_ref() == b"namespace" {
                        if let Some(key) = pending_key.take() {
                            let name = pending_name.trim();
                            let name = if name.is_empty() {
                                MAIN_NAMESPACE.to_string()
                            } else {
                                name.to_string()
                            };
                            names.insert(key, name);
                        }
                        pending_name.clear();
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        debug!(namespaces = names.len(), "Namespace catalog parsed");
        Ok(Self { names })
    }

    pub fn from_map(names: FxHashMap<String, String>) -> Self {
        Self { names }
    }

    pub fn get(&self, ns_id: &str) -> Option<&str> {
        self.names.get(ns_id).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolves a page's namespace display name. Never fails: pseudo-namespace
    /// title prefixes win over the numeric id, and ids missing from the
    /// catalog get a synthetic `Namespace <id>` label.
    pub fn name_for(&self, ns_id: &str, title: &str) -> String {
        if let Some((prefix, _)) = title.split_once(':') {
            if PSEUDO_NAMESPACES.contains(&prefix) {
                return prefix.to_string();
            }
        }

        match self.names.get(ns_id) {
            Some(name) => name.clone(),
            None => format!("Namespace {}", ns_id),
        }
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_xml(dir: &TempDir, xml: &str) -> PathBuf {
        let path = dir.path().join("export.xml");
        let mut file = File::create(&path).unwrap();
        file.write_all(xml.as_bytes()).unwrap();
        path
    }

    const HEADER: &str = r#"<mediawiki>
  <siteinfo>
    <namespaces>
      <namespace key="0" case="first-letter" />
      <namespace key="1" case="first-letter">Talk</namespace>
      <namespace key="2" case="first-letter">User</namespace>
      <namespace key="500" case="first-letter">User blog</namespace>
    </namespaces>
  </siteinfo>
  <page>
    <title>After the header</title><ns>0</ns><id>1</id>
  </page>
  <page>
    <title>Talk:Bogus declaration below should never be read</title><ns>1</ns><id>2</id>
  </page>
</mediawiki>"#;

    #[test]
    fn parses_declared_namespaces() {
        let dir = TempDir::new().unwrap();
        let path = write_xml(&dir, HEADER);
        let catalog = NamespaceCatalog::parse(&path).unwrap();

        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.get("1"), Some("Talk"));
        assert_eq!(catalog.get("500"), Some("User blog"));
    }

    #[test]
    fn empty_name_normalizes_to_main() {
        let dir = TempDir::new().unwrap();
        let path = write_xml(&dir, HEADER);
        let catalog = NamespaceCatalog::parse(&path).unwrap();
        assert_eq!(catalog.get("0"), Some(MAIN_NAMESPACE));
    }

    #[test]
    fn stops_at_first_page() {
        // A doc with declarations only before the pages; parsing must not
        // scan past the first page boundary.
        let dir = TempDir::new().unwrap();
        let path = write_xml(&dir, HEADER);
        let catalog = NamespaceCatalog::parse(&path).unwrap();
        assert!(catalog.get("99").is_none());
    }

    #[test]
    fn truncated_header_yields_empty_catalog() {
        let dir = TempDir::new().unwrap();
        let path = write_xml(&dir, "<mediawiki><siteinfo><namespa");
        let catalog = NamespaceCatalog::parse(&path).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn unknown_id_gets_synthetic_label() {
        let catalog = NamespaceCatalog::default();
        assert_eq!(catalog.name_for("42", "Some title"), "Namespace 42");
    }

    #[test]
    fn pseudo_namespace_prefix_overrides_id() {
        // "User blog" shows up in titles even when the declared id disagrees
        // or the declaration is missing entirely.
        let catalog = NamespaceCatalog::default();
        assert_eq!(
            catalog.name_for("0", "User blog:Alice/My page"),
            "User blog"
        );
    }

    #[test]
    fn regular_colon_title_uses_catalog() {
        let mut names = FxHashMap::default();
        names.insert("1".to_string(), "Talk".to_string());
        let catalog = NamespaceCatalog::from_map(names);
        assert_eq!(catalog.name_for("1", "Talk:Alpha"), "Talk");
    }
}
