use crate::error::PipelineError;
use crate::models::{RawPage, Revision, UNKNOWN_CONTRIBUTOR};
use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Which element's character data is currently being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    None,
    Title,
    Ns,
    PageId,
    Text,
    Timestamp,
    Username,
    Ip,
}

/// Streaming reader over the page records of a MediaWiki export.
///
/// Yields one [`RawPage`] at a time; the parse buffer is reused between
/// pages so memory stays bounded regardless of export size. Iteration is
/// forward-only and ends at EOF or on a malformed document (logged, not
/// raised), which makes a truncated export look like a short one.
pub struct DumpReader {
    reader: Reader<Box<dyn BufRead>>,
    buf: Vec<u8>,
}

impl std::fmt::Debug for DumpReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpReader").finish_non_exhaustive()
    }
}

impl DumpReader {
    /// Opens a plain `.xml` or a `.xml.bz2` export, chosen by extension.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = open_xml_reader(path)?;
        Ok(Self {
            reader,
            buf: Vec::with_capacity(64 * 1024),
        })
    }

    fn read_page(&mut self) -> Option<RawPage> {
        let mut in_page = false;
        let mut in_revision = false;
        let mut in_contributor = false;
        let mut capture = Capture::None;
        let mut captured = String::new();
        let mut raw = RawPage::default();
        let mut rev_timestamp: Option<String> = None;
        let mut rev_contributor: Option<String> = None;

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(ev) => ev,
                Err(e) => {
                    warn!(error = %e, "Malformed XML, stopping page stream");
                    return None;
                }
            };

            match event {
                Event::Start(ref e) => match e.name().as_ref() {
                    b"page" => {
                        in_page = true;
                        raw = RawPage::default();
                    }
                    b"title" if in_page && !in_revision => capture = Capture::Title,
                    b"ns" if in_page && !in_revision => capture = Capture::Ns,
                    b"id" if in_page && !in_revision && !in_contributor && raw.id.is_none() => {
                        capture = Capture::PageId
                    }
                    b"redirect" if in_page => raw.is_redirect = true,
                    b"revision" if in_page => {
                        in_revision = true;
                        rev_timestamp = None;
                        rev_contributor = None;
                    }
                    b"timestamp" if in_revision => capture = Capture::Timestamp,
                    b"text" if in_revision => capture = Capture::Text,
                    b"contributor" if in_revision => in_contributor = true,
                    b"username" if in_contributor => capture = Capture::Username,
                    b"ip" if in_contributor => capture = Capture::Ip,
                    _ => {}
                },
                Event::Empty(ref e) => {
                    if in_page && e.name().as_ref() == b"redirect" {
                        raw.is_redirect = true;
                    }
                }
                Event::Text(ref e) => {
                    if capture != Capture::None {
                        match e.unescape() {
                            Ok(text) => captured.push_str(&text),
                            Err(e) => warn!(error = %e, "Unescapable text node, dropping"),
                        }
                    }
                }
                Event::CData(e) => {
                    if capture != Capture::None {
                        captured.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::End(ref e) => {
                    match e.name().as_ref() {
                        b"title" => raw.title = Some(std::mem::take(&mut captured)),
                        b"ns" => raw.ns = Some(std::mem::take(&mut captured)),
                        b"id" if capture == Capture::PageId => {
                            raw.id = Some(std::mem::take(&mut captured))
                        }
                        b"timestamp" if capture == Capture::Timestamp => {
                            rev_timestamp = Some(std::mem::take(&mut captured))
                        }
                        // The latest revision's body wins; earlier ones are
                        // overwritten as the stream advances.
                        b"text" if capture == Capture::Text => {
                            raw.text = Some(std::mem::take(&mut captured))
                        }
                        b"username" if capture == Capture::Username => {
                            rev_contributor = Some(std::mem::take(&mut captured))
                        }
                        b"ip" if capture == Capture::Ip => {
                            rev_contributor = Some(format!("IP:{}", std::mem::take(&mut captured)))
                        }
                        b"contributor" => in_contributor = false,
                        b"revision" => {
                            in_revision = false;
                            raw.revisions.push(Revision {
                                timestamp: rev_timestamp.take().unwrap_or_default(),
                                contributor: rev_contributor
                                    .take()
                                    .unwrap_or_else(|| UNKNOWN_CONTRIBUTOR.to_string()),
                            });
                        }
                        b"page" => return Some(raw),
                        _ => {}
                    }
                    capture = Capture::None;
                    captured.clear();
                }
                Event::Eof => return None,
                _ => {}
            }
        }
    }
}

impl Iterator for DumpReader {
    type Item = RawPage;

    fn next(&mut self) -> Option<RawPage> {
        self.read_page()
    }
}

/// Opens an export file as a buffered XML event reader, decompressing
/// `.bz2` transparently.
pub(crate) fn open_xml_reader(path: &Path) -> Result<Reader<Box<dyn BufRead>>> {
    if !path.is_file() {
        return Err(PipelineError::DumpNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let file =
        File::open(path).with_context(|| format!("Failed to open export at: {}", path.display()))?;

    let inner: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "bz2") {
        Box::new(BufReader::with_capacity(256 * 1024, BzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(256 * 1024, file))
    };

    Ok(Reader::from_reader(inner))
}

/// Resolves the export path: a file is used as-is, a directory is searched
/// for the first `.xml`/`.xml.bz2` entry in name order.
pub fn discover_dump(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    if path.is_dir() {
        let mut candidates: Vec<PathBuf> = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory: {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                name.ends_with(".xml") || name.ends_with(".xml.bz2")
            })
            .collect();
        candidates.sort();
        if let Some(found) = candidates.into_iter().next() {
            return Ok(found);
        }
    }

    Err(PipelineError::DumpNotFound {
        path: path.to_path_buf(),
    }
    .into())
}
