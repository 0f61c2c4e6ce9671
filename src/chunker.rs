use crate::config::ChunkConfig;
use crate::models::Passage;
use memchr::memmem;
use std::collections::VecDeque;

/// Separator priority for recursive splitting: paragraph breaks (which also
/// bound headings after markup cleanup), line breaks, sentence boundaries,
/// then word boundaries. A run with none of these is atomic and passes
/// through whole even when it exceeds the chunk size.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Splits page text into overlapping passages along semantic separators.
///
/// Sizes are measured in characters; recorded offsets are byte offsets into
/// the input text. Output is fully determined by the input and the
/// configured sizes.
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl TextSplitter {
    /// Panics when `overlap >= chunk_size`, which would make every merge
    /// step retain at least as much as it emits.
    pub fn new(config: ChunkConfig) -> Self {
        assert!(
            config.overlap < config.chunk_size,
            "chunk overlap ({}) must be smaller than chunk size ({})",
            config.overlap,
            config.chunk_size
        );
        Self {
            chunk_size: config.chunk_size,
            overlap: config.overlap,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Splits `text` into chunk strings in document order. Each chunk is an
    /// exact (whitespace-trimmed) substring of the input.
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut raw = Vec::new();
        self.split_recursive(text, SEPARATORS, &mut raw);
        raw.into_iter()
            .map(|chunk| chunk.trim().to_string())
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }

    /// Splits a page's text and attaches page metadata plus offsets.
    ///
    /// Each passage's start offset is found by searching forward from just
    /// past the previous passage's start, so repeated substrings elsewhere
    /// in the page cannot produce false matches. If a chunk cannot be
    /// located (which a correct split never produces) the current cursor is
    /// used as a best-effort offset.
    pub fn split_page(
        &self,
        page_id: &str,
        title: &str,
        url: &str,
        namespace: &str,
        text: &str,
    ) -> Vec<Passage> {
        let bytes = text.as_bytes();
        let mut cursor = 0usize;

        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(seq, content)| {
                let start = match memmem::find(&bytes[cursor.min(bytes.len())..], content.as_bytes())
                {
                    Some(pos) => cursor + pos,
                    None => cursor,
                };
                let end = start + content.len();
                cursor = start + 1;
                Passage {
                    page_id: page_id.to_string(),
                    title: title.to_string(),
                    url: url.to_string(),
                    namespace: namespace.to_string(),
                    seq,
                    start,
                    end,
                    content,
                }
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str], out: &mut Vec<String>) {
        if char_len(text) <= self.chunk_size {
            out.push(text.to_string());
            return;
        }

        let Some((sep_idx, sep)) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| text.contains(**sep))
        else {
            // No eligible separator left: an atomic oversized unit.
            out.push(text.to_string());
            return;
        };
        let remaining = &separators[sep_idx + 1..];

        let mut pending: Vec<&str> = Vec::new();
        for piece in text.split_inclusive(sep) {
            if char_len(piece) <= self.chunk_size {
                pending.push(piece);
            } else {
                self.merge_pieces(&pending, out);
                pending.clear();
                self.split_recursive(piece, remaining, out);
            }
        }
        self.merge_pieces(&pending, out);
    }

    /// Accumulates small pieces into chunks no larger than `chunk_size`,
    /// carrying a tail of at most `overlap` characters into the next chunk.
    fn merge_pieces(&self, pieces: &[&str], out: &mut Vec<String>) {
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                out.push(window.iter().copied().collect());
                while total > self.overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    let front = window.pop_front().expect("window drained while total > 0");
                    total -= char_len(front);
                }
            }
            window.push_back(piece);
            total += len;
        }

        if !window.is_empty() {
            out.push(window.iter().copied().collect());
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
