//! Splitting documents into generation units.
//!
//! A document containing the separator character (`|` by default) is split
//! strictly on it. Anything else goes through [`split_and_recombine`], which
//! packs whole sentences into chunks of roughly `desired_length` characters
//! and never exceeds `max_length`.

use std::path::Path;

use derive_builder::Builder;

use crate::error::SegmentationError;

/// One atomic span of text submitted to synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationUnit {
    /// Stable 0-based position; combine order follows it.
    pub segment_index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct SegmenterConfig {
    /// Explicit split marker. Its presence disables automatic splitting.
    pub separator: char,
    /// Chunk length the recombiner aims for, in characters.
    pub desired_length: usize,
    /// Hard upper bound on automatic chunk length, in characters.
    pub max_length: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            separator: '|',
            desired_length: 200,
            max_length: 300,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    /// Split raw text into ordered, trimmed, non-empty pieces.
    pub fn segment(&self, raw: &str) -> Vec<String> {
        if raw.contains(self.config.separator) {
            log::info!(
                "Found '{}' in the text, splitting on it instead of automatic recombination",
                self.config.separator
            );
            return raw
                .split(self.config.separator)
                .map(str::trim)
                .filter(|piece| !piece.is_empty())
                .map(str::to_string)
                .collect();
        }
        split_and_recombine(raw, self.config.desired_length, self.config.max_length)
    }

    /// Read a document and turn it into generation units.
    pub fn segment_document(&self, path: &Path) -> Result<Vec<GenerationUnit>, SegmentationError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SegmentationError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let units: Vec<GenerationUnit> = self
            .segment(&raw)
            .into_iter()
            .enumerate()
            .map(|(segment_index, text)| GenerationUnit {
                segment_index,
                text,
            })
            .collect();

        if units.is_empty() {
            return Err(SegmentationError::Empty(path.to_path_buf()));
        }
        Ok(units)
    }
}

/// Pack text into speakable chunks while keeping sentences whole.
///
/// Sentence ends (`.`, `!`, `?`) inside double quotes are not split points; a
/// closing quote followed by whitespace is. A chunk is committed once it
/// reaches `desired_length` at a sentence end. If it reaches `max_length`
/// first, it is cut back to the last sentence end when that keeps at least
/// half the desired length, otherwise to the last word boundary.
pub fn split_and_recombine(text: &str, desired_length: usize, max_length: usize) -> Vec<String> {
    let normalized = normalize(text);
    let chars: Vec<char> = normalized.chars().collect();
    let mut scan = Scanner::new(&chars);
    let mut chunks = Vec::new();
    let mut split_points: Vec<usize> = Vec::new();

    while scan.has_next() {
        let mut c = scan.forward();

        if scan.len() >= max_length {
            match split_points.last() {
                Some(&last) if scan.len() * 2 > desired_length => {
                    while scan.pos() > last {
                        scan.back();
                    }
                }
                _ => {
                    while !matches!(c, '!' | '?' | '.' | '\n' | ' ')
                        && scan.pos() > 0
                        && scan.len() > desired_length
                    {
                        c = scan.back();
                    }
                }
            }
            chunks.push(scan.take());
            split_points.clear();
        } else if !scan.in_quote()
            && (matches!(c, '!' | '?' | '\n') || (c == '.' && scan.peek_is(1, &['\n', ' '])))
        {
            while scan.has_next() && scan.len() < max_length && scan.peek_is(1, &['!', '?', '.']) {
                scan.forward();
            }
            split_points.push(scan.pos());
            if scan.len() >= desired_length {
                chunks.push(scan.take());
                split_points.clear();
            }
        } else if scan.in_quote() && scan.peek(1) == Some('"') && scan.peek_is(2, &['\n', ' ']) {
            scan.forward();
            if scan.has_next() {
                scan.forward();
            }
            split_points.push(scan.pos());
        }
    }
    chunks.push(scan.take());

    chunks
        .into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| !chunk.is_empty() && !is_only_punctuation(chunk))
        .collect()
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(['\u{201c}', '\u{201d}'], "\"")
}

fn is_only_punctuation(chunk: &str) -> bool {
    chunk
        .chars()
        .all(|c| c.is_whitespace() || matches!(c, '.' | ',' | ';' | ':' | '!' | '?'))
}

/// Cursor over the normalized text that accumulates the current chunk.
struct Scanner<'a> {
    chars: &'a [char],
    /// Index of the last consumed char; `None` before the first step.
    pos: Option<usize>,
    current: Vec<char>,
    in_quote: bool,
}

impl<'a> Scanner<'a> {
    fn new(chars: &'a [char]) -> Self {
        Self {
            chars,
            pos: None,
            current: Vec::new(),
            in_quote: false,
        }
    }

    fn has_next(&self) -> bool {
        self.pos.map_or(0, |p| p + 1) < self.chars.len()
    }

    fn pos(&self) -> usize {
        self.pos.unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.current.len()
    }

    fn in_quote(&self) -> bool {
        self.in_quote
    }

    fn forward(&mut self) -> char {
        let next = self.pos.map_or(0, |p| p + 1);
        self.pos = Some(next);
        let c = self.chars[next];
        self.current.push(c);
        if c == '"' {
            self.in_quote = !self.in_quote;
        }
        c
    }

    fn back(&mut self) -> char {
        let prev = self.pos().saturating_sub(1);
        self.pos = Some(prev);
        self.current.pop();
        let c = self.chars[prev];
        if c == '"' {
            self.in_quote = !self.in_quote;
        }
        c
    }

    fn peek(&self, delta: usize) -> Option<char> {
        let at = self.pos.map_or(delta.checked_sub(1), |p| Some(p + delta))?;
        self.chars.get(at).copied()
    }

    /// True when the char `delta` ahead is one of `set`, or past the end.
    fn peek_is(&self, delta: usize, set: &[char]) -> bool {
        self.peek(delta).map_or(true, |c| set.contains(&c))
    }

    fn take(&mut self) -> String {
        std::mem::take(&mut self.current).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{split_and_recombine, Segmenter, SegmenterConfigBuilder};
    use crate::error::SegmentationError;

    #[test]
    fn explicit_separator_wins_over_recombination() {
        let config = SegmenterConfigBuilder::default()
            .desired_length(5)
            .max_length(8)
            .build()
            .expect("config");
        let segmenter = Segmenter::new(config);

        assert_eq!(
            segmenter.segment("Hello there|Goodbye now"),
            vec!["Hello there".to_string(), "Goodbye now".to_string()]
        );
    }

    #[test]
    fn separator_pieces_are_trimmed_and_blank_ones_dropped() {
        let segmenter = Segmenter::default();
        assert_eq!(
            segmenter.segment("  One. |\n Two. || "),
            vec!["One.".to_string(), "Two.".to_string()]
        );
    }

    #[test]
    fn short_text_stays_in_one_chunk() {
        assert_eq!(
            split_and_recombine("Hello there.   How are you?\n\nFine.", 200, 300),
            vec!["Hello there. How are you? Fine.".to_string()]
        );
    }

    #[test]
    fn commits_at_sentence_end_once_desired_length_is_reached() {
        let chunks = split_and_recombine("Aaaa bbbb. Cccc dddd. Eeee.", 8, 40);
        assert_eq!(
            chunks,
            vec![
                "Aaaa bbbb.".to_string(),
                "Cccc dddd.".to_string(),
                "Eeee.".to_string()
            ]
        );
    }

    #[test]
    fn quoted_sentence_ends_do_not_split() {
        let chunks = split_and_recombine("He said \"Stop. Now.\" Then left.", 5, 25);
        assert_eq!(
            chunks,
            vec!["He said \"Stop. Now.\"".to_string(), "Then left.".to_string()]
        );
    }

    #[test]
    fn chunks_never_exceed_max_length() {
        let text = "word ".repeat(200);
        let chunks = split_and_recombine(&text, 50, 80);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 80, "chunk too long: {chunk:?}");
            assert!(!chunk.starts_with("ord"), "split inside a word: {chunk:?}");
        }
        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split_whitespace()).collect();
        assert_eq!(rejoined.len(), 200);
    }

    #[test]
    fn punctuation_only_chunks_are_dropped() {
        assert!(split_and_recombine(" . ! ", 200, 300).is_empty());
    }

    #[test]
    fn empty_document_is_a_segmentation_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "  \n ").expect("write");

        let err = Segmenter::default()
            .segment_document(&path)
            .expect_err("empty document");
        assert!(matches!(err, SegmentationError::Empty(_)));
    }

    #[test]
    fn units_are_indexed_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "A|B|C").expect("write");

        let units = Segmenter::default().segment_document(&path).expect("units");
        let indexed: Vec<(usize, &str)> = units
            .iter()
            .map(|u| (u.segment_index, u.text.as_str()))
            .collect();
        assert_eq!(indexed, vec![(0, "A"), (1, "B"), (2, "C")]);
    }
}
