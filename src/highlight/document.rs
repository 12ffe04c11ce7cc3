use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use ropey::Rope;

use super::Font;
use crate::theme::Style;

/// Visual formatting of a run of characters
#[derive(Debug, Clone, PartialEq)]
pub struct TextFormat {
    pub style: Style,
    pub font: Font,
}

/// A formatted run, in char offsets
#[derive(Debug, Clone, PartialEq)]
pub struct FormatSpan {
    pub start: usize,
    pub end: usize,
    pub format: TextFormat,
}

/// A replacement made by [`Document::replace`], in both char and byte
/// offsets of the text before the edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    pub start: usize,
    pub old_end: usize,
    pub new_text: String,
    pub start_byte: usize,
    pub old_end_byte: usize,
    /// Revision of the document after the edit
    pub revision: u64,
}

impl TextChange {
    pub fn new_end(&self) -> usize {
        self.start + self.new_text.chars().count()
    }

    pub fn new_end_byte(&self) -> usize {
        self.start_byte + self.new_text.len()
    }
}

/// Text plus the formatting a highlighter put on it.
///
/// Formats are kept apart from the text and move with it when the text
/// is edited. Every edit bumps the revision.
pub struct Document {
    text: Rope,
    path: Option<PathBuf>,
    /// Non-overlapping spans keyed by start char
    formats: BTreeMap<usize, (usize, TextFormat)>,
    revision: u64,
}

impl Document {
    pub fn new() -> Self {
        Self {
            text: Rope::new(),
            path: None,
            formats: BTreeMap::new(),
            revision: 0,
        }
    }

    pub fn from_text(s: &str) -> Self {
        Self {
            text: Rope::from_str(s),
            ..Self::new()
        }
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let text = Rope::from_reader(File::open(path)?)?;
        Ok(Self {
            text,
            path: Some(path.to_path_buf()),
            ..Self::new()
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// File name, used to pick a grammar
    pub fn file_name(&self) -> Option<&str> {
        self.path.as_deref()?.file_name()?.to_str()
    }

    pub fn rope(&self) -> &Rope {
        &self.text
    }

    pub fn text(&self) -> String {
        self.text.to_string()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len_chars(&self) -> usize {
        self.text.len_chars()
    }

    pub fn len_bytes(&self) -> usize {
        self.text.len_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.text.len_chars() == 0
    }

    pub fn line_count(&self) -> usize {
        self.text.len_lines()
    }

    pub fn line(&self, idx: usize) -> ropey::RopeSlice<'_> {
        self.text.line(idx)
    }

    /// The first line without its line break
    pub fn first_line(&self) -> String {
        if self.text.len_chars() == 0 {
            return String::new();
        }
        let line = self.text.line(0).to_string();
        line.trim_end_matches(['\n', '\r']).to_string()
    }

    pub fn char_to_byte(&self, char_idx: usize) -> usize {
        self.text.char_to_byte(char_idx.min(self.text.len_chars()))
    }

    pub fn byte_to_char(&self, byte_idx: usize) -> usize {
        self.text.byte_to_char(byte_idx.min(self.text.len_bytes()))
    }

    /// Text of the chars `start..end`
    pub fn slice(&self, start: usize, end: usize) -> String {
        let end = end.min(self.text.len_chars());
        let start = start.min(end);
        self.text.slice(start..end).to_string()
    }

    /// Replace chars `start..end` with `text`. Formats after the edit move
    /// with the text; the inserted text starts out unformatted.
    pub fn replace(&mut self, start: usize, end: usize, text: &str) -> TextChange {
        let len = self.text.len_chars();
        let end = end.min(len);
        let start = start.min(end);
        let start_byte = self.text.char_to_byte(start);
        let old_end_byte = self.text.char_to_byte(end);

        self.text.remove(start..end);
        self.text.insert(start, text);
        self.shift_formats(start, end, text.chars().count());
        self.revision += 1;

        TextChange {
            start,
            old_end: end,
            new_text: text.to_string(),
            start_byte,
            old_end_byte,
            revision: self.revision,
        }
    }

    pub fn insert(&mut self, at: usize, text: &str) -> TextChange {
        self.replace(at, at, text)
    }

    pub fn remove(&mut self, start: usize, end: usize) -> TextChange {
        self.replace(start, end, "")
    }

    fn shift_formats(&mut self, start: usize, end: usize, inserted: usize) {
        let moved = self.formats.split_off(&start);
        // A span running into the edit from the left keeps its left part
        if let Some((&s, (e, _))) = self.formats.range_mut(..start).next_back() {
            if *e > start {
                let right_end = *e;
                *e = start;
                let format = self.formats[&s].1.clone();
                if right_end > end {
                    let shifted = right_end - end + start + inserted;
                    self.formats.insert(start + inserted, (shifted, format));
                }
            }
        }
        for (s, (e, format)) in moved {
            if e <= end {
                continue;
            }
            let new_start = s.max(end) - end + start + inserted;
            let new_end = e - end + start + inserted;
            self.formats.insert(new_start, (new_end, format));
        }
    }

    /// Format chars `start..end`, replacing whatever was there
    pub fn set_format(&mut self, start: usize, end: usize, format: TextFormat) {
        if start >= end {
            return;
        }
        self.clear_formats_in(start, end);
        self.formats.insert(start, (end, format));
    }

    /// Remove formatting from chars `start..end`
    pub fn clear_formats_in(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        if let Some((&s, (e, format))) = self.formats.range(..start).next_back() {
            if *e > start {
                let (e, format) = (*e, format.clone());
                self.formats.insert(s, (start, format.clone()));
                if e > end {
                    self.formats.insert(end, (e, format));
                }
            }
        }
        let inside: Vec<usize> = self.formats.range(start..end).map(|(&s, _)| s).collect();
        for s in inside {
            if let Some((e, format)) = self.formats.remove(&s) {
                if e > end {
                    self.formats.insert(end, (e, format));
                }
            }
        }
    }

    pub fn clear_formats(&mut self) {
        self.formats.clear();
    }

    pub fn format_at(&self, char_idx: usize) -> Option<&TextFormat> {
        let (_, (end, format)) = self.formats.range(..=char_idx).next_back()?;
        (*end > char_idx).then_some(format)
    }

    /// Formatted spans in document order
    pub fn format_spans(&self) -> impl Iterator<Item = FormatSpan> + '_ {
        self.formats.iter().map(|(&start, (end, format))| FormatSpan {
            start,
            end: *end,
            format: format.clone(),
        })
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::Color;

    fn format(color: u32) -> TextFormat {
        TextFormat {
            style: Style::new(Color::from_u32(color)),
            font: Font::default(),
        }
    }

    fn spans(doc: &Document) -> Vec<(usize, usize)> {
        doc.format_spans().map(|s| (s.start, s.end)).collect()
    }

    #[test]
    fn new_document_is_empty() {
        let doc = Document::new();
        assert!(doc.is_empty());
        assert_eq!(doc.line_count(), 1);
        assert_eq!(doc.first_line(), "");
    }

    #[test]
    fn replace_reports_char_and_byte_offsets() {
        let mut doc = Document::from_text("héllo world");
        let change = doc.replace(2, 5, "LL");
        assert_eq!(doc.text(), "héLL world");
        assert_eq!(change.start, 2);
        assert_eq!(change.old_end, 5);
        assert_eq!(change.start_byte, 3);
        assert_eq!(change.old_end_byte, 6);
        assert_eq!(change.new_end(), 4);
        assert_eq!(change.new_end_byte(), 5);
        assert_eq!(change.revision, 1);
        assert_eq!(doc.revision(), 1);
    }

    #[test]
    fn set_format_splits_overlapping_spans() {
        let mut doc = Document::from_text("0123456789");
        doc.set_format(0, 10, format(0x111111));
        doc.set_format(3, 5, format(0x222222));
        assert_eq!(spans(&doc), vec![(0, 3), (3, 5), (5, 10)]);
        assert_eq!(doc.format_at(4), Some(&format(0x222222)));
        assert_eq!(doc.format_at(7), Some(&format(0x111111)));

        doc.clear_formats_in(2, 8);
        assert_eq!(spans(&doc), vec![(0, 2), (8, 10)]);
        assert_eq!(doc.format_at(5), None);
    }

    #[test]
    fn formats_move_with_edits() {
        let mut doc = Document::from_text("aaa bbb ccc");
        doc.set_format(0, 3, format(1));
        doc.set_format(4, 7, format(2));
        doc.set_format(8, 11, format(3));

        doc.insert(4, "xx");
        assert_eq!(doc.text(), "aaa xxbbb ccc");
        assert_eq!(spans(&doc), vec![(0, 3), (6, 9), (10, 13)]);

        // an edit inside a span keeps both sides of it
        doc.replace(7, 8, "");
        assert_eq!(doc.text(), "aaa xxbb ccc");
        assert_eq!(spans(&doc), vec![(0, 3), (6, 7), (7, 8), (9, 12)]);
        assert_eq!(doc.format_at(7), Some(&format(2)));

        doc.remove(0, 12);
        assert!(spans(&doc).is_empty());
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.mini");
        std::fs::write(&path, "fn main\n").unwrap();
        let doc = Document::load(&path).unwrap();
        assert_eq!(doc.text(), "fn main\n");
        assert_eq!(doc.file_name(), Some("main.mini"));
        assert_eq!(doc.first_line(), "fn main");
        assert!(Document::load(&dir.path().join("missing")).is_err());
    }
}
