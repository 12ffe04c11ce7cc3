//! Unicode word motion
//!
//! Word boundaries come from the ICU segmenter, which uses dictionaries for
//! scripts written without spaces. A run like `単語単位に分割する` splits
//! into 単語 / 単位 / に / 分割 / する instead of one long word. All offsets
//! here are char offsets into the given text.

use std::ops::Range;

use icu_segmenter::WordSegmenter;

thread_local! {
    static SEGMENTER: WordSegmenter = WordSegmenter::new_auto();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: usize,
    end: usize,
    word_like: bool,
}

fn segments(text: &str) -> Vec<Segment> {
    let mut byte_segments = Vec::new();
    SEGMENTER.with(|segmenter| {
        let mut breaks = segmenter.segment_str(text);
        let mut prev = 0;
        while let Some(boundary) = breaks.next() {
            if boundary == 0 {
                continue;
            }
            byte_segments.push((prev, boundary, breaks.is_word_like()));
            prev = boundary;
        }
    });

    // Byte offsets to char offsets, walking the text once
    let mut result = Vec::with_capacity(byte_segments.len());
    let mut chars_before = 0;
    for (start, end, word_like) in byte_segments {
        let len = text[start..end].chars().count();
        result.push(Segment {
            start: chars_before,
            end: chars_before + len,
            word_like,
        });
        chars_before += len;
    }
    result
}

/// End of the next word ending after `pos`, or the end of the text
pub fn next_word_end(text: &str, pos: usize) -> usize {
    segments(text)
        .into_iter()
        .find(|s| s.word_like && s.end > pos)
        .map(|s| s.end)
        .unwrap_or_else(|| text.chars().count())
}

/// Start of the closest word starting before `pos`, or 0
pub fn previous_word_start(text: &str, pos: usize) -> usize {
    segments(text)
        .into_iter()
        .rev()
        .find(|s| s.word_like && s.start < pos)
        .map(|s| s.start)
        .unwrap_or(0)
}

/// Start of the word containing `pos`. A position just past the last char
/// of a word counts as inside it. Outside any word `pos` is returned.
pub fn start_of_word(text: &str, pos: usize) -> usize {
    word_at(text, pos).map(|w| w.start).unwrap_or(pos)
}

/// End of the word containing `pos`, or `pos` outside any word
pub fn end_of_word(text: &str, pos: usize) -> usize {
    word_at(text, pos).map(|w| w.end).unwrap_or(pos)
}

/// Char range of the word at `pos`
pub fn word_at(text: &str, pos: usize) -> Option<Range<usize>> {
    let segments = segments(text);
    segments
        .iter()
        .find(|s| s.word_like && s.start <= pos && pos < s.end)
        .or_else(|| segments.iter().find(|s| s.word_like && s.end == pos))
        .map(|s| s.start..s.end)
}
