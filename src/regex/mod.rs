//! Oniguruma regular expressions as used by TextMate grammars
//!
//! Grammars are written against Ruby regex syntax: `^`/`$` anchor at line
//! boundaries, `\G` anchors at the position a search starts from, and
//! look-around and possessive groups are common. Searches always run over
//! the whole document text starting at an offset, so look-behind sees the
//! text before that offset.

mod backref;
pub mod words;

use std::sync::OnceLock;

use onig::{RegexOptions, SearchOptions, Syntax};
use thiserror::Error;

use crate::region::Region;

pub use backref::EndPattern;

/// A pattern that failed to compile
#[derive(Debug, Clone, Error)]
#[error("invalid regex `{pattern}`: {message}")]
pub struct RegexCompileError {
    pub pattern: String,
    pub message: String,
}

/// Capture groups of a single match, indexed positionally.
///
/// Index 0 is the whole match. Groups that did not participate are `None`
/// so indices always line up with the pattern's group numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captures {
    groups: Vec<Option<Region>>,
}

impl Captures {
    pub fn new(groups: Vec<Option<Region>>) -> Self {
        debug_assert!(groups.first().is_some_and(Option::is_some));
        Self { groups }
    }

    /// Region of the whole match
    pub fn whole(&self) -> Region {
        self.groups
            .first()
            .copied()
            .flatten()
            .unwrap_or_default()
    }

    pub fn start(&self) -> usize {
        self.whole().start
    }

    pub fn end(&self) -> usize {
        self.whole().end
    }

    pub fn get(&self, index: usize) -> Option<Region> {
        self.groups.get(index).copied().flatten()
    }

    /// Number of groups including the whole match
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Region)> + '_ {
        self.groups
            .iter()
            .enumerate()
            .filter_map(|(i, group)| group.map(|region| (i, region)))
    }
}

/// A compiled Oniguruma pattern
pub struct CompiledRegex {
    source: String,
    regex: onig::Regex,
    /// The same pattern with empty matches rejected, built on first use
    non_empty: OnceLock<Option<onig::Regex>>,
    anchored: bool,
}

impl CompiledRegex {
    pub fn try_compile(pattern: &str) -> Result<Self, RegexCompileError> {
        if pattern.is_empty() {
            return Err(RegexCompileError {
                pattern: String::new(),
                message: "empty pattern".to_string(),
            });
        }

        let regex = onig::Regex::with_options(
            pattern,
            RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
            Syntax::ruby(),
        )
        .map_err(|e| RegexCompileError {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            non_empty: OnceLock::new(),
            anchored: pattern.contains("\\G"),
        })
    }

    /// Compile a pattern, logging and returning `None` if it is invalid
    pub fn compile(pattern: &str) -> Option<Self> {
        match Self::try_compile(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True if the pattern uses `\G`, whose meaning depends on where the
    /// search started. Such results can't be reused from another offset.
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Find the leftmost match starting at or after `start`.
    ///
    /// `start` must sit on a char boundary of `text`.
    pub fn find_first_submatch_from(&self, text: &str, start: usize) -> Option<Captures> {
        search(&self.regex, text, start)
    }

    /// Leftmost non-empty match starting at or after `start`. An empty
    /// match doesn't hide a longer alternative at the same offset, so
    /// `a*|b` finds the `b` in "b".
    pub fn find_non_empty_from(&self, text: &str, mut start: usize) -> Option<Captures> {
        let non_empty = self.non_empty.get_or_init(|| {
            onig::Regex::with_options(
                &self.source,
                RegexOptions::REGEX_OPTION_CAPTURE_GROUP | RegexOptions::REGEX_OPTION_FIND_NOT_EMPTY,
                Syntax::ruby(),
            )
            .ok()
        });
        if let Some(regex) = non_empty {
            return search(regex, text, start);
        }
        loop {
            let captures = self.find_first_submatch_from(text, start)?;
            if !captures.whole().is_empty() {
                return Some(captures);
            }
            start = next_char_boundary(text, captures.start())?;
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.find_first_submatch_from(text, 0).is_some()
    }
}

impl std::fmt::Debug for CompiledRegex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CompiledRegex").field(&self.source).finish()
    }
}

fn search(regex: &onig::Regex, text: &str, start: usize) -> Option<Captures> {
    if start > text.len() {
        return None;
    }

    let mut region = onig::Region::new();
    regex.search_with_options(
        text,
        start,
        text.len(),
        SearchOptions::SEARCH_OPTION_NONE,
        Some(&mut region),
    )?;

    let groups = (0..region.len())
        .map(|i| region.pos(i).map(|(s, e)| Region::new(s, e)))
        .collect();
    Some(Captures::new(groups))
}

/// Compile a pattern, returning `None` on invalid syntax
pub fn compile(pattern: &str) -> Option<CompiledRegex> {
    CompiledRegex::compile(pattern)
}

/// Escape regex metacharacters so `text` matches literally
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '^'
                | '$'
                | '.'
                | '|'
                | '?'
                | '*'
                | '+'
                | '('
                | ')'
                | '['
                | ']'
                | '{'
                | '}'
                | '-'
                | '/'
                | '#'
                | ' '
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Byte offset of the char after the one starting at `pos`
pub fn next_char_boundary(text: &str, pos: usize) -> Option<usize> {
    text.get(pos..)?
        .chars()
        .next()
        .map(|c| pos + c.len_utf8())
}
