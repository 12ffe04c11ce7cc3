//! TextMate language grammars
//!
//! A [`Grammar`] is loaded from a `.tmLanguage` plist or a
//! `.tmLanguage.json` file and never changes afterwards. Its patterns live
//! in an arena indexed by [`PatternId`]; includes are kept as keys and
//! resolved by the parser when it needs them.

mod pattern;
mod raw;
mod registry;

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::regex::CompiledRegex;
use crate::theme::ScopeSelector;

pub use pattern::{BlockRule, CaptureScopes, IncludeTarget, MatchRule, Pattern, PatternId};
pub use registry::{GrammarRegistry, InjectionGrammar};

use pattern::PatternArena;
use raw::RawGrammar;

/// Scope of the grammar used when nothing else matches
pub const PLAIN_TEXT_SCOPE: &str = "text.plain";

#[derive(Debug, Error)]
pub enum GrammarLoadError {
    #[error("failed to read grammar {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed grammar plist: {0}")]
    Plist(#[from] plist::Error),
    #[error("malformed grammar json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("grammar has no scopeName")]
    MissingScopeName,
}

/// On-disk encoding of a grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarFormat {
    Plist,
    Json,
}

impl GrammarFormat {
    /// Guess from the file name, then from the first non-blank byte
    pub fn detect(path: Option<&Path>, bytes: &[u8]) -> Self {
        let name = path
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if name.ends_with(".json") {
            return Self::Json;
        }
        if name.ends_with(".tmlanguage") || name.ends_with(".plist") {
            return Self::Plist;
        }
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Self::Json,
            _ => Self::Plist,
        }
    }
}

/// A pattern injected into other scopes
#[derive(Debug)]
pub struct Injection {
    pub selector: ScopeSelector,
    pub pattern: PatternId,
}

/// A loaded language grammar
#[derive(Debug)]
pub struct Grammar {
    scope_name: String,
    name: Option<String>,
    file_types: Vec<String>,
    first_line_match: Option<CompiledRegex>,
    injection_selector: Option<ScopeSelector>,
    hide_from_user: bool,
    root: PatternId,
    repository: HashMap<String, PatternId>,
    injections: Vec<Injection>,
    patterns: Vec<Pattern>,
}

impl Grammar {
    pub fn from_bytes(bytes: &[u8], format: GrammarFormat) -> Result<Self, GrammarLoadError> {
        let raw: RawGrammar = match format {
            GrammarFormat::Json => serde_json::from_slice(bytes)?,
            GrammarFormat::Plist => plist::from_reader(Cursor::new(bytes))?,
        };
        Self::from_raw(raw)
    }

    pub fn from_json(source: &str) -> Result<Self, GrammarLoadError> {
        Self::from_bytes(source.as_bytes(), GrammarFormat::Json)
    }

    pub fn load(path: &Path) -> Result<Self, GrammarLoadError> {
        let bytes = std::fs::read(path).map_err(|source| GrammarLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes, GrammarFormat::detect(Some(path), &bytes))
    }

    fn from_raw(raw: RawGrammar) -> Result<Self, GrammarLoadError> {
        let scope_name = raw
            .scope_name
            .filter(|s| !s.is_empty())
            .ok_or(GrammarLoadError::MissingScopeName)?;

        let mut arena = PatternArena::default();
        let root = arena.add_group(&raw.patterns);
        let repository = raw
            .repository
            .iter()
            .map(|(key, pattern)| (key.clone(), arena.add(pattern)))
            .collect();
        let injections = raw
            .injections
            .iter()
            .map(|(selector, pattern)| Injection {
                selector: ScopeSelector::parse(selector),
                pattern: arena.add(pattern),
            })
            .collect();

        Ok(Self {
            scope_name,
            name: raw.name,
            file_types: raw.file_types,
            first_line_match: raw
                .first_line_match
                .as_deref()
                .and_then(CompiledRegex::compile),
            injection_selector: raw.injection_selector.as_deref().map(ScopeSelector::parse),
            hide_from_user: raw.hide_from_user,
            root,
            repository,
            injections,
            patterns: arena.patterns,
        })
    }

    /// The fallback grammar: one scope, no patterns
    pub fn plain_text() -> Self {
        let mut arena = PatternArena::default();
        let root = arena.add_group(&[]);
        Self {
            scope_name: PLAIN_TEXT_SCOPE.to_string(),
            name: Some("Plain Text".to_string()),
            file_types: vec!["txt".to_string()],
            first_line_match: None,
            injection_selector: None,
            hide_from_user: false,
            root,
            repository: HashMap::new(),
            injections: Vec::new(),
            patterns: arena.patterns,
        }
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    /// Display name, falling back to the scope name
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.scope_name)
    }

    pub fn file_types(&self) -> &[String] {
        &self.file_types
    }

    pub fn is_hidden(&self) -> bool {
        self.hide_from_user
    }

    pub fn injection_selector(&self) -> Option<&ScopeSelector> {
        self.injection_selector.as_ref()
    }

    pub fn injections(&self) -> &[Injection] {
        &self.injections
    }

    /// The group holding the grammar's top-level patterns
    pub fn root(&self) -> PatternId {
        self.root
    }

    pub fn pattern(&self, id: PatternId) -> &Pattern {
        &self.patterns[id]
    }

    pub fn repository_entry(&self, key: &str) -> Option<PatternId> {
        self.repository.get(key).copied()
    }

    /// True if `line` matches the grammar's `firstLineMatch`
    pub fn matches_first_line(&self, line: &str) -> bool {
        self.first_line_match
            .as_ref()
            .is_some_and(|re| re.is_match(line))
    }

    /// True if a file with this name belongs to the grammar, either through
    /// its extension or its full name (`Makefile`, `.bashrc`)
    pub fn matches_file_name(&self, file_name: &str) -> bool {
        self.file_types.iter().any(|ft| {
            file_name == ft
                || file_name
                    .strip_suffix(ft.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>scopeName</key>
    <string>source.mini</string>
    <key>fileTypes</key>
    <array><string>mini</string><string>Minifile</string></array>
    <key>firstLineMatch</key>
    <string>^#!.*\bmini\b</string>
    <key>patterns</key>
    <array>
        <dict>
            <key>match</key>
            <string>\b(if|else)\b</string>
            <key>name</key>
            <string>keyword.control.mini</string>
        </dict>
        <dict>
            <key>include</key>
            <string>#strings</string>
        </dict>
    </array>
    <key>repository</key>
    <dict>
        <key>strings</key>
        <dict>
            <key>begin</key>
            <string>"</string>
            <key>end</key>
            <string>"</string>
            <key>name</key>
            <string>string.quoted.double.mini</string>
            <key>applyEndPatternLast</key>
            <integer>1</integer>
        </dict>
    </dict>
</dict>
</plist>"#;

    #[test]
    fn test_load_plist_grammar() {
        let grammar = Grammar::from_bytes(PLIST.as_bytes(), GrammarFormat::Plist).unwrap();
        assert_eq!(grammar.scope_name(), "source.mini");
        assert_eq!(grammar.name(), "source.mini");
        let Pattern::Group(top) = grammar.pattern(grammar.root()) else {
            panic!("root should be a group");
        };
        assert_eq!(top.len(), 2);
        let strings = grammar.repository_entry("strings").unwrap();
        let Pattern::Block(rule) = grammar.pattern(strings) else {
            panic!("strings should be a block");
        };
        assert!(rule.apply_end_pattern_last);
        assert_eq!(rule.name.as_deref(), Some("string.quoted.double.mini"));
    }

    #[test]
    fn test_missing_scope_name() {
        assert!(matches!(
            Grammar::from_json(r#"{"patterns": []}"#),
            Err(GrammarLoadError::MissingScopeName)
        ));
        assert!(matches!(
            Grammar::from_json("{not json"),
            Err(GrammarLoadError::Json(_))
        ));
    }

    #[test]
    fn test_file_name_and_first_line() {
        let grammar = Grammar::from_bytes(PLIST.as_bytes(), GrammarFormat::Plist).unwrap();
        assert!(grammar.matches_file_name("main.mini"));
        assert!(grammar.matches_file_name("Minifile"));
        assert!(!grammar.matches_file_name("main.minix"));
        assert!(!grammar.matches_file_name("xmini"));
        assert!(grammar.matches_first_line("#!/usr/bin/env mini"));
        assert!(!grammar.matches_first_line("#!/bin/sh"));
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            GrammarFormat::detect(Some(Path::new("a.tmLanguage.json")), b""),
            GrammarFormat::Json
        );
        assert_eq!(
            GrammarFormat::detect(Some(Path::new("a.tmLanguage")), b"{"),
            GrammarFormat::Plist
        );
        assert_eq!(GrammarFormat::detect(None, b"  \n{}"), GrammarFormat::Json);
        assert_eq!(GrammarFormat::detect(None, b"<?xml"), GrammarFormat::Plist);
    }

    #[test]
    fn test_plain_text() {
        let grammar = Grammar::plain_text();
        assert_eq!(grammar.scope_name(), PLAIN_TEXT_SCOPE);
        assert_eq!(grammar.name(), "Plain Text");
        assert!(matches!(grammar.pattern(grammar.root()), Pattern::Group(p) if p.is_empty()));
    }
}
