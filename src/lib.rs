//! TextMate grammar parsing and theme-driven syntax highlighting.
//!
//! Grammars and themes are loaded into process-wide registries
//! ([`GrammarRegistry::global`], [`ThemeRegistry::global`]). A
//! [`Parser`](parser::Parser) turns text into a [`TokenTree`] and keeps it
//! current under edits, and a [`SyntaxHighlighter`] maps the tree onto the
//! formats of a [`Document`].

pub mod config;
pub mod grammar;
pub mod highlight;
pub mod parser;
pub mod regex;
pub mod region;
pub mod theme;

use std::path::Path;

pub use grammar::{Grammar, GrammarRegistry};
pub use highlight::{Document, Font, SyntaxHighlighter};
pub use parser::TokenTree;
pub use region::Region;
pub use theme::{Style, Theme, ThemeRegistry};

/// Parse `text` with the grammar for `scope_or_path`, which is either a
/// scope name loaded in the global registry or a file path. Falls back to
/// plain text.
pub fn parse(scope_or_path: &str, text: &str) -> TokenTree {
    let registry = GrammarRegistry::global();
    let grammar = registry.language_for_scope(scope_or_path).unwrap_or_else(|| {
        let file_name = Path::new(scope_or_path).file_name().and_then(|n| n.to_str());
        let first_line = text.lines().next().unwrap_or_default();
        registry.language_for_hint(file_name, first_line)
    });
    parser::parse(&registry, &grammar, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarFormat;

    #[test]
    fn parse_by_scope_or_path() {
        let registry = GrammarRegistry::global();
        let source = r#"{"scopeName": "source.libtest", "fileTypes": ["libtest"],
                         "patterns": [{"match": "\\d+", "name": "constant.numeric"}]}"#;
        assert!(registry.load_language_from_str(source, GrammarFormat::Json));

        let tree = parse("source.libtest", "a 12");
        assert_eq!(tree.grammar().scope_name(), "source.libtest");
        assert_eq!(tree.scopes_at(2), vec!["source.libtest", "constant.numeric"]);

        let tree = parse("/tmp/dir/sample.libtest", "7");
        assert_eq!(tree.grammar().scope_name(), "source.libtest");

        let tree = parse("notes.unknownext", "hello");
        assert_eq!(tree.grammar().scope_name(), grammar::PLAIN_TEXT_SCOPE);
        assert_eq!(tree.len(), 5);
    }
}
