//! Applying a theme to parsed text.
//!
//! A [`Document`] holds the text and the formats, a [`SyntaxHighlighter`]
//! keeps those formats current as the document is edited, and a
//! [`ParseScheduler`] runs full parses off the editing thread.

mod document;
mod font;
mod highlighter;
mod scheduler;

pub use document::{Document, FormatSpan, TextChange, TextFormat};
pub use font::Font;
pub use highlighter::{SyntaxHighlighter, highlight};
pub use scheduler::{ParseScheduler, ParsedTree};
