use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, warn};

use super::document::{Document, TextChange, TextFormat};
use super::scheduler::ParsedTree;
use super::Font;
use crate::grammar::{Grammar, GrammarRegistry};
use crate::parser::{Parser, TextEdit, TokenTree};
use crate::region::Region;
use crate::theme::{Color, Style, Theme};

/// Styles resolved per scope path
type StyleCache = HashMap<String, Option<Style>>;

/// Keeps a token tree and the formats of a [`Document`] in step with its
/// edits.
///
/// The highlighter mirrors the document text as a `String` so the parser
/// can run regexes over it. Offsets in its public API are chars, like the
/// document's.
pub struct SyntaxHighlighter {
    parser: Parser,
    tree: TokenTree,
    text: String,
    theme: Arc<Theme>,
    font: Font,
    styles: StyleCache,
}

impl SyntaxHighlighter {
    pub fn new(document: &mut Document, mut parser: Parser, theme: Arc<Theme>, font: Font) -> Self {
        let tree = parser.parse(&document.text());
        Self::with_tree(document, parser, tree, theme, font)
    }

    /// Start from a tree already parsed from the document's current text,
    /// such as one from a [`ParseScheduler`](super::ParseScheduler)
    pub fn with_tree(
        document: &mut Document,
        parser: Parser,
        tree: TokenTree,
        theme: Arc<Theme>,
        font: Font,
    ) -> Self {
        let text = document.text();
        let mut highlighter = Self {
            parser,
            tree,
            text,
            theme,
            font,
            styles: HashMap::new(),
        };
        highlighter.restyle_all(document);
        highlighter
    }

    /// Highlight with the grammar picked from the document's file name or
    /// first line
    pub fn for_document(
        document: &mut Document,
        registry: Arc<GrammarRegistry>,
        theme: Arc<Theme>,
        font: Font,
    ) -> Self {
        let grammar = registry.language_for_hint(document.file_name(), &document.first_line());
        Self::new(document, Parser::new(registry, grammar), theme, font)
    }

    pub fn tree(&self) -> &TokenTree {
        &self.tree
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        self.parser.grammar()
    }

    pub fn theme(&self) -> &Arc<Theme> {
        &self.theme
    }

    pub fn font(&self) -> &Font {
        &self.font
    }

    /// Number of distinct scope paths styled so far with the current theme
    pub fn cached_styles(&self) -> usize {
        self.styles.len()
    }

    /// React to `document` having had chars `start..old_end` replaced by
    /// `new_text`. Returns the chars whose formatting was redone.
    pub fn on_document_changed(
        &mut self,
        document: &mut Document,
        start: usize,
        old_end: usize,
        new_text: &str,
    ) -> Region {
        let Some(edit) = self.mirror_edit(document, start, old_end, new_text) else {
            warn!("highlighter out of step with its document, highlighting everything");
            return self.rehighlight(document);
        };
        let reparse = self.parser.reparse(&mut self.tree, &self.text, edit);
        debug!(
            region = %reparse.region,
            resynced = reparse.resynced,
            "restyling after edit"
        );
        let region = reparse.region.cover(Region::new(edit.start, edit.new_end));
        let chars = Region::new(document.byte_to_char(region.start), document.byte_to_char(region.end));
        document.clear_formats_in(chars.start, chars.end);
        style_leaves(document, &self.tree, region, &self.theme, &self.font, &mut self.styles)
            .map_or(chars, |styled| styled.cover(chars))
    }

    pub fn apply_change(&mut self, document: &mut Document, change: &TextChange) -> Region {
        self.on_document_changed(document, change.start, change.old_end, &change.new_text)
    }

    /// Apply the edit to the mirrored text, returning it in bytes. `None`
    /// if the mirror no longer matches the document.
    fn mirror_edit(
        &mut self,
        document: &Document,
        start: usize,
        old_end: usize,
        new_text: &str,
    ) -> Option<TextEdit> {
        if old_end < start {
            return None;
        }
        // the text before the edit is unchanged, so the document knows
        // where it starts
        let start_byte = document.char_to_byte(start);
        let removed = self.text.get(start_byte..)?;
        let old_end_byte = removed
            .char_indices()
            .nth(old_end - start)
            .map_or(self.text.len(), |(i, _)| start_byte + i);
        self.text.replace_range(start_byte..old_end_byte, new_text);
        if self.text.len() != document.len_bytes() {
            return None;
        }
        Some(TextEdit {
            start: start_byte,
            old_end: old_end_byte,
            new_end: start_byte + new_text.len(),
        })
    }

    /// Throw the tree away and parse and style the whole document again
    pub fn rehighlight(&mut self, document: &mut Document) -> Region {
        self.text = document.text();
        self.tree = self.parser.parse(&self.text);
        self.restyle_all(document);
        Region::new(0, document.len_chars())
    }

    /// Adopt a tree parsed in the background. Rejected if the document
    /// moved on since the parse was scheduled.
    pub fn accept_full_parse(&mut self, document: &mut Document, parsed: ParsedTree) -> bool {
        if parsed.revision != document.revision() {
            debug!(
                parsed = parsed.revision,
                current = document.revision(),
                "discarding stale parse"
            );
            return false;
        }
        self.text = document.text();
        self.tree = parsed.tree;
        self.restyle_all(document);
        true
    }

    pub fn set_theme(&mut self, document: &mut Document, theme: Arc<Theme>) {
        self.theme = theme;
        self.styles.clear();
        self.restyle_all(document);
    }

    pub fn set_font(&mut self, document: &mut Document, font: Font) {
        self.font = font;
        self.restyle_all(document);
    }

    fn restyle_all(&mut self, document: &mut Document) {
        document.clear_formats();
        let all = Region::new(0, self.tree.len());
        style_leaves(document, &self.tree, all, &self.theme, &self.font, &mut self.styles);
    }

    /// Chars covered by the innermost scoped node at char `point`
    pub fn scope_extent(&self, point: usize) -> Option<Region> {
        let pos = self.byte_at(point)?;
        let region = self.tree.node(self.tree.innermost_scoped_at(pos)).region;
        Some(Region::new(self.char_at(region.start), self.char_at(region.end)))
    }

    /// Full scope path at char `point`, outermost first
    pub fn scope_name(&self, point: usize) -> String {
        self.byte_at(point)
            .map(|pos| self.tree.scopes_at(pos).join(" "))
            .unwrap_or_default()
    }

    pub fn scope_tree(&self) -> String {
        self.tree.dump()
    }

    fn byte_at(&self, point: usize) -> Option<usize> {
        self.text.char_indices().nth(point).map(|(i, _)| i)
    }

    fn char_at(&self, byte: usize) -> usize {
        self.text.get(..byte).map_or(0, |s| s.chars().count())
    }

    /// The styled document as a `<pre>` block with inline CSS
    pub fn as_html(&self, document: &Document) -> String {
        let background = self.theme.background().unwrap_or(Color::BLACK);
        let foreground = self.theme.foreground().unwrap_or(Color::rgb(0xc0, 0xc0, 0xc0));
        let mut html = format!(
            "<pre style=\"background-color:{};color:{};{}\">",
            background.to_hex(),
            foreground.to_hex(),
            escape_html(&self.font.css())
        );

        let mut pos = 0;
        let mut spans = document.format_spans().peekable();
        while let Some(mut span) = spans.next() {
            // neighbouring leaves often share a style
            while let Some(next) = spans.next_if(|n| n.start == span.end && n.format == span.format) {
                span.end = next.end;
            }
            if span.start > pos {
                html.push_str(&escape_html(&document.slice(pos, span.start)));
            }
            let _ = write!(
                html,
                "<span style=\"{}\">{}</span>",
                style_css(&span.format.style),
                escape_html(&document.slice(span.start, span.end))
            );
            pos = span.end;
        }
        html.push_str(&escape_html(&document.slice(pos, document.len_chars())));
        html.push_str("</pre>");
        html
    }
}

/// Format every leaf of `tree` intersecting the byte `region`. Returns the
/// chars that were touched.
fn style_leaves(
    document: &mut Document,
    tree: &TokenTree,
    region: Region,
    theme: &Theme,
    font: &Font,
    styles: &mut StyleCache,
) -> Option<Region> {
    let mut leaves: Vec<(Region, String)> = Vec::new();
    tree.visit_leaves(region, |_, node, scopes| {
        leaves.push((node.region, scopes.join(" ")));
    });

    let mut touched: Option<Region> = None;
    for (bytes, path) in leaves {
        let style = match styles.get(&path).copied() {
            Some(style) => style,
            None => {
                let style = if path.is_empty() {
                    None
                } else {
                    theme.get_format(&path)
                };
                styles.insert(path, style);
                style
            }
        };
        let chars = Region::new(document.byte_to_char(bytes.start), document.byte_to_char(bytes.end));
        match style {
            Some(style) if !style.is_empty() => document.set_format(
                chars.start,
                chars.end,
                TextFormat {
                    style,
                    font: font.clone(),
                },
            ),
            _ => document.clear_formats_in(chars.start, chars.end),
        }
        touched = Some(touched.map_or(chars, |r| r.cover(chars)));
    }
    touched
}

/// Style a whole document from an already parsed tree
pub fn highlight(document: &mut Document, tree: &TokenTree, theme: &Theme, font: &Font) {
    document.clear_formats();
    let mut styles = StyleCache::new();
    style_leaves(document, tree, Region::new(0, tree.len()), theme, font, &mut styles);
}

fn style_css(style: &Style) -> String {
    let mut css = String::new();
    if let Some(fg) = style.foreground {
        let _ = write!(css, "color:{};", fg.to_hex());
    }
    if let Some(bg) = style.background {
        let _ = write!(css, "background-color:{};", bg.to_hex());
    }
    if style.is_bold() {
        css.push_str("font-weight:bold;");
    }
    if style.is_italic() {
        css.push_str("font-style:italic;");
    }
    if style.is_underline() {
        css.push_str("text-decoration:underline;");
    }
    css
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarFormat;
    use std::path::PathBuf;

    const MINI: &str = include_str!("../../testdata/Mini.tmLanguage");

    fn registry() -> Arc<GrammarRegistry> {
        let registry = GrammarRegistry::new();
        assert!(registry.load_language_from_str(MINI, GrammarFormat::Plist));
        Arc::new(registry)
    }

    fn monokai() -> Arc<Theme> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata/Monokai.tmTheme");
        Arc::new(Theme::load(&path).unwrap())
    }

    fn styled() -> Arc<Theme> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata/Styled.tmTheme");
        Arc::new(Theme::load(&path).unwrap())
    }

    fn highlighter(doc: &mut Document) -> SyntaxHighlighter {
        let parser = Parser::for_scope(registry(), "source.mini");
        SyntaxHighlighter::new(doc, parser, monokai(), Font::default())
    }

    fn fg_at(doc: &Document, pos: usize) -> Option<Color> {
        doc.format_at(pos).and_then(|f| f.style.foreground)
    }

    const KEYWORD: Color = Color::from_u32(0xF92672);
    const NUMBER: Color = Color::from_u32(0xAE81FF);
    /// Plain text falls back to the theme's global colors
    const TEXT: Color = Color::from_u32(0xF8F8F2);

    #[test]
    fn new_styles_every_token() {
        let mut doc = Document::from_text("if 42 // done\n");
        let hl = highlighter(&mut doc);
        assert_eq!(fg_at(&doc, 0), Some(KEYWORD));
        assert_eq!(fg_at(&doc, 3), Some(NUMBER));
        assert_eq!(fg_at(&doc, 6), Some(Color::from_u32(0x75715E)));
        assert_eq!(hl.grammar().scope_name(), "source.mini");
    }

    #[test]
    fn edits_restyle_the_changed_region() {
        let mut doc = Document::from_text("x 1\nwhile 2\n");
        let mut hl = highlighter(&mut doc);
        assert_eq!(fg_at(&doc, 0), Some(TEXT));

        let change = doc.replace(0, 1, "if");
        let region = hl.apply_change(&mut doc, &change);
        assert!(region.covers(Region::new(0, 2)));
        assert_eq!(fg_at(&doc, 0), Some(KEYWORD));
        assert_eq!(fg_at(&doc, 1), Some(KEYWORD));
        // untouched lines keep their formats
        assert_eq!(fg_at(&doc, 5), Some(KEYWORD));
        assert_eq!(fg_at(&doc, 11), Some(NUMBER));

        let change = doc.remove(0, 2);
        hl.apply_change(&mut doc, &change);
        assert_eq!(doc.text(), " 1\nwhile 2\n");
        assert_eq!(fg_at(&doc, 1), Some(NUMBER));
        assert_eq!(fg_at(&doc, 0), Some(TEXT));
    }

    #[test]
    fn incremental_matches_full_highlight() {
        let mut doc = Document::from_text("fn main {\n  if 1 { \"a\\n\" }\n}\n");
        let mut hl = highlighter(&mut doc);
        let edits = [(10, 10, "while 3 "), (0, 2, "x"), (12, 14, "/* é */"), (5, 5, "\"")];
        for (start, end, text) in edits {
            let change = doc.replace(start, end, text);
            hl.apply_change(&mut doc, &change);

            let mut fresh = Document::from_text(&doc.text());
            highlighter(&mut fresh);
            let ours: Vec<_> = doc.format_spans().collect();
            let full: Vec<_> = fresh.format_spans().collect();
            // span boundaries may differ where neighbours share a style
            for pos in 0..doc.len_chars() {
                assert_eq!(doc.format_at(pos), fresh.format_at(pos), "at {pos} in {:?}", doc.text());
            }
            assert!(!ours.is_empty() && !full.is_empty());
        }
    }

    #[test]
    fn style_lookups_are_cached_per_path() {
        let mut doc = Document::from_text(&"if 1\n".repeat(50));
        let mut hl = highlighter(&mut doc);
        // root text, keyword and number
        assert_eq!(hl.cached_styles(), 3);
        let change = doc.insert(0, "while ");
        hl.apply_change(&mut doc, &change);
        assert_eq!(hl.cached_styles(), 3);
        let change = doc.insert(0, "// note\n");
        hl.apply_change(&mut doc, &change);
        assert_eq!(hl.cached_styles(), 4);
    }

    #[test]
    fn out_of_step_document_rehighlights() {
        let mut doc = Document::from_text("if 1\n");
        let mut hl = highlighter(&mut doc);
        doc.insert(0, "while ");
        // report a different edit than the one made
        let region = hl.on_document_changed(&mut doc, 0, 0, "x");
        assert_eq!(region, Region::new(0, doc.len_chars()));
        assert_eq!(hl.scope_name(0), "source.mini keyword.control.mini");
        assert_eq!(fg_at(&doc, 6), Some(KEYWORD));
    }

    #[test]
    fn scope_queries() {
        let mut doc = Document::from_text("é \"a\\n\"");
        let hl = highlighter(&mut doc);
        assert_eq!(hl.scope_name(0), "source.mini");
        assert_eq!(
            hl.scope_name(4),
            "source.mini string.quoted.double.mini constant.character.escape.mini"
        );
        assert_eq!(hl.scope_extent(4), Some(Region::new(4, 6)));
        assert_eq!(hl.scope_extent(3), Some(Region::new(2, 7)));
        assert_eq!(hl.scope_extent(0), Some(Region::new(0, 7)));
        assert_eq!(hl.scope_extent(7), None);
        assert_eq!(hl.scope_name(7), "");
        assert!(hl.scope_tree().starts_with("source.mini [0, 8)"));
    }

    #[test]
    fn theme_and_font_changes_restyle() {
        let mut doc = Document::from_text("if \"s\"");
        let mut hl = highlighter(&mut doc);
        assert_eq!(fg_at(&doc, 0), Some(KEYWORD));

        hl.set_theme(&mut doc, styled());
        let keyword = doc.format_at(0).unwrap();
        assert_eq!(keyword.style.foreground, Some(Color::from_u32(0x0000FF)));
        assert!(keyword.style.is_bold());
        let string = doc.format_at(4).unwrap();
        assert_eq!(string.style.foreground, Some(Color::from_u32(0x00AA00)));
        assert!(string.style.is_italic());

        hl.set_font(&mut doc, Font::new("Iosevka", 14.0));
        assert_eq!(doc.format_at(0).unwrap().font.family, "Iosevka");
        assert_eq!(hl.font().size, 14.0);
    }

    #[test]
    fn html_export() {
        let mut doc = Document::from_text("if a<b");
        let hl = highlighter(&mut doc);
        let html = hl.as_html(&doc);
        assert_eq!(
            html,
            "<pre style=\"background-color:#272822;color:#f8f8f2;font-family:monospace;font-size:12pt\">\
             <span style=\"color:#f92672;background-color:#272822;\">if</span>\
             <span style=\"color:#f8f8f2;background-color:#272822;\"> a&lt;b</span></pre>"
        );
    }

    #[test]
    fn free_highlight_function() {
        let registry = registry();
        let grammar = registry.language_for_scope("source.mini").unwrap();
        let tree = crate::parser::parse(&registry, &grammar, "return 7");
        let mut doc = Document::from_text("return 7");
        highlight(&mut doc, &tree, &monokai(), &Font::default());
        assert_eq!(fg_at(&doc, 0), Some(KEYWORD));
        assert_eq!(fg_at(&doc, 7), Some(NUMBER));
    }
}
