use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};
use thiserror::Error;

use super::Color;
use super::rank::{Rank, ScopeSelector};

#[derive(Debug, Error)]
pub enum ThemeLoadError {
    #[error("failed to read theme {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed theme plist: {0}")]
    Plist(#[from] plist::Error),
    #[error("theme root is not a dictionary")]
    NotADictionary,
}

/// Bold / italic / underline flags from a `fontStyle` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FontStyle {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl FontStyle {
    pub const NONE: FontStyle = FontStyle {
        bold: false,
        italic: false,
        underline: false,
    };

    /// Parse a space-separated list such as "bold italic". Unknown words
    /// are ignored.
    pub fn parse(s: &str) -> Self {
        let mut style = Self::NONE;
        for word in s.split_whitespace() {
            match word {
                "bold" => style.bold = true,
                "italic" => style.italic = true,
                "underline" => style.underline = true,
                _ => {}
            }
        }
        style
    }
}

/// Style resolved for a scope path. Every attribute is optional; a theme
/// that never sets a background leaves `background` as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Style {
    pub foreground: Option<Color>,
    pub background: Option<Color>,
    pub font_style: Option<FontStyle>,
}

impl Style {
    pub const fn new(fg: Color) -> Self {
        Self {
            foreground: Some(fg),
            background: None,
            font_style: None,
        }
    }

    pub const fn with_bg(mut self, bg: Color) -> Self {
        self.background = Some(bg);
        self
    }

    pub const fn bold(mut self) -> Self {
        let mut font = match self.font_style {
            Some(font) => font,
            None => FontStyle::NONE,
        };
        font.bold = true;
        self.font_style = Some(font);
        self
    }

    pub const fn italic(mut self) -> Self {
        let mut font = match self.font_style {
            Some(font) => font,
            None => FontStyle::NONE,
        };
        font.italic = true;
        self.font_style = Some(font);
        self
    }

    pub fn is_bold(&self) -> bool {
        self.font_style.is_some_and(|f| f.bold)
    }

    pub fn is_italic(&self) -> bool {
        self.font_style.is_some_and(|f| f.italic)
    }

    pub fn is_underline(&self) -> bool {
        self.font_style.is_some_and(|f| f.underline)
    }

    pub fn is_empty(&self) -> bool {
        self.foreground.is_none() && self.background.is_none() && self.font_style.is_none()
    }
}

impl From<Color> for Style {
    fn from(color: Color) -> Self {
        Style::new(color)
    }
}

/// One entry of a theme's `settings` array
#[derive(Debug, Clone)]
pub struct ScopeSetting {
    pub name: Option<String>,
    pub scope: Option<String>,
    pub selector: ScopeSelector,
    /// Every color key of the entry, including ones like `caret` or
    /// `lineHighlight` that only the global entry carries
    pub colors: BTreeMap<String, Color>,
    pub style: Style,
}

impl ScopeSetting {
    pub fn new(name: &str, scope: &str, style: Style) -> Self {
        let mut colors = BTreeMap::new();
        if let Some(fg) = style.foreground {
            colors.insert("foreground".to_string(), fg);
        }
        if let Some(bg) = style.background {
            colors.insert("background".to_string(), bg);
        }
        Self {
            name: Some(name.to_string()),
            scope: Some(scope.to_string()),
            selector: ScopeSelector::parse(scope),
            colors,
            style,
        }
    }

    /// A scopeless entry that applies everywhere
    pub fn global(colors: BTreeMap<String, Color>) -> Self {
        let style = Style {
            foreground: colors.get("foreground").copied(),
            background: colors.get("background").copied(),
            font_style: None,
        };
        Self {
            name: None,
            scope: None,
            selector: ScopeSelector::default(),
            colors,
            style,
        }
    }
}

/// A TextMate color theme
#[derive(Debug, Clone, Default)]
pub struct Theme {
    pub name: String,
    pub uuid: Option<String>,
    pub gutter: BTreeMap<String, Color>,
    pub settings: Vec<ScopeSetting>,
}

impl Theme {
    pub fn new(name: &str, settings: Vec<ScopeSetting>) -> Self {
        Self {
            name: name.to_string(),
            uuid: None,
            gutter: BTreeMap::new(),
            settings,
        }
    }

    /// Load a `.tmTheme` file
    pub fn load(path: &Path) -> Result<Self, ThemeLoadError> {
        let bytes = std::fs::read(path).map_err(|source| ThemeLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut theme = Self::from_plist_bytes(&bytes)?;
        if theme.name.is_empty() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                theme.name = stem.to_string();
            }
        }
        Ok(theme)
    }

    pub fn from_str(source: &str) -> Result<Self, ThemeLoadError> {
        Self::from_plist_bytes(source.as_bytes())
    }

    pub fn from_plist_bytes(bytes: &[u8]) -> Result<Self, ThemeLoadError> {
        let value = Value::from_reader(Cursor::new(bytes))?;
        let root = value
            .as_dictionary()
            .ok_or(ThemeLoadError::NotADictionary)?;

        let name = string_field(root, "name").unwrap_or_default();
        let uuid = string_field(root, "uuid");
        let gutter = root
            .get("gutterSettings")
            .or_else(|| root.get("gutter"))
            .and_then(Value::as_dictionary)
            .map(|dict| parse_colors(dict).0)
            .unwrap_or_default();

        let settings = root
            .get("settings")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_dictionary)
                    .filter_map(parse_setting)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name,
            uuid,
            gutter,
            settings,
        })
    }

    /// The scopeless entry holding editor-wide colors, if any
    pub fn global_settings(&self) -> Option<&ScopeSetting> {
        self.settings.iter().find(|s| s.selector.is_empty())
    }

    pub fn background(&self) -> Option<Color> {
        self.global_settings().and_then(|s| s.style.background)
    }

    pub fn foreground(&self) -> Option<Color> {
        self.global_settings().and_then(|s| s.style.foreground)
    }

    /// Resolve the style for a space-separated scope path
    pub fn get_format(&self, scope_path: &str) -> Option<Style> {
        let path: Vec<&str> = scope_path.split_whitespace().collect();
        self.get_format_for_path(&path)
    }

    /// Resolve the style for a scope path, outermost scope first.
    ///
    /// Settings are ordered by rank, best first, with later settings winning
    /// ties. Each attribute comes from the first setting in that order that
    /// defines it. Returns `None` when no setting matches at all.
    pub fn get_format_for_path<S: AsRef<str>>(&self, path: &[S]) -> Option<Style> {
        let mut ranked: Vec<(Rank, usize)> = self
            .settings
            .iter()
            .enumerate()
            .map(|(i, setting)| (setting.selector.rank_path(path), i))
            .filter(|(rank, _)| rank.is_valid())
            .collect();
        if ranked.is_empty() {
            return None;
        }
        ranked.sort_by(|a, b| b.cmp(a));

        let mut style = Style::default();
        for (_, i) in ranked {
            let s = &self.settings[i].style;
            style.foreground = style.foreground.or(s.foreground);
            style.background = style.background.or(s.background);
            style.font_style = style.font_style.or(s.font_style);
        }
        Some(style)
    }
}

fn string_field(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key).and_then(Value::as_string).map(str::to_string)
}

fn parse_colors(dict: &Dictionary) -> (BTreeMap<String, Color>, Option<FontStyle>) {
    let mut colors = BTreeMap::new();
    let mut font_style = None;
    for (key, value) in dict {
        let Some(text) = value.as_string() else {
            continue;
        };
        if key == "fontStyle" {
            // An empty list leaves the style to less specific settings
            font_style = Some(FontStyle::parse(text)).filter(|f| *f != FontStyle::NONE);
        } else if let Some(color) = Color::from_hex(text) {
            colors.insert(key.clone(), color);
        }
    }
    (colors, font_style)
}

fn parse_setting(dict: &Dictionary) -> Option<ScopeSetting> {
    let (colors, font_style) = parse_colors(dict.get("settings")?.as_dictionary()?);
    let scope = string_field(dict, "scope");
    let selector = scope
        .as_deref()
        .map(ScopeSelector::parse)
        .unwrap_or_default();
    let style = Style {
        foreground: colors.get("foreground").copied(),
        background: colors.get("background").copied(),
        font_style,
    };

    Some(ScopeSetting {
        name: string_field(dict, "name"),
        scope,
        selector,
        colors,
        style,
    })
}
