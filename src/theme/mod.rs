//! Color themes and scope selector ranking
//!
//! Themes come from `.tmTheme` plists or from the built-in palettes below.
//! Loaded themes live in a [`ThemeRegistry`] keyed by name.

mod colors;
pub mod rank;
mod theme;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

pub use colors::Color;
pub use rank::{Rank, ScopeSelector};
pub use theme::{FontStyle, ScopeSetting, Style, Theme, ThemeLoadError};

/// Colors a built-in theme is generated from
struct Palette {
    background: Color,
    foreground: Color,
    cursor: Color,
    selection: Color,
    line_number: Color,
    gutter: Color,

    keyword: Color,
    string: Color,
    number: Color,
    comment: Color,
    function: Color,
    type_: Color,
    operator: Color,
    punctuation: Color,

    error: Color,
}

impl Palette {
    fn into_theme(self, name: &str) -> Theme {
        let global = BTreeMap::from([
            ("background".to_string(), self.background),
            ("foreground".to_string(), self.foreground),
            ("caret".to_string(), self.cursor),
            ("selection".to_string(), self.selection),
        ]);
        let settings = vec![
            ScopeSetting::global(global),
            ScopeSetting::new("Comment", "comment", Style::new(self.comment).italic()),
            ScopeSetting::new("String", "string", Style::new(self.string)),
            ScopeSetting::new(
                "Constant",
                "constant.numeric, constant.language, constant.character, constant.other",
                Style::new(self.number),
            ),
            ScopeSetting::new("Keyword", "keyword, storage", Style::new(self.keyword).bold()),
            ScopeSetting::new("Operator", "keyword.operator", Style::new(self.operator)),
            ScopeSetting::new(
                "Function",
                "entity.name.function, support.function, entity.other.attribute-name",
                Style::new(self.function),
            ),
            ScopeSetting::new(
                "Type",
                "entity.name.type, entity.name.class, support.type, support.class, storage.type",
                Style::new(self.type_),
            ),
            ScopeSetting::new("Tag", "entity.name.tag", Style::new(self.keyword)),
            ScopeSetting::new("Variable", "variable", Style::new(self.foreground)),
            ScopeSetting::new("Punctuation", "punctuation", Style::new(self.punctuation)),
            ScopeSetting::new("Invalid", "invalid", Style::new(self.error).bold()),
        ];

        let mut theme = Theme::new(name, settings);
        theme.gutter = BTreeMap::from([
            ("background".to_string(), self.gutter),
            ("foreground".to_string(), self.line_number),
        ]);
        theme
    }
}

const fn hex(rgb: u32) -> Color {
    Color::from_u32(rgb)
}

/// Gruvbox Dark - warm retro theme
fn gruvbox_dark() -> Theme {
    Palette {
        background: hex(0x282828),
        foreground: hex(0xebdbb2),
        cursor: hex(0xfe8019),
        selection: hex(0x504945),
        line_number: hex(0x665c54),
        gutter: hex(0x1d2021),
        keyword: hex(0xfb4934),
        string: hex(0xb8bb26),
        number: hex(0xd3869b),
        comment: hex(0x928374),
        function: hex(0xfabd2f),
        type_: hex(0x83a598),
        operator: hex(0xfe8019),
        punctuation: hex(0xebdbb2),
        error: hex(0xfb4934),
    }
    .into_theme("gruvbox-dark")
}

/// Gruvbox Light
fn gruvbox_light() -> Theme {
    Palette {
        background: hex(0xfbf1c7),
        foreground: hex(0x3c3836),
        cursor: hex(0xd65d0e),
        selection: hex(0xebdbb2),
        line_number: hex(0xa89984),
        gutter: hex(0xf2e5bc),
        keyword: hex(0x9d0006),
        string: hex(0x79740e),
        number: hex(0x8f3f71),
        comment: hex(0x928374),
        function: hex(0xb57614),
        type_: hex(0x076678),
        operator: hex(0xd65d0e),
        punctuation: hex(0x3c3836),
        error: hex(0x9d0006),
    }
    .into_theme("gruvbox-light")
}

/// Nord - arctic, north-bluish color palette
fn nord() -> Theme {
    Palette {
        background: hex(0x2e3440),
        foreground: hex(0xd8dee9),
        cursor: hex(0x88c0d0),
        selection: hex(0x434c5e),
        line_number: hex(0x4c566a),
        gutter: hex(0x2e3440),
        keyword: hex(0x81a1c1),
        string: hex(0xa3be8c),
        number: hex(0xb48ead),
        comment: hex(0x616e88),
        function: hex(0x88c0d0),
        type_: hex(0x8fbcbb),
        operator: hex(0x81a1c1),
        punctuation: hex(0xeceff4),
        error: hex(0xbf616a),
    }
    .into_theme("nord")
}

/// Dracula - dark theme with vibrant colors
fn dracula() -> Theme {
    Palette {
        background: hex(0x282a36),
        foreground: hex(0xf8f8f2),
        cursor: hex(0xf8f8f2),
        selection: hex(0x44475a),
        line_number: hex(0x6272a4),
        gutter: hex(0x21222c),
        keyword: hex(0xff79c6),
        string: hex(0xf1fa8c),
        number: hex(0xbd93f9),
        comment: hex(0x6272a4),
        function: hex(0x50fa7b),
        type_: hex(0x8be9fd),
        operator: hex(0xff79c6),
        punctuation: hex(0xf8f8f2),
        error: hex(0xff5555),
    }
    .into_theme("dracula")
}

/// Solarized Dark
fn solarized_dark() -> Theme {
    Palette {
        background: hex(0x002b36),
        foreground: hex(0x839496),
        cursor: hex(0x268bd2),
        selection: hex(0x073642),
        line_number: hex(0x586e75),
        gutter: hex(0x073642),
        keyword: hex(0x859900),
        string: hex(0x2aa198),
        number: hex(0xd33682),
        comment: hex(0x586e75),
        function: hex(0x268bd2),
        type_: hex(0xb58900),
        operator: hex(0x859900),
        punctuation: hex(0x839496),
        error: hex(0xdc322f),
    }
    .into_theme("solarized-dark")
}

/// Built-in themes
pub fn default_theme() -> Theme {
    gruvbox_dark()
}

pub fn list_builtin_themes() -> Vec<&'static str> {
    vec![
        "gruvbox-dark",
        "gruvbox-light",
        "nord",
        "dracula",
        "solarized-dark",
    ]
}

pub fn get_builtin_theme(name: &str) -> Option<Theme> {
    match name {
        "gruvbox-dark" => Some(gruvbox_dark()),
        "gruvbox-light" => Some(gruvbox_light()),
        "nord" => Some(nord()),
        "dracula" => Some(dracula()),
        "solarized-dark" => Some(solarized_dark()),
        _ => None,
    }
}

/// Name-keyed cache of loaded themes.
///
/// Themes are built completely before they are published, so readers only
/// ever see finished `Arc<Theme>` values.
pub struct ThemeRegistry {
    themes: RwLock<HashMap<String, Arc<Theme>>>,
}

impl ThemeRegistry {
    /// A registry holding only the built-in themes
    pub fn new() -> Self {
        Self {
            themes: RwLock::new(Self::builtins()),
        }
    }

    /// The process-wide registry
    pub fn global() -> Arc<ThemeRegistry> {
        static GLOBAL: OnceLock<Arc<ThemeRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ThemeRegistry::new())))
    }

    fn builtins() -> HashMap<String, Arc<Theme>> {
        list_builtin_themes()
            .into_iter()
            .filter_map(get_builtin_theme)
            .map(|theme| (theme.name.clone(), Arc::new(theme)))
            .collect()
    }

    /// Load a `.tmTheme` file, replacing any theme with the same name
    pub fn load_theme(&self, path: &Path) -> bool {
        match Theme::load(path) {
            Ok(theme) => {
                tracing::debug!(name = %theme.name, path = %path.display(), "loaded theme");
                self.insert(theme);
                true
            }
            Err(e) => {
                tracing::warn!("{}", e);
                false
            }
        }
    }

    /// Load every `.tmTheme` file in `dir`, returning how many loaded
    pub fn load_dir(&self, dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            tracing::debug!(dir = %dir.display(), "theme directory not readable");
            return 0;
        };
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "tmTheme"))
            .filter(|path| self.load_theme(path))
            .count()
    }

    pub fn insert(&self, theme: Theme) {
        let mut themes = self.themes.write().unwrap_or_else(|e| e.into_inner());
        themes.insert(theme.name.clone(), Arc::new(theme));
    }

    pub fn theme(&self, name: &str) -> Option<Arc<Theme>> {
        let themes = self.themes.read().unwrap_or_else(|e| e.into_inner());
        themes.get(name).cloned()
    }

    /// The named theme, or the default theme if it isn't loaded
    pub fn theme_or_default(&self, name: &str) -> Arc<Theme> {
        self.theme(name).unwrap_or_else(|| {
            tracing::warn!(name, "unknown theme, using default");
            Arc::new(default_theme())
        })
    }

    pub fn sorted_names(&self) -> Vec<String> {
        let themes = self.themes.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = themes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop loaded themes, keeping the built-ins
    pub fn reset(&self) {
        let mut themes = self.themes.write().unwrap_or_else(|e| e.into_inner());
        *themes = Self::builtins();
    }
}

impl Default for ThemeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
