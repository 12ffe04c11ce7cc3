use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::debug;

use crate::grammar::{GrammarRegistry, PLAIN_TEXT_SCOPE};
use crate::highlight::Font;
use crate::theme::ThemeRegistry;

/// Settings that can be customized via Rhai config
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub theme: String,

    // Where grammars and themes are loaded from, in load order
    pub grammar_dirs: Vec<PathBuf>,
    pub theme_dirs: Vec<PathBuf>,

    pub font_family: String,
    pub font_size: f32,

    /// Scope used when no grammar matches a file
    pub default_scope: String,

    /// Injection grammar scope -> priority
    pub injection_priorities: BTreeMap<String, i32>,
}

impl Default for Settings {
    fn default() -> Self {
        let font = Font::default();
        Self {
            theme: "gruvbox-dark".to_string(),
            grammar_dirs: Vec::new(),
            theme_dirs: Vec::new(),
            font_family: font.family,
            font_size: font.size,
            default_scope: PLAIN_TEXT_SCOPE.to_string(),
            injection_priorities: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn font(&self) -> Font {
        Font::new(&self.font_family, self.font_size)
    }

    /// Load the configured directories into the registries and hand them
    /// the injection priorities. Returns how many grammars and themes
    /// loaded.
    pub fn apply(&self, grammars: &GrammarRegistry, themes: &ThemeRegistry) -> (usize, usize) {
        let grammar_count: usize = self.grammar_dirs.iter().map(|dir| grammars.load_dir(dir)).sum();
        let theme_count: usize = self.theme_dirs.iter().map(|dir| themes.load_dir(dir)).sum();
        for (scope, priority) in &self.injection_priorities {
            grammars.set_injection_priority(scope, *priority);
        }
        debug!(grammars = grammar_count, themes = theme_count, "applied settings");
        (grammar_count, theme_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_loads_dirs() {
        let testdata = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata");
        let mut settings = Settings::new();
        settings.grammar_dirs.push(testdata.clone());
        settings.grammar_dirs.push(testdata.join("missing"));
        settings.theme_dirs.push(testdata);
        settings.injection_priorities.insert("todo.injection".to_string(), 7);

        let grammars = GrammarRegistry::new();
        let themes = ThemeRegistry::new();
        assert_eq!(settings.apply(&grammars, &themes), (2, 2));
        assert!(grammars.language_for_scope("source.mini").is_some());
        assert!(themes.theme("Monokai").is_some());
        assert_eq!(grammars.injection_priority("todo.injection"), 7);
    }

    #[test]
    fn test_default_font() {
        assert_eq!(Settings::new().font(), Font::default());
    }
}
