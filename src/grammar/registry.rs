use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{debug, warn};

use super::{Grammar, GrammarFormat, PLAIN_TEXT_SCOPE};

/// An injection grammar that applies to some scope path
#[derive(Debug, Clone)]
pub struct InjectionGrammar {
    pub grammar: Arc<Grammar>,
    pub priority: i32,
    /// Injected before the local patterns instead of after them
    pub left: bool,
}

/// Scope-keyed cache of loaded grammars.
///
/// Grammars are parsed completely and then published as `Arc<Grammar>`, so
/// parsers on other threads only ever see finished grammars. The plain text
/// grammar is always available.
pub struct GrammarRegistry {
    grammars: RwLock<HashMap<String, Arc<Grammar>>>,
    priorities: RwLock<HashMap<String, i32>>,
    plain: Arc<Grammar>,
}

impl GrammarRegistry {
    pub fn new() -> Self {
        Self {
            grammars: RwLock::new(HashMap::new()),
            priorities: RwLock::new(HashMap::new()),
            plain: Arc::new(Grammar::plain_text()),
        }
    }

    /// The process-wide registry
    pub fn global() -> Arc<GrammarRegistry> {
        static GLOBAL: OnceLock<Arc<GrammarRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(GrammarRegistry::new())))
    }

    /// Load a grammar file. A malformed file is logged and leaves the cache
    /// untouched; a grammar whose scope is already loaded replaces it.
    pub fn load_language(&self, path: &Path) -> bool {
        match Grammar::load(path) {
            Ok(grammar) => {
                debug!(scope = grammar.scope_name(), path = %path.display(), "loaded grammar");
                self.insert(grammar);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    pub fn load_language_from_str(&self, source: &str, format: GrammarFormat) -> bool {
        match Grammar::from_bytes(source.as_bytes(), format) {
            Ok(grammar) => {
                self.insert(grammar);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// Load every grammar file in `dir`, returning how many loaded
    pub fn load_dir(&self, dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            debug!(dir = %dir.display(), "grammar directory not readable");
            return 0;
        };
        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_grammar_file(path))
            .collect();
        paths.sort();
        paths.iter().filter(|path| self.load_language(path)).count()
    }

    pub fn insert(&self, grammar: Grammar) -> Arc<Grammar> {
        let grammar = Arc::new(grammar);
        let mut grammars = self.grammars.write().unwrap_or_else(|e| e.into_inner());
        grammars.insert(grammar.scope_name().to_string(), Arc::clone(&grammar));
        grammar
    }

    pub fn language_for_scope(&self, scope: &str) -> Option<Arc<Grammar>> {
        let grammars = self.grammars.read().unwrap_or_else(|e| e.into_inner());
        grammars
            .get(scope)
            .cloned()
            .or_else(|| (scope == PLAIN_TEXT_SCOPE).then(|| Arc::clone(&self.plain)))
    }

    pub fn plain_text(&self) -> Arc<Grammar> {
        Arc::clone(&self.plain)
    }

    fn find(&self, pred: impl Fn(&Grammar) -> bool) -> Option<Arc<Grammar>> {
        let grammars = self.grammars.read().unwrap_or_else(|e| e.into_inner());
        // Sorted by scope so the choice doesn't depend on hash order
        let mut matching: Vec<&Arc<Grammar>> = grammars.values().filter(|g| pred(g)).collect();
        matching.sort_by(|a, b| a.scope_name().cmp(b.scope_name()));
        matching.first().map(|g| Arc::clone(g))
    }

    pub fn language_for_extension(&self, ext: &str) -> Option<Arc<Grammar>> {
        let ext = ext.trim_start_matches('.');
        self.find(|g| g.file_types().iter().any(|ft| ft.eq_ignore_ascii_case(ext)))
    }

    pub fn language_for_file_name(&self, file_name: &str) -> Option<Arc<Grammar>> {
        self.find(|g| g.matches_file_name(file_name))
    }

    pub fn language_for_first_line(&self, line: &str) -> Option<Arc<Grammar>> {
        self.find(|g| g.matches_first_line(line))
    }

    /// Pick a grammar for a file: by name and extension, then by its first
    /// line, then plain text
    pub fn language_for_hint(&self, file_name: Option<&str>, first_line: &str) -> Arc<Grammar> {
        file_name
            .and_then(|name| {
                self.language_for_file_name(name).or_else(|| {
                    Path::new(name)
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .and_then(|ext| self.language_for_extension(ext))
                })
            })
            .or_else(|| self.language_for_first_line(first_line))
            .unwrap_or_else(|| self.plain_text())
    }

    /// `(scope, display name)` of every grammar meant to be shown to users
    pub fn scopes(&self) -> Vec<(String, String)> {
        let grammars = self.grammars.read().unwrap_or_else(|e| e.into_inner());
        let mut scopes: Vec<(String, String)> = grammars
            .values()
            .filter(|g| !g.is_hidden())
            .map(|g| (g.scope_name().to_string(), g.name().to_string()))
            .collect();
        scopes.sort();
        scopes
    }

    pub fn set_injection_priority(&self, scope: &str, priority: i32) {
        let mut priorities = self.priorities.write().unwrap_or_else(|e| e.into_inner());
        priorities.insert(scope.to_string(), priority);
    }

    pub fn injection_priority(&self, scope: &str) -> i32 {
        let priorities = self.priorities.read().unwrap_or_else(|e| e.into_inner());
        priorities.get(scope).copied().unwrap_or(0)
    }

    /// True if any loaded grammar has an injection selector
    pub fn has_injections(&self) -> bool {
        let grammars = self.grammars.read().unwrap_or_else(|e| e.into_inner());
        grammars.values().any(|g| g.injection_selector().is_some())
    }

    /// Injection grammars whose selector matches `path`, highest priority
    /// first and by scope name among equal priorities
    pub fn injections_for<S: AsRef<str>>(&self, path: &[S]) -> Vec<InjectionGrammar> {
        let grammars = self.grammars.read().unwrap_or_else(|e| e.into_inner());
        let mut injections: Vec<InjectionGrammar> = grammars
            .values()
            .filter_map(|g| {
                let selector = g.injection_selector()?;
                selector.matches(path).then(|| InjectionGrammar {
                    grammar: Arc::clone(g),
                    priority: self.injection_priority(g.scope_name()),
                    left: selector.is_left(),
                })
            })
            .collect();
        injections.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.grammar.scope_name().cmp(b.grammar.scope_name()))
        });
        injections
    }

    /// Forget every loaded grammar and priority
    pub fn reset(&self) {
        self.grammars
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.priorities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for GrammarRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_grammar_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    name.ends_with(".tmlanguage") || name.ends_with(".json") || name.ends_with(".plist")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn testdata() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata")
    }

    const INJECTION: &str = r#"{
        "scopeName": "todo.injection",
        "injectionSelector": "L:comment",
        "hideFromUser": true,
        "patterns": [{"match": "TODO", "name": "keyword.todo"}]
    }"#;

    #[test]
    fn test_plain_text_always_resolves() {
        let registry = GrammarRegistry::new();
        assert_eq!(
            registry.language_for_scope(PLAIN_TEXT_SCOPE).unwrap().scope_name(),
            PLAIN_TEXT_SCOPE
        );
        assert!(registry.language_for_scope("source.nope").is_none());
        let fallback = registry.language_for_hint(Some("notes.unknown"), "hello");
        assert_eq!(fallback.scope_name(), PLAIN_TEXT_SCOPE);
    }

    #[test]
    fn test_load_dir_and_hints() {
        let registry = GrammarRegistry::new();
        assert!(registry.load_dir(&testdata()) >= 2);
        assert_eq!(
            registry.language_for_hint(Some("a.mini"), "").scope_name(),
            "source.mini"
        );
        assert_eq!(
            registry.language_for_hint(Some("Minifile"), "").scope_name(),
            "source.mini"
        );
        assert_eq!(
            registry.language_for_hint(None, "#!/usr/bin/env mini").scope_name(),
            "source.mini"
        );
        assert_eq!(
            registry.language_for_extension("MINI").unwrap().scope_name(),
            "source.mini"
        );
    }

    #[test]
    fn test_malformed_file_keeps_cache() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.tmLanguage.json");
        std::fs::write(&good, r#"{"scopeName": "source.good", "patterns": []}"#).unwrap();
        let bad = dir.path().join("bad.tmLanguage.json");
        std::fs::write(&bad, r#"{"scopeName": "source.good", "patterns": ["#).unwrap();

        let registry = GrammarRegistry::new();
        assert!(registry.load_language(&good));
        let before = registry.language_for_scope("source.good").unwrap();
        assert!(!registry.load_language(&bad));
        let after = registry.language_for_scope("source.good").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(!registry.load_language(&dir.path().join("missing.json")));
    }

    #[test]
    fn test_reload_replaces_scope() {
        let registry = GrammarRegistry::new();
        let source = r#"{"scopeName": "source.r", "name": "One", "patterns": []}"#;
        assert!(registry.load_language_from_str(source, GrammarFormat::Json));
        let source = r#"{"scopeName": "source.r", "name": "Two", "patterns": []}"#;
        assert!(registry.load_language_from_str(source, GrammarFormat::Json));
        assert_eq!(registry.language_for_scope("source.r").unwrap().name(), "Two");
        assert_eq!(registry.scopes(), vec![("source.r".to_string(), "Two".to_string())]);
    }

    #[test]
    fn test_injections_and_priority() {
        let registry = GrammarRegistry::new();
        assert!(!registry.has_injections());
        assert!(registry.load_language_from_str(INJECTION, GrammarFormat::Json));
        assert!(registry.has_injections());
        let other = r#"{"scopeName": "fixme.injection", "injectionSelector": "comment",
                        "patterns": [{"match": "FIXME", "name": "keyword.fixme"}]}"#;
        assert!(registry.load_language_from_str(other, GrammarFormat::Json));

        assert!(registry.injections_for(&["source.c"]).is_empty());
        let found = registry.injections_for(&["source.c", "comment.line"]);
        let scopes: Vec<_> = found.iter().map(|i| i.grammar.scope_name()).collect();
        assert_eq!(scopes, vec!["fixme.injection", "todo.injection"]);
        assert!(found[1].left);

        registry.set_injection_priority("todo.injection", 5);
        let found = registry.injections_for(&["source.c", "comment.line"]);
        assert_eq!(found[0].grammar.scope_name(), "todo.injection");
        assert_eq!(found[0].priority, 5);

        // hidden grammars stay out of the user-facing list
        assert_eq!(registry.scopes().len(), 1);
    }

    #[test]
    fn test_reset() {
        let registry = GrammarRegistry::new();
        assert!(registry.load_language_from_str(INJECTION, GrammarFormat::Json));
        registry.set_injection_priority("todo.injection", 3);
        registry.reset();
        assert!(registry.language_for_scope("todo.injection").is_none());
        assert!(!registry.has_injections());
        assert_eq!(registry.injection_priority("todo.injection"), 0);
        assert!(registry.language_for_scope(PLAIN_TEXT_SCOPE).is_some());
    }
}
