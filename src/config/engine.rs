use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use rhai::{AST, Engine, Scope};
use tracing::info;

use super::{ConfigError, Settings};

/// The Rhai scripting engine for configuration
pub struct ConfigEngine {
    engine: Engine,
    settings: Arc<RwLock<Settings>>,
    ast: Option<AST>,
}

impl ConfigEngine {
    pub fn new() -> Self {
        let settings = Arc::new(RwLock::new(Settings::default()));
        let engine = Self::create_engine(Arc::clone(&settings));

        Self {
            engine,
            settings,
            ast: None,
        }
    }

    fn create_engine(settings: Arc<RwLock<Settings>>) -> Engine {
        let mut engine = Engine::new();

        // Limit script execution for safety
        engine.set_max_expr_depths(64, 64);
        engine.set_max_operations(100_000);

        {
            let s = Arc::clone(&settings);
            engine.register_fn("set_theme", move |name: &str| {
                if let Ok(mut settings) = s.write() {
                    settings.theme = name.to_string();
                }
            });
        }

        {
            let s = Arc::clone(&settings);
            engine.register_fn("get_theme", move || -> String {
                s.read().map(|s| s.theme.clone()).unwrap_or_default()
            });
        }

        {
            let s = Arc::clone(&settings);
            engine.register_fn("add_grammar_dir", move |dir: &str| {
                if let Ok(mut settings) = s.write() {
                    settings.grammar_dirs.push(expand_home(dir));
                }
            });
        }

        {
            let s = Arc::clone(&settings);
            engine.register_fn("add_theme_dir", move |dir: &str| {
                if let Ok(mut settings) = s.write() {
                    settings.theme_dirs.push(expand_home(dir));
                }
            });
        }

        {
            let s = Arc::clone(&settings);
            engine.register_fn("set_font", move |family: &str| {
                if let Ok(mut settings) = s.write() {
                    settings.font_family = family.to_string();
                }
            });
        }

        {
            let s = Arc::clone(&settings);
            engine.register_fn("set_font", move |family: &str, size: f64| {
                if let Ok(mut settings) = s.write() {
                    settings.font_family = family.to_string();
                    settings.font_size = clamp_font_size(size);
                }
            });
        }

        {
            let s = Arc::clone(&settings);
            engine.register_fn("set_font_size", move |size: f64| {
                if let Ok(mut settings) = s.write() {
                    settings.font_size = clamp_font_size(size);
                }
            });
        }

        {
            let s = Arc::clone(&settings);
            engine.register_fn("set_font_size", move |size: i64| {
                if let Ok(mut settings) = s.write() {
                    settings.font_size = clamp_font_size(size as f64);
                }
            });
        }

        {
            let s = Arc::clone(&settings);
            engine.register_fn("set_default_scope", move |scope: &str| {
                if let Ok(mut settings) = s.write() {
                    settings.default_scope = scope.to_string();
                }
            });
        }

        {
            let s = Arc::clone(&settings);
            engine.register_fn("set_injection_priority", move |scope: &str, priority: i64| {
                if let Ok(mut settings) = s.write() {
                    let priority = priority.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
                    settings
                        .injection_priorities
                        .insert(scope.to_string(), priority);
                }
            });
        }

        engine.on_print(|msg| info!(target: "tmsyntax::config", "{}", msg));

        engine
    }

    /// Load and execute a config file
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        self.eval(&content)
    }

    /// Evaluate a Rhai script string
    pub fn eval(&mut self, script: &str) -> Result<(), ConfigError> {
        let ast = self.engine.compile(script)?;

        let mut scope = Scope::new();
        self.engine.run_ast_with_scope(&mut scope, &ast)?;

        self.ast = Some(ast);
        Ok(())
    }

    /// Get the current settings (cloned)
    pub fn settings(&self) -> Settings {
        self.settings.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tmsyntax"))
    }

    /// Get the default config file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("init.rhai"))
    }

    /// Load the default config file if it exists
    pub fn load_default(&mut self) -> Result<(), ConfigError> {
        if let Some(config_file) = Self::config_file() {
            if config_file.exists() {
                return self.load_file(&config_file);
            }
        }
        Ok(()) // No config file is fine
    }
}

impl Default for ConfigEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_font_size(size: f64) -> f32 {
    size.clamp(4.0, 96.0) as f32
}

/// Expand a leading `~/` to the home directory
fn expand_home(dir: &str) -> PathBuf {
    match dir.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(dir)),
        None => PathBuf::from(dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_theme() {
        let mut engine = ConfigEngine::new();
        engine.eval(r#"set_theme("nord");"#).unwrap();
        assert_eq!(engine.settings().theme, "nord");
        engine.eval(r#"set_theme(get_theme() + "-x");"#).unwrap();
        assert_eq!(engine.settings().theme, "nord-x");
    }

    #[test]
    fn test_font_settings() {
        let mut engine = ConfigEngine::new();
        engine.eval(r#"set_font("Iosevka", 13.5);"#).unwrap();
        let settings = engine.settings();
        assert_eq!(settings.font_family, "Iosevka");
        assert_eq!(settings.font_size, 13.5);

        engine.eval("set_font_size(200);").unwrap();
        assert_eq!(engine.settings().font_size, 96.0); // Clamped to max
        engine.eval(r#"set_font("Hack");"#).unwrap();
        assert_eq!(engine.settings().font().family, "Hack");
    }

    #[test]
    fn test_directories_and_priorities() {
        let mut engine = ConfigEngine::new();
        engine
            .eval(
                r#"
                add_grammar_dir("/opt/grammars");
                add_grammar_dir("/usr/share/grammars");
                add_theme_dir("/opt/themes");
                set_default_scope("source.mini");
                set_injection_priority("todo.injection", -2);
            "#,
            )
            .unwrap();

        let settings = engine.settings();
        assert_eq!(
            settings.grammar_dirs,
            vec![PathBuf::from("/opt/grammars"), PathBuf::from("/usr/share/grammars")]
        );
        assert_eq!(settings.theme_dirs, vec![PathBuf::from("/opt/themes")]);
        assert_eq!(settings.default_scope, "source.mini");
        assert_eq!(settings.injection_priorities.get("todo.injection"), Some(&-2));
    }

    #[test]
    fn test_errors() {
        let mut engine = ConfigEngine::new();
        assert!(matches!(engine.eval("set_theme("), Err(ConfigError::Compile(_))));
        assert!(matches!(engine.eval("no_such_fn();"), Err(ConfigError::Runtime(_))));
        let missing = engine.load_file(Path::new("/nonexistent/init.rhai"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.rhai");
        std::fs::write(&path, "set_theme(\"dracula\");\nprint(\"loaded\");\n").unwrap();
        let mut engine = ConfigEngine::new();
        engine.load_file(&path).unwrap();
        assert_eq!(engine.settings().theme, "dracula");
    }
}
