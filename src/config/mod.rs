//! User configuration, read from a Rhai init script

mod engine;
mod settings;

use std::path::PathBuf;

use thiserror::Error;

pub use engine::ConfigEngine;
pub use settings::Settings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Compile(#[from] rhai::ParseError),
    #[error("config error: {0}")]
    Runtime(#[from] Box<rhai::EvalAltResult>),
}
