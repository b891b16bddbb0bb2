//! Configuration loading and parsing.
//!
//! Defines the server config schema and resolves defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::runner::SeparatorCommand;

const DEFAULT_BIND: &str = "127.0.0.1:5000";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_OUTPUT_DIR: &str = "separated";

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Directory receiving raw uploads.
    pub upload_dir: Option<String>,
    /// Directory the separator writes stems into.
    pub output_dir: Option<String>,
    /// Directory holding `index.html` and `static/`.
    pub web_ui_dir: Option<String>,
    /// Extra origins allowed to call the API cross-origin.
    pub cors_origins: Option<Vec<String>>,
    /// Separator invocation.
    pub separator: Option<SeparatorConfig>,
}

/// Separator invocation from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct SeparatorConfig {
    /// Executable to run (default `python3`).
    pub program: Option<String>,
    /// Arguments before the separation flags (default `["-m", "demucs"]`).
    pub args: Option<Vec<String>>,
    /// Model name passed with `-n`; also names the output subdirectory.
    pub model: Option<String>,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Parse the bind address from config, falling back to the default.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<SocketAddr> {
    let bind = cfg.bind.as_deref().unwrap_or(DEFAULT_BIND);
    bind.parse().with_context(|| format!("parse bind {bind}"))
}

/// Upload root from config.
pub fn upload_dir_from_config(cfg: &ServerConfig) -> PathBuf {
    non_empty_path(cfg.upload_dir.as_deref()).unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR))
}

/// Output root from config.
pub fn output_dir_from_config(cfg: &ServerConfig) -> PathBuf {
    non_empty_path(cfg.output_dir.as_deref()).unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
}

/// Explicit web UI directory, if configured.
pub fn web_ui_dir_from_config(cfg: &ServerConfig) -> Option<PathBuf> {
    non_empty_path(cfg.web_ui_dir.as_deref())
}

/// Build the separator command, filling unset fields with defaults.
pub fn separator_from_config(cfg: &ServerConfig) -> Result<SeparatorCommand> {
    let mut separator = SeparatorCommand::default();
    let Some(section) = cfg.separator.as_ref() else {
        return Ok(separator);
    };
    if let Some(program) = section.program.as_deref() {
        let program = program.trim();
        if program.is_empty() {
            return Err(anyhow::anyhow!("separator.program must not be empty"));
        }
        separator.program = program.to_string();
    }
    if let Some(args) = section.args.as_ref() {
        separator.args = args.clone();
    }
    separator.model = section
        .model
        .as_deref()
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .map(str::to_string);
    Ok(separator)
}

fn non_empty_path(value: Option<&str>) -> Option<PathBuf> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config() {
        let cfg = ServerConfig::default();
        assert_eq!(bind_from_config(&cfg).unwrap(), "127.0.0.1:5000".parse().unwrap());
        assert_eq!(upload_dir_from_config(&cfg), PathBuf::from("uploads"));
        assert_eq!(output_dir_from_config(&cfg), PathBuf::from("separated"));
        assert_eq!(web_ui_dir_from_config(&cfg), None);

        let separator = separator_from_config(&cfg).unwrap();
        assert_eq!(separator.program, "python3");
        assert_eq!(separator.args, vec!["-m", "demucs"]);
        assert_eq!(separator.model, None);
    }

    #[test]
    fn parses_full_toml() {
        let cfg: ServerConfig = toml::from_str(
            r#"
            bind = "0.0.0.0:8080"
            upload_dir = "/srv/stems/in"
            output_dir = "/srv/stems/out"
            cors_origins = ["http://localhost:5173"]

            [separator]
            program = "demucs"
            args = []
            model = "mdx_extra"
            "#,
        )
        .unwrap();
        assert_eq!(bind_from_config(&cfg).unwrap(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(upload_dir_from_config(&cfg), PathBuf::from("/srv/stems/in"));
        assert_eq!(cfg.cors_origins.as_deref(), Some(&["http://localhost:5173".to_string()][..]));

        let separator = separator_from_config(&cfg).unwrap();
        assert_eq!(separator.program, "demucs");
        assert!(separator.args.is_empty());
        assert_eq!(separator.model_dir(), "mdx_extra");
    }

    #[test]
    fn rejects_bad_bind() {
        let cfg = ServerConfig {
            bind: Some("not-an-addr".to_string()),
            ..ServerConfig::default()
        };
        assert!(bind_from_config(&cfg).is_err());
    }

    #[test]
    fn rejects_empty_program() {
        let cfg = ServerConfig {
            separator: Some(SeparatorConfig {
                program: Some("  ".to_string()),
                ..SeparatorConfig::default()
            }),
            ..ServerConfig::default()
        };
        assert!(separator_from_config(&cfg).is_err());
    }

    #[test]
    fn blank_dirs_fall_back_to_defaults() {
        let cfg = ServerConfig {
            upload_dir: Some(" ".to_string()),
            web_ui_dir: Some(String::new()),
            ..ServerConfig::default()
        };
        assert_eq!(upload_dir_from_config(&cfg), PathBuf::from("uploads"));
        assert_eq!(web_ui_dir_from_config(&cfg), None);
    }
}
