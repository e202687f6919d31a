//! Configuration management for planwright
//!
//! Settings are read from `<project>/.planwright/config.toml`, then
//! `~/.config/planwright/config.toml`, then built-in defaults.

use anyhow::{Context, Result};
use planwright_core::EngineConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-project state directory, relative to the project root.
pub const PROJECT_DIR: &str = ".planwright";
const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR).join(CONFIG_FILE)
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("planwright").join(CONFIG_FILE))
}

/// Load the first readable config for `project_root`, or defaults.
pub fn load(project_root: &Path) -> EngineConfig {
    let candidates = [Some(project_config_path(project_root)), user_config_path()];
    for path in candidates.into_iter().flatten() {
        if let Some(config) = load_from(&path) {
            debug!(path = %path.display(), "loaded config");
            return config;
        }
    }
    EngineConfig::default()
}

/// Read one config file. A file that fails to parse is moved aside to
/// `config.toml.corrupt` and treated as absent.
pub fn load_from(path: &Path) -> Option<EngineConfig> {
    let content = fs::read_to_string(path).ok()?;
    match toml::from_str::<EngineConfig>(&content) {
        Ok(mut config) => {
            config.sanitize();
            Some(config)
        }
        Err(err) => {
            preserve_corrupt_config(path, &content);
            warn!(
                path = %path.display(),
                error = %err,
                "config file was corrupted; a backup was saved and it was skipped"
            );
            None
        }
    }
}

/// Write `config` to `path`, replacing any existing file atomically.
pub fn save(config: &EngineConfig, path: &Path) -> Result<()> {
    let mut sanitized = config.clone();
    sanitized.sanitize();

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let content = toml::to_string_pretty(&sanitized).context("failed to serialize config")?;
    write_config_atomic(path, &content)
        .with_context(|| format!("failed to write config {}", path.display()))
}

/// API key for the chat-completions endpoint.
pub fn api_key() -> Option<String> {
    ["PLANWRIGHT_API_KEY", "OPENAI_API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

pub fn api_base() -> String {
    std::env::var("PLANWRIGHT_API_BASE")
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(err) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            warn!(error = %err, "failed to set config file permissions");
        }
    }

    file.write_all(content.as_bytes())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
