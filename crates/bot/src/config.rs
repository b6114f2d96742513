use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use engine::{RelaySettings, SessionSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub discord_token: Option<String>,
    pub token_file: PathBuf,
    pub data_path: PathBuf,
    pub command_prefix: String,
    pub relay_gesture_window_ms: u64,
    pub relay_toggle_cooldown_ms: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            discord_token: None,
            token_file: ".token".into(),
            data_path: "data.json".into(),
            command_prefix: "among:".into(),
            relay_gesture_window_ms: 1_000,
            relay_toggle_cooldown_ms: 5_000,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            command_prefix: self.command_prefix.clone(),
            relay: RelaySettings {
                gesture_window: Duration::from_millis(self.relay_gesture_window_ms),
                toggle_cooldown: Duration::from_millis(self.relay_toggle_cooldown_ms),
            },
        }
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new("bot.toml"), |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file at `path` when it exists, then environment
/// overrides looked up through `env`.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg = raw
                .parse::<toml::Table>()
                .with_context(|| format!("invalid settings file '{}'", path.display()))?;
            apply_file(&mut settings, &file_cfg)
                .with_context(|| format!("invalid settings file '{}'", path.display()))?;
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    }

    if let Some(v) = env("DISCORD_TOKEN") {
        settings.discord_token = Some(v);
    }
    if let Some(v) = env("APP__DISCORD_TOKEN") {
        settings.discord_token = Some(v);
    }
    if let Some(v) = env("APP__TOKEN_FILE") {
        settings.token_file = v.into();
    }
    if let Some(v) = env("APP__DATA_PATH") {
        settings.data_path = v.into();
    }
    if let Some(v) = env("APP__COMMAND_PREFIX") {
        settings.command_prefix = v;
    }
    if let Some(v) = env("APP__RELAY_GESTURE_WINDOW_MS") {
        settings.relay_gesture_window_ms = parse_millis("APP__RELAY_GESTURE_WINDOW_MS", &v)?;
    }
    if let Some(v) = env("APP__RELAY_TOGGLE_COOLDOWN_MS") {
        settings.relay_toggle_cooldown_ms = parse_millis("APP__RELAY_TOGGLE_COOLDOWN_MS", &v)?;
    }
    if let Some(v) = env("RUST_LOG") {
        settings.log_filter = v;
    }
    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: &toml::Table) -> anyhow::Result<()> {
    if let Some(v) = file_str(file_cfg, "discord_token")? {
        settings.discord_token = Some(v);
    }
    if let Some(v) = file_str(file_cfg, "token_file")? {
        settings.token_file = v.into();
    }
    if let Some(v) = file_str(file_cfg, "data_path")? {
        settings.data_path = v.into();
    }
    if let Some(v) = file_str(file_cfg, "command_prefix")? {
        settings.command_prefix = v;
    }
    if let Some(v) = file_millis(file_cfg, "relay_gesture_window_ms")? {
        settings.relay_gesture_window_ms = v;
    }
    if let Some(v) = file_millis(file_cfg, "relay_toggle_cooldown_ms")? {
        settings.relay_toggle_cooldown_ms = v;
    }
    if let Some(v) = file_str(file_cfg, "log_filter")? {
        settings.log_filter = v;
    }
    Ok(())
}

fn file_str(file_cfg: &toml::Table, key: &str) -> anyhow::Result<Option<String>> {
    match file_cfg.get(key) {
        None => Ok(None),
        Some(toml::Value::String(v)) => Ok(Some(v.clone())),
        Some(other) => bail!("'{key}' must be a string, found {}", other.type_str()),
    }
}

fn file_millis(file_cfg: &toml::Table, key: &str) -> anyhow::Result<Option<u64>> {
    match file_cfg.get(key) {
        None => Ok(None),
        Some(toml::Value::Integer(v)) => u64::try_from(*v)
            .map(Some)
            .map_err(|_| anyhow!("'{key}' must not be negative")),
        Some(other) => bail!("'{key}' must be an integer, found {}", other.type_str()),
    }
}

fn parse_millis(key: &str, raw: &str) -> anyhow::Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("{key} must be a number of milliseconds, got '{raw}'"))
}

/// The configured token, or the trimmed contents of the token file.
pub fn resolve_token(settings: &Settings) -> anyhow::Result<String> {
    if let Some(token) = settings
        .discord_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
    {
        return Ok(token.to_string());
    }

    let raw = match fs::read_to_string(&settings.token_file) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => bail!(
            "no discord token: set DISCORD_TOKEN or create '{}'",
            settings.token_file.display()
        ),
        Err(err) => {
            return Err(err).with_context(|| {
                format!(
                    "failed to read token file '{}'",
                    settings.token_file.display()
                )
            })
        }
    };
    let token = raw.trim();
    if token.is_empty() {
        bail!("token file '{}' is empty", settings.token_file.display());
    }
    Ok(token.to_string())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
