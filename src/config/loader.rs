//! Configuration loading from disk and environment.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::GateConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { var: &'static str, message: String },
    PrivateKey(String),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, message } => write!(f, "Invalid {}: {}", var, message),
            ConfigError::PrivateKey(msg) => write!(f, "Private key error: {}", msg),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load configuration: optional TOML file, then environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<GateConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(ConfigError::Parse)?
        }
        None => GateConfig::default(),
    };

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay the deployment's environment variables onto `config`.
///
/// `var` looks a variable up; production passes `std::env::var`.
pub fn apply_env_overrides<F>(config: &mut GateConfig, var: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Only the exact string "true" turns the limiter on
    if let Some(v) = var("USE_RATE_LIMITING") {
        config.rate_limit.enabled = v == "true";
    }

    if let Some(port) = var("PORT") {
        let port: u16 = port.parse().map_err(|_| ConfigError::Env {
            var: "PORT",
            message: format!("'{}' is not a port number", port),
        })?;
        config.listener.bind_address = format!("0.0.0.0:{}", port);
    }

    let github = &mut config.github;
    override_opt(&mut github.app_id, var("APP_ID"));
    override_opt(&mut github.client_id, var("GITHUB_CLIENT_ID"));
    override_opt(&mut github.client_secret, var("GITHUB_CLIENT_SECRET"));
    override_opt(&mut github.private_key, var("PRIVATE_KEY"));
    override_opt(&mut github.private_key_path, var("PRIVATE_KEY_PATH"));
    if let Some(url) = var("GITHUB_API_URL") {
        github.api_url = url;
    }

    let store = &mut config.store;
    override_opt(&mut store.url, var("REDIS_URL"));
    override_opt(&mut store.password, var("REDIS_PASSWORD"));
    if let Some(host) = var("REDIS_HOST") {
        store.host = host;
    }
    if let Some(port) = var("REDIS_PORT") {
        store.port = port.parse().map_err(|_| ConfigError::Env {
            var: "REDIS_PORT",
            message: format!("'{}' is not a port number", port),
        })?;
    }

    Ok(())
}

fn override_opt(slot: &mut Option<String>, value: Option<String>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        *slot = Some(v);
    }
}

/// Locate the application's PEM private key.
///
/// Order: inline `private_key` (literal `\n` sequences are unescaped), then
/// `private_key_path`, then the single `*.pem` file in `search_dir`.
/// Returns `Ok(None)` when no key is configured or found.
pub fn find_private_key(
    config: &GateConfig,
    search_dir: &Path,
) -> Result<Option<String>, ConfigError> {
    let github = &config.github;

    if let Some(key) = &github.private_key {
        return Ok(Some(key.replace("\\n", "\n")));
    }

    if let Some(path) = &github.private_key_path {
        return fs::read_to_string(path)
            .map(Some)
            .map_err(|e| ConfigError::PrivateKey(format!("cannot read '{}': {}", path, e)));
    }

    let mut pem_files: Vec<PathBuf> = fs::read_dir(search_dir)
        .map_err(ConfigError::Io)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "pem"))
        .collect();
    pem_files.sort();

    match pem_files.as_slice() {
        [] => Ok(None),
        [path] => {
            tracing::debug!(path = %path.display(), "Using private key found in working directory");
            fs::read_to_string(path).map(Some).map_err(ConfigError::Io)
        }
        many => Err(ConfigError::PrivateKey(format!(
            "found {} *.pem files in {}, set PRIVATE_KEY_PATH to pick one",
            many.len(),
            search_dir.display()
        ))),
    }
}
