use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::poller::{DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_GENERATED_DIR: &str = "generated";
pub const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:5173", "http://127.0.0.1:5173"];
pub const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 60;
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 60;
pub const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub burst: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_host: String,
    pub generated_dir: PathBuf,
    pub history_dir: PathBuf,
    pub openai_token: SecretString,
    pub stability_key: SecretString,
    pub prodia_key: SecretString,
    pub openai_base_url: Option<String>,
    pub stability_base_url: Option<String>,
    pub prodia_base_url: Option<String>,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub cors_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
    /// Request body ceiling for `/edit-image`, which carries base64 images.
    pub max_body_bytes: usize,
    pub release: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let port = parse_or(get("PORT"), "PORT", DEFAULT_PORT)?;
        let api_host = match get("API_HOST") {
            Some(raw) => normalize_host(&raw)?,
            None => format!("http://localhost:{port}"),
        };

        let secret = |name: &'static str| {
            get(name)
                .map(SecretString::from)
                .ok_or(ConfigError::Missing(name))
        };
        let openai_token = secret("OPENAI_TOKEN")?;
        let stability_key = secret("STABLE_DIFFUSION_API_KEY")?;
        let prodia_key = secret("PRODIA_API_KEY")?;

        let base_url = |name: &'static str| -> Result<Option<String>, ConfigError> {
            get(name)
                .map(|raw| {
                    Url::parse(&raw)
                        .map(|_| raw.trim_end_matches('/').to_string())
                        .map_err(|_| ConfigError::Invalid { name, value: raw })
                })
                .transpose()
        };

        let poll_interval_ms = parse_or(
            get("PRODIA_POLL_INTERVAL_MS"),
            "PRODIA_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        )?;
        let poll_max_attempts = parse_or(
            get("PRODIA_POLL_MAX_ATTEMPTS"),
            "PRODIA_POLL_MAX_ATTEMPTS",
            DEFAULT_MAX_ATTEMPTS,
        )?;
        if poll_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "PRODIA_POLL_MAX_ATTEMPTS",
                value: "0".into(),
            });
        }

        let cors_origins = match get("CORS_ALLOWED_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_CORS_ORIGINS.iter().map(|origin| origin.to_string()).collect(),
        };

        let rate_limit = RateLimitConfig {
            per_second: parse_nonzero(get("RATE_LIMIT_PER_SECOND"), "RATE_LIMIT_PER_SECOND", DEFAULT_RATE_LIMIT_PER_SECOND)?,
            burst: parse_nonzero(get("RATE_LIMIT_BURST"), "RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST)?,
        };

        let max_body_bytes = parse_or(get("MAX_BODY_BYTES"), "MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?;
        if max_body_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_BODY_BYTES",
                value: "0".into(),
            });
        }

        Ok(Self {
            port,
            api_host,
            generated_dir: get("GENERATED_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GENERATED_DIR)),
            history_dir: get("HISTORY_DIR").map(PathBuf::from).unwrap_or_else(default_history_dir),
            openai_token,
            stability_key,
            prodia_key,
            openai_base_url: base_url("OPENAI_BASE_URL")?,
            stability_base_url: base_url("STABILITY_BASE_URL")?,
            prodia_base_url: base_url("PRODIA_BASE_URL")?,
            poll_interval: Duration::from_millis(poll_interval_ms),
            poll_max_attempts,
            cors_origins,
            rate_limit,
            max_body_bytes,
            release: get("ENV").is_some_and(|value| value.eq_ignore_ascii_case("release")),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn parse_nonzero(raw: Option<String>, name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match parse_or(raw, name, default)? {
        0 => Err(ConfigError::Invalid { name, value: "0".into() }),
        value => Ok(value),
    }
}

fn default_history_dir() -> PathBuf {
    let mut base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("imagegen-fanout");
    base.push("histories");
    base
}

/// Adds `http://` when no scheme is given, collapses doubled schemes and drops
/// trailing slashes.
fn normalize_host(raw: &str) -> Result<String, ConfigError> {
    let mut rest = raw.trim().trim_end_matches('/');
    let mut scheme = "http";
    loop {
        if let Some(stripped) = rest.strip_prefix("https://") {
            scheme = "https";
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("http://") {
            scheme = "http";
            rest = stripped;
        } else {
            break;
        }
    }
    let host = format!("{scheme}://{rest}");
    Url::parse(&host).map_err(|_| ConfigError::Invalid {
        name: "API_HOST",
        value: raw.to_string(),
    })?;
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let mut env: HashMap<String, String> = [
            ("OPENAI_TOKEN", "sk-test"),
            ("STABLE_DIFFUSION_API_KEY", "sd-test"),
            ("PRODIA_API_KEY", "prodia-test"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (key, value) in vars {
            env.insert(key.to_string(), value.to_string());
        }
        Config::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.api_host, "http://localhost:5000");
        assert_eq!(config.generated_dir, PathBuf::from("generated"));
        assert!(config.history_dir.ends_with("imagegen-fanout/histories"));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.poll_max_attempts, 10);
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(config.rate_limit.per_second, 60);
        assert_eq!(config.max_body_bytes, 50 * 1024 * 1024);
        assert!(!config.release);
        assert_eq!(config.openai_token.expose_secret(), "sk-test");
    }

    #[test]
    fn missing_key_is_fatal() {
        let err = Config::from_lookup(|name| (name == "OPENAI_TOKEN").then(|| "sk".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("STABLE_DIFFUSION_API_KEY")));

        let err = config(&[("PRODIA_API_KEY", "   ")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PRODIA_API_KEY")));
    }

    #[test]
    fn api_host_is_normalized() {
        assert_eq!(config(&[("API_HOST", "images.example.com/")]).unwrap().api_host, "http://images.example.com");
        assert_eq!(
            config(&[("API_HOST", "http://https://images.example.com")]).unwrap().api_host,
            "https://images.example.com"
        );
        assert_eq!(config(&[("PORT", "8080")]).unwrap().api_host, "http://localhost:8080");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            config(&[("PORT", "eighty")]).unwrap_err(),
            ConfigError::Invalid { name: "PORT", .. }
        ));
        assert!(matches!(
            config(&[("PRODIA_POLL_MAX_ATTEMPTS", "0")]).unwrap_err(),
            ConfigError::Invalid { name: "PRODIA_POLL_MAX_ATTEMPTS", .. }
        ));
        assert!(config(&[("OPENAI_BASE_URL", "not a url")]).is_err());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("CORS_ALLOWED_ORIGINS", "https://a.test, https://b.test,"),
            ("PRODIA_BASE_URL", "http://127.0.0.1:9000/"),
            ("ENV", "release"),
            ("MAX_BODY_BYTES", "1048576"),
        ])
        .unwrap();
        assert_eq!(config.max_body_bytes, 1024 * 1024);
        assert_eq!(config.cors_origins, ["https://a.test", "https://b.test"]);
        assert_eq!(config.prodia_base_url.as_deref(), Some("http://127.0.0.1:9000"));
        assert!(config.release);
    }
}
