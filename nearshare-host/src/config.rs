//! Load config from file and environment.

use std::path::{Path, PathBuf};

use nearshare_core::Config;
use tracing::debug;

/// File: ~/.config/nearshare/config.toml or /etc/nearshare/config.toml (first that exists).
/// Env overrides: NEARSHARE_ENDPOINT_NAME, NEARSHARE_AUTHENTICATION,
/// NEARSHARE_PAGE_TIMEOUT_MS, NEARSHARE_LOG.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Load config: defaults, then config file (if present), then env vars.
pub fn load() -> Result<Config, ConfigError> {
    load_from(&config_paths(), |var| std::env::var(var).ok())
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/nearshare/config.toml"));
    }
    out.push(PathBuf::from("/etc/nearshare/config.toml"));
    out
}

fn load_from(
    paths: &[PathBuf],
    env: impl Fn(&'static str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut c = match paths.iter().find(|p| p.exists()) {
        Some(p) => load_file(p)?,
        None => Config::default(),
    };
    if let Some(s) = env("NEARSHARE_ENDPOINT_NAME") {
        c.endpoint_name = s;
    }
    if let Some(s) = env("NEARSHARE_AUTHENTICATION") {
        c.authentication = parse_bool(&s).ok_or(ConfigError::InvalidEnv {
            var: "NEARSHARE_AUTHENTICATION",
            value: s,
        })?;
    }
    if let Some(s) = env("NEARSHARE_PAGE_TIMEOUT_MS") {
        c.page_request_timeout_ms = s.parse().map_err(|_| ConfigError::InvalidEnv {
            var: "NEARSHARE_PAGE_TIMEOUT_MS",
            value: s,
        })?;
    }
    if let Some(s) = env("NEARSHARE_LOG") {
        c.log_filter = s;
    }
    Ok(c)
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    debug!("loading config from {}", path.display());
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nearshare-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_when_nothing_present() {
        let c = load_from(&[PathBuf::from("/nonexistent/nearshare.toml")], |_| None).unwrap();
        assert_eq!(c, Config::default());
    }

    #[test]
    fn file_then_env() {
        let path = temp_file(
            "file_then_env.toml",
            "endpoint_name = \"Kitchen\"\npage_request_timeout_ms = 250\n",
        );
        let env: HashMap<&str, &str> =
            [("NEARSHARE_AUTHENTICATION", "off"), ("NEARSHARE_LOG", "debug")].into();
        let c = load_from(&[path], |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.endpoint_name, "Kitchen");
        assert_eq!(c.page_request_timeout_ms, 250);
        assert!(!c.authentication);
        assert_eq!(c.log_filter, "debug");
        assert_eq!(c.service_id, "org.nearshare.pages");
    }

    #[test]
    fn unknown_key_is_parse_error() {
        let path = temp_file("unknown_key.toml", "proxy_port = 3128\n");
        let err = load_from(&[path], |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn bad_env_value() {
        let err = load_from(&[], |k| {
            (k == "NEARSHARE_PAGE_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: "NEARSHARE_PAGE_TIMEOUT_MS",
                ..
            }
        ));
    }
}
