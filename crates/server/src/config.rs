//! A small struct read once at startup, mirroring the environment-variable
//! table the tool surface documents.

use std::path::PathBuf;

/// Server configuration, resolved from environment variables with CLI-flag
/// overrides applied by the caller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for the Provider Binary Cache.
    pub tmp_dir: PathBuf,
    /// Directory containing the durable state store file.
    pub db_dir: PathBuf,
    /// Base URL of the OpenTofu-compatible provider registry.
    pub registry_url: String,
    /// Base URL of the OpenTofu API.
    pub api_url: String,
}

impl Config {
    /// Reads configuration from environment variables, falling back to the
    /// documented defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            tmp_dir: std::env::var("TMP_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/tmp/infractl-executor")),
            db_dir: std::env::var("DB_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./.state/")),
            registry_url: std::env::var("OPENTOFU_REGISTRY_URL").unwrap_or_else(|_| "https://registry.opentofu.org".to_string()),
            api_url: std::env::var("OPENTOFU_API_URL").unwrap_or_else(|_| "https://api.opentofu.org".to_string()),
        }
    }

    /// Path to the state database file, `{db_dir}/state.db`.
    #[must_use]
    pub fn state_db_path(&self) -> PathBuf {
        self.db_dir.join("state.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_db_path_is_under_db_dir() {
        let cfg = Config { tmp_dir: "/tmp/x".into(), db_dir: "/var/lib/infractl".into(), registry_url: String::new(), api_url: String::new() };
        assert_eq!(cfg.state_db_path(), PathBuf::from("/var/lib/infractl/state.db"));
    }
}
