use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::authz::principal::IdentityConfig;
use crate::errors::WardenError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    #[serde(default)]
    pub identity: IdentityConfig,
    pub catalog: Catalog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    /// A `.kdl` file, or a directory of them. Default: catalog/
    pub path: PathBuf,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            path: PathBuf::from("catalog"),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, WardenError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)?
            .set_default("server.port", Server::default().port)?
            .set_default(
                "catalog.path",
                Catalog::default().path.to_string_lossy().to_string(),
            )?
            .set_default("identity.skip_auth_when_missing", false)?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: WARDEN__SERVER__PORT=9090, etc.
        builder = builder.add_source(config::Environment::with_prefix("WARDEN").separator("__"));

        let cfg = builder.build()?;
        let mut s: Settings = cfg.try_deserialize()?;

        // Normalize catalog path to be relative to current dir
        if s.catalog.path.is_relative() {
            s.catalog.path = std::env::current_dir()?.join(&s.catalog.path);
        }

        Ok(s)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_load_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8090);
        assert_eq!(settings.identity.deployment_identity, None);
        assert!(!settings.identity.skip_auth_when_missing);
        assert!(settings.catalog.path.ends_with("catalog"));
    }

    #[test]
    fn test_settings_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
port = 9090

[identity]
deployment_identity = "warden@project.iam.gserviceaccount.com"
skip_auth_when_missing = true

[catalog]
path = "/etc/warden/catalog"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9090);
        assert_eq!(
            settings.identity.deployment_identity.as_deref(),
            Some("warden@project.iam.gserviceaccount.com")
        );
        assert!(settings.identity.skip_auth_when_missing);
        assert_eq!(settings.catalog.path, PathBuf::from("/etc/warden/catalog"));
    }

    #[test]
    fn test_settings_env_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
port = 8090
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        env::set_var("WARDEN__SERVER__PORT", "9999");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9999);

        env::remove_var("WARDEN__SERVER__PORT");
    }

    #[test]
    fn test_settings_path_normalization() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[catalog]
path = "relative/catalog"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert!(settings.catalog.path.is_absolute());
        assert!(settings.catalog.path.ends_with("relative/catalog"));
    }

    #[test]
    fn test_listen_addr() {
        let mut settings = Settings::default();
        settings.server.host = "localhost".to_string();
        settings.server.port = 3000;
        assert_eq!(settings.listen_addr(), "localhost:3000");
    }
}
