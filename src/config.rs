use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "threadly", about = "A server-rendered social blogging platform")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub content: ContentConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
    pub bcrypt_cost: u32,
    /// Adds the `Secure` attribute to the session cookie.
    pub secure_cookie: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ContentConfig {
    pub posts_per_page: u32,
    pub notification_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "threadly_session".to_string(),
            session_hours: 720,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            secure_cookie: false,
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            posts_per_page: 6,
            notification_limit: 20,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli)?;
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        config.resolve_paths(&data_dir);
        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
        match cli.data_dir.clone() {
            Some(dir) => Ok(dir),
            None => dirs::home_dir()
                .map(|home| home.join(".threadly"))
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory")),
        }
    }

    /// Fill in database and upload paths that were not configured explicitly.
    pub fn resolve_paths(&mut self, data_dir: &Path) {
        if self.database.path.is_none() {
            self.database.path = Some(data_dir.join("threadly.db"));
        }
        if self.storage.path.is_none() {
            self.storage.path = Some(data_dir.join("uploads"));
        }
    }

    /// Database file; relative to the working directory until [`Config::resolve_paths`] ran.
    pub fn db_path(&self) -> &Path {
        self.database
            .path
            .as_deref()
            .unwrap_or(Path::new("threadly.db"))
    }

    pub fn uploads_path(&self) -> &Path {
        self.storage.path.as_deref().unwrap_or(Path::new("uploads"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(data_dir: Option<PathBuf>) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.cookie_name, "threadly_session");
        assert_eq!(config.auth.session_hours, 720);
        assert_eq!(config.content.posts_per_page, 6);
        assert_eq!(config.content.notification_limit, 20);
        assert!(config.database.path.is_none());
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli(Some(PathBuf::from("/tmp/test-threadly")));
        assert_eq!(
            Config::data_dir(&cli).unwrap(),
            PathBuf::from("/tmp/test-threadly")
        );
    }

    #[test]
    fn data_dir_defaults_to_home_dot_threadly() {
        let dir = Config::data_dir(&cli(None)).unwrap();
        assert!(dir.ends_with(".threadly"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli(Some(tmp.path().to_path_buf()))).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.db_path(), &tmp.path().join("threadly.db"));
        assert_eq!(config.uploads_path(), &tmp.path().join("uploads"));
    }

    #[test]
    fn load_reads_toml_file_and_cli_overrides_win() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "192.168.1.1"
port = 9000

[auth]
cookie_name = "my_cookie"
bcrypt_cost = 4

[content]
posts_per_page = 10
"#,
        )
        .unwrap();

        let cli = Cli {
            config: Some(config_path),
            host: None,
            port: Some(4000),
            data_dir: Some(tmp.path().to_path_buf()),
        };
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.auth.cookie_name, "my_cookie");
        assert_eq!(config.auth.bcrypt_cost, 4);
        assert_eq!(config.auth.session_hours, 720);
        assert_eq!(config.content.posts_per_page, 10);
        assert_eq!(config.content.notification_limit, 20);
    }
}
