use std::path::PathBuf;

use color_eyre::eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};

fn default_environment() -> String {
    "development".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    database: String,
    /// Environment name; test sessions refuse to start when this is
    /// "production".
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    spotify: Option<SpotifyConfig>,
    #[serde(default)]
    youtube: Option<YoutubeConfig>,
    #[serde(default)]
    pub safety: Option<SafetyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    /// Bearer token. Acquiring/refreshing it is out of scope here.
    pub access_token: String,
    #[serde(default)]
    pub market: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoutubeConfig {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Name prefixes identifying playlists as safe for automated mutation,
    /// preferred first.
    #[serde(default)]
    pub markers: Vec<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub max_test_playlists: Option<usize>,
}

const DEFAULT_CONFIG: &str = r#"# playlist-sync configuration
database = "~/.local/share/playlist-sync/library.db"
environment = "development"

# [spotify]
# access_token = ""

# [youtube]
# access_token = ""

# [safety]
# markers = ["🧪", "[TEST]"]
# level = "test_only"
"#;

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .context(format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("playlist-sync").join("config.toml"))
    }

    /// Load config from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path().ok_or(eyre!("Config file not found"))?;

        Self::from_file(&config_path)
    }

    /// Create a default config file, if it doesn't exist
    pub fn create_default() -> Result<PathBuf> {
        let config_path = Self::config_path().ok_or(eyre!("No config directory available"))?;
        if config_path.exists() {
            return Ok(config_path);
        }
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create config directory: {}",
                parent.display()
            ))?;
        }
        std::fs::write(&config_path, DEFAULT_CONFIG)
            .context(format!("Failed to write config: {}", config_path.display()))?;
        Ok(config_path)
    }

    /// Expand ~ to home directory
    fn expand_path(&self, path: &str) -> PathBuf {
        if path.starts_with("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(&path[2..]);
            }
        }
        PathBuf::from(path)
    }

    /// Get expanded database path
    pub fn database_path(&self) -> PathBuf {
        self.expand_path(&self.database)
    }

    pub fn spotify_config(&self) -> Result<SpotifyConfig> {
        if let Some(ref config) = self.spotify {
            return Ok(config.clone());
        }
        // Environment variable fallback
        let access_token = std::env::var("SPOTIFY_ACCESS_TOKEN")
            .map_err(|_| eyre!("No [spotify] config section and SPOTIFY_ACCESS_TOKEN unset"))?;
        Ok(SpotifyConfig {
            access_token,
            market: None,
        })
    }

    pub fn youtube_config(&self) -> Result<YoutubeConfig> {
        if let Some(ref config) = self.youtube {
            return Ok(config.clone());
        }
        let access_token = std::env::var("YOUTUBE_ACCESS_TOKEN")
            .map_err(|_| eyre!("No [youtube] config section and YOUTUBE_ACCESS_TOKEN unset"))?;
        Ok(YoutubeConfig { access_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "database = \"/tmp/test.db\"").unwrap();

        let config = Config::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/test.db"));
        assert_eq!(config.environment, "development");
        assert!(config.safety.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
database = "/tmp/test.db"
environment = "production"

[spotify]
access_token = "token"

[safety]
markers = ["🧪"]
level = "test_only"
dry_run = true
"#
        )
        .unwrap();

        let config = Config::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.spotify_config().unwrap().access_token, "token");
        let safety = config.safety.unwrap();
        assert_eq!(safety.markers, vec!["🧪"]);
        assert!(safety.dry_run);
    }
}
