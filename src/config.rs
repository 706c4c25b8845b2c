//! Runtime configuration

use std::path::PathBuf;

use crate::{Error, Result};

/// Gateway configuration assembled from CLI flags and environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token
    pub discord_token: String,

    /// OpenAI API key
    pub openai_api_key: String,

    /// GitHub personal access token
    pub github_token: String,

    /// Directory holding the configuration database
    pub data_dir: PathBuf,
}

impl Config {
    /// Assemble the configuration, resolving the data directory when one
    /// is not given
    ///
    /// # Errors
    ///
    /// Returns error if a required token is empty or the data directory
    /// cannot be created
    pub fn new(
        discord_token: String,
        openai_api_key: String,
        github_token: String,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        if discord_token.is_empty() {
            return Err(Error::Config("Discord token is not set".to_string()));
        }
        if openai_api_key.is_empty() {
            return Err(Error::Config("OpenAI API key is not set".to_string()));
        }
        if github_token.is_empty() {
            return Err(Error::Config("GitHub token is not set".to_string()));
        }

        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            discord_token,
            openai_api_key,
            github_token,
            data_dir,
        })
    }

    /// Path of the configuration database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("bugbot.db")
    }
}

/// OS-appropriate data directory, falling back to the working directory
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "bugbot", "bugbot")
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().to_path_buf())
}
