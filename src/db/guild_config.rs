//! Guild configuration storage

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::DbPool;
use crate::{Error, Result};

/// Per-guild bot configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    /// Target repository in `owner/repo` form
    pub github_repo: String,
    /// Product name used in analysis prompts
    pub product_name: String,
    /// Product type used in analysis prompts (e.g. "software")
    pub product_type: String,
    /// Issue categories the analysis may pick from
    pub issue_categories: Vec<String>,
    /// Extra per-guild information fields to collect in a report
    pub issue_extra_info: Vec<String>,
    /// Role name that marks an author as a developer
    pub developer_role: String,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            github_repo: String::new(),
            product_name: "Product Name".to_string(),
            product_type: "software".to_string(),
            issue_categories: Vec::new(),
            issue_extra_info: Vec::new(),
            developer_role: "Developer".to_string(),
        }
    }
}

impl GuildConfig {
    /// Human-readable label for a configuration field
    #[must_use]
    pub fn field_label(field: &str) -> &'static str {
        match field {
            "github_repo" => "GitHub Repository",
            "product_name" => "Product Name",
            "product_type" => "Product Type",
            "issue_categories" => "Issue Categories",
            "issue_extra_info" => "Issue Extra Information",
            "developer_role" => "Developer Role",
            _ => "Unknown Field",
        }
    }
}

/// Durable store for guild configuration
///
/// Calls are synchronous; callers that care about latency wrap them
/// themselves.
pub trait ConfigStore: Send + Sync {
    /// Load a guild's configuration, falling back to the default when the
    /// guild has never been configured
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn load(&self, guild_id: u64) -> Result<GuildConfig>;

    /// Persist a guild's configuration
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    fn save(&self, guild_id: u64, config: &GuildConfig) -> Result<()>;
}

/// `SQLite`-backed guild configuration repository
#[derive(Clone)]
pub struct ConfigRepo {
    pool: DbPool,
}

impl ConfigRepo {
    /// Create a new configuration repository
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl ConfigStore for ConfigRepo {
    fn load(&self, guild_id: u64) -> Result<GuildConfig> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let raw: Option<String> = conn
            .query_row(
                "SELECT config FROM guild_configs WHERE guild_id = ?1",
                [guild_id as i64],
                |row| row.get(0),
            )
            .ok();

        // Release the connection before save re-acquires from the pool
        drop(conn);

        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => {
                // Seed a default document so the guild shows up in the table
                let config = GuildConfig::default();
                self.save(guild_id, &config)?;
                Ok(config)
            }
        }
    }

    fn save(&self, guild_id: u64, config: &GuildConfig) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let json = serde_json::to_string(config)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO guild_configs (guild_id, config, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(guild_id) DO UPDATE SET config = ?2, updated_at = ?3",
            rusqlite::params![guild_id as i64, json, now],
        )?;

        Ok(())
    }
}
