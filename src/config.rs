// Service configuration, loaded from environment variables.

/// Runtime configuration for a ladder service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Id of the ladder variant this service runs.
    pub default_variant: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:ladder.db?mode=rwc`)
    /// - `LADDER_VARIANT` - id of the variant to run (default: `1v1`)
    pub fn load() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:ladder.db?mode=rwc".to_string());
        let default_variant =
            std::env::var("LADDER_VARIANT").unwrap_or_else(|_| "1v1".to_string());

        Config {
            database_url,
            default_variant,
        }
    }
}
