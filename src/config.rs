use secrecy::Secret;
use serde::Deserialize;
use url::Url;

const DEFAULT_SCHEDULER_CRON: &str = "0 */5 * * * *";
const DEFAULT_SCHEDULER_BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub archive_database_url: String,
    pub base_url: Url,
    pub host: String,
    pub port: u16,

    // Scheduler
    pub scheduler_cron: String,
    pub scheduler_batch_size: i64,

    // Archival policy for checking accounts
    pub archive_checking_accounts: bool,

    // Security
    pub secure_cookies: bool,
    pub admin_email: Option<String>,
    pub admin_password: Option<Secret<String>>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let base_url: String = config.get("base_url")?;
        let base_url = Url::parse(&base_url)
            .map_err(|e| config::ConfigError::Message(format!("invalid base_url: {}", e)))?;

        Ok(Self {
            database_url: config.get("database_url")?,
            archive_database_url: config.get("archive_database_url")?,
            base_url,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            scheduler_cron: config
                .get("scheduler_cron")
                .unwrap_or_else(|_| DEFAULT_SCHEDULER_CRON.to_string()),
            scheduler_batch_size: config
                .get("scheduler_batch_size")
                .unwrap_or(DEFAULT_SCHEDULER_BATCH_SIZE),

            archive_checking_accounts: config
                .get("archive_checking_accounts")
                .unwrap_or(false),

            secure_cookies: config.get("secure_cookies").unwrap_or(true),
            admin_email: config.get("admin_email").ok(),
            admin_password: config.get::<String>("admin_password").ok().map(Secret::new),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/comptes".to_string(),
            archive_database_url: "postgres://localhost/comptes_archive".to_string(),
            base_url: Url::parse("http://localhost:3000").unwrap(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            scheduler_cron: DEFAULT_SCHEDULER_CRON.to_string(),
            scheduler_batch_size: DEFAULT_SCHEDULER_BATCH_SIZE,
            archive_checking_accounts: false,
            secure_cookies: false,
            admin_email: None,
            admin_password: None,
        }
    }
}
