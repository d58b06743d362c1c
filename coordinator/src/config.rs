//! Configuration: a flat key=value file, overridden by
//! environment variables of the same name.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,

    pub scan_path: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_tracker_port")]
    pub tracker_port: u16,
    #[serde(default = "default_torrent_port")]
    pub torrent_port: u16,
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,

    #[serde(default = "default_scan_interval_hours")]
    pub scan_interval_hours: u64,

    pub registration_key: Option<String>,

    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Main,
    Client,
}

fn default_api_port() -> u16 {
    10858
}
fn default_tracker_port() -> u16 {
    10851
}
fn default_torrent_port() -> u16 {
    10852
}
fn default_relay_port() -> u16 {
    10866
}
fn default_scan_interval_hours() -> u64 {
    6
}

impl Config {
    /// Loads from `config.toml` (or `$COORDINATOR_CONFIG_PATH`) if present,
    /// then applies environment variable overrides — environment always wins.
    pub fn load() -> anyhow::Result<Self> {
        let file_path = std::env::var("COORDINATOR_CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        let builder = config::Config::builder()
            .set_default("api_port", default_api_port() as i64)?
            .set_default("tracker_port", default_tracker_port() as i64)?
            .set_default("torrent_port", default_torrent_port() as i64)?
            .set_default("relay_port", default_relay_port() as i64)?
            .set_default("scan_interval_hours", default_scan_interval_hours() as i64)?
            .set_default("role", "main")?
            .add_source(config::File::with_name(&file_path).required(false))
            .add_source(config::Environment::default());

        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
        )
    }
}
