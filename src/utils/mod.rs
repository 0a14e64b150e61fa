pub mod hex;
pub mod retry;

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

/// Load the service configuration: built-in defaults, then the YAML file (if present),
/// then environment variables (`INFLUX_HOST`, `METRICS__ENABLED`, ...).
pub fn load_config<P: AsRef<Path>>(file_name: P) -> Result<Config> {
    let config_path = file_name.as_ref();
    info!("Config path: {}", config_path.to_string_lossy());

    let settings = config::Config::builder()
        .set_default("influx_port", 8086)?
        .set_default("influx_protocol", "http")?
        .set_default("influx_database_name", "Ethereum")?
        .set_default("influx_user", "user")?
        .set_default("influx_pass", "password")?
        .set_default("rpc_timeout_ms", 5000)?
        .set_default("poll_interval_ms", 1000)?
        .set_default("history_size", 100)?
        .set_default("seed_depth", 16)?
        .set_default("receipt_concurrency", 32)?
        .set_default("metrics.enabled", false)?
        .set_default("metrics.address", "0.0.0.0")?
        .set_default("metrics.port", 9100)?
        .add_source(
            File::new(&config_path.to_string_lossy(), FileFormat::Yaml).required(false),
        )
        .add_source(Environment::default().separator("__"))
        .build()
        .context("failed to read configuration")?;

    let config: Config = settings
        .try_deserialize()
        .context("failed to parse configuration (is ETHEREUM_URI / INFLUX_HOST set?)")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::InfluxProtocol;

    #[test]
    fn test_load_config_fills_defaults() {
        let path = std::env::temp_dir().join(format!("indexer-config-{}.yml", std::process::id()));
        std::fs::write(
            &path,
            "ethereum_uri: \"http://node:8545\"\ninflux_host: \"influx\"\ninflux_protocol: \"https\"\nhistory_size: 64\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.ethereum_uri, "http://node:8545");
        assert_eq!(config.influx_url(), "https://influx:8086");
        assert_eq!(config.influx_protocol, InfluxProtocol::Https);
        assert_eq!(config.history_size, 64);
        assert_eq!(config.rpc_timeout_ms, 5000);
        assert_eq!(config.start_block().unwrap(), None);
        assert!(!config.metrics.enabled);
    }
}
