//! JSON configuration schema and validation.
//!
//! Covers the `Engine`, `Execution`, `Fees`, `Information`, `Instrument`,
//! `Limits`, and `Traders` sections. Deserialized with `serde_json`;
//! validated by hand afterwards, since `serde`'s type system already
//! rejects wrong JSON types — the remaining checks here are the ones
//! `serde` cannot express (range checks, non-empty strings).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::engine::error::StartupError;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub market_data_file: String,
    pub market_event_interval: f64,
    pub market_open_delay: f64,
    pub match_events_file: String,
    pub score_board_file: String,
    pub speed: f64,
    pub tick_interval: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeesConfig {
    pub maker: f64,
    pub taker: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InformationConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub etf_clamp: f64,
    pub tick_size: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub active_order_count_limit: u32,
    pub active_volume_limit: u64,
    pub message_frequency_interval: f64,
    pub message_frequency_limit: u32,
    pub position_limit: i64,
}

/// Top-level configuration loaded from the `--config` JSON file.
///
/// Field names use `serde(rename_all = "PascalCase")` on the container so
/// the JSON uses `PascalCase` section and key names (`MarketDataFile`,
/// `TickInterval`, ...) while Rust field names stay idiomatic `snake_case`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    pub engine: EngineConfig,
    pub execution: ExecutionConfig,
    pub fees: FeesConfig,
    pub information: InformationConfig,
    pub instrument: InstrumentConfig,
    pub limits: LimitsConfig,
    pub traders: HashMap<String, String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, StartupError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| StartupError::Config(format!("failed to read {}: {err}", path.display())))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|err| StartupError::Config(format!("failed to parse {}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), StartupError> {
        if self.execution.host.trim().is_empty() {
            return Err(StartupError::Config("Execution.Host must not be empty".into()));
        }
        if self.information.name.trim().is_empty() {
            return Err(StartupError::Config("Information.Name must not be empty".into()));
        }
        if self.instrument.tick_size <= 0.0 {
            return Err(StartupError::Config("Instrument.TickSize must be positive".into()));
        }
        if self.engine.speed <= 0.0 {
            return Err(StartupError::Config("Engine.Speed must be positive".into()));
        }
        if self.engine.tick_interval <= 0.0 {
            return Err(StartupError::Config("Engine.TickInterval must be positive".into()));
        }
        if self.limits.message_frequency_interval <= 0.0 {
            return Err(StartupError::Config(
                "Limits.MessageFrequencyInterval must be positive".into(),
            ));
        }
        if self.traders.keys().any(|k| k.trim().is_empty()) {
            return Err(StartupError::Config("Traders keys must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "Engine": {
                "MarketDataFile": "market_data.csv",
                "MarketEventInterval": 0.25,
                "MarketOpenDelay": 5.0,
                "MatchEventsFile": "match_events.csv",
                "ScoreBoardFile": "score_board.csv",
                "Speed": 1.0,
                "TickInterval": 0.25
            },
            "Execution": { "Host": "127.0.0.1", "Port": 12345 },
            "Fees": { "Maker": -0.0002, "Taker": 0.0002 },
            "Information": { "Type": "UDP", "Name": "239.255.0.1" },
            "Instrument": { "EtfClamp": 0.002, "TickSize": 0.01 },
            "Limits": {
                "ActiveOrderCountLimit": 10,
                "ActiveVolumeLimit": 200,
                "MessageFrequencyInterval": 1.0,
                "MessageFrequencyLimit": 50,
                "PositionLimit": 1000
            },
            "Traders": { "Example": "secret" }
        }"#
    }

    #[test]
    fn parses_well_formed_config() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(config.execution.port, 12345);
        assert_eq!(config.traders.get("Example").unwrap(), "secret");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_empty_host() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        config.execution.host = "  ".into();
        assert!(config.validate().is_err());
    }
}
