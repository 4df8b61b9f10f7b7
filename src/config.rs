//! Runtime configuration, read from the environment.

use std::{env, path::PathBuf, str::FromStr};

use anyhow::anyhow;
use log::LevelFilter;

const DATABASE_PATH_VAR: &str = "TALLY_DB";
const LOG_DIR_VAR: &str = "TALLY_LOG_DIR";
const LOG_LEVEL_VAR: &str = "TALLY_LOG_LEVEL";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("tally.db"),
            log_dir: PathBuf::from("log"),
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> anyhow::Result<Config> {
        let mut config = Config::default();

        if let Some(path) = lookup(DATABASE_PATH_VAR) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(LOG_DIR_VAR) {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(LOG_LEVEL_VAR) {
            config.log_level = LevelFilter::from_str(level.trim())
                .map_err(|_| anyhow!("invalid value `{level}` for {LOG_LEVEL_VAR}"))?;
        }

        Ok(config)
    }
}
