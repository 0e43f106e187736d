use std::path::PathBuf;

use anyhow::{Context, Result};

/// Server settings, read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub page_limit_max: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            db_path: "duet.db".into(),
            page_limit_max: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let host = std::env::var("DUET_HOST").unwrap_or(defaults.host);
        let port = match std::env::var("DUET_PORT") {
            Ok(v) => v.parse().with_context(|| format!("DUET_PORT is not a port: {v}"))?,
            Err(_) => defaults.port,
        };
        let db_path = std::env::var("DUET_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let page_limit_max = match std::env::var("DUET_PAGE_LIMIT_MAX") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("DUET_PAGE_LIMIT_MAX is not a number: {v}"))?,
            Err(_) => defaults.page_limit_max,
        };

        Ok(Self {
            host,
            port,
            db_path,
            page_limit_max,
        })
    }
}
