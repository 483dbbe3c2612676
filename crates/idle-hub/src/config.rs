//! Environment configuration

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Directory holding `automations.json` and `devices.json`
    pub data_dir: PathBuf,
    /// HTTP listen address
    pub addr: SocketAddr,
}

impl HubConfig {
    /// Read `DATA_DIR` and `IDLE_HUB_ADDR`
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let data_dir = var("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let addr = var("IDLE_HUB_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid IDLE_HUB_ADDR: {addr}"))?;

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            addr,
        })
    }
}
