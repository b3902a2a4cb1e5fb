//! Configuration file handling for canscoped
//!
//! ```toml
//! record = true
//!
//! [pipeline]
//! trace_folder = "/var/log/canscope"
//! trace_format = "binary"
//!
//! [[bus]]
//! type = "socketcan"
//! channel = "can0"
//! bus_number = 1
//!
//! [[filter]]
//! name = "no diagnostics"
//! action = "Drop"
//! id_from = 0x700
//! id_to = 0x7FF
//!
//! [[tx]]
//! id = 0x321
//! data = [0xDE, 0xAD]
//! cycle_ms = 100
//! cycle_enabled = true
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use canscope_bus::BusConfig;
use canscope_pipeline::{FilterRule, PipelineConfig, RxFilter, TraceFormat, TxRow};
use serde::{Deserialize, Serialize};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Buses to connect on startup
    #[serde(default, rename = "bus")]
    pub buses: Vec<BusConfig>,
    /// Receive filter rules; empty keeps the default pass-all rules
    #[serde(default, rename = "filter")]
    pub filter_rules: Vec<FilterRule>,
    /// Transmit rows
    #[serde(default, rename = "tx")]
    pub tx_rows: Vec<TxRow>,
    /// Start trace recording as soon as the pipeline runs
    #[serde(default = "default_record")]
    pub record: bool,
}

fn default_record() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            buses: vec![BusConfig::default()],
            filter_rules: Vec::new(),
            tx_rows: Vec::new(),
            record: default_record(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply command-line overrides
    pub fn merge_with_args(&mut self, trace_dir: Option<&PathBuf>, format: Option<TraceFormat>) {
        if let Some(dir) = trace_dir {
            self.pipeline.trace_folder = Some(dir.clone());
        }
        if let Some(format) = format {
            self.pipeline.trace_format = format;
        }
    }

    pub fn rx_filter(&self) -> RxFilter {
        let mut filter = RxFilter::default();
        filter.set_rules(self.filter_rules.clone());
        filter
    }
}
