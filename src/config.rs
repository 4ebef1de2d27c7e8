use anyhow::Result;
use serde::Deserialize;

use crate::chat::AssemblerConfig;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub chat: AssemblerConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    /// Interval between status checks while a document is processing
    pub poll_interval_secs: u64,
    /// Give up waiting for processing after this long
    pub wait_timeout_secs: u64,
    pub summary_max_length: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            connect_timeout_secs: 10,
            poll_interval_secs: 3,
            wait_timeout_secs: 600,
            summary_max_length: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaConfig {
    /// Local WAV copy of the document's audio track, if any
    pub file: Option<String>,
}

impl Config {
    /// Load from `path` (any format the config crate knows, extension optional)
    /// and `DOCCHAT_*` environment overrides, e.g. `DOCCHAT_API__BASE_URL`.
    /// A missing file falls back to defaults.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("DOCCHAT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
