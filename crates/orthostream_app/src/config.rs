use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use orthostream_engine::{ClientSettings, EngineConfig, SearchSettings, TreeSettings};
use orthostream_logging::ortho_info;
use serde::{Deserialize, Serialize};

/// On-disk settings. Every field is optional; missing ones keep the engine default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) base_url: Option<String>,
    pub(crate) connect_timeout_ms: Option<u64>,
    pub(crate) request_timeout_ms: Option<u64>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) backoff_unit_ms: Option<u64>,
    pub(crate) user_agent: Option<String>,
    pub(crate) search: SearchSection,
    pub(crate) tree: TreeSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SearchSection {
    pub(crate) stream_path: Option<String>,
    pub(crate) chunk_path: Option<String>,
    pub(crate) chunk_size: Option<u32>,
    pub(crate) max_chunks: Option<u32>,
    pub(crate) total_estimate: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct TreeSection {
    pub(crate) preview_path: Option<String>,
    pub(crate) latency_budget_ms: Option<u64>,
}

impl AppConfig {
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = ron::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        ortho_info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub(crate) fn into_engine_config(self) -> EngineConfig {
        let client = ClientSettings::default();
        let search = SearchSettings::default();
        let tree = TreeSettings::default();
        EngineConfig {
            client: ClientSettings {
                base_url: self.base_url.unwrap_or(client.base_url),
                connect_timeout: millis_or(self.connect_timeout_ms, client.connect_timeout),
                request_timeout: millis_or(self.request_timeout_ms, client.request_timeout),
                max_retries: self.max_retries.unwrap_or(client.max_retries),
                backoff_unit: millis_or(self.backoff_unit_ms, client.backoff_unit),
                user_agent: self.user_agent.unwrap_or(client.user_agent),
            },
            search: SearchSettings {
                stream_path: self.search.stream_path.unwrap_or(search.stream_path),
                chunk_path: self.search.chunk_path.unwrap_or(search.chunk_path),
                chunk_size: self.search.chunk_size.unwrap_or(search.chunk_size),
                max_chunks: self.search.max_chunks.unwrap_or(search.max_chunks),
                total_estimate: self.search.total_estimate.or(search.total_estimate),
            },
            tree: TreeSettings {
                preview_path: self.tree.preview_path.unwrap_or(tree.preview_path),
                latency_budget: millis_or(self.tree.latency_budget_ms, tree.latency_budget),
            },
        }
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"(
                base_url: Some("http://orthologs.example/"),
                request_timeout_ms: Some(2500),
                search: (chunk_size: Some(10)),
                tree: (latency_budget_ms: Some(75)),
            )"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap().into_engine_config();

        assert_eq!(config.client.base_url, "http://orthologs.example/");
        assert_eq!(config.client.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.client.max_retries, 2);
        assert_eq!(config.search.chunk_size, 10);
        assert_eq!(config.search.max_chunks, 20);
        assert_eq!(config.tree.latency_budget, Duration::from_millis(75));
    }

    #[test]
    fn empty_config_is_the_default_engine() {
        let config = AppConfig::default().into_engine_config();
        let default = EngineConfig::default();
        assert_eq!(config.client.base_url, default.client.base_url);
        assert_eq!(config.search.stream_path, default.search.stream_path);
        assert_eq!(config.tree.preview_path, default.tree.preview_path);
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(base_url: 42)").unwrap();

        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
    }
}
