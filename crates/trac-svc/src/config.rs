use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Service configuration, loaded from the YAML file named by
/// `TRAC_CONFIG_FILE` (spec §6). Grounded on the teacher's own
/// env-var-locates-file-then-`serde_yaml`-deserialize convention for
/// service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub listen_address: String,
    pub buckets: HashMap<String, BucketConfig>,
    pub default_bucket: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    #[serde(default = "default_aggregated_read_limit")]
    pub aggregated_read_limit_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    pub protocol: BucketProtocol,
    pub root_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BucketProtocol {
    Local,
}

fn default_batch_size() -> usize {
    trac_codec::DEFAULT_BATCH_SIZE
}

fn default_stream_idle_timeout_secs() -> u64 {
    60
}

fn default_aggregated_read_limit() -> usize {
    64 * 1024 * 1024
}

impl ServiceConfig {
    /// Loads and parses the file named by the `TRAC_CONFIG_FILE` environment
    /// variable (spec §6). `TRAC_SECRET_KEY`, also named by spec §6, is read
    /// separately by the caller and handed to the (stubbed) keystore hook —
    /// it names no material this core config type needs to parse.
    pub fn load_from_env() -> anyhow::Result<Self> {
        let path = std::env::var("TRAC_CONFIG_FILE")
            .map_err(|_| anyhow::anyhow!("TRAC_CONFIG_FILE is not set"))?;
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("failed to read config file {path}: {err}"))?;
        let config: ServiceConfig = serde_yaml::from_str(&text)
            .map_err(|err| anyhow::anyhow!("failed to parse config file {path}: {err}"))?;

        if !config.buckets.contains_key(&config.default_bucket) {
            anyhow::bail!(
                "defaultBucket '{}' is not declared in buckets",
                config.default_bucket
            );
        }

        Ok(config)
    }

    pub fn storage_buckets(&self) -> HashMap<String, PathBuf> {
        self.buckets
            .iter()
            .map(|(key, bucket)| (key.clone(), bucket.root_path.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let yaml = r#"
listenAddress: "0.0.0.0:8080"
defaultBucket: primary
buckets:
  primary:
    protocol: LOCAL
    rootPath: /var/trac/data
"#;
        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_bucket, "primary");
        assert_eq!(config.batch_size, trac_codec::DEFAULT_BATCH_SIZE);
        assert_eq!(config.stream_idle_timeout_secs, 60);
    }

    #[test]
    fn rejects_an_unknown_default_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
listenAddress: "0.0.0.0:8080"
defaultBucket: missing
buckets:
  primary:
    protocol: LOCAL
    rootPath: /var/trac/data
"#,
        )
        .unwrap();

        let err = ServiceConfig::load_from_path(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("defaultBucket"));
    }
}
