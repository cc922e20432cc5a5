use std::{collections::BTreeMap, path::Path, path::PathBuf, sync::Arc, time::Duration};

use cloudraid_common::MIB;
use cloudraid_storage::{
    ChunkBackendRef, ChunkCacheConfig, FileCacheConfig, ObjectBackend, UploadConfig,
};
use cloudraid_utils::object_storage;
use serde::{Deserialize, Serialize};
use snafu::{ensure, Location, ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("cannot read config file {}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("cannot parse config"))]
    Parse {
        source: serde_yaml::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("invalid configuration: {reason}"))]
    Invalid {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("cannot initialize backend {name}"))]
    Backend {
        name: String,
        source: opendal::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

/// One remote store. Each kind rides an opendal service; chunk index i is
/// served by the i-th backend in lexicographic name order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendSpec {
    Local {
        path: String,
    },
    Webdav {
        url: String,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    S3 {
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        #[serde(default)]
        use_ssl: Option<bool>,
        #[serde(default)]
        region: Option<String>,
    },
    /// In-process store, for tests and dry runs.
    Memory,
}

impl BackendSpec {
    pub fn build(&self, name: &str) -> Result<ChunkBackendRef, ConfigError> {
        let op = match self {
            BackendSpec::Local { path } => object_storage::new_fs_store(path),
            BackendSpec::Webdav {
                url,
                username,
                password,
            } => object_storage::new_webdav_store(url, username, password),
            BackendSpec::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                use_ssl,
                region,
            } => object_storage::new_s3_store(
                endpoint,
                access_key,
                secret_key,
                bucket,
                use_ssl.unwrap_or(false),
                region.as_deref(),
            ),
            BackendSpec::Memory => object_storage::new_memory_store("/"),
        }
        .context(BackendSnafu { name })?;
        Ok(Arc::new(ObjectBackend::new(name, op)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCacheSection {
    /// MiB.
    pub max_cache_size: u64,
    /// MiB.
    pub max_file_size: u64,
    /// Seconds.
    pub cache_ttl: u64,
}

impl Default for FileCacheSection {
    fn default() -> Self {
        Self {
            max_cache_size: 256,
            max_file_size: 32,
            cache_ttl: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkCacheSection {
    /// MiB.
    pub max_cache_size: u64,
    /// Seconds.
    pub cache_ttl: u64,
}

impl Default for ChunkCacheSection {
    fn default() -> Self {
        Self {
            max_cache_size: 256,
            cache_ttl: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncUploadSection {
    pub cache_dir: String,
    pub worker_threads: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_queue_size: usize,
}

impl Default for AsyncUploadSection {
    fn default() -> Self {
        Self {
            cache_dir: "/tmp/cloudraidfs_cache".to_string(),
            worker_threads: 4,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_queue_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mountpoint: String,
    pub k: usize,
    pub m: usize,
    pub backends: BTreeMap<String, BackendSpec>,
    #[serde(default)]
    pub cache: Option<FileCacheSection>,
    #[serde(default)]
    pub chunk_cache: Option<ChunkCacheSection>,
    #[serde(default)]
    pub async_upload: Option<AsyncUploadSection>,
}

impl Config {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(IoSnafu { path })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.k >= 1,
            InvalidSnafu {
                reason: format!("k must be at least 1, got {}", self.k),
            }
        );
        ensure!(
            self.k + self.m <= 255,
            InvalidSnafu {
                reason: format!("k + m must be at most 255, got {}", self.k + self.m),
            }
        );
        ensure!(
            self.backends.len() == self.k + self.m,
            InvalidSnafu {
                reason: format!(
                    "{} backends configured, k + m = {} required",
                    self.backends.len(),
                    self.k + self.m
                ),
            }
        );
        ensure!(
            !self.mountpoint.is_empty(),
            InvalidSnafu {
                reason: "mountpoint must not be empty",
            }
        );
        Ok(())
    }

    /// Backends in chunk-index order (lexicographic by name).
    pub fn build_backends(&self) -> Result<Vec<ChunkBackendRef>, ConfigError> {
        self.backends
            .iter()
            .map(|(name, spec)| spec.build(name))
            .collect()
    }

    pub fn chunk_cache_config(&self) -> ChunkCacheConfig {
        let section = self.chunk_cache.clone().unwrap_or_default();
        ChunkCacheConfig {
            max_bytes: (section.max_cache_size * MIB) as usize,
            ttl: Duration::from_secs(section.cache_ttl),
        }
    }

    pub fn file_cache_config(&self) -> Option<FileCacheConfig> {
        self.cache.as_ref().map(|section| FileCacheConfig {
            max_bytes: (section.max_cache_size * MIB) as usize,
            max_file_size: (section.max_file_size * MIB) as usize,
            ttl: Duration::from_secs(section.cache_ttl),
        })
    }

    pub fn upload_config(&self) -> Option<UploadConfig> {
        self.async_upload.as_ref().map(|section| UploadConfig {
            cache_dir: PathBuf::from(&section.cache_dir),
            worker_threads: section.worker_threads,
            max_retries: section.max_retries,
            retry_delay: Duration::from_millis(section.retry_delay_ms),
            max_queue: section.max_queue_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
mountpoint: /mnt/cloudraid
k: 2
m: 1
backends:
  a-local:
    type: local
    path: /srv/raid/a
  b-dav:
    type: webdav
    url: https://dav.example.com/raid
    username: user
    password: secret
  c-s3:
    type: s3
    endpoint: s3.example.com
    access_key: AK
    secret_key: SK
    bucket: raid
    use_ssl: true
    region: eu-west-1
chunk_cache:
  max_cache_size: 64
  cache_ttl: 30
async_upload:
  cache_dir: /var/spool/cloudraid
  worker_threads: 2
"#;

    #[test]
    fn parses_full_document() {
        let config = Config::from_yaml_str(FULL).unwrap();
        assert_eq!(config.k, 2);
        assert_eq!(config.m, 1);
        assert_eq!(config.backends.len(), 3);
        assert!(matches!(
            config.backends.get("a-local"),
            Some(BackendSpec::Local { .. })
        ));
        assert!(config.cache.is_none());

        let cc = config.chunk_cache_config();
        assert_eq!(cc.max_bytes, 64 << 20);
        assert_eq!(cc.ttl, Duration::from_secs(30));

        let up = config.upload_config().unwrap();
        assert_eq!(up.worker_threads, 2);
        // Unset keys fall back to defaults.
        assert_eq!(up.max_retries, 3);
        assert_eq!(up.max_queue, 10_000);
    }

    #[test]
    fn backend_order_is_lexicographic() {
        let config = Config::from_yaml_str(FULL).unwrap();
        let names: Vec<&String> = config.backends.keys().collect();
        assert_eq!(names, ["a-local", "b-dav", "c-s3"]);
    }

    #[test]
    fn rejects_wrong_backend_count() {
        let text = FULL.replace("k: 2", "k: 3");
        assert!(matches!(
            Config::from_yaml_str(&text),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_zero_data_chunks() {
        let text = FULL.replace("k: 2", "k: 0");
        assert!(matches!(
            Config::from_yaml_str(&text),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn memory_backends_build() {
        let text = r#"
mountpoint: /mnt/x
k: 1
m: 1
backends:
  a: { type: memory }
  b: { type: memory }
"#;
        let config = Config::from_yaml_str(text).unwrap();
        let backends = config.build_backends().unwrap();
        assert_eq!(backends.len(), 2);
    }
}
