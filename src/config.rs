use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::manifest::DEFAULT_MANIFEST_NAME;

pub const TOKEN_ENV: &str = "ONEPROVIDER_REST_ACCESS_TOKEN";
pub const PROVIDER_ENV: &str = "ONEPROVIDER_HOST";
pub const ROOT_ID_ENV: &str = "ONEDATA_ROOT_ID";
pub const DEFAULT_CONFIG_FILE: &str = "gtn-mirror.json";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub manifest_name: Option<String>,
    #[serde(default)]
    pub skip_list: Option<String>,
    #[serde(default)]
    pub staging_dir: Option<String>,
    #[serde(default)]
    pub transfer: TransferSection,
    #[serde(default)]
    pub remote: RemoteSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TransferSection {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub backoff_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSection {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub root_id: Option<String>,
    #[serde(default)]
    pub upload_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub max_retries: u32,
    pub backoff: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            chunk_size: 512 * 1024,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub provider: Option<String>,
    pub root_id: Option<String>,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub upload_timeout: Duration,
}

// Keeps the token out of logs.
impl std::fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("provider", &self.provider)
            .field("root_id", &self.root_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("upload_timeout", &self.upload_timeout)
            .finish()
    }
}

impl RemoteSettings {
    pub fn base_url(&self) -> Result<String, MirrorError> {
        let provider = self
            .provider
            .as_deref()
            .ok_or_else(|| MirrorError::MissingRemoteSetting(PROVIDER_ENV.to_string()))?;
        let provider = provider.trim().trim_end_matches('/');
        if provider.starts_with("https://") || provider.starts_with("http://") {
            Ok(format!("{provider}/api/v3/oneprovider"))
        } else {
            Ok(format!("https://{provider}/api/v3/oneprovider"))
        }
    }

    pub fn require_token(&self) -> Result<&str, MirrorError> {
        self.token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| MirrorError::MissingToken(TOKEN_ENV.to_string()))
    }

    pub fn require_root_id(&self) -> Result<&str, MirrorError> {
        self.root_id
            .as_deref()
            .ok_or_else(|| MirrorError::MissingRemoteSetting(ROOT_ID_ENV.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub manifest_name: String,
    pub skip_list: Option<Utf8PathBuf>,
    pub staging_dir: Utf8PathBuf,
    pub transfer: TransferSettings,
    pub remote: RemoteSettings,
}

#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub token: Option<String>,
    pub provider: Option<String>,
    pub root_id: Option<String>,
}

impl EnvOverrides {
    pub fn from_process() -> Self {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            token: read(TOKEN_ENV),
            provider: read(PROVIDER_ENV),
            root_id: read(ROOT_ID_ENV),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    // An explicit path must exist; otherwise `gtn-mirror.json` is optional.
    pub fn resolve(path: Option<&str>, env: EnvOverrides) -> Result<MirrorConfig, MirrorError> {
        let config = match path {
            Some(path) => Self::read(PathBuf::from(path))?,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::read(default_path)?
                } else {
                    Config::default()
                }
            }
        };
        Self::resolve_config(config, env)
    }

    fn read(path: PathBuf) -> Result<Config, MirrorError> {
        let content = fs::read_to_string(&path).map_err(|_| MirrorError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| MirrorError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config, env: EnvOverrides) -> Result<MirrorConfig, MirrorError> {
        let defaults = TransferSettings::default();
        let transfer = TransferSettings {
            max_retries: config
                .transfer
                .max_retries
                .unwrap_or(defaults.max_retries),
            backoff: config
                .transfer
                .backoff_secs
                .map_or(defaults.backoff, Duration::from_secs),
            connect_timeout: config
                .transfer
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            read_timeout: config
                .transfer
                .read_timeout_secs
                .map_or(defaults.read_timeout, Duration::from_secs),
            chunk_size: config.transfer.chunk_size.unwrap_or(defaults.chunk_size),
        };
        if transfer.max_retries == 0 {
            return Err(MirrorError::InvalidConfig(
                "transfer.max_retries must be at least 1".to_string(),
            ));
        }
        if transfer.chunk_size == 0 {
            return Err(MirrorError::InvalidConfig(
                "transfer.chunk_size must be positive".to_string(),
            ));
        }

        let remote = RemoteSettings {
            provider: env.provider.or(config.remote.provider),
            root_id: env.root_id.or(config.remote.root_id),
            token: env.token,
            connect_timeout: transfer.connect_timeout,
            request_timeout: transfer.read_timeout,
            upload_timeout: Duration::from_secs(config.remote.upload_timeout_secs.unwrap_or(600)),
        };

        let staging_dir = match config.staging_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_staging_dir()?,
        };

        Ok(MirrorConfig {
            manifest_name: config
                .manifest_name
                .unwrap_or_else(|| DEFAULT_MANIFEST_NAME.to_string()),
            skip_list: config.skip_list.map(Utf8PathBuf::from),
            staging_dir,
            transfer,
            remote,
        })
    }
}

fn default_staging_dir() -> Result<Utf8PathBuf, MirrorError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.cache_dir().join("gtn-data-mirror").join("staging"))
                .ok()
        })
        .ok_or_else(|| MirrorError::Filesystem("unable to resolve cache directory".to_string()))
}
