pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 設定ファイル名（設定ディレクトリ直下）
pub const SETTINGS_FILE: &str = "config.yaml";

/// 並列数を上書きする環境変数
pub const PARALLELISM_ENV: &str = "SITEFLOW_PARALLELISM";

/// SiteFlowの設定ディレクトリを取得（~/.config/siteflow）
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("siteflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// ユーザー設定
///
/// 優先順位: デフォルト < config.yaml < 環境変数 < CLIフラグ（CLI側で適用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 同一レベル内で同時に実行する操作数
    pub parallelism: usize,
    /// この秒数より古いロックは破棄される
    pub lock_stale_after_secs: u64,
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: 10,
            lock_stale_after_secs: 3600,
            retry: RetrySettings::default(),
        }
    }
}

/// リトライ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl Settings {
    /// 設定ディレクトリの config.yaml と環境変数から読み込む
    pub fn load() -> Result<Self> {
        let path = get_config_dir()?.join(SETTINGS_FILE);
        Self::load_from(&path)?.with_env_overrides()
    }

    /// 指定ファイルから読み込む（存在しなければデフォルト）
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Settings file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidSettings {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        settings.validate(path)?;

        debug!(path = %path.display(), parallelism = settings.parallelism, "Loaded settings");
        Ok(settings)
    }

    /// 環境変数による上書きを適用
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var(PARALLELISM_ENV) {
            self.parallelism = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: PARALLELISM_ENV.to_string(),
                        value,
                    });
                }
            };
        }
        Ok(self)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |message: &str| ConfigError::InvalidSettings {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        if self.parallelism == 0 {
            return Err(invalid("parallelism は 1 以上を指定してください"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts は 1 以上を指定してください"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier は 1.0 以上を指定してください"));
        }
        Ok(())
    }
}
