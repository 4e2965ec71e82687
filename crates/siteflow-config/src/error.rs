use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error("設定ファイルの形式が不正です: {path}\n理由: {message}")]
    InvalidSettings { path: PathBuf, message: String },

    #[error("環境変数 {name} の値が不正です: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
