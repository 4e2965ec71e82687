use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("テンプレートエラー: {file}\n理由: {message}")]
    TemplateError {
        file: PathBuf,
        line: Option<usize>,
        message: String,
    },

    #[error("テンプレート展開エラー: {0}")]
    TemplateRenderError(String),

    #[error("ファイル発見エラー: {path}\n理由: {message}")]
    DiscoveryError { path: PathBuf, message: String },

    #[error(
        "プロジェクトルートが見つかりません\n探索開始位置: {0}\nヒント: site.kdl ファイルを含むディレクトリで実行してください"
    )]
    ProjectRootNotFound(PathBuf),

    #[error("リソースが重複しています: {0}")]
    DuplicateResource(String),

    #[error("未解決の参照: {from} が {target} を参照していますが、定義されていません")]
    UnresolvedReference { from: String, target: String },

    #[error("循環参照が検出されました: {0}")]
    CycleDetected(String),

    #[error("変数 '{0}' に値が設定されていません（default / .env / SITE_VAR_{0} / --var のいずれかで指定してください）")]
    MissingVariable(String),

    #[error("変数 '{name}' の値が不正です: {message}")]
    InvalidVariable { name: String, message: String },

    #[error("無効な式: {0}")]
    InvalidExpression(String),
}

pub type Result<T> = std::result::Result<T, SiteError>;
