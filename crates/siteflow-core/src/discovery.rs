//! ファイル自動発見機能
//!
//! 規約ベースのディレクトリ構造からKDLファイルを自動的に発見します。

use crate::error::{Result, SiteError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// ルートファイル名
pub const ROOT_FILE: &str = "site.kdl";

/// プロジェクト固有のディレクトリ（状態ファイルもここに置かれる）
pub const PROJECT_DIR: &str = ".siteflow";

/// プロジェクトルートを上書きする環境変数
pub const PROJECT_ROOT_ENV: &str = "SITEFLOW_PROJECT_ROOT";

/// 発見されたファイル群
#[derive(Debug, Clone, Default)]
pub struct DiscoveredFiles {
    /// ルートファイル (site.kdl)
    pub root: Option<PathBuf>,
    /// リソース定義ファイル (resources/**/*.kdl)
    pub resources: Vec<PathBuf>,
    /// 変数定義ファイル (variables/**/*.kdl)
    pub variables: Vec<PathBuf>,
    /// 環境変数ファイル (.env)
    pub env_file: Option<PathBuf>,
}

impl DiscoveredFiles {
    /// 読み込み順に並べたKDLファイル
    pub fn kdl_files(&self) -> Vec<PathBuf> {
        self.root
            .iter()
            .chain(self.variables.iter())
            .chain(self.resources.iter())
            .cloned()
            .collect()
    }
}

fn has_root_file(dir: &Path) -> Option<PathBuf> {
    [dir.join(ROOT_FILE), dir.join(PROJECT_DIR).join(ROOT_FILE)]
        .into_iter()
        .find(|p| p.exists())
}

/// プロジェクトルートを検出
///
/// 以下の優先順位で検索:
/// 1. 環境変数 SITEFLOW_PROJECT_ROOT
/// 2. カレントディレクトリから上に向かって以下を探す:
///    - site.kdl
///    - .siteflow/site.kdl
#[tracing::instrument]
pub fn find_project_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var(PROJECT_ROOT_ENV) {
        let path = PathBuf::from(&root);
        debug!(env_root = %root, "Checking SITEFLOW_PROJECT_ROOT");
        if has_root_file(&path).is_some() {
            info!(project_root = %path.display(), "Found project root from environment variable");
            return Ok(path);
        }
    }

    let start_dir = std::env::current_dir()?;
    find_project_root_from(&start_dir)
}

/// 指定ディレクトリから上に向かってプロジェクトルートを探す
pub fn find_project_root_from(start_dir: &Path) -> Result<PathBuf> {
    let mut current = start_dir.to_path_buf();
    debug!(start_dir = %start_dir.display(), "Searching for project root");

    loop {
        if let Some(file) = has_root_file(&current) {
            info!(project_root = %current.display(), file = %file.display(), "Found project root");
            return Ok(current);
        }

        if !current.pop() {
            break;
        }
    }

    warn!(start_dir = %start_dir.display(), "Project root not found");
    Err(SiteError::ProjectRootNotFound(start_dir.to_path_buf()))
}

/// プロジェクトルートからファイルを自動発見
#[tracing::instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn discover_files(project_root: &Path) -> Result<DiscoveredFiles> {
    debug!("Starting file discovery");
    let mut discovered = DiscoveredFiles {
        root: has_root_file(project_root),
        ..Default::default()
    };

    if discovered.root.is_none() {
        return Err(SiteError::DiscoveryError {
            path: project_root.to_path_buf(),
            message: format!("{} が見つかりません", ROOT_FILE),
        });
    }

    discovered.resources = glob_kdl(project_root, "resources")?;
    discovered.variables = glob_kdl(project_root, "variables")?;

    let env_file = project_root.join(".env");
    if env_file.exists() {
        debug!(file = %env_file.display(), "Found .env file");
        discovered.env_file = Some(env_file);
    }

    info!(
        resources = discovered.resources.len(),
        variables = discovered.variables.len(),
        has_env = discovered.env_file.is_some(),
        "File discovery complete"
    );
    Ok(discovered)
}

/// `<root>/<dir>/**/*.kdl` をソート済みで返す
fn glob_kdl(project_root: &Path, dir: &str) -> Result<Vec<PathBuf>> {
    let base = project_root.join(dir);
    if !base.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = base.join("**").join("*.kdl");
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| SiteError::DiscoveryError {
        path: base.clone(),
        message: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => {
                debug!(file = %path.display(), "Discovered file");
                files.push(path);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Skipping unreadable path"),
        }
    }
    files.sort();
    Ok(files)
}
