use colored::Colorize;
use siteflow_cloud::{
    CancelToken, ControlPlane, Reconciler, ReconcilerOptions, RetryConfig, StateManager,
};
use siteflow_cloud_local::LocalControlPlane;
use siteflow_config::{ConfigError, Settings};
use siteflow_core::{LoadOptions, ProviderConfig, Site};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// `--var name=value` をパース
pub fn parse_var(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'{}' は name=value 形式ではありません", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("'{}' に変数名がありません", s));
    }
    Ok((name.to_string(), value.to_string()))
}

/// サイト定義をロード（--var は .env や SITE_VAR_* より優先）
pub fn load_site(project_root: &Path, vars: Vec<(String, String)>) -> anyhow::Result<Site> {
    let overrides: HashMap<String, String> = vars.into_iter().collect();
    let options = LoadOptions::with_overrides(overrides);
    Ok(siteflow_core::load_site_from_root(project_root, &options)?)
}

/// 読み込んだ設定ファイル情報を表示
pub fn print_loaded_config_files(project_root: &Path) {
    println!("📄 読み込んだ設定ファイル:");

    let discovered = match siteflow_core::discover_files(project_root) {
        Ok(discovered) => discovered,
        Err(_) => return,
    };
    for file in discovered.kdl_files() {
        println!("  • {}", file.display().to_string().cyan());
    }
    if let Some(env_file) = discovered.env_file {
        println!("  • {} (変数)", env_file.display().to_string().cyan());
    }
}

/// ユーザー設定をロード（デフォルト < config.yaml < 環境変数）
pub fn load_settings() -> anyhow::Result<Settings> {
    match Settings::load() {
        Ok(settings) => Ok(settings),
        Err(ConfigError::ConfigDirNotFound) => {
            tracing::warn!("Config directory not found, using default settings");
            Ok(Settings::default().with_env_overrides()?)
        }
        Err(e) => Err(e.into()),
    }
}

/// 設定とCLIフラグから実行オプションを組み立てる
pub fn reconciler_options(settings: &Settings, parallelism: Option<usize>) -> ReconcilerOptions {
    let retry = &settings.retry;
    ReconcilerOptions {
        parallelism: parallelism.unwrap_or(settings.parallelism).max(1),
        retry: RetryConfig {
            max_attempts: retry.max_attempts,
            initial_delay: Duration::from_millis(retry.initial_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            backoff_multiplier: retry.multiplier,
        },
        lock_stale_after: Duration::from_secs(settings.lock_stale_after_secs),
    }
}

/// サイトのプロバイダー宣言からコントロールプレーンを作成
pub fn control_plane(project_root: &Path, site: &Site) -> anyhow::Result<Arc<dyn ControlPlane>> {
    let default = ProviderConfig::new("local");
    let provider = site.default_provider().unwrap_or(&default);

    match provider.name.as_str() {
        "local" => Ok(Arc::new(LocalControlPlane::from_provider(
            project_root,
            provider,
        ))),
        other => Err(anyhow::anyhow!(
            "未対応のプロバイダー: {}\n利用可能なプロバイダー: local",
            other
        )),
    }
}

/// サイト定義と設定から Reconciler を作成
pub fn reconciler(
    project_root: &Path,
    site: &Site,
    parallelism: Option<usize>,
) -> anyhow::Result<Reconciler> {
    let settings = load_settings()?;
    let plane = control_plane(project_root, site)?;
    Ok(Reconciler::new(plane, StateManager::new(project_root))
        .with_options(reconciler_options(&settings, parallelism)))
}

/// Ctrl-C でキャンセルされるトークン
pub fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!(
                "{}",
                "中断を受け付けました。実行中の処理を停止しています...".yellow()
            );
            handle.cancel();
        }
    });
    token
}
