use crate::commands::plan::print_plan;
use crate::utils;
use colored::Colorize;
use siteflow_cloud::{ApplyResult, Plan};
use std::path::{Path, PathBuf};

pub async fn handle(
    project_root: &Path,
    vars: Vec<(String, String)>,
    plan_file: Option<PathBuf>,
    yes: bool,
    parallelism: Option<usize>,
) -> anyhow::Result<()> {
    println!("{}", "適用を開始します...".blue().bold());
    utils::print_loaded_config_files(project_root);

    let site = utils::load_site(project_root, vars)?;
    let reconciler = utils::reconciler(project_root, &site, parallelism)?;

    let plan = match &plan_file {
        Some(path) => {
            println!("計画ファイル: {}", path.display().to_string().cyan());
            Plan::load(path).await?
        }
        None => reconciler.plan(&site).await?,
    };

    println!();
    print_plan(&plan);

    // 確認（--yesが指定されていない場合）
    if !yes {
        if plan.has_changes {
            println!();
            println!("実行するには --yes オプションを指定してください");
        }
        return Ok(());
    }

    let cancel = utils::cancel_on_ctrl_c();
    println!();
    let result = reconciler.apply(&site, &plan, &cancel).await?;
    print_result(&result);

    finish(&result)
}

/// 各ステップの結果を表示
pub fn print_result(result: &ApplyResult) {
    for ok in &result.succeeded {
        println!("  {} {}", "✓".green(), ok.message);
    }
    for failed in &result.failed {
        println!(
            "  {} {} ({}): {}",
            "✗".red(),
            failed.address.to_string().cyan(),
            failed.action_type,
            failed.error.as_deref().unwrap_or("不明なエラー")
        );
    }
    for skipped in &result.skipped {
        println!(
            "  {} {} をスキップ: {}",
            "-".yellow(),
            skipped.address.to_string().cyan(),
            skipped.message
        );
    }

    println!();
    println!(
        "完了: 成功 {}, 失敗 {}, スキップ {} ({}ms)",
        result.succeeded.len(),
        result.failed.len(),
        result.skipped.len(),
        result.duration_ms
    );
}

/// 失敗・中断があればエラーとして終了
pub fn finish(result: &ApplyResult) -> anyhow::Result<()> {
    if result.cancelled {
        anyhow::bail!("中断されました。完了したステップは状態に記録されています");
    }
    if !result.is_success() {
        anyhow::bail!(
            "{}個のステップが失敗しました。原因を修正して再度 site apply を実行してください",
            result.failed.len() + result.skipped.len()
        );
    }
    println!("{}", "✓ 適用が完了しました！".green().bold());
    Ok(())
}
