use crate::commands::plan::print_refresh_report;
use crate::utils;
use colored::Colorize;
use std::path::Path;

pub async fn handle(project_root: &Path, vars: Vec<(String, String)>) -> anyhow::Result<()> {
    println!("{}", "リモートの実体を確認中...".blue());

    let site = utils::load_site(project_root, vars)?;
    let reconciler = utils::reconciler(project_root, &site, None)?;
    let report = reconciler.refresh().await?;

    if report.checked == 0 {
        println!("状態にリソースがありません");
        return Ok(());
    }
    print_refresh_report(&report);
    if report.removed.is_empty() && report.drifted.is_empty() {
        println!("{}", "✓ 状態はリモートと一致しています".green());
    }
    Ok(())
}
