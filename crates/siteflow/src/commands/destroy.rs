use crate::commands::apply::{finish, print_result};
use crate::commands::plan::print_plan;
use crate::utils;
use colored::Colorize;
use std::path::Path;

pub async fn handle(project_root: &Path, vars: Vec<(String, String)>, yes: bool) -> anyhow::Result<()> {
    println!("{}", "削除計画を作成中...".blue().bold());

    let site = utils::load_site(project_root, vars)?;
    let reconciler = utils::reconciler(project_root, &site, None)?;
    let plan = reconciler.plan_destroy().await?;

    println!();
    print_plan(&plan);
    if !plan.has_changes {
        return Ok(());
    }

    if !yes {
        println!();
        println!(
            "{}",
            "警告: 状態にある全てのリソースをリモートから削除します。".yellow()
        );
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    let cancel = utils::cancel_on_ctrl_c();
    println!();
    let result = reconciler.destroy(&plan, &cancel).await?;
    print_result(&result);

    finish(&result)
}
