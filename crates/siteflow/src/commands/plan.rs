use crate::utils;
use colored::{ColoredString, Colorize};
use serde_json::Value;
use siteflow_cloud::{Action, ActionType, Plan, RefreshReport};
use std::path::{Path, PathBuf};

pub async fn handle(
    project_root: &Path,
    vars: Vec<(String, String)>,
    no_refresh: bool,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    println!("{}", "実行計画を作成中...".blue());
    utils::print_loaded_config_files(project_root);

    let site = utils::load_site(project_root, vars)?;
    let reconciler = utils::reconciler(project_root, &site, None)?;

    if !no_refresh {
        let report = reconciler.refresh().await?;
        print_refresh_report(&report);
    }

    let plan = reconciler.plan(&site).await?;
    println!();
    print_plan(&plan);

    if let Some(path) = out {
        plan.save(&path).await?;
        println!();
        println!(
            "計画を保存しました: {}",
            path.display().to_string().cyan()
        );
        println!("  適用するには: site apply --plan {}", path.display());
    }

    Ok(())
}

fn action_marker(action_type: ActionType) -> ColoredString {
    let symbol = action_type.symbol();
    match action_type {
        ActionType::Create => symbol.green().bold(),
        ActionType::Update => symbol.yellow().bold(),
        ActionType::Replace => symbol.red().bold(),
        ActionType::Delete => symbol.red().bold(),
        ActionType::NoOp => symbol.normal(),
    }
}

fn show_value(value: Option<&Value>) -> String {
    match value {
        None => "(なし)".dimmed().to_string(),
        Some(Value::String(s)) => format!("{:?}", s),
        Some(other) => other.to_string(),
    }
}

fn print_action(action: &Action) {
    println!(
        "  {} {} {}",
        action_marker(action.action_type),
        action.address.to_string().bold(),
        format!("({})", action.description).dimmed()
    );

    for change in &action.changes {
        let after = if change.after_unknown {
            "(適用後に確定)".dimmed().to_string()
        } else {
            show_value(change.after.as_ref())
        };
        let forces = if change.forces_replacement {
            format!(" {}", "# 置き換えが必要".red())
        } else {
            String::new()
        };

        match change.before.as_ref() {
            Some(before) if action.action_type != ActionType::Create => println!(
                "      {}: {} → {}{}",
                change.attribute,
                show_value(Some(before)),
                after,
                forces
            ),
            _ => println!("      {}: {}{}", change.attribute, after, forces),
        }
    }
}

/// 計画の内容とサマリー行を表示
pub fn print_plan(plan: &Plan) {
    if !plan.has_changes {
        println!("{}", "変更はありません。実体は定義どおりです。".green());
        println!("{}", plan.summary());
        return;
    }

    println!("{}", "実行計画:".bold());
    for (index, level) in plan.levels().into_iter().enumerate() {
        let changed: Vec<_> = level
            .into_iter()
            .filter(|a| a.action_type != ActionType::NoOp)
            .collect();
        if changed.is_empty() {
            continue;
        }
        println!("{}", format!(" レベル {}", index).dimmed());
        for action in changed {
            print_action(action);
        }
    }
    println!();
    println!("{}", plan.summary().to_string().bold());
}

pub fn print_refresh_report(report: &RefreshReport) {
    if report.checked == 0 {
        return;
    }
    println!(
        "リフレッシュ: {}個のリソースを確認しました",
        report.checked
    );
    for address in &report.removed {
        println!(
            "  {} {} はリモートに存在しません（状態から削除）",
            "!".yellow(),
            address.to_string().cyan()
        );
    }
    for address in &report.drifted {
        println!(
            "  {} {} はリモートで変更されています",
            "!".yellow(),
            address.to_string().cyan()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_show_value() {
        assert_eq!(show_value(Some(&json!("index.html"))), "\"index.html\"");
        assert_eq!(show_value(Some(&json!(3600))), "3600");
        assert_eq!(show_value(Some(&json!(["a", "b"]))), "[\"a\",\"b\"]");
    }
}
