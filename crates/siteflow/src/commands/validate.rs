use crate::utils;
use colored::Colorize;
use siteflow_cloud::Planner;
use siteflow_core::ResourceGraph;
use std::path::Path;

pub async fn handle(project_root: &Path, vars: Vec<(String, String)>) -> anyhow::Result<()> {
    println!("{}", "設定を検証中...".blue());
    println!(
        "プロジェクトルート: {}",
        project_root.display().to_string().cyan()
    );

    let checked = utils::load_site(project_root, vars).and_then(|site| {
        let graph = ResourceGraph::build(&site)?;
        let plane = utils::control_plane(project_root, &site)?;
        Planner::new(plane.as_ref()).validate(&site)?;
        Ok((site, graph, plane))
    });

    let (site, graph, plane) = match checked {
        Ok(checked) => checked,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", "✓ 設定ファイルは正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  プロジェクト: {}", site.name.cyan());
    println!(
        "  プロバイダー: {} ({})",
        plane.name().cyan(),
        plane.display_name()
    );
    println!(
        "  リソース: {}個 ({}レベル)",
        site.resources.len(),
        graph.levels().len()
    );
    for (id, resource) in &site.resources {
        let deps = resource.dependencies();
        if deps.is_empty() {
            println!("    - {}", id.to_string().cyan());
        } else {
            let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
            println!("    - {} → {}", id.to_string().cyan(), deps.join(", "));
        }
    }
    if !site.variables.is_empty() {
        println!("  変数: {}個", site.variables.len());
    }
    if !site.outputs.is_empty() {
        println!("  出力: {}個", site.outputs.len());
        for name in site.outputs.keys() {
            println!("    - {}", name.cyan());
        }
    }

    Ok(())
}
