use crate::StateCommands;
use crate::utils;
use colored::Colorize;
use siteflow_cloud::StateManager;
use siteflow_core::ResourceId;
use std::path::Path;
use std::time::Duration;

pub async fn handle(project_root: &Path, command: StateCommands) -> anyhow::Result<()> {
    let state = StateManager::new(project_root);

    match command {
        StateCommands::List => {
            let snapshot = state.load().await?;
            if snapshot.resources.is_empty() {
                println!("状態にリソースがありません");
                return Ok(());
            }
            for resource in snapshot.resources.values() {
                let mark = if resource.is_tainted() {
                    format!(" {}", "(tainted)".red())
                } else {
                    String::new()
                };
                println!(
                    "{}  {}{}",
                    resource.address().to_string().cyan(),
                    resource.id.dimmed(),
                    mark
                );
            }
            println!();
            println!("serial: {}", snapshot.serial);
        }
        StateCommands::Show { address } => {
            let id = ResourceId::parse(&address)?;
            let snapshot = state.load().await?;
            let resource = snapshot
                .get(&id)
                .ok_or_else(|| anyhow::anyhow!("{} は状態にありません", address))?;
            println!("{}", serde_json::to_string_pretty(resource)?);
        }
        StateCommands::Rm { address } => {
            let id = ResourceId::parse(&address)?;
            let stale_after = Duration::from_secs(utils::load_settings()?.lock_stale_after_secs);
            let lock = state.acquire_lock("state rm", stale_after).await?;

            let removed = async {
                let mut snapshot = state.load().await?;
                let removed = snapshot.remove_resource(&id);
                if removed.is_some() {
                    state.save(&snapshot).await?;
                }
                Ok::<_, siteflow_cloud::CloudError>(removed)
            }
            .await;
            lock.release().await?;

            match removed? {
                Some(resource) => {
                    println!(
                        "{} {} を状態から外しました（リモートの {} はそのまま残ります）",
                        "✓".green(),
                        address.cyan(),
                        resource.id
                    );
                }
                None => anyhow::bail!("{} は状態にありません", address),
            }
        }
        StateCommands::Unlock => {
            if let Some(info) = state.lock_info().await? {
                println!(
                    "ロック保持者: {} (pid {}, {}) {}",
                    info.holder, info.pid, info.operation, info.acquired_at
                );
            }
            if state.force_unlock().await? {
                println!("{}", "✓ ロックを解除しました".green());
            } else {
                println!("ロックはかかっていません");
            }
        }
    }

    Ok(())
}
