use colored::Colorize;
use serde_json::Value;
use siteflow_cloud::{OutputValue, StateManager};
use std::collections::BTreeMap;
use std::path::Path;

pub async fn handle(project_root: &Path, name: Option<String>, json: bool) -> anyhow::Result<()> {
    let snapshot = StateManager::new(project_root).load().await?;
    let outputs = &snapshot.outputs;

    if let Some(name) = name {
        let output = outputs.get(&name).ok_or_else(|| {
            anyhow::anyhow!(
                "出力 '{}' が見つかりません\n利用可能な出力: {}",
                name,
                names(outputs)
            )
        })?;
        // 名前を指定した場合は sensitive でも値を表示する
        if json {
            println!("{}", serde_json::to_string_pretty(&output.value)?);
        } else {
            println!("{}", raw(&output.value));
        }
        return Ok(());
    }

    if json {
        let values: BTreeMap<&String, &Value> =
            outputs.iter().map(|(k, v)| (k, &v.value)).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if outputs.is_empty() {
        println!("出力はありません（site apply の後に表示されます）");
        return Ok(());
    }
    for (name, output) in outputs {
        let shown = if output.sensitive {
            "(sensitive)".dimmed().to_string()
        } else {
            raw(&output.value)
        };
        println!("{} = {}", name.cyan(), shown);
    }
    Ok(())
}

fn names(outputs: &BTreeMap<String, OutputValue>) -> String {
    if outputs.is_empty() {
        return "(なし)".to_string();
    }
    outputs.keys().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

/// 文字列は引用符なし、それ以外はJSON
fn raw(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
