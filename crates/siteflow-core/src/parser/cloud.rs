//! provider ノードのパース

use crate::error::{Result, SiteError};
use crate::model::ProviderConfig;
use kdl::KdlNode;

/// provider ノードをパース
pub fn parse_provider(node: &KdlNode) -> Result<(String, ProviderConfig)> {
    let name = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| SiteError::InvalidConfig("provider requires a name".to_string()))?
        .to_string();

    let mut provider = ProviderConfig::new(name.clone());

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "region" => {
                    provider.region = child
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_string())
                        .map(|s| s.to_string());
                }
                // 追加設定はconfigに保存
                other => {
                    if let Some(value) = child.entries().first().map(|e| e.value()) {
                        let value = match value.as_string() {
                            Some(s) => s.to_string(),
                            None => value.to_string(),
                        };
                        provider.config.insert(other.to_string(), value);
                    }
                }
            }
        }
    }

    Ok((name, provider))
}
