//! resource ノードのパース

use super::value::node_to_expr;
use crate::error::{Result, SiteError};
use crate::model::{Expr, Resource, ResourceId, is_valid_name, is_valid_type};
use kdl::KdlNode;
use std::collections::BTreeMap;

/// resource ノードをパース
///
/// ```kdl
/// resource "s3-bucket-website" "site" {
///     bucket "${s3-bucket.site.id}"
///     index_document "index.html"
/// }
/// ```
pub fn parse_resource(node: &KdlNode) -> Result<Resource> {
    let mut args = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string());

    let (resource_type, name) = match (args.next(), args.next()) {
        (Some(t), Some(n)) => (t, n),
        _ => {
            return Err(SiteError::InvalidConfig(
                "resource にはタイプと名前が必要です（例: resource \"s3-bucket\" \"site\"）"
                    .to_string(),
            ));
        }
    };

    if !is_valid_type(resource_type) {
        return Err(SiteError::InvalidConfig(format!(
            "無効なリソースタイプ: {}",
            resource_type
        )));
    }
    if !is_valid_name(name) {
        return Err(SiteError::InvalidConfig(format!(
            "無効なリソース名: {}（英数字・-・_ のみ使用できます）",
            name
        )));
    }

    let mut resource = Resource::new(resource_type, name);
    let mut grouped: BTreeMap<String, Vec<Expr>> = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "depends-on" | "depends_on" => {
                    for entry in child.entries() {
                        let address = entry.value().as_string().ok_or_else(|| {
                            SiteError::InvalidConfig(format!(
                                "{}: depends-on にはリソースアドレスを文字列で指定してください",
                                resource.id
                            ))
                        })?;
                        resource.depends_on.push(ResourceId::parse(address)?);
                    }
                }
                "lifecycle" => {
                    if let Some(lifecycle) = child.children() {
                        for item in lifecycle.nodes() {
                            match item.name().value() {
                                "prevent-destroy" | "prevent_destroy" => {
                                    resource.lifecycle.prevent_destroy = item
                                        .entries()
                                        .first()
                                        .and_then(|e| e.value().as_bool())
                                        .unwrap_or(true);
                                }
                                other => {
                                    return Err(SiteError::InvalidConfig(format!(
                                        "{}: 不明な lifecycle 設定: {}",
                                        resource.id, other
                                    )));
                                }
                            }
                        }
                    }
                }
                "provider" => {
                    resource.provider = child
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_string())
                        .map(|s| s.to_string());
                }
                key => {
                    let expr = node_to_expr(child).map_err(|e| match e {
                        SiteError::InvalidConfig(msg) => {
                            SiteError::InvalidConfig(format!("{}: {}", resource.id, msg))
                        }
                        other => other,
                    })?;
                    grouped.entry(key.to_string()).or_default().push(expr);
                }
            }
        }
    }

    // 同名の属性ノードは配列にまとめる（例: origin ブロックの繰り返し）
    for (key, mut values) in grouped {
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            Expr::List(values)
        };
        resource.attributes.insert(key, value);
    }

    Ok(resource)
}
