//! output ノードのパース

use super::value::{field, kdl_value_to_expr};
use crate::error::{Result, SiteError};
use crate::model::Output;
use kdl::KdlNode;

/// output ノードをパース
///
/// ```kdl
/// output "website_endpoint" {
///     value "${s3-bucket-website.site.website_endpoint}"
///     description "公開URL"
/// }
/// output "bucket_arn" "${s3-bucket.site.arn}"
/// ```
pub fn parse_output(node: &KdlNode) -> Result<Output> {
    let mut args = node.entries().iter().filter(|e| e.name().is_none());

    let name = args
        .next()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| SiteError::InvalidConfig("output requires a name".to_string()))?
        .to_string();

    let raw_value = args
        .next()
        .map(|e| e.value())
        .or_else(|| field(node, "value"))
        .ok_or_else(|| {
            SiteError::InvalidConfig(format!("output '{}' に value が指定されていません", name))
        })?;

    let mut output = Output::new(name, kdl_value_to_expr(raw_value)?);
    output.description = field(node, "description")
        .and_then(|v| v.as_string())
        .map(|s| s.to_string());
    output.sensitive = field(node, "sensitive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(output)
}
