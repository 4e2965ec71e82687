//! variables ブロックのパース

use super::value::{field, kdl_value_to_json};
use crate::error::{Result, SiteError};
use crate::model::{VarType, Variable};
use kdl::KdlNode;

/// variables ブロックをパース
///
/// 以下の書き方を受け付けます:
/// ```kdl
/// variables {
///     domain type="string"
///     price_class type="string" default="PriceClass_100"
///     app_name "my-site"            // 短縮形（型は値から推論）
///     api_key {
///         type "string"
///         sensitive #true
///     }
/// }
/// ```
pub fn parse_variables_block(node: &KdlNode) -> Result<Vec<Variable>> {
    let Some(children) = node.children() else {
        return Ok(Vec::new());
    };
    children.nodes().iter().map(parse_variable).collect()
}

fn parse_variable(node: &KdlNode) -> Result<Variable> {
    let name = node.name().value().to_string();

    let declared_type = match field(node, "type").and_then(|v| v.as_string()) {
        Some(t) => Some(VarType::parse(t).ok_or_else(|| SiteError::InvalidVariable {
            name: name.clone(),
            message: format!("不明な型: {}", t),
        })?),
        None => None,
    };

    // 短縮形: 最初の引数をデフォルト値とする
    let default = field(node, "default")
        .or_else(|| {
            node.entries()
                .iter()
                .find(|e| e.name().is_none())
                .map(|e| e.value())
        })
        .map(kdl_value_to_json);

    let var_type = declared_type
        .or_else(|| default.as_ref().map(VarType::infer))
        .unwrap_or_default();

    if let Some(value) = &default
        && !var_type.accepts(value)
    {
        return Err(SiteError::InvalidVariable {
            name,
            message: format!("デフォルト値 {} は {} 型ではありません", value, var_type),
        });
    }

    Ok(Variable {
        description: field(node, "description")
            .and_then(|v| v.as_string())
            .map(|s| s.to_string()),
        sensitive: field(node, "sensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        name,
        var_type,
        default,
    })
}
