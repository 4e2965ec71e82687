//! KDLノード → 属性式の変換

use crate::error::{Result, SiteError};
use crate::model::Expr;
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::BTreeMap;

/// KDL値をJSON値に変換
pub fn kdl_value_to_json(value: &KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        serde_json::Value::Number((i as i64).into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else {
        serde_json::Value::Null
    }
}

/// KDL値を式に変換（文字列は参照を含む可能性がある）
pub fn kdl_value_to_expr(value: &KdlValue) -> Result<Expr> {
    match value.as_string() {
        Some(s) => Expr::parse_str(s),
        None => Ok(Expr::Literal(kdl_value_to_json(value))),
    }
}

/// ノードを式に変換
///
/// - 引数1つ → スカラー
/// - 引数複数 → 配列
/// - プロパティ・子ノード → オブジェクト
pub fn node_to_expr(node: &KdlNode) -> Result<Expr> {
    let name = node.name().value();
    let mut args = Vec::new();
    let mut props = BTreeMap::new();

    for entry in node.entries() {
        match entry.name() {
            Some(key) => {
                props.insert(key.value().to_string(), kdl_value_to_expr(entry.value())?);
            }
            None => args.push(kdl_value_to_expr(entry.value())?),
        }
    }

    if node.children().is_some() || !props.is_empty() {
        if !args.is_empty() {
            return Err(SiteError::InvalidConfig(format!(
                "属性 '{}' に引数とブロック（またはプロパティ）を同時に指定することはできません",
                name
            )));
        }
        let mut fields = props;
        if let Some(children) = node.children() {
            for (key, value) in document_to_fields(children)? {
                fields.insert(key, value);
            }
        }
        return Ok(Expr::Object(fields));
    }

    match args.len() {
        0 => Err(SiteError::InvalidConfig(format!(
            "属性 '{}' に値が指定されていません",
            name
        ))),
        1 => Ok(args.remove(0)),
        _ => Ok(Expr::List(args)),
    }
}

/// 子ノード群をフィールドに変換
///
/// 同名のノードが複数ある場合は配列にまとめます。
pub fn document_to_fields(doc: &KdlDocument) -> Result<BTreeMap<String, Expr>> {
    let mut grouped: BTreeMap<String, Vec<Expr>> = BTreeMap::new();
    for child in doc.nodes() {
        grouped
            .entry(child.name().value().to_string())
            .or_default()
            .push(node_to_expr(child)?);
    }
    Ok(grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Expr::List(values)
            };
            (key, value)
        })
        .collect())
}

/// プロパティまたは同名の子ノードの最初の引数を取得
///
/// `name key="v"` と `name { key "v" }` の両方の書き方を受け付けます。
pub fn field<'a>(node: &'a KdlNode, key: &str) -> Option<&'a KdlValue> {
    let alt = key.replace('_', "-");
    node.entries()
        .iter()
        .find(|e| {
            e.name()
                .is_some_and(|n| n.value() == key || n.value() == alt)
        })
        .map(|e| e.value())
        .or_else(|| {
            node.children()?
                .nodes()
                .iter()
                .find(|c| c.name().value() == key || c.name().value() == alt)?
                .entries()
                .first()
                .map(|e| e.value())
        })
}
