//! 属性式
//!
//! リソース属性や output の値を表します。文字列中の `${type.name.attr}`
//! は他のリソースへの参照として解釈されます。

use super::resource::ResourceId;
use crate::error::{Result, SiteError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// 属性名を省略した参照が指す属性（リモートID）
pub const ID_ATTRIBUTE: &str = "id";

/// `$${` はエスケープ、`${type.name}` / `${type.name.attr}` は参照
static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$\$\{|\$\{\s*([A-Za-z][A-Za-z0-9_-]*)\.([A-Za-z0-9_][A-Za-z0-9_-]*)(?:\.([A-Za-z0-9_]+))?\s*\}",
    )
    .expect("reference pattern is valid")
});

/// 他のリソース属性への参照
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub target: ResourceId,
    pub attribute: String,
}

impl Reference {
    pub fn new(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.attribute)
    }
}

/// 文字列テンプレートの構成要素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Reference(Reference),
}

/// 属性式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Expr {
    /// 参照を含まない値
    Literal(Value),
    /// 文字列全体が単一の参照（参照先の型を保持）
    Reference(Reference),
    /// 参照を埋め込んだ文字列
    Template(Vec<Segment>),
    List(Vec<Expr>),
    Object(BTreeMap<String, Expr>),
}

impl Expr {
    pub fn literal(value: Value) -> Self {
        Expr::Literal(value)
    }

    /// 文字列を式としてパース
    pub fn parse_str(input: &str) -> Result<Self> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut last = 0;

        for caps in REFERENCE_PATTERN.captures_iter(input) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            push_text(&mut segments, &input[last..whole.start()])?;
            last = whole.end();

            if whole.as_str() == "$${" {
                append_text(&mut segments, "${");
                continue;
            }

            let target = ResourceId::new(&caps[1], &caps[2]);
            let attribute = caps
                .get(3)
                .map(|m| m.as_str())
                .unwrap_or(ID_ATTRIBUTE)
                .to_string();
            segments.push(Segment::Reference(Reference::new(target, attribute)));
        }
        push_text(&mut segments, &input[last..])?;

        Ok(match segments.as_slice() {
            [] => Expr::Literal(Value::String(String::new())),
            [Segment::Text(text)] => Expr::Literal(Value::String(text.clone())),
            [Segment::Reference(reference)] => Expr::Reference(reference.clone()),
            _ => Expr::Template(segments),
        })
    }

    /// 式に含まれるすべての参照
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Reference(r) => refs.push(r),
            Expr::Template(segments) => {
                for segment in segments {
                    if let Segment::Reference(r) = segment {
                        refs.push(r);
                    }
                }
            }
            Expr::List(items) => items.iter().for_each(|e| e.collect_references(refs)),
            Expr::Object(fields) => fields.values().for_each(|e| e.collect_references(refs)),
        }
    }

    /// 参照を解決して値を評価
    ///
    /// `lookup` が `None` を返した参照は「適用後まで不明」とみなし、
    /// 式全体が `None` になります。
    pub fn evaluate<F>(&self, lookup: &F) -> Option<Value>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Expr::Literal(value) => Some(value.clone()),
            Expr::Reference(r) => lookup(r),
            Expr::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => out.push_str(text),
                        Segment::Reference(r) => match lookup(r)? {
                            Value::String(s) => out.push_str(&s),
                            other => out.push_str(&other.to_string()),
                        },
                    }
                }
                Some(Value::String(out))
            }
            Expr::List(items) => items
                .iter()
                .map(|e| e.evaluate(lookup))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Expr::Object(fields) => fields
                .iter()
                .map(|(k, e)| e.evaluate(lookup).map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object),
        }
    }
}

fn push_text(segments: &mut Vec<Segment>, text: &str) -> Result<()> {
    if text.contains("${") {
        return Err(SiteError::InvalidExpression(format!(
            "参照は ${{type.name}} または ${{type.name.attr}} 形式で記述してください: {}",
            text
        )));
    }
    if !text.is_empty() {
        append_text(segments, text);
    }
    Ok(())
}

fn append_text(segments: &mut Vec<Segment>, text: &str) {
    if let Some(Segment::Text(prev)) = segments.last_mut() {
        prev.push_str(text);
    } else {
        segments.push(Segment::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket() -> ResourceId {
        ResourceId::new("s3-bucket", "site")
    }

    #[test]
    fn test_parse_plain_string() {
        let expr = Expr::parse_str("index.html").unwrap();
        assert_eq!(expr, Expr::Literal(json!("index.html")));
    }

    #[test]
    fn test_parse_whole_reference_defaults_to_id() {
        let expr = Expr::parse_str("${s3-bucket.site}").unwrap();
        assert_eq!(expr, Expr::Reference(Reference::new(bucket(), "id")));
    }

    #[test]
    fn test_parse_reference_with_attribute() {
        let expr = Expr::parse_str("${ s3-bucket.site.arn }").unwrap();
        assert_eq!(expr, Expr::Reference(Reference::new(bucket(), "arn")));
    }

    #[test]
    fn test_parse_template() {
        let expr = Expr::parse_str("${s3-bucket.site.arn}/*").unwrap();
        assert_eq!(
            expr,
            Expr::Template(vec![
                Segment::Reference(Reference::new(bucket(), "arn")),
                Segment::Text("/*".to_string()),
            ])
        );
    }

    #[test]
    fn test_escaped_reference_is_literal() {
        let expr = Expr::parse_str("cost $${AWS::Region}").unwrap();
        assert_eq!(expr, Expr::Literal(json!("cost ${AWS::Region}")));
    }

    #[test]
    fn test_malformed_reference_is_rejected() {
        assert!(Expr::parse_str("${s3-bucket}").is_err());
        assert!(Expr::parse_str("${").is_err());
    }

    #[test]
    fn test_evaluate_preserves_type_of_whole_reference() {
        let expr = Expr::parse_str("${cloudfront-distribution.cdn.enabled}").unwrap();
        let value = expr.evaluate(&|_| Some(json!(true)));
        assert_eq!(value, Some(json!(true)));
    }

    #[test]
    fn test_evaluate_template_stringifies() {
        let expr = Expr::parse_str("https://${s3-bucket.site.port}/").unwrap();
        let value = expr.evaluate(&|_| Some(json!(8080)));
        assert_eq!(value, Some(json!("https://8080/")));
    }

    #[test]
    fn test_evaluate_unknown_propagates() {
        let expr = Expr::Object(
            [
                ("a".to_string(), Expr::literal(json!(1))),
                (
                    "b".to_string(),
                    Expr::List(vec![Expr::parse_str("${s3-bucket.site}").unwrap()]),
                ),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(expr.evaluate(&|_| None), None);
        assert_eq!(
            expr.evaluate(&|_| Some(json!("x"))),
            Some(json!({"a": 1, "b": ["x"]}))
        );
    }

    #[test]
    fn test_nested_references_collected() {
        let expr = Expr::List(vec![
            Expr::parse_str("${s3-bucket.site.arn}").unwrap(),
            Expr::parse_str("${s3-bucket.logs.arn}/*").unwrap(),
        ]);
        assert_eq!(expr.references().len(), 2);
    }
}
