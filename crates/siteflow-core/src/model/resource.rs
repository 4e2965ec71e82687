//! リソース宣言

use super::expr::Expr;
use crate::error::{Result, SiteError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// リソースの識別子 `(type, name)`
///
/// 文字列表現は `type.name`（例: `s3-bucket.site`）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// リソースタイプ（s3-bucket, cloudfront-distribution など）
    pub resource_type: String,
    /// ドキュメント内での名前
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// `type.name` 形式のアドレスをパース
    pub fn parse(address: &str) -> Result<Self> {
        let (resource_type, name) = address.split_once('.').ok_or_else(|| {
            SiteError::InvalidConfig(format!(
                "リソースアドレスは type.name 形式で指定してください: {}",
                address
            ))
        })?;

        if !is_valid_type(resource_type) || !is_valid_name(name) {
            return Err(SiteError::InvalidConfig(format!(
                "無効なリソースアドレス: {}",
                address
            )));
        }

        Ok(Self::new(resource_type, name))
    }

    /// 状態ファイルなどで使うキー
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = SiteError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

/// リソースタイプ名として有効か
pub fn is_valid_type(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// リソース名として有効か
pub fn is_valid_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// リソース宣言
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,

    /// 使用するプロバイダー名（未指定時はサイトのデフォルト）
    #[serde(default)]
    pub provider: Option<String>,

    /// 属性名 → 式
    #[serde(default)]
    pub attributes: BTreeMap<String, Expr>,

    /// 明示的な依存関係（depends-on）
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,

    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            provider: None,
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Expr) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, id: ResourceId) -> Self {
        self.depends_on.push(id);
        self
    }

    /// このリソースが依存するすべてのリソース（参照 + depends-on）
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        let mut deps: BTreeSet<ResourceId> = self
            .attributes
            .values()
            .flat_map(|expr| expr.references())
            .map(|r| r.target.clone())
            .collect();
        deps.extend(self.depends_on.iter().cloned());
        deps
    }
}

/// ライフサイクル設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// true の場合、置換・削除を計画するとエラーになる
    #[serde(default)]
    pub prevent_destroy: bool,
}
