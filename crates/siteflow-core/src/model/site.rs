//! Site定義

use super::cloud::ProviderConfig;
use super::output::Output;
use super::resource::{Resource, ResourceId};
use super::variable::Variable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Site - 望ましい状態の記述
///
/// リソース宣言・変数・outputの集合です。
/// 同じ `(type, name)` のリソースは一つしか存在しません。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Site {
    /// プロジェクト名
    pub name: String,
    /// プロバイダー設定
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// 変数宣言
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
    /// リソース宣言
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, Resource>,
    /// Output宣言
    #[serde(default)]
    pub outputs: BTreeMap<String, Output>,
}

impl Site {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// 使用するプロバイダーを決定
    ///
    /// 宣言が一つだけならそれを、複数あれば `local` を優先します。
    pub fn default_provider(&self) -> Option<&ProviderConfig> {
        if self.providers.len() == 1 {
            return self.providers.values().next();
        }
        self.providers.get("local")
    }
}
