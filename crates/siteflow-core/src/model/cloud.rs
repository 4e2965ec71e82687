//! プロバイダー設定

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// コントロールプレーン（プロバイダー）設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// プロバイダー名（local など）
    pub name: String,

    /// リージョン（ap-northeast-1 など）
    pub region: Option<String>,

    /// 追加設定（プロバイダー固有）
    pub config: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
