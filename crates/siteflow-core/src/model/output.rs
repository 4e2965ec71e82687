//! Output定義

use super::expr::Expr;
use serde::{Deserialize, Serialize};

/// 適用後に評価して利用者に公開する値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub value: Expr,
    #[serde(default)]
    pub description: Option<String>,
    /// true の場合、表示時に値を伏せる
    #[serde(default)]
    pub sensitive: bool,
}

impl Output {
    pub fn new(name: impl Into<String>, value: Expr) -> Self {
        Self {
            name: name.into(),
            value,
            description: None,
            sensitive: false,
        }
    }
}
