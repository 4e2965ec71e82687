//! 入力変数

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 変数の型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    #[default]
    String,
    Number,
    Bool,
    List,
    Map,
}

impl VarType {
    /// 型名をパース
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "bool" | "boolean" => Some(Self::Bool),
            "list" => Some(Self::List),
            "map" | "object" => Some(Self::Map),
            _ => None,
        }
    }

    /// 値から型を推論
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Number(_) => Self::Number,
            Value::Bool(_) => Self::Bool,
            Value::Array(_) => Self::List,
            Value::Object(_) => Self::Map,
            _ => Self::String,
        }
    }

    /// 値がこの型に適合するか
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Number, Value::Number(_))
                | (Self::Bool, Value::Bool(_))
                | (Self::List, Value::Array(_))
                | (Self::Map, Value::Object(_))
        )
    }

    /// 文字列（.env / 環境変数 / --var）をこの型の値に変換
    pub fn coerce(&self, raw: &str) -> Result<Value, String> {
        match self {
            Self::String => Ok(Value::String(raw.to_string())),
            Self::Number => {
                if let Ok(i) = raw.trim().parse::<i64>() {
                    return Ok(Value::from(i));
                }
                raw.trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("数値ではありません: {}", raw))
            }
            Self::Bool => match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(format!("真偽値ではありません: {}", raw)),
            },
            Self::List | Self::Map => {
                let value: Value = serde_json::from_str(raw)
                    .map_err(|e| format!("JSONとして解釈できません: {}", e))?;
                if self.accepts(&value) {
                    Ok(value)
                } else {
                    Err(format!("{} 型ではありません: {}", self, raw))
                }
            }
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::String => write!(f, "string"),
            VarType::Number => write!(f, "number"),
            VarType::Bool => write!(f, "bool"),
            VarType::List => write!(f, "list"),
            VarType::Map => write!(f, "map"),
        }
    }
}

/// 変数宣言
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,

    #[serde(rename = "type")]
    pub var_type: VarType,

    /// デフォルト値（None の場合は必須）
    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub description: Option<String>,

    /// true の場合、出力時に値を伏せる
    #[serde(default)]
    pub sensitive: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, var_type: VarType) -> Self {
        Self {
            name: name.into(),
            var_type,
            ..Default::default()
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}
