//! テンプレート展開機能
//!
//! Teraを使用してKDLファイルの変数展開を行います。

use crate::error::{Result, SiteError};
use crate::model::Variable;
use crate::parser::parse_variables_block;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info, warn};

/// ファイルあたりの推定バイト数（容量事前確保用）
const ESTIMATED_BYTES_PER_FILE: usize = 500;

/// 変数を上書きする環境変数のプレフィックス
pub const ENV_VAR_PREFIX: &str = "SITE_VAR_";

/// 変数コンテキスト
pub type Variables = HashMap<String, serde_json::Value>;

/// テンプレートプロセッサ
pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    /// 新しいテンプレートプロセッサを作成
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    /// 変数を追加
    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    /// 複数の変数を追加
    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// 文字列をテンプレートとして展開
    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera.render_str(template, &self.context).map_err(|e| {
            let error_detail = extract_tera_error_detail(&e);
            SiteError::TemplateRenderError(error_detail)
        })
    }

    /// ファイルを読み込んでテンプレート展開
    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| SiteError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content).map_err(|e| {
            if let SiteError::TemplateRenderError(msg) = e {
                SiteError::TemplateError {
                    file: path.to_path_buf(),
                    line: None,
                    message: msg,
                }
            } else {
                e
            }
        })
    }

    /// 複数のファイルを順に展開して結合
    pub fn render_files(&mut self, paths: &[impl AsRef<Path>]) -> Result<String> {
        let estimated_capacity = paths.len() * ESTIMATED_BYTES_PER_FILE;
        let mut result = String::with_capacity(estimated_capacity);

        for path in paths {
            let rendered = self.render_file(path.as_ref())?;
            result.push_str(&rendered);
            result.push('\n'); // ファイル間の区切り
        }

        Ok(result)
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// 変数値のソース（優先度の低い順: default < .env < 環境変数 < 明示指定）
#[derive(Debug, Clone, Default)]
pub struct VariableSources {
    /// .env ファイルの値
    pub env_file: HashMap<String, String>,
    /// SITE_VAR_<name> 環境変数の値（プレフィックス除去済み）
    pub environment: HashMap<String, String>,
    /// --var name=value で指定された値
    pub overrides: HashMap<String, String>,
}

impl VariableSources {
    /// プロセスの環境変数から SITE_VAR_* を収集
    pub fn with_process_env(mut self) -> Self {
        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(ENV_VAR_PREFIX) {
                debug!(variable = %name, "Found variable in environment");
                self.environment.insert(name.to_string(), value);
            }
        }
        self
    }
}

/// 宣言とソースから変数値を決定
///
/// 値がない必須変数は `MissingVariable`、型変換できない値は `InvalidVariable`。
pub fn resolve_variable_values(
    declarations: &BTreeMap<String, Variable>,
    sources: &VariableSources,
) -> Result<Variables> {
    let mut values = Variables::new();

    for (name, decl) in declarations {
        let mut value = decl.default.clone();

        let layered = [
            (".env", sources.env_file.get(name)),
            ("environment", sources.environment.get(name)),
            ("--var", sources.overrides.get(name)),
        ];
        for (source, raw) in layered {
            if let Some(raw) = raw {
                let coerced =
                    decl.var_type
                        .coerce(raw)
                        .map_err(|message| SiteError::InvalidVariable {
                            name: name.clone(),
                            message: format!("{} ({})", message, source),
                        })?;
                value = Some(coerced);
            }
        }

        let value = value.ok_or_else(|| SiteError::MissingVariable(name.clone()))?;
        values.insert(name.clone(), value);
    }

    for name in sources.overrides.keys() {
        if !declarations.contains_key(name) {
            warn!(variable = %name, "Ignoring value for undeclared variable");
        }
    }

    info!(variable_count = values.len(), "Resolved variable values");
    Ok(values)
}

/// .env ファイルを読み込む
#[tracing::instrument]
pub fn read_env_file(env_file_path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(env_file_path).map_err(|e| SiteError::IoError {
        path: env_file_path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut values = HashMap::new();
    for line in content.lines() {
        let line = line.trim();

        // 空行とコメント行をスキップ
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().trim_start_matches("export ").trim();
            let value = strip_quotes(value.trim());
            values.insert(key.to_string(), value.to_string());
        }
    }

    debug!(variable_count = values.len(), "Loaded .env file");
    Ok(values)
}

/// KDLファイルから変数宣言を抽出
///
/// テンプレート展開前のコンテンツは `{{ ... }}` を含むためKDLとしてパースできない
/// 場合があります。トップレベルの variables { ... } ブロックだけを切り出して
/// パースします。
pub fn extract_variables(kdl_content: &str) -> Result<Vec<Variable>> {
    let re = Regex::new(r"(?m)^[ \t]*variables\s*\{")
        .map_err(|e| SiteError::InvalidConfig(format!("正規表現のコンパイルエラー: {}", e)))?;

    let mut variables = Vec::new();
    for mat in re.find_iter(kdl_content) {
        let open = mat.end() - 1;
        let Some(close) = find_matching_brace(kdl_content, open) else {
            return Err(SiteError::InvalidConfig(
                "variables ブロックの閉じ括弧が見つかりません".to_string(),
            ));
        };

        let block = &kdl_content[mat.start()..=close];
        let doc: kdl::KdlDocument = block.parse().map_err(|e| {
            SiteError::InvalidConfig(format!("KDL パースエラー (変数抽出ブロック): {}", e))
        })?;

        for node in doc.nodes() {
            variables.extend(parse_variables_block(node)?);
        }
    }

    Ok(variables)
}

/// 対応する閉じ波括弧の位置を見つける
fn find_matching_brace(content: &str, open_pos: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    if open_pos >= bytes.len() || bytes[open_pos] != b'{' {
        return None;
    }

    let mut depth = 1;
    let mut pos = open_pos + 1;
    let mut in_string = false;
    let mut escape_next = false;

    while pos < bytes.len() && depth > 0 {
        let c = bytes[pos];

        if escape_next {
            escape_next = false;
            pos += 1;
            continue;
        }

        if c == b'\\' {
            escape_next = true;
            pos += 1;
            continue;
        }

        if c == b'"' {
            in_string = !in_string;
        } else if !in_string {
            if c == b'{' {
                depth += 1;
            } else if c == b'}' {
                depth -= 1;
            }
        }

        pos += 1;
    }

    if depth == 0 { Some(pos - 1) } else { None }
}

/// クォートを除去するヘルパー関数
///
/// "value" → value
/// 'value' → value
/// value → value
fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Teraエラーから詳細情報を抽出
fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = Vec::new();
    details.push(e.to_string());

    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }

    let full_error = details.join(" | ");

    // "Variable `xxx` not found in context"
    if full_error.contains("not found in context")
        && let Some(start) = full_error.find("Variable `")
        && let Some(end) = full_error[start..].find("` not found")
    {
        let var_name = &full_error[start + 10..start + end];
        return format!(
            "未定義の変数: `{}`\nヒント: variables ブロックで宣言してください",
            var_name
        );
    }

    if full_error.contains("Filter") && full_error.contains("not found") {
        return format!("未定義のフィルター\n詳細: {full_error}");
    }

    full_error
}
