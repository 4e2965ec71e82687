//! 統合ローダー
//!
//! ファイル発見、変数解決、テンプレート展開、パースを統合

use crate::discovery::{DiscoveredFiles, discover_files, find_project_root};
use crate::error::{Result, SiteError};
use crate::graph::ResourceGraph;
use crate::model::{Site, Variable};
use crate::parser::parse_kdl_string;
use crate::template::{
    TemplateProcessor, VariableSources, extract_variables, read_env_file, resolve_variable_values,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, instrument};

/// ロード時のオプション
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// --var name=value で指定された値
    pub overrides: HashMap<String, String>,
    /// SITE_VAR_* 環境変数を読むかどうか
    pub use_process_env: bool,
}

impl LoadOptions {
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        Self {
            overrides,
            use_process_env: true,
        }
    }
}

/// プロジェクト全体をロードしてSiteを生成
///
/// 以下の処理を実行:
/// 1. プロジェクトルートの検出
/// 2. ファイルの自動発見
/// 3. 変数の収集と値の決定
/// 4. テンプレート展開
/// 5. KDLパース
/// 6. 参照グラフの検証
#[instrument]
pub fn load_site() -> Result<Site> {
    info!("Starting site load");
    let project_root = find_project_root()?;
    load_site_from_root(&project_root, &LoadOptions::with_overrides(HashMap::new()))
}

/// 指定されたルートディレクトリからSiteをロード
#[instrument(skip(project_root, options), fields(project_root = %project_root.display()))]
pub fn load_site_from_root(project_root: &Path, options: &LoadOptions) -> Result<Site> {
    debug!("Step 1: Discovering files");
    let discovered = discover_files(project_root)?;

    debug!("Step 2: Resolving variables");
    let mut processor = prepare_template_processor(&discovered, project_root, options)?;

    debug!("Step 3: Expanding templates");
    let expanded_content = processor.render_files(&discovered.kdl_files())?;
    info!(
        content_size = expanded_content.len(),
        "Template expansion complete"
    );

    debug!("Step 4: Parsing KDL");
    let name = project_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let site = parse_kdl_string(&expanded_content, name)?;

    debug!("Step 5: Validating references");
    let graph = ResourceGraph::build(&site)?;
    info!(
        resources = site.resources.len(),
        levels = graph.levels().len(),
        outputs = site.outputs.len(),
        "Site loaded successfully"
    );

    Ok(site)
}

/// 変数宣言を集めて値を決定し、テンプレートプロセッサを準備
fn prepare_template_processor(
    discovered: &DiscoveredFiles,
    project_root: &Path,
    options: &LoadOptions,
) -> Result<TemplateProcessor> {
    let mut declarations: BTreeMap<String, Variable> = BTreeMap::new();

    for file in discovered.kdl_files() {
        let content = std::fs::read_to_string(&file).map_err(|e| SiteError::IoError {
            path: file.clone(),
            message: e.to_string(),
        })?;
        for variable in extract_variables(&content)? {
            if declarations.contains_key(&variable.name) {
                return Err(SiteError::InvalidConfig(format!(
                    "変数 '{}' が重複して宣言されています ({})",
                    variable.name,
                    file.display()
                )));
            }
            declarations.insert(variable.name.clone(), variable);
        }
    }

    let mut sources = VariableSources {
        overrides: options.overrides.clone(),
        ..Default::default()
    };
    if let Some(env_file) = &discovered.env_file {
        sources.env_file = read_env_file(env_file)?;
    }
    if options.use_process_env {
        sources = sources.with_process_env();
    }

    let values = resolve_variable_values(&declarations, &sources)?;

    let mut processor = TemplateProcessor::new();
    processor.add_variable(
        "PROJECT_ROOT",
        serde_json::Value::String(project_root.to_string_lossy().to_string()),
    );
    // 宣言されていない .env の値も文字列として参照できる
    for (key, value) in &sources.env_file {
        if !declarations.contains_key(key) {
            processor.add_variable(key.clone(), serde_json::Value::String(value.clone()));
        }
    }
    processor.add_variables(values);

    Ok(processor)
}
