//! KDLパーサー
//!
//! SiteFlowのKDL設定ファイルをパースします。
//! 各ノードタイプのパース処理はモジュールに分離されています。

mod cloud;
mod output;
mod resource;
mod value;
mod variable;

use cloud::parse_provider;
use output::parse_output;
use resource::parse_resource;

// テンプレート展開前の変数抽出で再利用
pub use variable::parse_variables_block;

use crate::error::{Result, SiteError};
use crate::model::Site;
use kdl::KdlDocument;
use std::fs;
use std::path::Path;
use tracing::warn;

/// KDLファイルをパースしてSiteを生成
pub fn parse_kdl_file<P: AsRef<Path>>(path: P) -> Result<Site> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string(&content, name)
}

/// KDL文字列をパース
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Site> {
    let doc: KdlDocument = content.parse()?;
    let mut site = Site::new(default_name);

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                if let Some(project_name) =
                    node.entries().first().and_then(|e| e.value().as_string())
                {
                    site.name = project_name.to_string();
                }
            }
            "provider" => {
                let (provider_name, provider) = parse_provider(node)?;
                site.providers.insert(provider_name, provider);
            }
            "variables" => {
                for variable in parse_variables_block(node)? {
                    if site.variables.contains_key(&variable.name) {
                        return Err(SiteError::InvalidConfig(format!(
                            "変数 '{}' が重複して宣言されています",
                            variable.name
                        )));
                    }
                    site.variables.insert(variable.name.clone(), variable);
                }
            }
            "resource" => {
                let resource = parse_resource(node)?;
                if site.resources.contains_key(&resource.id) {
                    return Err(SiteError::DuplicateResource(resource.id.to_string()));
                }
                site.resources.insert(resource.id.clone(), resource);
            }
            "output" => {
                let output = parse_output(node)?;
                if site.outputs.contains_key(&output.name) {
                    return Err(SiteError::InvalidConfig(format!(
                        "output '{}' が重複して宣言されています",
                        output.name
                    )));
                }
                site.outputs.insert(output.name.clone(), output);
            }
            other => {
                warn!(node = %other, "Skipping unknown top-level node");
            }
        }
    }

    Ok(site)
}
