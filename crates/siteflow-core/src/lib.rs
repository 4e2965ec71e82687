//! SiteFlow Core
//!
//! サイト定義（KDL）の読み込み、変数展開、リソースモデルと参照グラフを提供します。
//!
//! ```text
//! site.kdl + resources/**/*.kdl + variables/**/*.kdl + .env
//!         │
//!         ▼  変数解決・テンプレート展開 (Tera)
//!         ▼  KDLパース
//!       Site ──▶ ResourceGraph（未解決参照・循環の検出、レベル分け）
//! ```

pub mod discovery;
pub mod error;
pub mod graph;
pub mod loader;
pub mod model;
pub mod parser;
pub mod template;

pub use discovery::{
    DiscoveredFiles, PROJECT_DIR, PROJECT_ROOT_ENV, ROOT_FILE, discover_files,
    find_project_root, find_project_root_from,
};
pub use error::{Result, SiteError};
pub use graph::ResourceGraph;
pub use loader::{LoadOptions, load_site, load_site_from_root};
pub use model::*;
pub use parser::{parse_kdl_file, parse_kdl_string};
pub use template::{ENV_VAR_PREFIX, TemplateProcessor, VariableSources, Variables};
