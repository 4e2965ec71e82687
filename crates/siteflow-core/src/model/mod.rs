//! モデル定義
//!
//! SiteFlowのサイト定義で使用されるデータモデルを定義します。
//! 各モデルは機能ごとにモジュールに分離されています。

mod cloud;
mod expr;
mod output;
mod resource;
mod site;
mod variable;

// Re-exports
pub use cloud::*;
pub use expr::*;
pub use output::*;
pub use resource::*;
pub use site::*;
pub use variable::*;
