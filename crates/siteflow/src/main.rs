mod commands;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "site")]
#[command(about = "書いたとおりに、サイトが立ち上がる。静的サイト基盤の plan / apply", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 実行計画を表示
    Plan {
        /// 変数を指定 (name=value、複数可)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = utils::parse_var)]
        vars: Vec<(String, String)>,
        /// 計画前のリフレッシュをスキップ
        #[arg(long)]
        no_refresh: bool,
        /// 計画をファイルに保存（apply --plan で使用）
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// 計画を適用
    Apply {
        /// 変数を指定 (name=value、複数可)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = utils::parse_var)]
        vars: Vec<(String, String)>,
        /// 保存済みの計画ファイルを適用
        #[arg(long, value_name = "FILE")]
        plan: Option<PathBuf>,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
        /// 同一レベル内の最大並列数
        #[arg(long)]
        parallelism: Option<usize>,
    },
    /// 状態にある全リソースを削除
    Destroy {
        /// 変数を指定 (name=value、複数可)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = utils::parse_var)]
        vars: Vec<(String, String)>,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// リモートの実体を読み直して状態を更新
    Refresh {
        /// 変数を指定 (name=value、複数可)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = utils::parse_var)]
        vars: Vec<(String, String)>,
    },
    /// 出力値を表示
    Output {
        /// 出力名（省略時は全て）
        name: Option<String>,
        /// JSONで出力
        #[arg(long)]
        json: bool,
    },
    /// 設定を検証
    Validate {
        /// 変数を指定 (name=value、複数可)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = utils::parse_var)]
        vars: Vec<(String, String)>,
    },
    /// 状態ファイルの操作
    #[command(subcommand)]
    State(StateCommands),
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
pub enum StateCommands {
    /// 状態にあるリソースの一覧
    List,
    /// リソースの詳細を表示
    Show {
        /// リソースアドレス (type.name)
        address: String,
    },
    /// リソースを状態から外す（リモートの実体は削除しない）
    Rm {
        /// リソースアドレス (type.name)
        address: String,
    },
    /// ロックを強制解除
    Unlock,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrへ（stdoutはplanやoutputの表示に使う）
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("siteflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let project_root = siteflow_core::find_project_root()?;

    match cli.command {
        Commands::Plan {
            vars,
            no_refresh,
            out,
        } => {
            commands::plan::handle(&project_root, vars, no_refresh, out).await?;
        }
        Commands::Apply {
            vars,
            plan,
            yes,
            parallelism,
        } => {
            commands::apply::handle(&project_root, vars, plan, yes, parallelism).await?;
        }
        Commands::Destroy { vars, yes } => {
            commands::destroy::handle(&project_root, vars, yes).await?;
        }
        Commands::Refresh { vars } => {
            commands::refresh::handle(&project_root, vars).await?;
        }
        Commands::Output { name, json } => {
            commands::output::handle(&project_root, name, json).await?;
        }
        Commands::Validate { vars } => {
            commands::validate::handle(&project_root, vars).await?;
        }
        Commands::State(state_cmd) => {
            commands::state::handle(&project_root, state_cmd).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before project discovery");
        }
    }

    Ok(())
}
