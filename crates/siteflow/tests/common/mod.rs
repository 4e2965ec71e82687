#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
    /// ユーザー設定ディレクトリを隔離するためのHOME
    pub home: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            home: tempfile::tempdir().unwrap(),
        }
    }

    pub fn write_site_kdl(&self, content: &str) {
        fs::write(self.root.path().join("site.kdl"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_env(&self, content: &str) {
        fs::write(self.root.path().join(".env"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    #[allow(dead_code)]
    pub fn state_path(&self) -> PathBuf {
        self.root.path().join(".siteflow").join("state.json")
    }

    #[allow(dead_code)]
    pub fn store_path(&self) -> PathBuf {
        self.root.path().join(".siteflow").join("cloud.json")
    }

    /// プロジェクトルートで `site` を実行するコマンド
    pub fn site(&self) -> Command {
        let mut cmd = Command::cargo_bin("site").unwrap();
        cmd.current_dir(self.root.path())
            .env("HOME", self.home.path())
            .env("XDG_CONFIG_HOME", config_home(self.home.path()))
            .env("NO_COLOR", "1")
            .env_remove("SITEFLOW_PROJECT_ROOT")
            .env_remove("SITEFLOW_PARALLELISM")
            .env_remove("RUST_LOG");
        cmd
    }
}

fn config_home(home: &Path) -> PathBuf {
    home.join(".config")
}
