#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;

mod common;
use common::TestProject;

const SITE_KDL: &str = r#"
project "cli-site"

variables {
    domain type="string"
}

resource "s3-bucket" "site" {
    bucket "{{ domain }}"
}

resource "s3-bucket-website" "site" {
    bucket "${s3-bucket.site.id}"
    index_document "index.html"
}

resource "cloudfront-distribution" "cdn" {
    origin_domain_name "${s3-bucket-website.site.website_endpoint}"
    origin_id "s3-website"
}

output "endpoint" "${s3-bucket-website.site.website_endpoint}"
output "cdn_domain" {
    value "${cloudfront-distribution.cdn.domain_name}"
    description "配信ドメイン"
}
"#;

fn project() -> TestProject {
    let project = TestProject::new();
    project.write_site_kdl(SITE_KDL);
    project
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("site").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("output"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("site").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("siteflow"));
}

/// applyコマンドのヘルプに主要オプションが含まれることを確認
#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("site").unwrap();
    cmd.args(["apply", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--var"))
        .stdout(predicate::str::contains("--plan"))
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--parallelism"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("site").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// 不正な --var 形式はエラー
#[test]
fn test_invalid_var_format() {
    let project = project();
    project
        .site()
        .args(["plan", "--var", "no-equals-sign"])
        .assert()
        .failure();
}

/// プロジェクト外で実行するとエラー
#[test]
fn test_plan_without_project() {
    let project = TestProject::new();
    project
        .site()
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("プロジェクトルートが見つかりません"));
}

/// 必須変数が未指定ならエラー
#[test]
fn test_missing_variable() {
    let project = project();
    project
        .site()
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("domain"));
}

#[test]
fn test_validate() {
    let project = project();
    project
        .site()
        .args(["validate", "--var", "domain=example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("設定ファイルは正常です"))
        .stdout(predicate::str::contains("リソース: 3個 (3レベル)"));
}

#[test]
fn test_validate_reports_cycle() {
    let project = TestProject::new();
    project.write_site_kdl(
        r#"
resource "s3-bucket-website" "a" {
    bucket "${s3-bucket-policy.b.bucket}"
    index_document "index.html"
}
resource "s3-bucket-policy" "b" {
    bucket "${s3-bucket-website.a.bucket}"
    policy "{}"
}
"#,
    );
    project
        .site()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("循環参照"));
}

#[test]
fn test_validate_rejects_unknown_type() {
    let project = TestProject::new();
    project.write_site_kdl(
        r#"
resource "lambda-function" "fn" {
    runtime "nodejs20.x"
}
"#,
    );
    project
        .site()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("lambda-function"));
}

/// plan → apply -y → output → destroy -y の一連の流れ
#[test]
fn test_end_to_end_lifecycle() {
    let project = project();

    project
        .site()
        .args(["plan", "--var", "domain=example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "3 to create, 0 to update, 0 to replace, 0 to delete, 0 unchanged",
        ))
        .stdout(predicate::str::contains("(適用後に確定)"));

    // --yes なしでは何も変更しない
    project
        .site()
        .args(["apply", "--var", "domain=example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));
    assert!(!project.store_path().exists());

    project
        .site()
        .args(["apply", "--var", "domain=example.com", "-y"])
        .assert()
        .success()
        .stdout(predicate::str::contains("適用が完了しました"));
    assert!(project.state_path().exists());

    // 二回目の計画は変更なし
    project
        .site()
        .args(["plan", "--var", "domain=example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("変更はありません"))
        .stdout(predicate::str::contains("3 unchanged"));

    project
        .site()
        .args(["output", "endpoint"])
        .assert()
        .success()
        .stdout("example.com.s3-website-us-east-1.amazonaws.com\n");

    let output = project.site().args(["output", "--json"]).output().unwrap();
    assert!(output.status.success());
    let outputs: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(
        outputs["cdn_domain"]
            .as_str()
            .unwrap()
            .ends_with(".cloudfront.net")
    );

    project
        .site()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("s3-bucket.site"))
        .stdout(predicate::str::contains("cloudfront-distribution.cdn"));

    project
        .site()
        .args(["destroy", "--var", "domain=example.com", "-y"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 to delete"));

    let store: Value = serde_json::from_str(&fs::read_to_string(project.store_path()).unwrap()).unwrap();
    assert!(store["objects"].as_object().unwrap().is_empty());

    project
        .site()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("状態にリソースがありません"));
}

/// plan --out で保存した計画を apply --plan で適用
#[test]
fn test_saved_plan_apply() {
    let project = project();
    let plan_file = project.path().join("site.plan.json");

    project
        .site()
        .args(["plan", "--var", "domain=example.com", "--out"])
        .arg(&plan_file)
        .assert()
        .success();
    assert!(plan_file.exists());

    project
        .site()
        .args(["apply", "--var", "domain=example.com", "-y", "--plan"])
        .arg(&plan_file)
        .assert()
        .success();

    // 同じ計画の再適用は古い計画として拒否される
    project
        .site()
        .args(["apply", "--var", "domain=example.com", "-y", "--plan"])
        .arg(&plan_file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("site refresh"));
}

/// 変数は .env からも読み込める
#[test]
fn test_variable_from_env_file() {
    let project = project();
    project.write_env("domain=from-env.example.com\n");

    project
        .site()
        .args(["apply", "-y"])
        .assert()
        .success();
    project
        .site()
        .args(["state", "show", "s3-bucket.site"])
        .assert()
        .success()
        .stdout(predicate::str::contains("from-env.example.com"));
}

#[test]
fn test_state_rm_and_unlock() {
    let project = project();
    project
        .site()
        .args(["apply", "--var", "domain=example.com", "-y"])
        .assert()
        .success();

    project
        .site()
        .args(["state", "rm", "cloudfront-distribution.cdn"])
        .assert()
        .success();
    project
        .site()
        .args(["state", "show", "cloudfront-distribution.cdn"])
        .assert()
        .failure();
    project
        .site()
        .args(["state", "rm", "not-an-address"])
        .assert()
        .failure();

    project
        .site()
        .args(["state", "unlock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ロックはかかっていません"));
}

#[test]
fn test_output_before_apply() {
    let project = project();
    project
        .site()
        .arg("output")
        .assert()
        .success()
        .stdout(predicate::str::contains("出力はありません"));
    project
        .site()
        .args(["output", "missing"])
        .assert()
        .failure();
}
