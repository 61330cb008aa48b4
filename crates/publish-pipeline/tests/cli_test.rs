#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use std::process::Command as StdCommand;
use tempfile::TempDir;

/// CI の環境変数に左右されないコマンド
fn pipeline(config_home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("publish-pipeline").unwrap();
    for var in [
        "GITHUB_REF",
        "GITHUB_SHA",
        "GITHUB_ACTOR",
        "GITHUB_REPOSITORY",
        "GITHUB_SERVER_URL",
        "PUBLISH_REGISTRY",
        "PUBLISH_USERNAME",
        "PUBLISH_IMAGE",
        "PUBLISH_PIPELINE_CONFIG",
        "REGISTRY_TOKEN",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("XDG_CONFIG_HOME", config_home);
    cmd
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn make_git_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "--quiet"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    run_git(dir.path(), &["config", "commit.gpgsign", "false"]);
    run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/master"]);
    std::fs::write(dir.path().join("Dockerfile"), "FROM alpine:latest\n").unwrap();
    run_git(dir.path(), &["add", "."]);
    run_git(dir.path(), &["commit", "--quiet", "-m", "initial"]);
    run_git(dir.path(), &["tag", "v1.2.3"]);
    dir
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let home = tempfile::tempdir().unwrap();
    pipeline(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--repo"))
        .stdout(predicate::str::contains("--ref"))
        .stdout(predicate::str::contains("--registry"))
        .stdout(predicate::str::contains("--username"))
        .stdout(predicate::str::contains("--secret-env"));
}

/// バージョン表示は他の引数を要求しない
#[test]
fn test_cli_version() {
    let home = tempfile::tempdir().unwrap();
    pipeline(home.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("publish-pipeline"));
}

/// 必須引数が無い場合は使い方エラー
#[test]
fn test_missing_required_args() {
    let home = tempfile::tempdir().unwrap();
    pipeline(home.path())
        .args(["--ref", "refs/heads/master"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--repo"));
}

/// 空のシークレットはビルド前に認証エラー (終了コード 3)
#[test]
fn test_empty_secret_is_auth_error() {
    let home = tempfile::tempdir().unwrap();
    let repo = make_git_repo();

    pipeline(home.path())
        .env("EMPTY_TOKEN", "")
        .args(["--repo", repo.path().to_str().unwrap()])
        .args(["--ref", "refs/heads/master"])
        .args(["--registry", "ghcr.io"])
        .args(["--username", "ci-bot"])
        .args(["--secret-env", "EMPTY_TOKEN"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("EMPTY_TOKEN"));
}

/// 未設定のシークレット変数も認証エラー
#[test]
fn test_unset_secret_is_auth_error() {
    let home = tempfile::tempdir().unwrap();
    let repo = make_git_repo();

    pipeline(home.path())
        .args(["--repo", repo.path().to_str().unwrap()])
        .args(["--ref", "refs/heads/master"])
        .args(["--registry", "ghcr.io"])
        .args(["--username", "ci-bot"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("REGISTRY_TOKEN"));
}

/// 存在しないリポジトリは取得エラー (終了コード 4)
#[test]
fn test_missing_repo_is_fetch_error() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("no-such-repo");

    pipeline(home.path())
        .env("REGISTRY_TOKEN", "token")
        .args(["--repo", missing.to_str().unwrap()])
        .args(["--ref", "refs/heads/master"])
        .args(["--registry", "ghcr.io"])
        .args(["--username", "ci-bot"])
        .assert()
        .code(4);
}

/// 解釈できない ref も取得エラー
#[test]
fn test_invalid_ref_is_fetch_error() {
    let home = tempfile::tempdir().unwrap();
    let repo = make_git_repo();

    pipeline(home.path())
        .env("REGISTRY_TOKEN", "token")
        .args(["--repo", repo.path().to_str().unwrap()])
        .args(["--ref", "refs/remotes/origin/master"])
        .args(["--registry", "ghcr.io"])
        .args(["--username", "ci-bot"])
        .assert()
        .code(4);
}

/// dry-run ではタグ・判定を JSON で出力し、シークレットは出力しない
#[test]
fn test_dry_run_semver_tag() {
    let home = tempfile::tempdir().unwrap();
    let repo = make_git_repo();

    let output = pipeline(home.path())
        .env("REGISTRY_TOKEN", "super-secret-token")
        .args(["--repo", repo.path().to_str().unwrap()])
        .args(["--ref", "refs/tags/v1.2.3"])
        .args(["--registry", "ghcr.io"])
        .args(["--username", "ci-bot"])
        .args(["--image", "org/app"])
        .args(["--dry-run", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("super-secret-token").not())
        .stderr(predicate::str::contains("super-secret-token").not())
        .get_output()
        .stdout
        .clone();

    let plan: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(plan["repository"], "ghcr.io/org/app");
    assert_eq!(plan["tags"], serde_json::json!(["v1.2.3", "1.2"]));
    assert_eq!(plan["decision"], false);
    assert_eq!(plan["labels"]["org.opencontainers.image.version"], "v1.2.3");
}

/// master は push 対象と判定される
#[test]
fn test_dry_run_master() {
    let home = tempfile::tempdir().unwrap();
    let repo = make_git_repo();

    let output = pipeline(home.path())
        .env("REGISTRY_TOKEN", "token")
        .args(["--repo", repo.path().to_str().unwrap()])
        .args(["--ref", "refs/heads/master"])
        .args(["--registry", "ghcr.io"])
        .args(["--username", "ci-bot"])
        .args(["--image", "org/app"])
        .args(["--dry-run", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let plan: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(plan["tags"], serde_json::json!(["master"]));
    assert_eq!(plan["decision"], true);
    assert_eq!(
        plan["labels"]["org.opencontainers.image.revision"],
        plan["commit"]
    );
}

/// 設定ファイルの固定ラベルが反映される
#[test]
fn test_dry_run_reads_config_labels() {
    let home = tempfile::tempdir().unwrap();
    let repo = make_git_repo();
    std::fs::write(
        repo.path().join("publish-pipeline.yaml"),
        "image: org/from-config\nlabels:\n  team: platform\n",
    )
    .unwrap();
    run_git(repo.path(), &["add", "."]);
    run_git(repo.path(), &["commit", "--quiet", "-m", "config"]);

    let output = pipeline(home.path())
        .env("REGISTRY_TOKEN", "token")
        .args(["--repo", repo.path().to_str().unwrap()])
        .args(["--ref", "refs/heads/master"])
        .args(["--registry", "ghcr.io"])
        .args(["--username", "ci-bot"])
        .args(["--dry-run", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let plan: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(plan["repository"], "ghcr.io/org/from-config");
    assert_eq!(plan["labels"]["team"], "platform");
}

/// ビルドのみの実行はレジストリに到達できなくても認証で止まらない
#[test]
fn test_build_only_run_does_not_contact_registry() {
    let home = tempfile::tempdir().unwrap();
    let repo = make_git_repo();
    run_git(repo.path(), &["update-ref", "refs/pull/42/merge", "HEAD"]);

    pipeline(home.path())
        .env("REGISTRY_TOKEN", "token")
        .args(["--repo", repo.path().to_str().unwrap()])
        .args(["--ref", "refs/pull/42/merge"])
        .args(["--registry", "127.0.0.1:1"])
        .args(["--username", "ci-bot"])
        .args(["--image", "org/app"])
        .assert()
        .code(predicate::ne(3))
        .stdout(predicate::str::contains("build only"))
        .stderr(predicate::str::contains("レジストリ認証に失敗").not());
}

/// プッシュする実行ではレジストリに到達できなければ認証エラー
#[test]
fn test_push_run_requires_reachable_registry() {
    let home = tempfile::tempdir().unwrap();
    let repo = make_git_repo();

    pipeline(home.path())
        .env("REGISTRY_TOKEN", "token")
        .args(["--repo", repo.path().to_str().unwrap()])
        .args(["--ref", "refs/heads/master"])
        .args(["--registry", "127.0.0.1:1"])
        .args(["--username", "ci-bot"])
        .args(["--image", "org/app"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("127.0.0.1:1"));
}
