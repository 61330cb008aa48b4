//! ソース取得
//!
//! `git` コマンドで指定 ref のツリーを一時ディレクトリに展開します。
//! ローカルパスでもリモート URL でも同じ手順で取得でき、
//! `refs/pull/*` のように通常の clone では取れない ref も扱えます。

use crate::error::{PipelineError, Result};
use crate::trigger::TriggerEvent;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// 展開先ディレクトリ名
const TREE_DIR: &str = "tree";
/// 作業用 bare リポジトリのディレクトリ名
const SCRATCH_DIR: &str = "scratch.git";

/// 取得済みのソースツリー
///
/// ドロップ時に一時ディレクトリごと削除される
#[derive(Debug)]
pub struct SourceSnapshot {
    _workdir: TempDir,
    root: PathBuf,
    commit: String,
    git_ref: String,
}

impl SourceSnapshot {
    /// 展開されたツリーのルート
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 取得したコミット ID
    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// 要求された ref
    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }
}

pub struct SourceFetcher;

impl SourceFetcher {
    /// `repo` から `event` の ref を取得して読み取り専用のスナップショットを作る
    ///
    /// `repo` はローカルパスまたは clone URL
    pub fn fetch(repo: &str, event: &TriggerEvent) -> Result<SourceSnapshot> {
        let fetch_ref = event.fetch_ref();
        let source = normalize_repo(repo);
        tracing::info!(repo = %source, git_ref = %fetch_ref, "Fetching source");

        let workdir = tempfile::Builder::new()
            .prefix("publish-pipeline-")
            .tempdir()
            .map_err(|e| PipelineError::fetch(repo, &fetch_ref, e.to_string()))?;

        let scratch = workdir.path().join(SCRATCH_DIR);
        let git = Git {
            repo,
            git_ref: &fetch_ref,
        };

        git.run(workdir.path(), &["init", "--quiet", "--bare", SCRATCH_DIR])?;
        git.run(
            &scratch,
            &[
                "fetch",
                "--quiet",
                "--no-tags",
                "--depth=1",
                "--end-of-options",
                &source,
                &fetch_ref,
            ],
        )
        .or_else(|_| {
            // ローカルリポジトリや dumb HTTP では shallow fetch ができない場合がある
            tracing::debug!("Shallow fetch failed, retrying full fetch");
            git.run(
                &scratch,
                &["fetch", "--quiet", "--no-tags", "--end-of-options", &source, &fetch_ref],
            )
        })?;

        let commit = String::from_utf8_lossy(&git.run(
            &scratch,
            &["rev-parse", "--verify", "FETCH_HEAD^{commit}"],
        )?)
        .trim()
        .to_string();
        if commit.is_empty() {
            return Err(PipelineError::fetch(
                repo,
                &fetch_ref,
                "git rev-parse returned empty output",
            ));
        }

        if let Some(expected) = event.sha()
            && !commit.starts_with(expected)
        {
            tracing::warn!(
                expected = %expected,
                fetched = %commit,
                "Fetched commit differs from the requested sha"
            );
        }

        let archive = git.run(&scratch, &["archive", "--format=tar", &commit])?;

        let root = workdir.path().join(TREE_DIR);
        fs::create_dir(&root)
            .and_then(|_| tar::Archive::new(archive.as_slice()).unpack(&root))
            .and_then(|_| make_read_only(&root))
            .map_err(|e| PipelineError::fetch(repo, &fetch_ref, format!("unpack failed: {e}")))?;

        tracing::info!(commit = %commit, "Source fetched");

        Ok(SourceSnapshot {
            _workdir: workdir,
            root,
            commit,
            git_ref: event.git_ref().to_string(),
        })
    }
}

/// git 呼び出しの失敗を FetchError に揃えるための文脈
struct Git<'a> {
    repo: &'a str,
    git_ref: &'a str,
}

impl Git<'_> {
    /// git を実行して標準出力を返す
    fn run(&self, dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
        tracing::debug!("git {}", args.join(" "));

        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| {
                PipelineError::fetch(self.repo, self.git_ref, format!("failed to run git: {e}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::fetch(
                self.repo,
                self.git_ref,
                format!("git {} failed: {}", args[0], stderr.trim()),
            ));
        }

        Ok(output.stdout)
    }
}

/// ローカルパスは作業ディレクトリに依存しないよう絶対パスにする
fn normalize_repo(repo: &str) -> String {
    let path = Path::new(repo);
    if path.exists()
        && let Ok(abs) = path.canonicalize()
    {
        return abs.to_string_lossy().into_owned();
    }
    repo.to_string()
}

/// ツリー内の全ファイルを読み取り専用にする
fn make_read_only(dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            make_read_only(&entry.path())?;
        } else if file_type.is_file() {
            let mut perms = entry.metadata()?.permissions();
            perms.set_readonly(true);
            fs::set_permissions(entry.path(), perms)?;
        }
    }
    Ok(())
}
