mod docker;
mod run;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use publish_pipeline_build::{PipelineError, PublishState};
use run::{RunOptions, RunOutcome};
use std::path::PathBuf;
use std::process::ExitCode;

/// 終了コード
const EXIT_BUILD_FAILED: u8 = 1;
const EXIT_PUSH_FAILED: u8 = 2;
const EXIT_AUTH_FAILED: u8 = 3;
const EXIT_FETCH_FAILED: u8 = 4;
const EXIT_CONFIG_ERROR: u8 = 5;

#[derive(Parser)]
#[command(name = "publish-pipeline")]
#[command(about = "ref からタグを決めてイメージをビルドし、レジストリへプッシュする", long_about = None)]
#[command(subcommand_negates_reqs = true, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// ログを詳細にする (-v: info, -vv: debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// バージョン情報を表示
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// リポジトリ (ローカルパスまたは clone URL)
    #[arg(long, required = true)]
    repo: Option<String>,

    /// トリガー ref (例: refs/heads/master, refs/tags/v1.2.3, refs/pull/42/merge)
    #[arg(long = "ref", env = "GITHUB_REF", required = true)]
    git_ref: Option<String>,

    /// コンテナレジストリ (例: ghcr.io)
    #[arg(long, env = "PUBLISH_REGISTRY", required = true)]
    registry: Option<String>,

    /// レジストリのユーザー名 (未指定時は GITHUB_ACTOR)
    #[arg(long, env = "PUBLISH_USERNAME")]
    username: Option<String>,

    /// トークンを保持する環境変数の名前
    #[arg(long, default_value = "REGISTRY_TOKEN")]
    secret_env: String,

    /// イメージ名 (例: org/app)
    #[arg(long, env = "PUBLISH_IMAGE")]
    image: Option<String>,

    /// コミット SHA (revision ラベル用)
    #[arg(long, env = "GITHUB_SHA")]
    sha: Option<String>,

    /// ソースリポジトリの URL (source ラベル用)
    #[arg(long)]
    source_url: Option<String>,

    /// 設定ファイルのパス
    #[arg(long, env = "PUBLISH_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// レジストリへのログイン確認を省略する
    #[arg(long)]
    skip_login_check: bool,

    /// タグ・ラベル・判定を表示して終了する（ビルドしない）
    #[arg(long)]
    dry_run: bool,

    /// 結果を JSON で標準出力に書き出す
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn into_options(self) -> anyhow::Result<RunOptions> {
        let (Some(repo), Some(git_ref), Some(registry)) = (self.repo, self.git_ref, self.registry)
        else {
            anyhow::bail!("--repo, --ref and --registry are required");
        };

        let username = self
            .username
            .or_else(|| std::env::var("GITHUB_ACTOR").ok())
            .filter(|u| !u.is_empty());

        Ok(RunOptions {
            repo,
            git_ref,
            registry,
            username,
            secret_env: self.secret_env,
            image: self.image.filter(|s| !s.is_empty()),
            sha: self.sha,
            source_url: self.source_url,
            config: self.config,
            skip_login_check: self.skip_login_check,
            dry_run: self.dry_run,
            json: self.json,
        })
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// エラーの種類から終了コードを決める
fn exit_code_for_error(err: &PipelineError) -> u8 {
    match err {
        PipelineError::Fetch { .. } | PipelineError::InvalidRef(_) => EXIT_FETCH_FAILED,
        PipelineError::Auth { .. } => EXIT_AUTH_FAILED,
        PipelineError::PushFailed { .. } => EXIT_PUSH_FAILED,
        e if e.is_build_failure() => EXIT_BUILD_FAILED,
        _ => EXIT_CONFIG_ERROR,
    }
}

fn exit_code_for_state(state: PublishState) -> u8 {
    match state {
        PublishState::Published | PublishState::Skipped => 0,
        PublishState::BuildFailed => EXIT_BUILD_FAILED,
        PublishState::PushFailed => EXIT_PUSH_FAILED,
        _ => EXIT_CONFIG_ERROR,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if matches!(cli.command, Some(Commands::Version)) {
        println!("publish-pipeline {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let opts = cli.run.into_options()?;
    if !opts.json {
        println!("{}", "publish-pipeline".green().bold());
    }

    match run::execute(&opts).await {
        Ok(RunOutcome::Planned(plan)) => {
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!();
                println!("{}", "✓ dry-run: ビルドは行いませんでした".green());
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunOutcome::Finished(report)) => {
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            if let Some(error) = &report.error {
                eprintln!("{}", error.red());
            }
            Ok(ExitCode::from(exit_code_for_state(report.state)))
        }
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "✗".red().bold(), e.user_message());
            Ok(ExitCode::from(exit_code_for_error(&e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_code_for_error() {
        assert_eq!(
            exit_code_for_error(&PipelineError::Auth {
                registry: "ghcr.io".into(),
                message: "empty".into()
            }),
            3
        );
        assert_eq!(
            exit_code_for_error(&PipelineError::Fetch {
                repo: ".".into(),
                git_ref: "refs/heads/master".into(),
                message: "boom".into()
            }),
            4
        );
        assert_eq!(
            exit_code_for_error(&PipelineError::InvalidRef("refs/x".into())),
            4
        );
        assert_eq!(
            exit_code_for_error(&PipelineError::DockerfileNotFound(PathBuf::from(
                "Dockerfile"
            ))),
            1
        );
        assert_eq!(
            exit_code_for_error(&PipelineError::InvalidConfig("bad".into())),
            5
        );
    }

    #[test]
    fn test_exit_code_for_state() {
        assert_eq!(exit_code_for_state(PublishState::Published), 0);
        assert_eq!(exit_code_for_state(PublishState::Skipped), 0);
        assert_eq!(exit_code_for_state(PublishState::BuildFailed), 1);
        assert_eq!(exit_code_for_state(PublishState::PushFailed), 2);
    }
}
