use crate::docker;
use colored::Colorize;
use publish_pipeline_build::{
    Authenticator, BuildResolver, ContextBuilder, Credential, ImageMetadata, MetadataResolver,
    NoopProbe, PipelineError, PublishDecision, PublishExecutor, PublishJob, PublishReport,
    PublishState, RegistrySession, Result, SourceFetcher, TriggerEvent, extract_registry,
    image_repository, split_image_tag,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// 1 回の実行に必要な CLI 入力
#[derive(Debug)]
pub struct RunOptions {
    pub repo: String,
    pub git_ref: String,
    pub registry: String,
    pub username: Option<String>,
    pub secret_env: String,
    pub image: Option<String>,
    pub sha: Option<String>,
    pub source_url: Option<String>,
    pub config: Option<PathBuf>,
    pub skip_login_check: bool,
    pub dry_run: bool,
    pub json: bool,
}

/// `--dry-run` の出力
#[derive(Debug, Serialize)]
pub struct Plan {
    pub event: TriggerEvent,
    pub commit: String,
    pub repository: String,
    pub decision: PublishDecision,
    #[serde(flatten)]
    pub metadata: ImageMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
}

pub enum RunOutcome {
    Planned(Plan),
    Finished(PublishReport),
}

/// ソース取得 → 認証 → タグ・ラベル解決 → ビルド & プッシュ
pub async fn execute(opts: &RunOptions) -> Result<RunOutcome> {
    let out = Printer { quiet: opts.json };

    let event = TriggerEvent::from_ref(&opts.git_ref)?
        .with_sha(opts.sha.clone())
        .with_repository_url(source_url(opts));
    out.step(&format!(
        "ref: {} ({})",
        event.git_ref().cyan(),
        event.ref_type()
    ));

    // 1. ソース取得
    let snapshot = SourceFetcher::fetch(&opts.repo, &event)?;
    out.ok(&format!("ソース取得: {}", short_sha(snapshot.commit())));

    // revision ラベルは未指定なら取得したコミットを使う
    let event = match event.sha() {
        Some(_) => event,
        None => event.with_sha(Some(snapshot.commit().to_string())),
    };

    // プッシュ判定は ref だけで決まる
    let decision = PublishDecision::evaluate(&event);

    // 2. レジストリ認証（ビルド前）
    let session = login(opts, decision).await?;
    out.ok(&format!("レジストリ認証: {}", opts.registry));

    // 3. 設定とメタデータ
    let (config, config_path) =
        publish_pipeline_config::resolve(snapshot.root(), opts.config.as_deref())?;
    if let Some(path) = &config_path {
        out.step(&format!("設定ファイル: {}", path.display()));
    }

    let image = image_name(opts, config.image.as_deref());
    let image_registry = extract_registry(&image);
    if image.starts_with(&format!("{}/", image_registry))
        && image_registry != registry_host(&opts.registry)
    {
        return Err(PipelineError::InvalidConfig(format!(
            "イメージ名 {} のレジストリが --registry ({}) と一致しません",
            image, opts.registry
        )));
    }
    let repository = image_repository(&opts.registry, &image);

    let metadata = MetadataResolver::new(image.clone())
        .with_static_labels(config.labels.clone())
        .resolve(&event);

    out.step(&format!("イメージ: {}", repository.cyan()));
    out.print_metadata(&metadata, decision);

    if opts.dry_run {
        return Ok(RunOutcome::Planned(Plan {
            commit: snapshot.commit().to_string(),
            event,
            repository,
            decision,
            metadata,
            config: config_path,
        }));
    }

    // 4. ビルド & プッシュ
    let resolver = BuildResolver::new(snapshot.root());
    let dockerfile = resolver.resolve_dockerfile(&config)?;
    let context_dir = resolver.resolve_context(&config)?;
    let context = ContextBuilder::create_context(&context_dir, &dockerfile)?;
    let build_args = resolver.resolve_build_args(&config, &build_variables(&opts.secret_env));

    let engine = docker::connect_engine().await?;
    let executor = PublishExecutor::new(engine).with_progress(!opts.json);

    let job = PublishJob {
        repository,
        metadata,
        context,
        build_args,
        target: config.target.clone(),
        no_cache: config.no_cache,
    };

    let report = executor.run(job, &session, decision).await?;
    drop(session);

    out.print_report(&report);
    Ok(RunOutcome::Finished(report))
}

/// 認証情報を検証してセッションを得る
///
/// レジストリへの問い合わせはプッシュする実行だけで行う。
/// ビルドのみの実行では認証情報の形式だけを検証する。
async fn login(opts: &RunOptions, decision: PublishDecision) -> Result<RegistrySession> {
    let username = opts.username.clone().unwrap_or_default();
    let credential = Credential::from_env(&opts.registry, username, &opts.secret_env)?;

    if opts.dry_run || opts.skip_login_check || !decision.should_push() {
        tracing::debug!(push = decision.should_push(), "Registry login check skipped");
        Authenticator::new(NoopProbe).login(credential).await
    } else {
        Authenticator::http().login(credential).await
    }
}

/// OCI source ラベルに使う URL
///
/// `--source-url` > GitHub Actions の環境変数 > URL 形式の `--repo`
fn source_url(opts: &RunOptions) -> Option<String> {
    if let Some(url) = &opts.source_url {
        return Some(url.clone());
    }

    if let (Ok(server), Ok(repo)) = (
        std::env::var("GITHUB_SERVER_URL"),
        std::env::var("GITHUB_REPOSITORY"),
    ) && !server.is_empty()
        && !repo.is_empty()
    {
        return Some(format!("{}/{}", server.trim_end_matches('/'), repo));
    }

    let repo = opts.repo.as_str();
    if repo.starts_with("https://") || repo.starts_with("http://") {
        return Some(repo.trim_end_matches(".git").to_string());
    }

    None
}

/// イメージ名
///
/// `--image` > 設定ファイル > GITHUB_REPOSITORY > リポジトリのディレクトリ名
fn image_name(opts: &RunOptions, configured: Option<&str>) -> String {
    let image = opts
        .image
        .clone()
        .or_else(|| configured.map(str::to_string))
        .or_else(|| std::env::var("GITHUB_REPOSITORY").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| repo_basename(&opts.repo));

    let (image, tag) = split_image_tag(&image);
    if let Some(tag) = tag {
        tracing::warn!("Ignoring tag '{}' in image name; tags are derived from the ref", tag);
    }
    image.to_lowercase()
}

fn repo_basename(repo: &str) -> String {
    let trimmed = repo.trim_end_matches('/').trim_end_matches(".git");
    let name = std::path::Path::new(trimmed)
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .or_else(|| trimmed.rsplit(['/', ':']).next().map(str::to_string))
        .unwrap_or_default();

    if name.is_empty() {
        "app".to_string()
    } else {
        name
    }
}

/// ビルド引数の {VAR} 展開に使う変数
///
/// シークレットを持つ環境変数は除外する
fn build_variables(secret_env: &str) -> HashMap<String, String> {
    std::env::vars().filter(|(key, _)| key != secret_env).collect()
}

fn registry_host(registry: &str) -> &str {
    registry
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

/// 人間向けの出力（--json 時は何も表示しない）
struct Printer {
    quiet: bool,
}

impl Printer {
    fn step(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {}", "→".blue(), msg);
        }
    }

    fn ok(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {}", "✓".green(), msg);
        }
    }

    fn print_metadata(&self, metadata: &ImageMetadata, decision: PublishDecision) {
        if self.quiet {
            return;
        }

        if metadata.tags.is_empty() {
            println!("  {} タグ: {}", "⚠".yellow(), "(なし)".dimmed());
        } else {
            let tags: Vec<&str> = metadata.tags.iter().collect();
            println!("  {} タグ: {}", "→".blue(), tags.join(", ").cyan());
        }
        for (key, value) in &metadata.labels {
            println!("      {}={}", key.dimmed(), value);
        }

        if decision.should_push() {
            println!("  {} 判定: {}", "→".blue(), "push".green());
        } else {
            println!("  {} 判定: {}", "→".blue(), "build only".yellow());
        }
    }

    fn print_report(&self, report: &PublishReport) {
        if self.quiet {
            return;
        }

        println!();
        for push in &report.pushes {
            match &push.error {
                None => println!("  {} {}", "✓".green(), push.reference),
                Some(e) => println!("  {} {}: {}", "✗".red(), push.reference, e),
            }
        }

        let state = report.state.to_string();
        match report.state {
            PublishState::Published => println!("{}", format!("✓ {}", state).green().bold()),
            PublishState::Skipped => println!("{}", format!("✓ {}", state).yellow().bold()),
            _ => println!("{}", format!("✗ {}", state).red().bold()),
        }
    }
}
