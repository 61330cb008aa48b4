//! ビルド & プッシュ実行器
//!
//! 状態遷移:
//!
//! ```text
//! Pending -> Building -> BuildFailed
//!                     -> Built -> Skipped            (プッシュしない / タグなし)
//!                              -> Pushing -> PushFailed
//!                                         -> Published
//! ```
//!
//! プッシュはタグごとに独立して行い、途中で失敗しても残りのタグは続行する。

use crate::auth::RegistrySession;
use crate::builder::BuildRequest;
use crate::context::BuildContext;
use crate::decision::PublishDecision;
use crate::engine::ImageEngine;
use crate::error::{PipelineError, Result};
use crate::metadata::{ImageMetadata, LabelSet, TagSet};
use crate::progress::BuildProgress;
use crate::pusher::validate_tag;
use secrecy::zeroize::Zeroize;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// 実行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    Pending,
    Building,
    Built,
    Pushing,
    BuildFailed,
    PushFailed,
    Published,
    Skipped,
}

impl PublishState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PublishState::BuildFailed
                | PublishState::PushFailed
                | PublishState::Published
                | PublishState::Skipped
        )
    }

    /// 終了コード 0 で終わる状態か
    pub fn is_success(self) -> bool {
        matches!(self, PublishState::Published | PublishState::Skipped)
    }

    fn can_transition_to(self, next: PublishState) -> bool {
        use PublishState::*;
        matches!(
            (self, next),
            (Pending, Building)
                | (Building, BuildFailed)
                | (Building, Built)
                | (Built, Pushing)
                | (Built, Skipped)
                | (Pushing, PushFailed)
                | (Pushing, Published)
        )
    }

    /// 遷移表にない遷移はエラー
    pub fn transition(self, next: PublishState) -> Result<PublishState> {
        if self.can_transition_to(next) {
            tracing::debug!(from = %self, to = %next, "State transition");
            Ok(next)
        } else {
            Err(PipelineError::IllegalTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublishState::Pending => "Pending",
            PublishState::Building => "Building",
            PublishState::Built => "Built",
            PublishState::Pushing => "Pushing",
            PublishState::BuildFailed => "BuildFailed",
            PublishState::PushFailed => "PushFailed",
            PublishState::Published => "Published",
            PublishState::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

/// タグ 1 つ分のプッシュ結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagPush {
    pub tag: String,
    /// `repository:tag`
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TagPush {
    pub fn is_pushed(&self) -> bool {
        self.error.is_none()
    }
}

/// 実行結果
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub state: PublishState,
    pub repository: String,
    pub decision: PublishDecision,
    pub tags: TagSet,
    pub labels: LabelSet,
    /// プッシュを試みた場合のみ、タグ順に並ぶ
    pub pushes: Vec<TagPush>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishReport {
    pub fn pushed(&self) -> impl Iterator<Item = &TagPush> {
        self.pushes.iter().filter(|p| p.is_pushed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TagPush> {
        self.pushes.iter().filter(|p| !p.is_pushed())
    }
}

/// 1 回の実行に必要な入力
#[derive(Debug)]
pub struct PublishJob {
    /// レジストリ込みのイメージ名（タグなし）
    pub repository: String,
    pub metadata: ImageMetadata,
    pub context: BuildContext,
    pub build_args: HashMap<String, String>,
    pub target: Option<String>,
    pub no_cache: bool,
}

pub struct PublishExecutor<E: ImageEngine> {
    engine: E,
    show_progress: bool,
}

impl<E: ImageEngine> PublishExecutor<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            show_progress: false,
        }
    }

    /// スピナーを表示する
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// ビルドし、判定が真ならすべてのタグをプッシュする
    ///
    /// ビルド・プッシュの失敗はレポートの状態として返す。
    /// `Err` になるのは状態遷移表に反した場合のみ。
    pub async fn run(
        &self,
        job: PublishJob,
        session: &RegistrySession,
        decision: PublishDecision,
    ) -> Result<PublishReport> {
        let PublishJob {
            repository,
            metadata: ImageMetadata { tags, labels },
            context,
            build_args,
            target,
            no_cache,
        } = job;

        let mut report = PublishReport {
            state: PublishState::Pending,
            repository,
            decision,
            tags,
            labels,
            pushes: Vec::new(),
            error: None,
        };

        report.state = report.state.transition(PublishState::Building)?;

        let progress = if self.show_progress {
            BuildProgress::new(&report.repository)
        } else {
            BuildProgress::hidden()
        };

        let request = BuildRequest {
            context,
            image_ref: report
                .tags
                .first()
                .map(|tag| format!("{}:{}", report.repository, tag)),
            labels: report.labels.clone(),
            build_args,
            target,
            no_cache,
        };

        if let Err(e) = self.build(&report.repository, &report.tags, request, &progress).await {
            progress.finish_error(&e.to_string());
            tracing::error!("Build failed: {}", e);
            report.error = Some(e.to_string());
            report.state = report.state.transition(PublishState::BuildFailed)?;
            return Ok(report);
        }
        progress.finish_success();
        report.state = report.state.transition(PublishState::Built)?;

        if report.tags.is_empty() {
            tracing::warn!("No tags resolved for this ref; the image was built but not published");
            report.state = report.state.transition(PublishState::Skipped)?;
            return Ok(report);
        }

        if !decision.should_push() {
            tracing::info!("Ref is not on the publish list; skipping push");
            report.state = report.state.transition(PublishState::Skipped)?;
            return Ok(report);
        }

        report.state = report.state.transition(PublishState::Pushing)?;
        report.pushes = self.push_all(&report.repository, &report.tags, session).await;

        let failed = report.failed().count();
        report.state = if failed == 0 {
            report.state.transition(PublishState::Published)?
        } else {
            tracing::error!(
                failed,
                total = report.pushes.len(),
                "Some tags failed to push"
            );
            report.state.transition(PublishState::PushFailed)?
        };

        Ok(report)
    }

    /// タグ検証・ビルド・追加タグ付け
    async fn build(
        &self,
        repository: &str,
        tags: &TagSet,
        request: BuildRequest,
        progress: &BuildProgress,
    ) -> Result<()> {
        for tag in tags.iter() {
            validate_tag(tag)?;
        }

        let primary = request.image_ref.clone();
        self.engine.build(request, progress).await?;

        if let Some(primary) = primary {
            for tag in tags.iter().skip(1) {
                self.engine.tag(&primary, repository, tag).await?;
            }
        }

        Ok(())
    }

    /// 全タグをプッシュし、タグごとの結果を返す
    ///
    /// `DockerCredentials` はトークンを平文の `String` で持つため、
    /// セッションから取り出すのはこの関数内で 1 回だけとし、
    /// ループ終了後にパスワードをゼロクリアする。
    async fn push_all(
        &self,
        repository: &str,
        tags: &TagSet,
        session: &RegistrySession,
    ) -> Vec<TagPush> {
        let mut credentials = match session.docker_credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                return tags
                    .iter()
                    .map(|tag| TagPush {
                        tag: tag.to_string(),
                        reference: format!("{}:{}", repository, tag),
                        error: Some(e.to_string()),
                    })
                    .collect();
            }
        };

        let mut pushes = Vec::with_capacity(tags.len());
        for tag in tags.iter() {
            let progress = if self.show_progress {
                BuildProgress::push(&format!("{}:{}", repository, tag))
            } else {
                BuildProgress::hidden()
            };

            let reference = format!("{}:{}", repository, tag);
            let error = match self
                .engine
                .push(repository, tag, credentials.clone(), &progress)
                .await
            {
                Ok(_) => {
                    progress.finish_success();
                    None
                }
                Err(e) => {
                    progress.finish_error(&e.to_string());
                    tracing::warn!(reference = %reference, "Push failed: {}", e);
                    Some(e.to_string())
                }
            };

            pushes.push(TagPush {
                tag: tag.to_string(),
                reference,
                error,
            });
        }

        if let Some(password) = credentials.password.as_mut() {
            password.zeroize();
        }

        pushes
    }
}
