use crate::context::BuildContext;
use crate::error::{PipelineError, Result};
use crate::progress::BuildProgress;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::{BTreeMap, HashMap};

/// 失敗時の診断メッセージに含めるログ行数
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// 1 回のビルドに必要な入力
#[derive(Debug)]
pub struct BuildRequest {
    pub context: BuildContext,
    /// `repository:tag` 形式。タグが無い場合は `None`
    pub image_ref: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub build_args: HashMap<String, String>,
    pub target: Option<String>,
    pub no_cache: bool,
}

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをビルド
    pub async fn build_image(&self, request: BuildRequest, progress: &BuildProgress) -> Result<()> {
        let tag = request.image_ref.as_deref().unwrap_or("");
        tracing::info!("Building image: {}", if tag.is_empty() { "(untagged)" } else { tag });

        let build_args: HashMap<&str, &str> = request
            .build_args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let labels: HashMap<&str, &str> = request
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile: request.context.dockerfile.as_str(),
            t: tag,
            buildargs: build_args,
            labels,
            target: request.target.as_deref().unwrap_or(""),
            nocache: request.no_cache,
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            pull: true,    // ベースイメージを常にpull
            ..Default::default()
        };

        tracing::debug!("Build options: {:?}", options);

        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let body = Full::new(Bytes::from(request.context.archive));
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        let mut log = BuildLog::default();
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(output) => log.handle(output, progress)?,
                Err(bollard::errors::Error::DockerStreamError { error }) => {
                    return Err(PipelineError::BuildFailed(log.diagnostic(&error)));
                }
                Err(e) => return Err(PipelineError::DockerConnection(e)),
            }
        }

        tracing::info!("Successfully built: {}", tag);
        Ok(())
    }

    /// 既存イメージに別名タグを付ける
    pub async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> Result<()> {
        tracing::debug!("Tagging {} as {}:{}", source, repository, tag);

        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions {
            repo: repository,
            tag,
        };

        self.docker.tag_image(source, Some(options)).await?;
        Ok(())
    }

}

/// ビルド出力の蓄積
///
/// 失敗時にはログ末尾をエラー診断として返す
#[derive(Default)]
struct BuildLog {
    lines: Vec<String>,
}

impl BuildLog {
    fn handle(&mut self, output: bollard::models::BuildInfo, progress: &BuildProgress) -> Result<()> {
        if let Some(stream) = output.stream {
            for line in stream.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
                if line.starts_with("Step ") || line.starts_with("#") {
                    progress.set_message(line);
                }
                tracing::debug!(target: "publish_pipeline_build::engine", "{}", line);
                self.lines.push(line.to_string());
            }
        }

        if let Some(error_detail) = output.error_detail {
            let error_msg = error_detail
                .message
                .unwrap_or_else(|| "Unknown build error".to_string());
            return Err(PipelineError::BuildFailed(self.diagnostic(&error_msg)));
        }

        if let Some(error) = output.error {
            return Err(PipelineError::BuildFailed(self.diagnostic(&error)));
        }

        if let Some(status) = output.status {
            // ステータスメッセージ（ベースイメージの pull 等）
            progress.set_message(&status);
        }

        Ok(())
    }

    fn diagnostic(&self, error: &str) -> String {
        let start = self.lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
        let tail = &self.lines[start..];
        if tail.is_empty() {
            error.to_string()
        } else {
            format!("{}\n{}", error, tail.join("\n"))
        }
    }
}
