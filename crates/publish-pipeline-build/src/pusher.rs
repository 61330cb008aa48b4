//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュします。

use crate::error::{PipelineError, Result};
use crate::progress::BuildProgress;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::PushImageInfo;
use futures_util::StreamExt;

/// イメージプッシュを実行するハンドラ
pub struct ImagePusher {
    docker: Docker,
}

impl ImagePusher {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをレジストリにプッシュ
    ///
    /// # Arguments
    /// * `repository` - レジストリ込みのイメージ名（タグなし）
    /// * `tag` - イメージタグ
    /// * `credentials` - セッションから取り出した認証情報
    ///
    /// # Returns
    /// プッシュ成功時は完全なイメージ名を返す
    pub async fn push(
        &self,
        repository: &str,
        tag: &str,
        credentials: DockerCredentials,
        progress: &BuildProgress,
    ) -> Result<String> {
        let full_image = format!("{}:{}", repository, tag);
        validate_tag(tag)?;

        tracing::info!("Pushing {}", full_image);

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: tag.to_string(),
        };

        #[allow(deprecated)]
        let mut stream = self
            .docker
            .push_image(repository, Some(options), Some(credentials));

        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error.clone() {
                        error_message = Some(err);
                    } else {
                        handle_progress(&info, progress);
                    }
                }
                Err(e) => {
                    return Err(PipelineError::PushFailed {
                        reference: full_image,
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(message) = error_message {
            return Err(PipelineError::PushFailed {
                reference: full_image,
                message,
            });
        }

        tracing::info!("Pushed {}", full_image);
        Ok(full_image)
    }
}

/// プッシュ進捗をスピナーに反映
fn handle_progress(info: &PushImageInfo, progress: &BuildProgress) {
    if let Some(status) = &info.status {
        match status.as_str() {
            // 準備中は表示をスキップ（ノイズ軽減）
            "Preparing" | "Waiting" => {}
            "Pushing" => {
                let detail = info.progress.as_deref().unwrap_or("");
                progress.set_message(&format!("↑ {} {}", status, detail));
            }
            _ => progress.set_message(status),
        }
    }
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(PipelineError::InvalidTag {
            tag: "(empty)".to_string(),
        });
    }

    if tag.len() > 128 {
        return Err(PipelineError::InvalidTag {
            tag: format!("Tag too long ({} characters, max 128)", tag.len()),
        });
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(PipelineError::InvalidTag {
            tag: tag.to_string(),
        });
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(PipelineError::InvalidTag {
            tag: format!("Invalid character '{}' in tag: {}", c, tag),
        });
    }

    Ok(())
}

/// レジストリとイメージ名からリポジトリ名を組み立てる
///
/// # Examples
/// - `("ghcr.io", "org/app")` -> `ghcr.io/org/app`
/// - `("ghcr.io", "ghcr.io/org/app")` -> `ghcr.io/org/app`
pub fn image_repository(registry: &str, image: &str) -> String {
    let registry = registry
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let image = image.trim_start_matches('/');

    if image.starts_with(&format!("{}/", registry)) {
        image.to_string()
    } else {
        format!("{}/{}", registry, image)
    }
}

/// イメージ名とタグを分離
///
/// # Examples
/// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", Some("v1.0"))`
/// - `ghcr.io/org/app` -> `("ghcr.io/org/app", None)`
/// - `localhost:5000/app` -> `("localhost:5000/app", None)`
pub fn split_image_tag(image: &str) -> (String, Option<String>) {
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // ポート番号の場合は localhost:5000/app のように後ろに / が続く
        if !potential_tag.contains('/') && !potential_tag.chars().all(|c| c.is_ascii_digit()) {
            return (potential_image.to_string(), Some(potential_tag.to_string()));
        }
    }

    (image.to_string(), None)
}
