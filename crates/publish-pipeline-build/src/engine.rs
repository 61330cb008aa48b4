//! コンテナエンジンの抽象化
//!
//! 実行器はこのトレイト越しにビルド・タグ付け・プッシュを行う。

use crate::builder::{BuildRequest, ImageBuilder};
use crate::error::Result;
use crate::progress::BuildProgress;
use crate::pusher::ImagePusher;
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;

#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// イメージをビルドし、`request.image_ref` があればそのタグを付ける
    async fn build(&self, request: BuildRequest, progress: &BuildProgress) -> Result<()>;

    /// `source` に `repository:tag` を追加で付ける
    async fn tag(&self, source: &str, repository: &str, tag: &str) -> Result<()>;

    /// `repository:tag` をプッシュし、完全なイメージ名を返す
    async fn push(
        &self,
        repository: &str,
        tag: &str,
        credentials: DockerCredentials,
        progress: &BuildProgress,
    ) -> Result<String>;
}

/// Docker Engine API (bollard) による実装
pub struct DockerEngine {
    builder: ImageBuilder,
    pusher: ImagePusher,
}

impl DockerEngine {
    pub fn new(docker: Docker) -> Self {
        Self {
            builder: ImageBuilder::new(docker.clone()),
            pusher: ImagePusher::new(docker),
        }
    }

    /// ローカルの Docker に接続し、疎通を確認する
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        tracing::debug!("Connected to Docker engine");
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl ImageEngine for DockerEngine {
    async fn build(&self, request: BuildRequest, progress: &BuildProgress) -> Result<()> {
        self.builder.build_image(request, progress).await
    }

    async fn tag(&self, source: &str, repository: &str, tag: &str) -> Result<()> {
        self.builder.tag_image(source, repository, tag).await
    }

    async fn push(
        &self,
        repository: &str,
        tag: &str,
        credentials: DockerCredentials,
        progress: &BuildProgress,
    ) -> Result<String> {
        self.pusher
            .push(repository, tag, credentials, progress)
            .await
    }
}
