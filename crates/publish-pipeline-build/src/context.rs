use crate::error::{PipelineError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::Path;
use tar::Builder;

/// コンテキスト外の Dockerfile を格納する名前
const EXTERNAL_DOCKERFILE: &str = ".publish-pipeline.Dockerfile";

/// Docker Engine に送るビルドコンテキスト
#[derive(Debug)]
pub struct BuildContext {
    /// tar.gz アーカイブ
    pub archive: Vec<u8>,
    /// アーカイブ内の Dockerfile パス
    pub dockerfile: String,
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// Dockerfile がコンテキスト内にあればそのパスを使い、
    /// 外にある場合は別名でアーカイブに追加する
    pub fn create_context(context_path: &Path, dockerfile_path: &Path) -> Result<BuildContext> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        if !context_path.is_dir() {
            return Err(PipelineError::ContextNotFound(context_path.to_path_buf()));
        }
        if !dockerfile_path.is_file() {
            return Err(PipelineError::DockerfileNotFound(
                dockerfile_path.to_path_buf(),
            ));
        }

        let inner_dockerfile = dockerfile_path
            .strip_prefix(context_path)
            .ok()
            .map(|rel| rel.to_string_lossy().replace('\\', "/"));

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);
            tar.follow_symlinks(false);

            // コンテキストディレクトリを再帰的に追加
            tar.append_dir_all(".", context_path)?;

            if inner_dockerfile.is_none() {
                let content = std::fs::read(dockerfile_path)?;

                let mut header = tar::Header::new_gnu();
                header.set_path(EXTERNAL_DOCKERFILE).map_err(|e| {
                    PipelineError::InvalidConfig(format!("Failed to set Dockerfile path: {}", e))
                })?;
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();

                tar.append(&header, &content[..])?;
            }

            tar.into_inner()?.finish()?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());

        // コンテキストサイズの警告
        Self::check_context_size(archive_data.len());

        Ok(BuildContext {
            archive: archive_data,
            dockerfile: inner_dockerfile.unwrap_or_else(|| EXTERNAL_DOCKERFILE.to_string()),
        })
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 publish-pipeline.yaml の context で対象ディレクトリを絞り込むことを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}
