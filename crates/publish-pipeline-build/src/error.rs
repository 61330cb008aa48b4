use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("ソースの取得に失敗しました ({repo} @ {git_ref}): {message}")]
    Fetch {
        repo: String,
        git_ref: String,
        message: String,
    },

    #[error("不正な ref です: {0}")]
    InvalidRef(String),

    #[error("レジストリ認証に失敗しました ({registry}): {message}")]
    Auth { registry: String, message: String },

    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Invalid image tag: {tag}")]
    InvalidTag { tag: String },

    #[error("Push failed ({reference}): {message}")]
    PushFailed { reference: String, message: String },

    #[error("Illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] publish_pipeline_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Fetch { .. } => {
                format!(
                    "{}\n\
                     \n\
                     解決方法:\n\
                     1. --repo のパスまたは URL を確認してください\n\
                     2. --ref が存在するか確認してください (例: refs/heads/master)\n\
                     3. git がインストールされているか確認してください",
                    self
                )
            }
            PipelineError::Auth { .. } => {
                format!(
                    "{}\n\
                     \n\
                     解決方法:\n\
                     1. --secret-env で指定した環境変数にトークンが設定されているか確認してください\n\
                     2. --username とトークンの組み合わせを確認してください\n\
                     3. トークンにパッケージ書き込み権限があるか確認してください",
                    self
                )
            }
            PipelineError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     解決方法:\n\
                     1. Dockerfileのパスを確認してください\n\
                     2. publish-pipeline.yaml で明示的にパスを指定してください:\n\
                        dockerfile: path/to/Dockerfile",
                    path.display()
                )
            }
            PipelineError::BuildFailed(msg) => {
                format!(
                    "ビルドに失敗しました: {}\n\
                     \n\
                     Dockerfileの内容を確認してください。",
                    msg
                )
            }
            PipelineError::ContextNotFound(path) => {
                format!(
                    "ビルドコンテキストが見つかりません: {}\n\
                     \n\
                     publish-pipeline.yaml で context パスを確認してください。",
                    path.display()
                )
            }
            _ => format!("{}", self),
        }
    }

    /// ビルド段階で発生したエラーか
    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::BuildFailed(_)
                | PipelineError::InvalidTag { .. }
                | PipelineError::DockerfileNotFound(_)
                | PipelineError::ContextNotFound(_)
        )
    }

    pub(crate) fn fetch(repo: &str, git_ref: &str, message: impl Into<String>) -> Self {
        PipelineError::Fetch {
            repo: repo.to_string(),
            git_ref: git_ref.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn auth(registry: &str, message: impl Into<String>) -> Self {
        PipelineError::Auth {
            registry: registry.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
