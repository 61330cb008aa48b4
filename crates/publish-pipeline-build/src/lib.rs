//! publish-pipeline のビルド・プッシュ機能
//!
//! トリガー ref の解析、ソース取得、レジストリ認証、タグ・ラベル解決、
//! プッシュ可否判定、Docker イメージのビルドとプッシュを提供します。

pub mod auth;
pub mod builder;
pub mod context;
pub mod decision;
pub mod engine;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod progress;
pub mod pusher;
pub mod resolver;
pub mod source;
pub mod trigger;

pub use auth::{
    Authenticator, Credential, HttpRegistryProbe, NoopProbe, RegistryProbe, RegistrySession,
    extract_registry,
};
pub use builder::{BuildRequest, ImageBuilder};
pub use context::{BuildContext, ContextBuilder};
pub use decision::PublishDecision;
pub use engine::{DockerEngine, ImageEngine};
pub use error::{PipelineError, Result};
pub use executor::{PublishExecutor, PublishJob, PublishReport, PublishState, TagPush};
pub use metadata::{ImageMetadata, LabelSet, MetadataResolver, TagRule, TagSet};
pub use progress::BuildProgress;
pub use pusher::{ImagePusher, image_repository, split_image_tag};
pub use resolver::BuildResolver;
pub use source::{SourceFetcher, SourceSnapshot};
pub use trigger::{RefType, Semver, TriggerEvent};
