//! publish-pipeline の設定ファイル
//!
//! ビルド対象リポジトリに置かれた `publish-pipeline.yaml` を探して読み込みます。
//! ファイルが無い場合はデフォルト値 (`Dockerfile`, コンテキスト `.`) で動作します。

pub mod error;

pub use error::*;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_ENV: &str = "PUBLISH_PIPELINE_CONFIG";

/// リポジトリ内で検索するファイル名（優先順）
const CANDIDATES: [&str; 3] = [
    "publish-pipeline.yaml",
    ".publish-pipeline.yaml",
    ".github/publish-pipeline.yaml",
];

/// ビルド設定
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// イメージ名（レジストリを含まない。例: "org/app"）
    pub image: Option<String>,
    /// Dockerfile のパス（リポジトリルートからの相対パス）
    pub dockerfile: PathBuf,
    /// ビルドコンテキスト（リポジトリルートからの相対パス）
    pub context: PathBuf,
    /// マルチステージビルドのターゲット
    pub target: Option<String>,
    /// ビルド引数。値の `{VAR}` は環境変数で展開される
    pub build_args: BTreeMap<String, String>,
    /// 追加ラベル
    pub labels: BTreeMap<String, String>,
    pub no_cache: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image: None,
            dockerfile: PathBuf::from("Dockerfile"),
            context: PathBuf::from("."),
            target: None,
            build_args: BTreeMap::new(),
            labels: BTreeMap::new(),
            no_cache: false,
        }
    }
}

impl PipelineConfig {
    /// パスがリポジトリ外を指していないか検証
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [("dockerfile", &self.dockerfile), ("context", &self.context)] {
            if path.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "{} は相対パスで指定してください: {}",
                    name,
                    path.display()
                )));
            }
            if path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(ConfigError::Invalid(format!(
                    "{} にリポジトリ外へのパス (..) は使えません: {}",
                    name,
                    path.display()
                )));
            }
        }

        if let Some(image) = &self.image
            && image.trim().is_empty()
        {
            return Err(ConfigError::Invalid("image が空です".to_string()));
        }

        Ok(())
    }
}

/// グローバル設定ディレクトリ (~/.config/publish-pipeline)
pub fn get_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("publish-pipeline"))
        .ok_or(ConfigError::ConfigDirNotFound)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 明示的な指定（--config）
/// 2. 環境変数 PUBLISH_PIPELINE_CONFIG
/// 3. リポジトリルート: publish-pipeline.yaml, .publish-pipeline.yaml, .github/publish-pipeline.yaml
/// 4. ~/.config/publish-pipeline/publish-pipeline.yaml
///
/// 1 と 2 で指定されたファイルが存在しない場合はエラー。
/// 3 と 4 で見つからない場合は `Ok(None)`。
pub fn find_config_file(repo_root: &Path, explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    let pinned = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    if let Some(path) = pinned {
        if path.is_file() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    for filename in &CANDIDATES {
        let path = repo_root.join(filename);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global = config_dir.join("publish-pipeline.yaml");
        if global.is_file() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

/// 設定ファイルを読み込んで検証
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;

    // 空ファイルはデフォルト設定として扱う
    if content.trim().is_empty() {
        return Ok(PipelineConfig::default());
    }

    let config: PipelineConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    config.validate()?;

    Ok(config)
}

/// リポジトリルートから設定を解決
///
/// 見つかった設定ファイルのパスも返す（表示用）
pub fn resolve(
    repo_root: &Path,
    explicit: Option<&Path>,
) -> Result<(PipelineConfig, Option<PathBuf>)> {
    match find_config_file(repo_root, explicit)? {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            let config = load_config(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            tracing::debug!("No config file found under {}", repo_root.display());
            Ok((PipelineConfig::default(), None))
        }
    }
}
