use crate::error::{PipelineError, Result};
use publish_pipeline_config::PipelineConfig;
use std::collections::HashMap;
use std::path::PathBuf;

/// 取得したソースツリー内でのビルド入力の解決
pub struct BuildResolver {
    repo_root: PathBuf,
}

impl BuildResolver {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Dockerfileのパスを解決
    ///
    /// 検索順序:
    /// 1. 設定ファイルの dockerfile（デフォルト以外が指定されている場合は必須）
    /// 2. コンテキスト直下の Dockerfile
    pub fn resolve_dockerfile(&self, config: &PipelineConfig) -> Result<PathBuf> {
        let explicit = self.repo_root.join(&config.dockerfile);
        if explicit.is_file() {
            return Ok(explicit);
        }

        if config.dockerfile != PipelineConfig::default().dockerfile {
            return Err(PipelineError::DockerfileNotFound(explicit));
        }

        let in_context = self.resolve_context(config)?.join("Dockerfile");
        if in_context.is_file() {
            tracing::debug!("Found Dockerfile in context: {}", in_context.display());
            return Ok(in_context);
        }

        Err(PipelineError::DockerfileNotFound(explicit))
    }

    /// ビルドコンテキストのパスを解決
    ///
    /// デフォルトはリポジトリルート
    pub fn resolve_context(&self, config: &PipelineConfig) -> Result<PathBuf> {
        let context = self.repo_root.join(&config.context);

        if !context.exists() {
            return Err(PipelineError::ContextNotFound(context));
        }

        if !context.is_dir() {
            return Err(PipelineError::InvalidConfig(format!(
                "Build context is not a directory: {}",
                context.display()
            )));
        }

        Ok(context)
    }

    /// ビルド引数の変数展開
    pub fn resolve_build_args(
        &self,
        config: &PipelineConfig,
        variables: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        config
            .build_args
            .iter()
            .map(|(key, value)| {
                self.validate_build_arg(key);
                (key.clone(), expand_variables(value, variables))
            })
            .collect()
    }

    /// ビルド引数の検証（機密情報の警告）
    pub fn validate_build_arg(&self, key: &str) {
        let sensitive_patterns = ["password", "token", "secret", "api_key", "private_key"];

        let key_lower = key.to_lowercase();
        if sensitive_patterns.iter().any(|p| key_lower.contains(p)) {
            tracing::warn!(
                "警告: ビルド引数 '{}' は機密情報を含む可能性があります。\n\
                 ビルド引数はイメージ履歴に記録されます。",
                key
            );
        }
    }
}

/// テンプレート文字列内の {VAR_NAME} を実際の値に置換
///
/// 未定義の変数はそのまま残す
fn expand_variables(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_dockerfile_default() {
        let temp_dir = tempdir().unwrap();
        let dockerfile = temp_dir.path().join("Dockerfile");
        fs::write(&dockerfile, "FROM alpine").unwrap();

        let resolver = BuildResolver::new(temp_dir.path());
        let result = resolver
            .resolve_dockerfile(&PipelineConfig::default())
            .unwrap();
        assert_eq!(result, dockerfile);
    }

    #[test]
    fn test_resolve_dockerfile_explicit() {
        let temp_dir = tempdir().unwrap();
        let docker_dir = temp_dir.path().join("docker");
        fs::create_dir(&docker_dir).unwrap();
        let dockerfile = docker_dir.join("app.dockerfile");
        fs::write(&dockerfile, "FROM alpine").unwrap();

        let config = PipelineConfig {
            dockerfile: PathBuf::from("docker/app.dockerfile"),
            ..Default::default()
        };
        let resolver = BuildResolver::new(temp_dir.path());
        assert_eq!(resolver.resolve_dockerfile(&config).unwrap(), dockerfile);
    }

    #[test]
    fn test_resolve_dockerfile_explicit_missing() {
        let temp_dir = tempdir().unwrap();
        let config = PipelineConfig {
            dockerfile: PathBuf::from("missing.dockerfile"),
            ..Default::default()
        };
        let resolver = BuildResolver::new(temp_dir.path());
        assert!(matches!(
            resolver.resolve_dockerfile(&config),
            Err(PipelineError::DockerfileNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_dockerfile_in_context() {
        let temp_dir = tempdir().unwrap();
        let backend = temp_dir.path().join("backend");
        fs::create_dir(&backend).unwrap();
        let dockerfile = backend.join("Dockerfile");
        fs::write(&dockerfile, "FROM alpine").unwrap();

        let config = PipelineConfig {
            context: PathBuf::from("backend"),
            ..Default::default()
        };
        let resolver = BuildResolver::new(temp_dir.path());
        assert_eq!(resolver.resolve_dockerfile(&config).unwrap(), dockerfile);
    }

    #[test]
    fn test_resolve_context_default() {
        let temp_dir = tempdir().unwrap();
        let resolver = BuildResolver::new(temp_dir.path());

        let context = resolver.resolve_context(&PipelineConfig::default()).unwrap();
        assert_eq!(context, temp_dir.path().join("."));
    }

    #[test]
    fn test_resolve_context_missing() {
        let temp_dir = tempdir().unwrap();
        let config = PipelineConfig {
            context: PathBuf::from("nope"),
            ..Default::default()
        };
        let resolver = BuildResolver::new(temp_dir.path());
        assert!(matches!(
            resolver.resolve_context(&config),
            Err(PipelineError::ContextNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_build_args() {
        let mut config = PipelineConfig::default();
        config
            .build_args
            .insert("IMAGE".to_string(), "{REGISTRY}/base:node{NODE}".to_string());
        config
            .build_args
            .insert("UNTOUCHED".to_string(), "{MISSING}".to_string());

        let mut variables = HashMap::new();
        variables.insert("NODE".to_string(), "20".to_string());
        variables.insert("REGISTRY".to_string(), "ghcr.io/myorg".to_string());

        let resolver = BuildResolver::new("/tmp");
        let args = resolver.resolve_build_args(&config, &variables);

        assert_eq!(args["IMAGE"], "ghcr.io/myorg/base:node20");
        assert_eq!(args["UNTOUCHED"], "{MISSING}");
    }
}
