//! レジストリ認証処理
//!
//! 環境変数のトークンから認証情報を組み立て、レジストリの `/v2/` エンドポイントで
//! ログインを確認したうえで、プッシュ用のセッションを発行します。
//!
//! ## セキュリティ
//!
//! - トークンは `SecretString` で保持し、ドロップ時にゼロクリアされます
//! - トークンはログ・エラーメッセージ・シリアライズ出力に含まれません
//! - セッションは成功・失敗を問わずスコープ終了時に無効化されます

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use reqwest::StatusCode;
use reqwest::header::WWW_AUTHENTICATE;
use secrecy::{ExposeSecret, SecretString};

/// Docker Hub の表記揺れ
const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_API: &str = "registry-1.docker.io";
const DOCKER_HUB_SERVER_ADDRESS: &str = "https://index.docker.io/v1/";

/// レジストリの認証情報
///
/// `Debug` 出力ではシークレットは伏せられる
#[derive(Debug)]
pub struct Credential {
    registry: String,
    username: String,
    secret: SecretString,
}

impl Credential {
    /// 認証情報を作成し、形式を検証する
    pub fn new(
        registry: impl Into<String>,
        username: impl Into<String>,
        secret: SecretString,
    ) -> Result<Self> {
        let registry = registry.into();
        let username = username.into();

        if registry.trim().is_empty() {
            return Err(PipelineError::auth("(empty)", "レジストリ名が空です"));
        }
        if username.trim().is_empty() {
            return Err(PipelineError::auth(&registry, "ユーザー名が空です"));
        }

        let exposed = secret.expose_secret();
        if exposed.is_empty() {
            return Err(PipelineError::auth(&registry, "シークレットが空です"));
        }
        if exposed
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(PipelineError::auth(
                &registry,
                "シークレットに空白または制御文字が含まれています",
            ));
        }

        Ok(Self {
            registry,
            username,
            secret,
        })
    }

    /// 環境変数からシークレットを読み込んで作成
    ///
    /// 変数が未設定・空の場合は `AuthError`
    pub fn from_env(
        registry: impl Into<String>,
        username: impl Into<String>,
        secret_env: &str,
    ) -> Result<Self> {
        let registry = registry.into();
        let secret = match std::env::var(secret_env) {
            Ok(value) if !value.trim().is_empty() => SecretString::from(value.trim().to_string()),
            Ok(_) => {
                return Err(PipelineError::auth(
                    &registry,
                    format!("環境変数 {} が空です", secret_env),
                ));
            }
            Err(_) => {
                return Err(PipelineError::auth(
                    &registry,
                    format!("環境変数 {} が設定されていません", secret_env),
                ));
            }
        };

        Self::new(registry, username, secret)
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Registry HTTP API v2 のベース URL
    pub fn api_base_url(&self) -> String {
        registry_base_url(&self.registry)
    }

    fn docker_credentials(&self) -> DockerCredentials {
        DockerCredentials {
            username: Some(self.username.clone()),
            password: Some(self.secret.expose_secret().to_string()),
            serveraddress: Some(server_address(&self.registry)),
            ..Default::default()
        }
    }
}

/// レジストリ名から API のベース URL を作る
///
/// - `docker.io` → `https://registry-1.docker.io`
/// - `localhost:5000` → `http://localhost:5000`
/// - `ghcr.io` → `https://ghcr.io`
pub fn registry_base_url(registry: &str) -> String {
    if registry.starts_with("http://") || registry.starts_with("https://") {
        return registry.trim_end_matches('/').to_string();
    }

    let host = if registry == DOCKER_HUB || registry == "index.docker.io" {
        DOCKER_HUB_API
    } else {
        registry
    };

    let is_local = host.starts_with("localhost") || host.starts_with("127.0.0.1");
    let scheme = if is_local { "http" } else { "https" };

    format!("{}://{}", scheme, host)
}

/// Docker Engine に渡す serveraddress
fn server_address(registry: &str) -> String {
    if registry == DOCKER_HUB || registry == "index.docker.io" {
        DOCKER_HUB_SERVER_ADDRESS.to_string()
    } else {
        registry.to_string()
    }
}

/// イメージ名からレジストリを抽出
///
/// # Examples
/// - `ghcr.io/org/app:tag` -> `ghcr.io`
/// - `myuser/app:tag` -> `docker.io`
/// - `localhost:5000/app` -> `localhost:5000`
pub fn extract_registry(image: &str) -> String {
    if let Some((first, _)) = image.split_once('/')
        && (first.contains('.') || first.contains(':') || first == "localhost")
    {
        return first.to_string();
    }

    DOCKER_HUB.to_string()
}

/// `WWW-Authenticate: Bearer ...` チャレンジ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
}

impl BearerChallenge {
    /// `Bearer realm="https://ghcr.io/token",service="ghcr.io"` を解析
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;

        for param in split_params(params) {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
        })
    }
}

/// カンマ区切りのパラメータを分割（引用符内のカンマは区切らない）
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);

    parts
}

/// レジストリに認証情報を照会する
#[async_trait]
pub trait RegistryProbe: Send + Sync {
    /// 受理されれば `Ok(())`、拒否されれば `AuthError`
    async fn verify(&self, credential: &Credential) -> Result<()>;
}

/// Registry HTTP API v2 を使ったログイン確認
pub struct HttpRegistryProbe {
    client: reqwest::Client,
}

impl Default for HttpRegistryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRegistryProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("publish-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn request_token(
        &self,
        credential: &Credential,
        challenge: &BearerChallenge,
    ) -> Result<()> {
        tracing::debug!(realm = %challenge.realm, "Requesting registry token");

        let mut request = self
            .client
            .get(&challenge.realm)
            .basic_auth(&credential.username, Some(credential.secret.expose_secret()));
        if let Some(service) = &challenge.service {
            request = request.query(&[("service", service)]);
        }

        let response = request.send().await.map_err(|e| {
            PipelineError::auth(&credential.registry, format!("トークン取得に失敗: {}", e))
        })?;

        check_status(&credential.registry, response.status())
    }
}

#[async_trait]
impl RegistryProbe for HttpRegistryProbe {
    async fn verify(&self, credential: &Credential) -> Result<()> {
        let url = format!("{}/v2/", credential.api_base_url());
        tracing::debug!(url = %url, username = %credential.username, "Probing registry");

        let response = self
            .client
            .get(&url)
            .basic_auth(&credential.username, Some(credential.secret.expose_secret()))
            .send()
            .await
            .map_err(|e| {
                PipelineError::auth(&credential.registry, format!("レジストリに接続できません: {}", e))
            })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // トークン方式のレジストリ (ghcr.io, Docker Hub など)
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(BearerChallenge::parse);

            if let Some(challenge) = challenge {
                return self.request_token(credential, &challenge).await;
            }
        }

        check_status(&credential.registry, response.status())
    }
}

fn check_status(registry: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }

    let message = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            format!("認証情報が拒否されました (HTTP {})", status.as_u16())
        }
        _ => format!("予期しない応答 (HTTP {})", status.as_u16()),
    };
    Err(PipelineError::auth(registry, message))
}

/// ログイン確認を行わないプローブ（--skip-login-check 用）
pub struct NoopProbe;

#[async_trait]
impl RegistryProbe for NoopProbe {
    async fn verify(&self, credential: &Credential) -> Result<()> {
        tracing::debug!(registry = %credential.registry, "Skipping registry login check");
        Ok(())
    }
}

/// 認証処理
pub struct Authenticator<P: RegistryProbe> {
    probe: P,
}

impl Authenticator<HttpRegistryProbe> {
    pub fn http() -> Self {
        Self::new(HttpRegistryProbe::new())
    }
}

impl<P: RegistryProbe> Authenticator<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// ログインしてセッションを発行
    ///
    /// 拒否された場合、認証情報はこの関数内で破棄される
    pub async fn login(&self, credential: Credential) -> Result<RegistrySession> {
        self.probe.verify(&credential).await?;

        tracing::info!(
            registry = %credential.registry,
            username = %credential.username,
            "Registry login succeeded"
        );

        Ok(RegistrySession {
            credential: Some(credential),
        })
    }
}

/// プッシュ用のスコープ付きセッション
///
/// 認証情報を排他的に保持し、`invalidate` またはドロップで破棄する。
#[derive(Debug)]
pub struct RegistrySession {
    credential: Option<Credential>,
}

impl RegistrySession {
    /// 無効化済みなら `None`
    pub fn registry(&self) -> Option<&str> {
        self.credential.as_ref().map(Credential::registry)
    }

    pub fn is_active(&self) -> bool {
        self.credential.is_some()
    }

    /// プッシュ時に Docker Engine へ渡す認証情報
    ///
    /// 返り値はトークンの平文コピーを含む。呼び出し側はプッシュの間だけ保持し、
    /// 終わったら破棄すること。
    pub fn docker_credentials(&self) -> Result<DockerCredentials> {
        self.credential
            .as_ref()
            .map(Credential::docker_credentials)
            .ok_or_else(|| PipelineError::auth("(session)", "セッションは既に無効化されています"))
    }

    /// 認証情報を破棄する
    pub fn invalidate(&mut self) {
        if let Some(credential) = self.credential.take() {
            tracing::debug!(registry = %credential.registry, "Registry session invalidated");
        }
    }
}

impl Drop for RegistrySession {
    fn drop(&mut self) {
        self.invalidate();
    }
}
