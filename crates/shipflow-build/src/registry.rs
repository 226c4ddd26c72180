//! コンテナレジストリ v2 API クライアント
//!
//! 認証の検証（`GET /v2/`）とマニフェストの存在確認（`HEAD /v2/<repo>/manifests/<ref>`）を行う。
//! `401` が返った場合は `WWW-Authenticate` のチャレンジに従って Basic / Bearer 認証を行う。

use crate::error::{RegistryError, RegistryResult};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use shipflow_core::Credentials;
use std::collections::HashMap;

/// マニフェスト取得時に受け入れるメディアタイプ
const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.docker.distribution.manifest.v2+json";

/// Docker Hub の API エンドポイント
const DOCKER_HUB_API: &str = "https://registry-1.docker.io";

/// レジストリ v2 API クライアント
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    registry: String,
    base_url: String,
}

/// 認証チャレンジ（`WWW-Authenticate` ヘッダー）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: HashMap<String, String>,
}

/// トークンエンドポイントのレスポンス
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

enum Authorization {
    Basic(Credentials),
    Bearer(String),
}

impl Authorization {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::Basic(creds) => {
                request.basic_auth(&creds.username, Some(&creds.password))
            }
            Authorization::Bearer(token) => request.bearer_auth(token),
        }
    }
}

impl RegistryClient {
    /// レジストリホストからクライアントを作成
    ///
    /// - `docker.io` → `https://registry-1.docker.io`
    /// - `localhost` / `127.0.0.1` → `http://`
    /// - その他 → `https://`
    pub fn new(registry: &str) -> Self {
        Self::with_base_url(registry, api_base_url(registry))
    }

    /// API のベース URL を明示して作成
    pub fn with_base_url(registry: &str, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            registry: registry.to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 認証情報を検証
    ///
    /// `/v2/` が匿名で `200` を返す場合は認証情報を使わずに成功する。
    pub async fn check_auth(&self, credentials: Option<&Credentials>) -> RegistryResult<()> {
        let url = format!("{}/v2/", self.base_url);
        tracing::debug!("Pinging registry: {}", url);

        let response = self.http.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => return Ok(()),
            StatusCode::UNAUTHORIZED => {}
            status => return Err(unexpected(status, response).await),
        }

        let challenge = challenge_from(&response)?;
        let creds = credentials.ok_or(RegistryError::CredentialsRequired)?;
        let authorization = self.authorize(&challenge, None, Some(creds)).await?;

        let response = authorization.apply(self.http.get(&url)).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::Unauthorized(
                "レジストリが認証情報を受け付けませんでした".to_string(),
            )),
            status => Err(unexpected(status, response).await),
        }
    }

    /// マニフェストがレジストリ上に存在するか
    ///
    /// `reference` はタグまたはダイジェスト。
    pub async fn manifest_exists(
        &self,
        repository: &str,
        reference: &str,
        credentials: Option<&Credentials>,
    ) -> RegistryResult<bool> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url, repository, reference
        );
        tracing::debug!("Checking manifest: {}", url);

        let head = || self.http.head(&url).header(ACCEPT, MANIFEST_MEDIA_TYPES);

        let response = head().send().await?;
        match response.status() {
            StatusCode::OK => return Ok(true),
            StatusCode::NOT_FOUND => return Ok(false),
            StatusCode::UNAUTHORIZED => {}
            status => return Err(unexpected(status, response).await),
        }

        let challenge = challenge_from(&response)?;
        let scope = format!("repository:{}:pull", repository);
        let authorization = self
            .authorize(&challenge, Some(&scope), credentials)
            .await?;

        let response = authorization.apply(head()).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RegistryError::Unauthorized(
                format!("{} への読み取り権限がありません", repository),
            )),
            status => Err(unexpected(status, response).await),
        }
    }

    /// チャレンジに応じた認証ヘッダーを用意
    async fn authorize(
        &self,
        challenge: &Challenge,
        scope: Option<&str>,
        credentials: Option<&Credentials>,
    ) -> RegistryResult<Authorization> {
        match challenge.scheme.to_ascii_lowercase().as_str() {
            "basic" => credentials
                .cloned()
                .map(Authorization::Basic)
                .ok_or(RegistryError::CredentialsRequired),
            "bearer" => {
                let token = self.fetch_token(challenge, scope, credentials).await?;
                Ok(Authorization::Bearer(token))
            }
            other => Err(RegistryError::InvalidChallenge(format!(
                "未対応の認証方式: {}",
                other
            ))),
        }
    }

    /// トークンエンドポイントからトークンを取得
    async fn fetch_token(
        &self,
        challenge: &Challenge,
        scope: Option<&str>,
        credentials: Option<&Credentials>,
    ) -> RegistryResult<String> {
        let realm = challenge
            .params
            .get("realm")
            .ok_or_else(|| RegistryError::InvalidChallenge("realm がありません".to_string()))?;

        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(service) = challenge.params.get("service") {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = scope.or(challenge.params.get("scope").map(String::as_str)) {
            query.push(("scope", scope));
        }

        tracing::debug!("Requesting registry token from {}", realm);
        let mut request = self.http.get(realm).query(&query);
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Unauthorized(if body.trim().is_empty() {
                format!("トークンの取得が拒否されました ({})", status.as_u16())
            } else {
                body.trim().to_string()
            }));
        }
        if !status.is_success() {
            return Err(unexpected(status, response).await);
        }

        let token: TokenResponse = response.json().await?;
        token
            .token
            .or(token.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Unauthorized("トークンが空です".to_string()))
    }
}

/// レジストリホストから API のベース URL を決定
pub fn api_base_url(registry: &str) -> String {
    match registry {
        "docker.io" | "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB_API.to_string(),
        _ => {
            let host = registry.split(':').next().unwrap_or(registry);
            if host == "localhost" || host == "127.0.0.1" {
                format!("http://{}", registry)
            } else {
                format!("https://{}", registry)
            }
        }
    }
}

/// `WWW-Authenticate` ヘッダーをパース
///
/// 例: `Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:org/app:pull"`
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(' ') {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };
    if scheme.is_empty() {
        return None;
    }

    let mut params = HashMap::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.next_if(|c| *c == ',' || c.is_whitespace()).is_some() {}

        let key: String = std::iter::from_fn(|| chars.next_if(|c| *c != '=')).collect();
        if key.trim().is_empty() {
            break;
        }
        chars.next()?; // '='

        let value = if chars.next_if_eq(&'"').is_some() {
            let mut value = String::new();
            loop {
                match chars.next()? {
                    '"' => break,
                    '\\' => value.push(chars.next()?),
                    c => value.push(c),
                }
            }
            value
        } else {
            std::iter::from_fn(|| chars.next_if(|c| *c != ',')).collect::<String>()
        };

        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Some(Challenge {
        scheme: scheme.to_string(),
        params,
    })
}

fn challenge_from(response: &Response) -> RegistryResult<Challenge> {
    let header = response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            RegistryError::InvalidChallenge("WWW-Authenticate ヘッダーがありません".to_string())
        })?;
    parse_challenge(header).ok_or_else(|| RegistryError::InvalidChallenge(header.to_string()))
}

async fn unexpected(status: StatusCode, response: Response) -> RegistryError {
    let message = response.text().await.unwrap_or_default();
    RegistryError::UnexpectedStatus {
        status: status.as_u16(),
        message: message.trim().to_string(),
    }
}
