//! レジストリ認証処理
//!
//! 明示的な認証情報がなければ Docker config.json（auths / credsStore）から取得し、
//! レジストリ v2 API で検証してセッションを確立します。

use crate::error::RegistryError;
use crate::registry::RegistryClient;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use shipflow_core::{AuthError, Authenticator, Credentials, Session};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Docker config.json の構造
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    /// 認証情報 (レジストリ -> AuthEntry)
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default)]
    creds_store: Option<String>,
}

/// 認証エントリ
#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// Docker config.json から認証情報を探す
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    config_path: PathBuf,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAuth {
    /// 新しい RegistryAuth を作成
    ///
    /// `$DOCKER_CONFIG/config.json`、なければ ~/.docker/config.json を使用
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self { config_path }
    }

    /// 指定したパスの config.json を使用
    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// レジストリの認証情報を取得
    ///
    /// # Returns
    /// * `Ok(Some(credentials))` - 認証情報が見つかった場合
    /// * `Ok(None)` - config.json がない、または該当エントリがない場合
    /// * `Err(e)` - config.json が壊れている場合
    pub async fn get_credentials(&self, registry: &str) -> Result<Option<Credentials>, AuthError> {
        if !self.config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.config_path);
            return Ok(None);
        }

        let config = self.load_docker_config(registry)?;

        // 1. auths セクションを確認
        for key in config_keys(registry) {
            if let Some(auth_entry) = config.auths.get(key)
                && let Some(auth_b64) = &auth_entry.auth
                && let Some(creds) = decode_auth(auth_b64, registry)?
            {
                tracing::debug!("Found credentials in auths for {}", registry);
                return Ok(Some(creds));
            }
        }

        // 2. credential helper を確認
        if let Some(helper) = &config.creds_store {
            tracing::debug!("Trying credential helper: {}", helper);
            for key in config_keys(registry) {
                match get_from_helper(helper, key).await {
                    Ok(Some(creds)) => return Ok(Some(creds)),
                    Ok(None) => {}
                    Err(message) => tracing::debug!("{}", message),
                }
            }
        }

        tracing::debug!("No credentials found for {}", registry);
        Ok(None)
    }

    fn load_docker_config(&self, registry: &str) -> Result<DockerConfig, AuthError> {
        let invalid = |message: String| AuthError::Rejected {
            registry: registry.to_string(),
            message,
        };

        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            invalid(format!(
                "{} を読み込めません: {}",
                self.config_path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            invalid(format!(
                "{} をパースできません: {}",
                self.config_path.display(),
                e
            ))
        })
    }
}

/// config.json 上でレジストリを表すキーの候補
///
/// Docker Hub は歴史的に `https://index.docker.io/v1/` で登録されている。
fn config_keys(registry: &str) -> Vec<&str> {
    if registry == "docker.io" {
        vec!["https://index.docker.io/v1/", "docker.io", "index.docker.io"]
    } else {
        vec![registry]
    }
}

/// Base64エンコードされた認証情報をデコード
fn decode_auth(auth_b64: &str, registry: &str) -> Result<Option<Credentials>, AuthError> {
    let invalid = |message: String| AuthError::Rejected {
        registry: registry.to_string(),
        message,
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64.trim())
        .map_err(|e| invalid(format!("auth をデコードできません: {}", e)))?;

    let auth_str =
        String::from_utf8(decoded).map_err(|e| invalid(format!("auth が UTF-8 ではありません: {}", e)))?;

    Ok(auth_str
        .split_once(':')
        .map(|(username, password)| Credentials::new(username, password)))
}

/// credential helper から認証情報を取得
async fn get_from_helper(helper: &str, registry: &str) -> Result<Option<Credentials>, String> {
    run_helper(&format!("docker-credential-{}", helper), registry).await
}

async fn run_helper(helper_cmd: &str, registry: &str) -> Result<Option<Credentials>, String> {
    let mut child = Command::new(&helper_cmd)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to run {}: {}", helper_cmd, e))?;

    // レジストリ名を stdin に渡して閉じる
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(registry.as_bytes())
            .await
            .map_err(|e| format!("Failed to write to {}: {}", helper_cmd, e))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| format!("Credential helper failed: {}", e))?;

    if !output.status.success() {
        // credential helper が認証情報を持っていない場合は None を返す
        tracing::debug!(
            "Credential helper returned error for {}: {}",
            registry,
            String::from_utf8_lossy(&output.stderr)
        );
        return Ok(None);
    }

    let response: CredentialResponse = serde_json::from_slice(&output.stdout)
        .map_err(|e| format!("Failed to parse credential helper response: {}", e))?;

    Ok(Some(Credentials::new(response.username, response.secret)))
}

/// 1つのレジストリだけを含む config.json を `dir` に書き出す
///
/// 子プロセスに `DOCKER_CONFIG` で渡すためのもので、認証情報をコマンドライン引数に載せずに済む。
pub fn write_docker_config(
    dir: &Path,
    registry: &str,
    credentials: &Credentials,
) -> std::io::Result<PathBuf> {
    let auth = base64::engine::general_purpose::STANDARD
        .encode(format!("{}:{}", credentials.username, credentials.password));
    let auths: serde_json::Map<String, serde_json::Value> = config_keys(registry)
        .into_iter()
        .map(|key| (key.to_string(), serde_json::json!({ "auth": auth })))
        .collect();

    let path = dir.join("config.json");
    std::fs::write(&path, serde_json::json!({ "auths": auths }).to_string())?;
    Ok(path)
}

/// レジストリ v2 API で認証を検証する Authenticator
#[derive(Debug, Clone, Default)]
pub struct DockerAuthenticator {
    auth: RegistryAuth,
    base_urls: HashMap<String, String>,
}

impl DockerAuthenticator {
    pub fn new(auth: RegistryAuth) -> Self {
        Self {
            auth,
            base_urls: HashMap::new(),
        }
    }

    /// 特定レジストリの API ベース URL を上書き（ミラーやテスト用）
    pub fn with_base_url(mut self, registry: &str, base_url: impl Into<String>) -> Self {
        self.base_urls.insert(registry.to_string(), base_url.into());
        self
    }

    fn client(&self, registry: &str) -> RegistryClient {
        match self.base_urls.get(registry) {
            Some(base_url) => RegistryClient::with_base_url(registry, base_url.as_str()),
            None => RegistryClient::new(registry),
        }
    }
}

#[async_trait]
impl Authenticator for DockerAuthenticator {
    async fn authenticate(
        &self,
        registry: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Session, AuthError> {
        let credentials = match credentials {
            Some(creds) => Some(creds.clone()),
            None => self.auth.get_credentials(registry).await?,
        };

        let client = self.client(registry);
        client
            .check_auth(credentials.as_ref())
            .await
            .map_err(|e| match e {
                RegistryError::CredentialsRequired => AuthError::MissingCredentials {
                    registry: registry.to_string(),
                },
                RegistryError::Unauthorized(message) => AuthError::Rejected {
                    registry: registry.to_string(),
                    message,
                },
                other => AuthError::Unreachable {
                    registry: registry.to_string(),
                    message: other.to_string(),
                },
            })?;

        tracing::info!(
            "Authenticated to {} ({})",
            registry,
            if credentials.is_some() {
                "credentials"
            } else {
                "anonymous"
            }
        );
        Ok(Session::new(registry, credentials))
    }
}
