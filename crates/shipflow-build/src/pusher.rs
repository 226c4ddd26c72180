//! イメージプッシュ処理
//!
//! ビルドしたイメージを全タグでレジストリにプッシュし、マニフェストのダイジェストを取得します。

use crate::error::engine_message;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use futures_util::StreamExt;
use shipflow_core::{Digest, PushError, Session};

/// イメージプッシュを実行するハンドラ
pub struct ImagePusher {
    docker: Docker,
}

impl ImagePusher {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// 1つのタグをプッシュ
    ///
    /// # Arguments
    /// * `repository` - イメージ名（レジストリ込み、タグなし）
    /// * `tag` - イメージタグ
    ///
    /// # Returns
    /// プッシュストリームにダイジェストが含まれていればそれを返す
    pub async fn push(
        &self,
        repository: &str,
        tag: &str,
        session: &Session,
    ) -> Result<Option<Digest>, PushError> {
        let reference = format!("{}:{}", repository, tag);
        tracing::info!("Pushing {}", reference);

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: tag.to_string(),
        };

        #[allow(deprecated)]
        let mut stream = self
            .docker
            .push_image(repository, Some(options), docker_credentials(session));

        let mut digest = None;
        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error {
                        error_message = Some(err);
                    } else if let Some(status) = &info.status {
                        if let Some(found) = parse_push_digest(status) {
                            digest = Some(found);
                        }
                        tracing::debug!(
                            "{} {} {}",
                            reference,
                            status,
                            info.progress.as_deref().unwrap_or("")
                        );
                    }
                }
                Err(e) => {
                    return Err(PushError::Rejected {
                        reference,
                        message: engine_message(&e),
                    });
                }
            }
        }

        if let Some(message) = error_message {
            return Err(PushError::Rejected { reference, message });
        }

        Ok(digest)
    }

    /// エンジンが記録した RepoDigests からダイジェストを取得
    pub async fn repo_digest(&self, image: &str, repository: &str) -> Result<Option<Digest>, PushError> {
        let inspect = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|e| PushError::Engine(engine_message(&e)))?;

        Ok(inspect
            .repo_digests
            .unwrap_or_default()
            .iter()
            .find_map(|repo_digest| digest_for_repository(repo_digest, repository)))
    }
}

/// セッションの認証情報を Docker エンジン向けに変換
fn docker_credentials(session: &Session) -> Option<DockerCredentials> {
    session.credentials().map(|creds| DockerCredentials {
        username: Some(creds.username.clone()),
        password: Some(creds.password.clone()),
        serveraddress: Some(session.registry().to_string()),
        ..Default::default()
    })
}

/// プッシュ完了行からダイジェストを取得
///
/// 例: `1.2.3: digest: sha256:4a5f... size: 1573`
pub fn parse_push_digest(status: &str) -> Option<Digest> {
    let (_, rest) = status.split_once("digest: ")?;
    let value = rest.split_whitespace().next()?;
    Digest::parse(value).ok()
}

/// `repository@sha256:...` 形式の RepoDigest から該当リポジトリのダイジェストを取得
pub fn digest_for_repository(repo_digest: &str, repository: &str) -> Option<Digest> {
    let (name, digest) = repo_digest.rsplit_once('@')?;
    if name != repository && !docker_hub_alias(name, repository) {
        return None;
    }
    Digest::parse(digest).ok()
}

/// Docker Hub のイメージは RepoDigests 上で `docker.io/` や `library/` が省略される
fn docker_hub_alias(name: &str, repository: &str) -> bool {
    let normalize = |s: &str| {
        let s = s.strip_prefix("docker.io/").unwrap_or(s);
        s.strip_prefix("library/").unwrap_or(s).to_string()
    };
    normalize(name) == normalize(repository)
}

/// 全タグのダイジェストが一致していることを確認
pub fn agree_on_digest(digests: &[Digest]) -> Result<Option<Digest>, PushError> {
    let Some(first) = digests.first() else {
        return Ok(None);
    };
    if let Some(other) = digests.iter().find(|d| *d != first) {
        return Err(PushError::DigestMismatch {
            first: first.to_string(),
            second: other.to_string(),
        });
    }
    Ok(Some(first.clone()))
}
