use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ランのトリガーとなったイベント（リリースなど）
///
/// ラン中は不変。`created` はイベント生成時に1度だけ記録され、
/// `org.opencontainers.image.created` ラベルにのみ使われる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    /// バージョン識別子（例: "v1.2.3"）
    pub version: Option<String>,

    /// ソースリポジトリの URL
    pub source: Option<String>,

    /// ソースのリビジョン（コミット SHA）
    pub revision: Option<String>,

    /// ソースの ref（例: "refs/tags/v1.2.3"）
    pub ref_name: Option<String>,

    /// イベント生成時刻
    pub created: DateTime<Utc>,
}

/// GitHub Actions のイベントペイロードのうち必要な部分
#[derive(Debug, Deserialize)]
struct GithubEventPayload {
    release: Option<GithubRelease>,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: Option<String>,
}

impl RunEvent {
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            version: None,
            source: None,
            revision: None,
            ref_name: None,
            created,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_ref_name(mut self, ref_name: impl Into<String>) -> Self {
        self.ref_name = Some(ref_name.into());
        self
    }

    /// GitHub Actions の環境変数からイベントを構築
    ///
    /// バージョンの優先順位:
    /// 1. `GITHUB_EVENT_PATH` の JSON に含まれる `release.tag_name`
    /// 2. `GITHUB_REF` が `refs/tags/<tag>` の場合の `<tag>`
    pub fn from_github_env(created: DateTime<Utc>) -> Self {
        let mut event = Self::new(created);

        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        if let Some(path) = env("GITHUB_EVENT_PATH") {
            event.version = release_tag_from_event_file(Path::new(&path));
        }

        let github_ref = env("GITHUB_REF");
        if event.version.is_none()
            && let Some(tag) = github_ref
                .as_deref()
                .and_then(|r| r.strip_prefix("refs/tags/"))
        {
            event.version = Some(tag.to_string());
        }
        event.ref_name = github_ref;

        event.revision = env("GITHUB_SHA");

        if let Some(repository) = env("GITHUB_REPOSITORY") {
            let server = env("GITHUB_SERVER_URL").unwrap_or_else(|| "https://github.com".into());
            event.source = Some(format!("{}/{}", server.trim_end_matches('/'), repository));
        }

        event
    }
}

/// イベントペイロードからリリースタグを取得
///
/// ファイルが読めない・リリースイベントでない場合は None。
fn release_tag_from_event_file(path: &Path) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!("Failed to read event payload {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str::<GithubEventPayload>(&content) {
        Ok(payload) => payload.release.and_then(|r| r.tag_name),
        Err(e) => {
            tracing::debug!("Failed to parse event payload {}: {}", path.display(), e);
            None
        }
    }
}
