use chrono::{DateTime, Utc};
use std::fmt;

/// レジストリの認証情報
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// レジストリセッション
///
/// ラン全体で1度だけ確立され、全ワーカーから読み取り専用で共有される。
#[derive(Debug, Clone)]
pub struct Session {
    registry: String,
    credentials: Option<Credentials>,
    established_at: DateTime<Utc>,
}

impl Session {
    pub fn new(registry: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            registry: registry.into(),
            credentials,
            established_at: Utc::now(),
        }
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// 匿名セッションの場合は None
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }
}
