use thiserror::Error;

/// レジストリ v2 API のエラー
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP エラー: {0}")]
    Http(#[from] reqwest::Error),

    #[error("認証が必要です")]
    CredentialsRequired,

    #[error("認証に失敗しました: {0}")]
    Unauthorized(String),

    #[error("不正な認証チャレンジ: {0}")]
    InvalidChallenge(String),

    #[error("予期しないレスポンス ({status}): {message}")]
    UnexpectedStatus { status: u16, message: String },
}

/// Docker エンジンのエラーを文字列化
pub(crate) fn engine_message(error: &bollard::errors::Error) -> String {
    match error {
        bollard::errors::Error::DockerResponseServerError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
