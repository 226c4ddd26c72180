//! ShipFlow エラー型
//!
//! ラン全体を中断させるもの（Config / Auth）と、ターゲット単位で記録されるもの
//! （Metadata / Build / Push / Attest）を型で分けている。

use crate::model::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// 設定ファイルの読み込み・検証エラー
///
/// ターゲットが1つも実行される前にランを中断する。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: ship.local.kdl, .ship.local.kdl, ship.kdl, .ship.kdl\n\
        - ./.shipflow/ ディレクトリ\n\
        または --config / SHIP_CONFIG_PATH で直接指定できます"
    )]
    NotFound,

    #[error("指定された設定ファイルが存在しません: {0}")]
    NotFoundAt(PathBuf),

    #[error("KDL パースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ターゲット '{target}' の定義が不正です: {message}")]
    InvalidTarget { target: String, message: String },

    #[error("不正な設定: {0}")]
    Invalid(String),

    #[error("ビルドターゲットが1つも定義されていません")]
    NoTargets,

    #[error("ターゲット '{0}' は定義されていません")]
    UnknownTarget(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::InvalidTarget { target, message } => format!(
                "ターゲット '{}' の定義が不正です: {}\n\
                 \n\
                 各ターゲットには context / dockerfile / image が必要です:\n\
                 target \"{}\" {{\n\
                 \x20   context \"./{}\"\n\
                 \x20   dockerfile \"./{}/Dockerfile\"\n\
                 \x20   image \"ghcr.io/org/{}\"\n\
                 }}",
                target, message, target, target, target, target
            ),
            ConfigError::NoTargets => "ビルドターゲットが1つも定義されていません。\n\
                 \n\
                 ship.kdl に target ノードを追加してください。"
                .to_string(),
            _ => self.to_string(),
        }
    }
}

/// レジストリ認証エラー（ラン全体で致命的）
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("レジストリ '{registry}' の認証情報が見つかりません")]
    MissingCredentials { registry: String },

    #[error("レジストリ '{registry}' が認証情報を拒否しました: {message}")]
    Rejected { registry: String, message: String },

    #[error("レジストリ '{registry}' に接続できません: {message}")]
    Unreachable { registry: String, message: String },
}

/// タグ・ラベル解決エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("バージョン識別子を解決できません（--version かリリースタグが必要です）")]
    MissingVersion,

    #[error("不正なタグ '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },
}

/// イメージビルドエラー
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("ビルドコンテキストが見つかりません: {0}")]
    ContextNotFound(PathBuf),

    #[error("Dockerfileが見つかりません: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("ターゲット '{target}' のビルドに失敗しました: {message}")]
    Failed {
        target: String,
        message: String,
        /// ビルドログの末尾
        log_excerpt: Vec<String>,
    },

    #[error("Docker エンジンエラー: {0}")]
    Engine(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ビルドログの抜粋（ビルドが走らなかった場合は空）
    pub fn log_excerpt(&self) -> &[String] {
        match self {
            BuildError::Failed { log_excerpt, .. } => log_excerpt,
            _ => &[],
        }
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::DockerfileNotFound(path) => format!(
                "Dockerfileが見つかりません: {}\n\
                 \n\
                 ship.kdl の dockerfile パスを確認してください。",
                path.display()
            ),
            BuildError::ContextNotFound(path) => format!(
                "ビルドコンテキストが見つかりません: {}\n\
                 \n\
                 ship.kdl の context パスを確認してください。",
                path.display()
            ),
            _ => self.to_string(),
        }
    }
}

/// イメージプッシュエラー
///
/// 一部のタグだけプッシュできた状態も失敗として扱う。
#[derive(Debug, Error)]
pub enum PushError {
    #[error("{reference} のプッシュに失敗しました: {message}")]
    Rejected { reference: String, message: String },

    #[error("{reference} のダイジェストを取得できません")]
    DigestUnavailable { reference: String },

    #[error("タグ間でダイジェストが一致しません: {first} != {second}")]
    DigestMismatch { first: String, second: String },

    #[error("Docker エンジンエラー: {0}")]
    Engine(String),
}

/// アテステーションエラー
///
/// 公開済みイメージは取り消さない。
#[derive(Debug, Error)]
pub enum AttestError {
    #[error("ダイジェスト {digest} はレジストリ上で解決できません ({image})")]
    StaleDigest { image: String, digest: String },

    #[error("署名ツールが見つかりません: {0}")]
    SignerUnavailable(String),

    #[error("署名に失敗しました: {0}")]
    Signing(String),

    #[error("レジストリへの問い合わせに失敗しました: {0}")]
    Registry(String),

    #[error("アテステーション中に異常終了しました: {0}")]
    Panicked(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON エラー: {0}")]
    Json(#[from] serde_json::Error),
}

/// ターゲット単位で記録される失敗原因
#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error("キャンセルされました")]
    Cancelled(Stage),

    #[error("ワーカーが異常終了しました: {message}")]
    Panicked { stage: Stage, message: String },
}

impl TargetError {
    /// 失敗したステージ
    pub fn stage(&self) -> Stage {
        match self {
            TargetError::Metadata(_) => Stage::Metadata,
            TargetError::Build(_) => Stage::Build,
            TargetError::Push(_) => Stage::Push,
            TargetError::Cancelled(stage) => *stage,
            TargetError::Panicked { stage, .. } => *stage,
        }
    }
}

/// ラン全体を中断するエラー（ファンアウト前に発生する）
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
