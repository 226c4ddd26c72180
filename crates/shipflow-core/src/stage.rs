//! パイプラインステージのトレイト定義
//!
//! 各ステージは外部システム（レジストリ・Docker エンジン・署名ツール）への
//! 副作用を持つため、コーディネーターからはトレイト越しに呼び出す。

use crate::error::{AttestError, AuthError, BuildError, PushError};
use crate::model::{
    AttestationRecord, BuildProvenance, BuildTarget, BuiltImage, Credentials, PublishResult,
    Session, TagSet,
};
use async_trait::async_trait;

/// レジストリ認証
///
/// ラン開始時にレジストリごとに1回だけ呼ばれる。
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// 認証情報を検証してセッションを確立
    ///
    /// `credentials` が None の場合は実装側の既定の認証情報（docker config など）を使う。
    async fn authenticate(
        &self,
        registry: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Session, AuthError>;
}

/// イメージのビルドとプッシュ
#[async_trait]
pub trait Publisher: Send + Sync {
    /// ターゲットをビルドし、ラベルと最初のタグを付与する
    async fn build(&self, target: &BuildTarget, tags: &TagSet) -> Result<BuiltImage, BuildError>;

    /// ビルド済みイメージを全タグでプッシュし、ダイジェストを返す
    ///
    /// 全タグが同じダイジェストに解決された場合のみ成功。
    async fn push(
        &self,
        built: BuiltImage,
        tags: &TagSet,
        session: &Session,
    ) -> Result<PublishResult, PushError>;
}

/// ビルド来歴の署名と添付
#[async_trait]
pub trait Attestor: Send + Sync {
    /// 述語タイプ（例: "https://slsa.dev/provenance/v1"）
    fn predicate_type(&self) -> &str;

    /// 公開済みダイジェストに対してアテステーションを作成・添付する
    async fn attest(
        &self,
        published: &PublishResult,
        provenance: &BuildProvenance,
        session: &Session,
    ) -> Result<AttestationRecord, AttestError>;
}
