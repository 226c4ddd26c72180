use super::{BuildTarget, Digest, ImageRef, RunEvent, TagSet};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// ビルド済みイメージ
///
/// ビルド成功時にのみ生成され、プッシュの唯一の入力になる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    target: String,
    image: ImageRef,
    image_id: String,
    reference: String,
}

impl BuiltImage {
    pub fn new(
        target: impl Into<String>,
        image: ImageRef,
        image_id: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            image,
            image_id: image_id.into(),
            reference: reference.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    /// ローカルのイメージ ID
    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// ビルド時に付与した `image:tag`
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

/// プッシュ結果
///
/// プッシュ成功時にのみ生成される。ダイジェストは必須フィールドなので、
/// ダイジェストなしでアテステーションを要求することはできない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    target: String,
    image: ImageRef,
    tags: Vec<String>,
    digest: Digest,
}

impl PublishResult {
    pub fn new(built: &BuiltImage, tags: &TagSet, digest: Digest) -> Self {
        Self {
            target: built.target.clone(),
            image: built.image.clone(),
            tags: tags.tags().to_vec(),
            digest,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// `image@digest` 形式の参照
    pub fn pinned_reference(&self) -> String {
        self.image.with_digest(&self.digest)
    }
}

/// アテステーションに記録するビルド来歴
#[derive(Debug, Clone, Serialize)]
pub struct BuildProvenance {
    pub target: BuildTarget,
    pub event: RunEvent,
    pub tags: TagSet,
    pub started_on: DateTime<Utc>,
    pub finished_on: DateTime<Utc>,
}

/// 署名済みアテステーション
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttestationRecord {
    /// サブジェクトのイメージ名
    pub subject_name: String,

    /// サブジェクトのダイジェスト
    pub subject_digest: Digest,

    /// 述語タイプ（例: "https://slsa.dev/provenance/v1"）
    pub predicate_type: String,

    /// 署名対象のステートメント
    pub statement: serde_json::Value,

    pub signed_at: DateTime<Utc>,
}
