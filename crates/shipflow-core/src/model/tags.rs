use super::ImageRef;
use crate::error::MetadataError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// タグの最大長
pub const MAX_TAG_LENGTH: usize = 128;

/// ターゲットに付与するタグとラベルの集合
///
/// タグ列は空にならず、すべて有効なレジストリタグであることを保証する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSet {
    tags: Vec<String>,
    labels: BTreeMap<String, String>,
}

impl TagSet {
    pub fn new(tags: Vec<String>, labels: BTreeMap<String, String>) -> Result<Self, MetadataError> {
        if tags.is_empty() {
            return Err(MetadataError::MissingVersion);
        }
        for tag in &tags {
            validate_tag(tag)?;
        }
        Ok(Self { tags, labels })
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// 最初のタグ（ビルド時に付与するタグ）
    pub fn primary(&self) -> &str {
        &self.tags[0]
    }

    /// `image:tag` 形式の参照一覧
    pub fn references(&self, image: &ImageRef) -> Vec<String> {
        self.tags.iter().map(|tag| image.with_tag(tag)).collect()
    }
}

/// タグ生成ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPolicy {
    /// プレリリースでない semver に `latest` を付与する
    pub latest: bool,

    /// リビジョンがあれば `sha-<short>` を付与する
    pub sha: bool,
}

impl Default for TagPolicy {
    fn default() -> Self {
        Self {
            latest: true,
            sha: false,
        }
    }
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> Result<(), MetadataError> {
    let invalid = |reason: String| MetadataError::InvalidTag {
        tag: tag.to_string(),
        reason,
    };

    if tag.is_empty() {
        return Err(invalid("空のタグ".to_string()));
    }

    if tag.len() > MAX_TAG_LENGTH {
        return Err(invalid(format!(
            "長すぎます（{}文字, 最大{}）",
            tag.len(),
            MAX_TAG_LENGTH
        )));
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(invalid("先頭に '.' または '-' は使えません".to_string()));
    }

    if let Some(c) = tag.chars().find(|c| !is_tag_char(*c)) {
        return Err(invalid(format!("不正な文字 '{}'", c)));
    }

    Ok(())
}

pub(crate) fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}
