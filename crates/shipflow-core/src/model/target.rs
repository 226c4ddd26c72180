use super::ImageRef;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// ビルドターゲット
///
/// ラン開始時に設定から1度だけ読み込まれ、以降は変更されない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    /// ターゲット名（結果やログでの識別子）
    pub name: String,

    /// ビルドコンテキストのディレクトリ
    pub context: PathBuf,

    /// Dockerfile のパス
    pub dockerfile: PathBuf,

    /// 公開先のイメージリポジトリ
    pub image: ImageRef,
}
