use super::{AttestationPolicy, BuildTarget, TagPolicy};
use crate::error::{ConfigError, Result};
use serde::Serialize;

/// 同時実行数のデフォルト
pub const DEFAULT_CONCURRENCY: usize = 4;

/// ターゲットレジストリ: ship.kdl から読み込まれた全ビルドターゲット
#[derive(Debug, Clone, Serialize)]
pub struct TargetRegistry {
    /// プロジェクト名（オプション）
    pub project: Option<String>,

    /// ターゲットの同時実行数
    pub concurrency: usize,

    /// アテステーション失敗の扱い
    pub attestation: AttestationPolicy,

    /// タグ生成ポリシー
    pub tag_policy: TagPolicy,

    targets: Vec<BuildTarget>,
}

impl TargetRegistry {
    /// ターゲット一覧からレジストリを作成
    ///
    /// ターゲットが空、または名前が重複している場合はエラー。
    pub fn new(targets: Vec<BuildTarget>) -> Result<Self> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        for (i, target) in targets.iter().enumerate() {
            if targets[..i].iter().any(|t| t.name == target.name) {
                return Err(ConfigError::InvalidTarget {
                    target: target.name.clone(),
                    message: "同じ名前のターゲットが既に定義されています".to_string(),
                });
            }
        }

        Ok(Self {
            project: None,
            concurrency: DEFAULT_CONCURRENCY,
            attestation: AttestationPolicy::default(),
            tag_policy: TagPolicy::default(),
            targets,
        })
    }

    /// 定義順のビルドターゲット一覧
    pub fn list_targets(&self) -> &[BuildTarget] {
        &self.targets
    }

    /// 名前で絞り込んだターゲット一覧（定義順を維持）
    ///
    /// `names` が空なら全ターゲット。
    pub fn select(&self, names: &[String]) -> Result<Vec<BuildTarget>> {
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.targets.iter().any(|t| &t.name == *name))
        {
            return Err(ConfigError::UnknownTarget(unknown.clone()));
        }

        Ok(self
            .targets
            .iter()
            .filter(|t| names.is_empty() || names.contains(&t.name))
            .cloned()
            .collect())
    }
}
