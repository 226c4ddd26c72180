use super::{AttestationRecord, ImageRef, PublishResult};
use crate::error::{AttestError, TargetError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// パイプラインのステージ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Auth,
    Metadata,
    Build,
    Push,
    Attest,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Auth => write!(f, "auth"),
            Stage::Metadata => write!(f, "metadata"),
            Stage::Build => write!(f, "build"),
            Stage::Push => write!(f, "push"),
            Stage::Attest => write!(f, "attest"),
        }
    }
}

/// ターゲットごとの状態
///
/// `Pending → Authenticating → Building → Pushing → Attesting → 終端状態`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Pending,
    Authenticating,
    Building,
    Pushing,
    Attesting,
    Succeeded,
    Unattested,
    Failed(Stage),
}

impl TargetState {
    /// 進行中の状態が属するステージ
    pub fn stage(&self) -> Stage {
        match self {
            TargetState::Pending | TargetState::Authenticating => Stage::Auth,
            TargetState::Building => Stage::Build,
            TargetState::Pushing => Stage::Push,
            TargetState::Attesting | TargetState::Succeeded | TargetState::Unattested => {
                Stage::Attest
            }
            TargetState::Failed(stage) => *stage,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TargetState::Succeeded | TargetState::Unattested | TargetState::Failed(_)
        )
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Pending => write!(f, "pending"),
            TargetState::Authenticating => write!(f, "authenticating"),
            TargetState::Building => write!(f, "building"),
            TargetState::Pushing => write!(f, "pushing"),
            TargetState::Attesting => write!(f, "attesting"),
            TargetState::Succeeded => write!(f, "succeeded"),
            TargetState::Unattested => write!(f, "unattested"),
            TargetState::Failed(stage) => write!(f, "failed ({})", stage),
        }
    }
}

/// アテステーション失敗の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationPolicy {
    /// アテステーション失敗をランの失敗として扱う
    #[default]
    Required,
    /// 警告のみ（公開済みなら成功扱い）
    Optional,
}

impl std::str::FromStr for AttestationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(AttestationPolicy::Required),
            "optional" => Ok(AttestationPolicy::Optional),
            other => Err(format!(
                "attestation は \"required\" か \"optional\" です: {}",
                other
            )),
        }
    }
}

/// ターゲットの終端状態
#[derive(Debug)]
pub enum TargetStatus {
    Succeeded {
        published: PublishResult,
        attestation: AttestationRecord,
    },
    /// 公開済みだがアテステーションに失敗した
    Unattested {
        published: PublishResult,
        error: AttestError,
    },
    Failed {
        error: TargetError,
    },
}

/// ターゲット1つ分の結果
#[derive(Debug)]
pub struct TargetOutcome {
    pub target: String,
    pub image: ImageRef,
    pub status: TargetStatus,
}

impl TargetOutcome {
    pub fn failed(target: impl Into<String>, image: ImageRef, error: TargetError) -> Self {
        Self {
            target: target.into(),
            image,
            status: TargetStatus::Failed { error },
        }
    }

    pub fn state(&self) -> TargetState {
        match &self.status {
            TargetStatus::Succeeded { .. } => TargetState::Succeeded,
            TargetStatus::Unattested { .. } => TargetState::Unattested,
            TargetStatus::Failed { error } => TargetState::Failed(error.stage()),
        }
    }

    /// 公開済みならプッシュ結果
    pub fn published(&self) -> Option<&PublishResult> {
        match &self.status {
            TargetStatus::Succeeded { published, .. } | TargetStatus::Unattested { published, .. } => {
                Some(published)
            }
            TargetStatus::Failed { .. } => None,
        }
    }

    pub fn attestation(&self) -> Option<&AttestationRecord> {
        match &self.status {
            TargetStatus::Succeeded { attestation, .. } => Some(attestation),
            _ => None,
        }
    }

    /// ポリシーに照らして失敗とみなすか
    pub fn is_failure(&self, policy: AttestationPolicy) -> bool {
        match &self.status {
            TargetStatus::Succeeded { .. } => false,
            TargetStatus::Unattested { .. } => policy == AttestationPolicy::Required,
            TargetStatus::Failed { .. } => true,
        }
    }

    /// 失敗ステージと原因
    pub fn failure(&self) -> Option<(Stage, String)> {
        match &self.status {
            TargetStatus::Succeeded { .. } => None,
            TargetStatus::Unattested { error, .. } => Some((Stage::Attest, error.to_string())),
            TargetStatus::Failed { error } => Some((error.stage(), error.to_string())),
        }
    }

    pub fn report(&self, policy: AttestationPolicy) -> TargetReport {
        let failure = self.failure();
        let log_excerpt = match &self.status {
            TargetStatus::Failed {
                error: TargetError::Build(e),
            } => e.log_excerpt().to_vec(),
            _ => Vec::new(),
        };

        TargetReport {
            target: self.target.clone(),
            image: self.image.to_string(),
            state: self.state().to_string(),
            failed: self.is_failure(policy),
            stage: failure.as_ref().map(|(stage, _)| *stage),
            cause: failure.map(|(_, cause)| cause),
            log_excerpt,
            tags: self
                .published()
                .map(|p| p.tags().to_vec())
                .unwrap_or_default(),
            digest: self.published().map(|p| p.digest().to_string()),
            attestation_predicate: self.attestation().map(|a| a.predicate_type.clone()),
        }
    }
}

/// ラン全体の結果（ターゲット順）
#[derive(Debug)]
pub struct RunOutcome {
    pub outcomes: Vec<TargetOutcome>,
    pub policy: AttestationPolicy,
}

impl RunOutcome {
    /// 全ターゲットが成功したか
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(|o| o.is_failure(self.policy))
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure(self.policy))
    }

    pub fn get(&self, target: &str) -> Option<&TargetOutcome> {
        self.outcomes.iter().find(|o| o.target == target)
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            success: self.is_success(),
            policy: self.policy,
            targets: self.outcomes.iter().map(|o| o.report(self.policy)).collect(),
        }
    }
}

/// JSON レポート
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub policy: AttestationPolicy,
    pub targets: Vec<TargetReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub image: String,
    pub state: String,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log_excerpt: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_predicate: Option<String>,
}
