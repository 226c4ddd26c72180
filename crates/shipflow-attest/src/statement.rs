//! in-toto Statement v1 / SLSA Provenance v1
//!
//! 公開したイメージのダイジェストとビルド来歴を結びつけるステートメントを組み立てる。

use chrono::{DateTime, Utc};
use serde::Serialize;
use shipflow_core::{BuildProvenance, PublishResult};
use std::collections::BTreeMap;

pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v1";
pub const SLSA_PROVENANCE_V1: &str = "https://slsa.dev/provenance/v1";
pub const BUILD_TYPE: &str = "https://github.com/chronista-club/shipflow/buildtypes/docker@v1";

/// ShipFlow 自身のビルダー ID
pub fn default_builder_id() -> String {
    format!(
        "https://github.com/chronista-club/shipflow@v{}",
        env!("CARGO_PKG_VERSION")
    )
}

/// in-toto Statement
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,
    pub subject: Vec<Subject>,
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    pub predicate: Provenance,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subject {
    pub name: String,
    pub digest: BTreeMap<String, String>,
}

/// SLSA Provenance v1 の述語
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub build_definition: BuildDefinition,
    pub run_details: RunDetails,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDefinition {
    pub build_type: String,
    pub external_parameters: ExternalParameters,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resolved_dependencies: Vec<ResourceDescriptor>,
}

/// ビルドの外部パラメータ
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalParameters {
    pub target: String,
    pub context: String,
    pub dockerfile: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub digest: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    pub builder: Builder,
    pub metadata: BuildMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct Builder {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub started_on: DateTime<Utc>,
    pub finished_on: DateTime<Utc>,
}

/// ステートメントを組み立てる
///
/// サブジェクトは必ずプッシュ結果のダイジェストになる。
pub fn build_statement(
    published: &PublishResult,
    provenance: &BuildProvenance,
    dockerfile_sha256: Option<String>,
    builder_id: &str,
    invocation_id: Option<String>,
) -> Statement {
    let digest = published.digest();
    let subject = Subject {
        name: published.image().to_string(),
        digest: BTreeMap::from([(digest.algorithm().to_string(), digest.hex().to_string())]),
    };

    let event = &provenance.event;
    let mut resolved_dependencies = Vec::new();
    if let (Some(source), Some(revision)) = (&event.source, &event.revision) {
        let uri = match &event.ref_name {
            Some(ref_name) => format!("git+{}@{}", source, ref_name),
            None => format!("git+{}", source),
        };
        resolved_dependencies.push(ResourceDescriptor {
            uri,
            digest: BTreeMap::from([("gitCommit".to_string(), revision.clone())]),
        });
    }
    if let Some(sha256) = dockerfile_sha256 {
        resolved_dependencies.push(ResourceDescriptor {
            uri: format!("file:{}", provenance.target.dockerfile.display()),
            digest: BTreeMap::from([("sha256".to_string(), sha256)]),
        });
    }

    Statement {
        statement_type: STATEMENT_TYPE.to_string(),
        subject: vec![subject],
        predicate_type: SLSA_PROVENANCE_V1.to_string(),
        predicate: Provenance {
            build_definition: BuildDefinition {
                build_type: BUILD_TYPE.to_string(),
                external_parameters: ExternalParameters {
                    target: provenance.target.name.clone(),
                    context: provenance.target.context.display().to_string(),
                    dockerfile: provenance.target.dockerfile.display().to_string(),
                    tags: provenance.tags.tags().to_vec(),
                    version: event.version.clone(),
                    source_ref: event.ref_name.clone(),
                },
                resolved_dependencies,
            },
            run_details: RunDetails {
                builder: Builder {
                    id: builder_id.to_string(),
                },
                metadata: BuildMetadata {
                    invocation_id,
                    started_on: provenance.started_on,
                    finished_on: provenance.finished_on,
                },
            },
        },
    }
}

/// GitHub Actions の実行 URL（ワークフロー外では None）
pub fn github_invocation_id() -> Option<String> {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    let server = env("GITHUB_SERVER_URL")?;
    let repository = env("GITHUB_REPOSITORY")?;
    let run_id = env("GITHUB_RUN_ID")?;
    let attempt = env("GITHUB_RUN_ATTEMPT").unwrap_or_else(|| "1".to_string());
    Some(format!(
        "{}/{}/actions/runs/{}/attempts/{}",
        server.trim_end_matches('/'),
        repository,
        run_id,
        attempt
    ))
}
