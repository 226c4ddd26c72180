//! ship.kdl パーサー
//!
//! KDL構文をパースして TargetRegistry を生成する。
//! 相対パスは設定ファイルのあるディレクトリを基準に解決する。

use crate::error::{ConfigError, Result};
use crate::model::{BuildTarget, ImageRef, TargetRegistry};
use kdl::{KdlDocument, KdlNode};
use std::path::{Component, Path, PathBuf};

/// KDLファイルを TargetRegistry にパース
pub fn parse_config_file(path: &Path) -> Result<TargetRegistry> {
    let content = std::fs::read_to_string(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&content, base_dir)
}

/// KDL文字列を TargetRegistry にパース
pub fn parse_config(content: &str, base_dir: &Path) -> Result<TargetRegistry> {
    let doc: KdlDocument = content.parse()?;

    let mut project = None;
    let mut concurrency = None;
    let mut attestation = None;
    let mut tag_policy = None;
    let mut targets = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                project = first_string(node).map(|s| s.to_string());
            }
            "concurrency" => {
                let value = node
                    .entries()
                    .first()
                    .and_then(|e| e.value().as_integer())
                    .filter(|n| *n > 0)
                    .ok_or_else(|| {
                        ConfigError::Invalid("concurrency には正の整数が必要です".to_string())
                    })?;
                concurrency = Some(usize::try_from(value).map_err(|_| {
                    ConfigError::Invalid(format!("concurrency が大きすぎます: {}", value))
                })?);
            }
            "attestation" => {
                let value = first_string(node).ok_or_else(|| {
                    ConfigError::Invalid("attestation には文字列が必要です".to_string())
                })?;
                attestation = Some(value.parse().map_err(ConfigError::Invalid)?);
            }
            "tags" => {
                let mut policy = crate::model::TagPolicy::default();
                for entry in node.entries() {
                    let Some(name) = entry.name() else { continue };
                    let flag = entry.value().as_bool().ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "tags の {} には #true / #false を指定してください",
                            name.value()
                        ))
                    })?;
                    match name.value() {
                        "latest" => policy.latest = flag,
                        "sha" => policy.sha = flag,
                        other => {
                            return Err(ConfigError::Invalid(format!(
                                "tags に未知のオプションがあります: {}",
                                other
                            )));
                        }
                    }
                }
                tag_policy = Some(policy);
            }
            "target" => {
                targets.push(parse_target(node, targets.len() + 1, base_dir)?);
            }
            _ => {
                // 不明なノードはスキップ
            }
        }
    }

    let mut registry = TargetRegistry::new(targets)?;
    registry.project = project;
    if let Some(concurrency) = concurrency {
        registry.concurrency = concurrency;
    }
    if let Some(attestation) = attestation {
        registry.attestation = attestation;
    }
    if let Some(tag_policy) = tag_policy {
        registry.tag_policy = tag_policy;
    }

    tracing::debug!(
        "Loaded {} build targets (concurrency {})",
        registry.list_targets().len(),
        registry.concurrency
    );

    Ok(registry)
}

/// target ノードをパース（`position` は定義順で1始まり）
fn parse_target(node: &KdlNode, position: usize, base_dir: &Path) -> Result<BuildTarget> {
    let name = first_string(node)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::Invalid(format!("{}番目の target には名前が必要です", position))
        })?
        .to_string();

    let invalid = |message: String| ConfigError::InvalidTarget {
        target: name.clone(),
        message,
    };

    let mut context = None;
    let mut dockerfile = None;
    let mut image = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value();
            match key {
                "context" | "dockerfile" | "image" => {
                    let value = first_string(child)
                        .filter(|s| !s.trim().is_empty())
                        .ok_or_else(|| invalid(format!("{} には文字列が必要です", key)))?;
                    match key {
                        "context" => context = Some(resolve_path(base_dir, value)),
                        "dockerfile" => dockerfile = Some(resolve_path(base_dir, value)),
                        _ => image = Some(ImageRef::parse(value).map_err(&invalid)?),
                    }
                }
                other => {
                    return Err(invalid(format!("未知のフィールドです: {}", other)));
                }
            }
        }
    }

    Ok(BuildTarget {
        context: context.ok_or_else(|| invalid("context が必要です".to_string()))?,
        dockerfile: dockerfile.ok_or_else(|| invalid("dockerfile が必要です".to_string()))?,
        image: image.ok_or_else(|| invalid("image が必要です".to_string()))?,
        name,
    })
}

fn first_string(node: &KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

/// 設定ファイル基準でパスを解決（`./` は取り除く）
fn resolve_path(base_dir: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let relative: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    base_dir.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttestationPolicy;

    const SAMPLE_CONFIG: &str = r#"
project "laminar"

concurrency 2

attestation "optional"

tags latest=#false sha=#true

target "app-server" {
    context "./app-server"
    dockerfile "./app-server/Dockerfile"
    image "ghcr.io/lmnr-ai/app-server"
}

target "frontend" {
    context "./frontend"
    dockerfile "./frontend/Dockerfile"
    image "ghcr.io/lmnr-ai/frontend"
}
"#;

    #[test]
    fn test_parse_config_full() {
        let base = Path::new("/work/repo");
        let registry = parse_config(SAMPLE_CONFIG, base).unwrap();

        assert_eq!(registry.project.as_deref(), Some("laminar"));
        assert_eq!(registry.concurrency, 2);
        assert_eq!(registry.attestation, AttestationPolicy::Optional);
        assert!(!registry.tag_policy.latest);
        assert!(registry.tag_policy.sha);

        let targets = registry.list_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "app-server");
        assert_eq!(targets[0].context, PathBuf::from("/work/repo/app-server"));
        assert_eq!(
            targets[0].dockerfile,
            PathBuf::from("/work/repo/app-server/Dockerfile")
        );
        assert_eq!(targets[0].image.as_str(), "ghcr.io/lmnr-ai/app-server");
        assert_eq!(targets[1].name, "frontend");
    }

    #[test]
    fn test_parse_config_defaults() {
        let kdl = r#"
target "api" {
    context "."
    dockerfile "Dockerfile"
    image "registry/api"
}
"#;
        let registry = parse_config(kdl, Path::new("/repo")).unwrap();
        assert_eq!(registry.concurrency, crate::model::DEFAULT_CONCURRENCY);
        assert_eq!(registry.attestation, AttestationPolicy::Required);
        assert!(registry.tag_policy.latest);
        assert!(!registry.tag_policy.sha);
        assert_eq!(registry.list_targets()[0].context, PathBuf::from("/repo"));
    }

    #[test]
    fn test_parse_config_missing_field_names_target() {
        let kdl = r#"
target "frontend" {
    context "./frontend"
    image "registry/frontend"
}
"#;
        let err = parse_config(kdl, Path::new("/repo")).unwrap_err();
        match err {
            ConfigError::InvalidTarget { target, message } => {
                assert_eq!(target, "frontend");
                assert!(message.contains("dockerfile"));
            }
            other => panic!("Expected InvalidTarget, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_tagged_image_is_rejected() {
        let kdl = r#"
target "api" {
    context "."
    dockerfile "Dockerfile"
    image "ghcr.io/org/api:latest"
}
"#;
        let err = parse_config(kdl, Path::new("/repo")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget { target, .. } if target == "api"));
    }

    #[test]
    fn test_parse_config_unknown_field_is_rejected() {
        let kdl = r#"
target "api" {
    context "."
    dockerfile "Dockerfile"
    image "registry/api"
    platform "linux/arm64"
}
"#;
        let err = parse_config(kdl, Path::new("/repo")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget { .. }));
    }

    #[test]
    fn test_parse_config_no_targets() {
        let err = parse_config(r#"project "empty""#, Path::new("/repo")).unwrap_err();
        assert!(matches!(err, ConfigError::NoTargets));
    }

    #[test]
    fn test_parse_config_target_without_name() {
        let kdl = r#"
target "api" {
    context "./api"
    dockerfile "./api/Dockerfile"
    image "ghcr.io/org/api"
}

target {
    context "."
}
"#;
        let err = parse_config(kdl, Path::new("/repo")).unwrap_err();
        match err {
            ConfigError::Invalid(message) => assert!(message.contains("2番目の target")),
            other => panic!("Expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_invalid_concurrency() {
        let kdl = r#"
concurrency 0
target "api" {
    context "."
    dockerfile "Dockerfile"
    image "registry/api"
}
"#;
        let err = parse_config(kdl, Path::new("/repo")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_config_malformed_kdl() {
        let err = parse_config("target \"api\" {", Path::new("/repo")).unwrap_err();
        assert!(matches!(err, ConfigError::KdlParse(_)));
    }

    #[test]
    fn test_parse_config_file_resolves_relative_to_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ship.kdl");
        std::fs::write(&path, SAMPLE_CONFIG).unwrap();

        let registry = parse_config_file(&path).unwrap();
        assert_eq!(
            registry.list_targets()[1].context,
            temp_dir.path().join("frontend")
        );
    }
}
