//! タグ・ラベルの解決
//!
//! RunEvent からターゲットのタグとラベルを導出する純粋関数。
//! 同じ入力からは常に同じ TagSet が得られるので、再実行しても同じタグに公開される。

use crate::error::MetadataError;
use crate::model::{ImageRef, MAX_TAG_LENGTH, RunEvent, TagPolicy, TagSet, is_tag_char};
use std::collections::BTreeMap;

pub const LABEL_TITLE: &str = "org.opencontainers.image.title";
pub const LABEL_VERSION: &str = "org.opencontainers.image.version";
pub const LABEL_CREATED: &str = "org.opencontainers.image.created";
pub const LABEL_SOURCE: &str = "org.opencontainers.image.source";
pub const LABEL_REVISION: &str = "org.opencontainers.image.revision";
pub const LABEL_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// `sha-` タグに使うリビジョンの長さ
const SHORT_SHA_LENGTH: usize = 7;

/// セマンティックバージョン
#[derive(Debug, PartialEq, Eq)]
struct SemVer<'a> {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Option<&'a str>,
    build: Option<&'a str>,
}

impl<'a> SemVer<'a> {
    /// `MAJOR.MINOR.PATCH[-PRE][+BUILD]` をパース（先頭の v/V は許容）
    fn parse(version: &'a str) -> Option<Self> {
        let version = version
            .strip_prefix('v')
            .or_else(|| version.strip_prefix('V'))
            .unwrap_or(version);

        let (rest, build) = match version.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (version, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        if pre.is_some_and(|p| !is_identifier_list(p)) || build.is_some_and(|b| !is_identifier_list(b))
        {
            return None;
        }

        let mut numbers = core.split('.');
        let major = parse_number(numbers.next()?)?;
        let minor = parse_number(numbers.next()?)?;
        let patch = parse_number(numbers.next()?)?;
        if numbers.next().is_some() {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
            pre,
            build,
        })
    }

    /// `+` はタグに使えないので `-` に置き換える
    fn full_tag(&self) -> String {
        let mut tag = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if let Some(pre) = self.pre {
            tag.push('-');
            tag.push_str(pre);
        }
        if let Some(build) = self.build {
            tag.push('-');
            tag.push_str(build);
        }
        tag
    }
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) || (s.len() > 1 && s.starts_with('0'))
    {
        return None;
    }
    s.parse().ok()
}

fn is_identifier_list(s: &str) -> bool {
    !s.is_empty()
        && s.split('.')
            .all(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}

/// 任意の識別子をタグとして使える形に整える
fn sanitize_tag(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if is_tag_char(c) { c } else { '-' })
        .collect();
    let trimmed = replaced.trim_start_matches(['.', '-']);
    trimmed.chars().take(MAX_TAG_LENGTH).collect()
}

/// ターゲットのタグとラベルを解決
///
/// タグ導出ルール:
/// - semver: `{version}`、プレリリースでなければ `{major}.{minor}` と `{major}`（0系を除く）、
///   ポリシーが有効なら `latest`
/// - それ以外: 識別子をタグ文字に整形した1タグ
/// - ポリシーが有効でリビジョンがあれば `sha-{短縮SHA}`
pub fn resolve_tags(
    image: &ImageRef,
    event: &RunEvent,
    policy: &TagPolicy,
) -> Result<TagSet, MetadataError> {
    let version = event
        .version
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(MetadataError::MissingVersion)?;

    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: String| {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    match SemVer::parse(version) {
        Some(semver) => {
            push(semver.full_tag());
            if semver.pre.is_none() {
                push(format!("{}.{}", semver.major, semver.minor));
                if semver.major > 0 {
                    push(semver.major.to_string());
                }
                if policy.latest {
                    push("latest".to_string());
                }
            }
        }
        None => {
            let tag = sanitize_tag(version);
            if tag.is_empty() {
                return Err(MetadataError::MissingVersion);
            }
            push(tag);
        }
    }

    if policy.sha
        && let Some(revision) = event.revision.as_deref().map(str::trim)
        && !revision.is_empty()
    {
        let short: String = revision.chars().take(SHORT_SHA_LENGTH).collect();
        push(format!("sha-{}", short));
    }

    let mut labels = BTreeMap::new();
    labels.insert(LABEL_TITLE.to_string(), image.name().to_string());
    labels.insert(LABEL_VERSION.to_string(), version.to_string());
    labels.insert(LABEL_CREATED.to_string(), event.created.to_rfc3339());
    if let Some(source) = &event.source {
        labels.insert(LABEL_SOURCE.to_string(), source.clone());
    }
    if let Some(revision) = &event.revision {
        labels.insert(LABEL_REVISION.to_string(), revision.clone());
    }
    if let Some(ref_name) = &event.ref_name {
        labels.insert(LABEL_REF_NAME.to_string(), ref_name.clone());
    }

    TagSet::new(tags, labels)
}
