use serde::{Deserialize, Serialize};
use std::fmt;

/// Docker Hub のデフォルトレジストリ
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// タグ・ダイジェストを含まないイメージリポジトリ参照
///
/// 例: `ghcr.io/org/app-server`, `localhost:5000/app`, `myuser/app`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    reference: String,
    /// 先頭コンポーネントがレジストリホストかどうか
    has_host: bool,
}

impl ImageRef {
    /// リポジトリ参照をパース
    ///
    /// タグ（`:tag`）やダイジェスト（`@sha256:...`）を含む参照はエラー。
    pub fn parse(reference: &str) -> Result<Self, String> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err("イメージ名が空です".to_string());
        }
        if reference.contains('@') {
            return Err(format!(
                "ダイジェスト付きの参照は指定できません: {}",
                reference
            ));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(format!("イメージ名に空白は使えません: {}", reference));
        }

        let parts: Vec<&str> = reference.split('/').collect();
        let has_host = parts.len() >= 2 && is_registry_host(parts[0]);
        let path = if has_host { &parts[1..] } else { &parts[..] };

        for component in path {
            if component.contains(':') {
                return Err(format!(
                    "タグ付きの参照は指定できません（タグはリリースから解決されます）: {}",
                    reference
                ));
            }
            if !is_valid_path_component(component) {
                return Err(format!(
                    "不正なリポジトリ名 '{}'（英小文字・数字・'.', '_', '-' のみ）",
                    component
                ));
            }
        }

        Ok(Self {
            reference: reference.to_string(),
            has_host,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.reference
    }

    /// イメージ名からレジストリを抽出
    ///
    /// - `ghcr.io/org/app` -> `ghcr.io`
    /// - `myuser/app` -> `docker.io`
    /// - `localhost:5000/app` -> `localhost:5000`
    pub fn registry(&self) -> &str {
        if self.has_host {
            self.reference
                .split('/')
                .next()
                .unwrap_or(DEFAULT_REGISTRY)
        } else {
            DEFAULT_REGISTRY
        }
    }

    /// レジストリ API 上のリポジトリパス
    ///
    /// Docker Hub の公式イメージは `library/` を補う。
    pub fn repository(&self) -> String {
        let path = if self.has_host {
            self.reference
                .split_once('/')
                .map(|(_, rest)| rest)
                .unwrap_or(&self.reference)
        } else {
            &self.reference
        };

        if self.registry() == DEFAULT_REGISTRY && !path.contains('/') {
            format!("library/{}", path)
        } else {
            path.to_string()
        }
    }

    /// 最後のパスコンポーネント（`ghcr.io/org/app` -> `app`）
    pub fn name(&self) -> &str {
        self.reference
            .rsplit('/')
            .next()
            .unwrap_or(&self.reference)
    }

    /// `image:tag` 形式の参照
    pub fn with_tag(&self, tag: &str) -> String {
        format!("{}:{}", self.reference, tag)
    }

    /// `image@digest` 形式の参照
    pub fn with_digest(&self, digest: &Digest) -> String {
        format!("{}@{}", self.reference, digest)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.reference
    }
}

/// レジストリホストの判定: `.` か `:` を含む、または localhost
fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn is_valid_path_component(component: &str) -> bool {
    !component.is_empty()
        && component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        && component
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
}

/// イメージマニフェストのコンテンツダイジェスト
///
/// `sha256:<64 hex>` または `sha512:<128 hex>`。イメージ名やタグからは導出できない。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    pub fn parse(value: &str) -> Result<Self, String> {
        let (algorithm, hex) = value
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("ダイジェストの形式が不正です: {}", value))?;

        let expected_len = match algorithm {
            "sha256" => 64,
            "sha512" => 128,
            _ => {
                return Err(format!(
                    "未対応のダイジェストアルゴリズムです: {}",
                    algorithm
                ));
            }
        };

        if hex.len() != expected_len
            || !hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(format!("ダイジェストの形式が不正です: {}", value));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl TryFrom<String> for Digest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.to_string()
    }
}
