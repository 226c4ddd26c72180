//! cosign CLI wrapper
//!
//! `cosign attest` でステートメントに署名し、レジストリのアテステーションストアに添付する。
//! レジストリの認証情報は一時的な `DOCKER_CONFIG` 経由で渡し、引数には載せない。

use shipflow_build::write_docker_config;
use shipflow_core::{AttestError, Session};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// cosign の述語タイプ指定（SLSA Provenance v1）
pub const PREDICATE_TYPE_ARG: &str = "slsaprovenance1";

/// cosign CLI wrapper
#[derive(Debug, Clone)]
pub struct Cosign {
    binary: String,
    key: Option<String>,
}

impl Default for Cosign {
    fn default() -> Self {
        Self::new()
    }
}

impl Cosign {
    pub fn new() -> Self {
        Self {
            binary: "cosign".to_string(),
            key: None,
        }
    }

    /// cosign 実行ファイルを指定
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// 署名鍵（`cosign.key` や KMS URI）。未指定ならキーレス署名
    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    /// `cosign attest` の引数を組み立てる
    pub fn attest_args(&self, pinned_reference: &str, predicate: &Path) -> Vec<String> {
        let mut args = vec![
            "attest".to_string(),
            "--yes".to_string(),
            "--type".to_string(),
            PREDICATE_TYPE_ARG.to_string(),
            "--predicate".to_string(),
            predicate.display().to_string(),
        ];
        if let Some(key) = &self.key {
            args.push("--key".to_string());
            args.push(key.clone());
        }
        args.push(pinned_reference.to_string());
        args
    }

    /// 署名してアップロード
    pub async fn attest(
        &self,
        pinned_reference: &str,
        predicate: &Path,
        session: &Session,
    ) -> Result<(), AttestError> {
        let args = self.attest_args(pinned_reference, predicate);

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // cosign の実行が終わるまで保持する
        let docker_config = match session.credentials() {
            Some(creds) => {
                let dir = tempfile::Builder::new()
                    .prefix("shipflow-cosign-")
                    .tempdir()?;
                write_docker_config(dir.path(), session.registry(), creds)?;
                cmd.env("DOCKER_CONFIG", dir.path());
                Some(dir)
            }
            None => None,
        };

        tracing::debug!(
            "Running: {} attest --type {} {}",
            self.binary,
            PREDICATE_TYPE_ARG,
            pinned_reference
        );

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AttestError::SignerUnavailable(format!(
                    "{} が見つかりません。cosign をインストールしてください",
                    self.binary
                ))
            } else {
                AttestError::Io(e)
            }
        })?;
        drop(docker_config);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AttestError::Signing(stderr.trim().to_string()));
        }

        Ok(())
    }
}
