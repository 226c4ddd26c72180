use crate::cosign::Cosign;
use crate::statement::{SLSA_PROVENANCE_V1, build_statement, default_builder_id, github_invocation_id};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest as _, Sha256};
use shipflow_build::RegistryClient;
use shipflow_core::{
    AttestError, AttestationRecord, Attestor, BuildProvenance, PublishResult, Session,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// cosign で SLSA Provenance を署名・添付する Attestor
pub struct CosignAttestor {
    cosign: Cosign,
    builder_id: String,
    base_urls: HashMap<String, String>,
}

impl CosignAttestor {
    pub fn new(cosign: Cosign) -> Self {
        Self {
            cosign,
            builder_id: default_builder_id(),
            base_urls: HashMap::new(),
        }
    }

    pub fn with_builder_id(mut self, builder_id: impl Into<String>) -> Self {
        self.builder_id = builder_id.into();
        self
    }

    /// 特定レジストリの API ベース URL を上書き
    pub fn with_base_url(mut self, registry: &str, base_url: impl Into<String>) -> Self {
        self.base_urls.insert(registry.to_string(), base_url.into());
        self
    }

    fn client(&self, registry: &str) -> RegistryClient {
        match self.base_urls.get(registry) {
            Some(base_url) => RegistryClient::with_base_url(registry, base_url.as_str()),
            None => RegistryClient::new(registry),
        }
    }

    /// ダイジェストがまだレジストリ上で解決できるか確認
    async fn ensure_fresh(&self, published: &PublishResult, session: &Session) -> Result<(), AttestError> {
        let image = published.image();
        let digest = published.digest().to_string();

        let exists = self
            .client(image.registry())
            .manifest_exists(&image.repository(), &digest, session.credentials())
            .await
            .map_err(|e| AttestError::Registry(e.to_string()))?;

        if !exists {
            return Err(AttestError::StaleDigest {
                image: image.to_string(),
                digest,
            });
        }
        Ok(())
    }
}

/// Dockerfile の sha256（読めなければ None）
async fn dockerfile_sha256(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(content) => Some(hex::encode(Sha256::digest(&content))),
        Err(e) => {
            tracing::warn!("Failed to read {} for provenance: {}", path.display(), e);
            None
        }
    }
}

#[async_trait]
impl Attestor for CosignAttestor {
    fn predicate_type(&self) -> &str {
        SLSA_PROVENANCE_V1
    }

    async fn attest(
        &self,
        published: &PublishResult,
        provenance: &BuildProvenance,
        session: &Session,
    ) -> Result<AttestationRecord, AttestError> {
        self.ensure_fresh(published, session).await?;

        let statement = build_statement(
            published,
            provenance,
            dockerfile_sha256(&provenance.target.dockerfile).await,
            &self.builder_id,
            github_invocation_id(),
        );

        // cosign --type slsaprovenance1 は述語部分のみを受け取る
        let mut predicate_file = tempfile::Builder::new()
            .prefix("shipflow-provenance-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer_pretty(&mut predicate_file, &statement.predicate)?;
        predicate_file.flush()?;

        let pinned = published.pinned_reference();
        self.cosign
            .attest(&pinned, predicate_file.path(), session)
            .await?;
        tracing::info!("Attested {}", pinned);

        Ok(AttestationRecord {
            subject_name: published.image().to_string(),
            subject_digest: published.digest().clone(),
            predicate_type: statement.predicate_type.clone(),
            statement: serde_json::to_value(&statement)?,
            signed_at: Utc::now(),
        })
    }
}
