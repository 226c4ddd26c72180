//! Docker エンジンを使った Publisher 実装

use crate::builder::ImageBuilder;
use crate::context::ContextBuilder;
use crate::error::engine_message;
use crate::pusher::{ImagePusher, agree_on_digest};
use async_trait::async_trait;
use bollard::Docker;
use shipflow_core::{
    BuildError, BuildTarget, BuiltImage, Publisher, PublishResult, PushError, Session, TagSet,
};

/// Docker エンジンでビルド・プッシュする Publisher
pub struct DockerPublisher {
    builder: ImageBuilder,
    pusher: ImagePusher,
}

impl DockerPublisher {
    pub fn new(docker: Docker) -> Self {
        Self {
            builder: ImageBuilder::new(docker.clone()),
            pusher: ImagePusher::new(docker),
        }
    }

    /// ローカルの Docker エンジンに接続して疎通を確認
    pub async fn connect() -> Result<Self, BuildError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BuildError::Engine(engine_message(&e)))?;
        docker
            .ping()
            .await
            .map_err(|e| BuildError::Engine(engine_message(&e)))?;
        Ok(Self::new(docker))
    }
}

#[async_trait]
impl Publisher for DockerPublisher {
    async fn build(&self, target: &BuildTarget, tags: &TagSet) -> Result<BuiltImage, BuildError> {
        let context_path = target.context.clone();
        let dockerfile_path = target.dockerfile.clone();
        let context_data = tokio::task::spawn_blocking(move || {
            ContextBuilder::create_context(&context_path, &dockerfile_path)
        })
        .await
        .map_err(|e| BuildError::Engine(format!("コンテキスト作成タスクが失敗しました: {}", e)))??;

        let repository = target.image.as_str();
        let reference = target.image.with_tag(tags.primary());
        let image_id = self
            .builder
            .build_image(&target.name, context_data, &reference, tags.labels())
            .await?;

        for tag in tags.tags().iter().skip(1) {
            self.builder.tag_image(&image_id, repository, tag).await?;
        }

        Ok(BuiltImage::new(
            target.name.clone(),
            target.image.clone(),
            image_id,
            reference,
        ))
    }

    async fn push(
        &self,
        built: BuiltImage,
        tags: &TagSet,
        session: &Session,
    ) -> Result<PublishResult, PushError> {
        let repository = built.image().as_str();

        let mut digests = Vec::with_capacity(tags.tags().len());
        for tag in tags.tags() {
            if let Some(digest) = self.pusher.push(repository, tag, session).await? {
                digests.push(digest);
            }
        }

        let digest = match agree_on_digest(&digests)? {
            Some(digest) => digest,
            None => {
                tracing::debug!(
                    "No digest in push stream for {}, falling back to RepoDigests",
                    built.reference()
                );
                self.pusher
                    .repo_digest(built.image_id(), repository)
                    .await?
                    .ok_or_else(|| PushError::DigestUnavailable {
                        reference: built.reference().to_string(),
                    })?
            }
        };

        let published = PublishResult::new(&built, tags, digest);
        tracing::info!("Pushed {}", published.pinned_reference());
        Ok(published)
    }
}
