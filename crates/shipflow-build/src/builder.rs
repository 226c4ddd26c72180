use crate::error::engine_message;
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use http_body_util::{Either, Full};
use shipflow_core::BuildError;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::context::INJECTED_DOCKERFILE;

/// 失敗時に残すビルドログの行数
pub const LOG_EXCERPT_LINES: usize = 20;

/// ビルドログの末尾を保持するリングバッファ
#[derive(Debug, Default)]
pub struct BuildLog {
    lines: VecDeque<String>,
    partial: String,
}

impl BuildLog {
    /// ストリームの断片を追加（行をまたぐ断片にも対応）
    pub fn push(&mut self, chunk: &str) {
        self.partial.push_str(chunk);
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.push_line(line.trim_end());
        }
    }

    fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if self.lines.len() == LOG_EXCERPT_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// 保持している末尾の行
    pub fn excerpt(mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.partial);
        self.push_line(rest.trim_end());
        self.lines.into()
    }
}

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをビルドしてイメージ ID を返す
    ///
    /// ビルドストリーム中のエラーは、ログ末尾を添えた `BuildError::Failed` になる。
    pub async fn build_image(
        &self,
        target: &str,
        context_data: Vec<u8>,
        reference: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, BuildError> {
        tracing::info!("Building image: {}", reference);

        let labels: HashMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile: INJECTED_DOCKERFILE,
            t: reference,
            labels,
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            pull: true,    // ベースイメージを常にpull
            ..Default::default()
        };

        let body = Full::new(Bytes::from(context_data));
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        let mut log = BuildLog::default();
        while let Some(msg) = stream.next().await {
            let output = match msg {
                Ok(output) => output,
                Err(e) => {
                    return Err(BuildError::Failed {
                        target: target.to_string(),
                        message: engine_message(&e),
                        log_excerpt: log.excerpt(),
                    });
                }
            };

            if let Some(chunk) = &output.stream {
                tracing::debug!(target_name = target, "{}", chunk.trim_end());
                log.push(chunk);
            }

            let error = output
                .error_detail
                .and_then(|detail| detail.message)
                .or(output.error);
            if let Some(message) = error {
                log.push(&format!("{}\n", message));
                return Err(BuildError::Failed {
                    target: target.to_string(),
                    message,
                    log_excerpt: log.excerpt(),
                });
            }

            if let Some(status) = output.status {
                tracing::debug!(target_name = target, "{}", status);
            }
        }

        let inspect = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| BuildError::Engine(engine_message(&e)))?;
        let image_id = inspect
            .id
            .ok_or_else(|| BuildError::Engine(format!("{} のイメージ ID を取得できません", reference)))?;

        tracing::info!("Successfully built: {} ({})", reference, image_id);
        Ok(image_id)
    }

    /// ビルド済みイメージに追加のタグを付与
    pub async fn tag_image(&self, source: &str, repository: &str, tag: &str) -> Result<(), BuildError> {
        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions {
            repo: repository,
            tag,
        };
        self.docker
            .tag_image(source, Some(options))
            .await
            .map_err(|e| BuildError::Engine(engine_message(&e)))
    }
}
