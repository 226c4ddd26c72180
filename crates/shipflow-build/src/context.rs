use flate2::Compression;
use flate2::write::GzEncoder;
use shipflow_core::BuildError;
use std::path::Path;
use tar::Builder;

/// コンテキスト内に注入する Dockerfile のパス
///
/// コンテキスト自体に Dockerfile があっても衝突しない。
pub const INJECTED_DOCKERFILE: &str = ".shipflow/Dockerfile";

/// これを超えるコンテキストは警告する
const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    pub fn create_context(context_path: &Path, dockerfile_path: &Path) -> Result<Vec<u8>, BuildError> {
        if !context_path.is_dir() {
            return Err(BuildError::ContextNotFound(context_path.to_path_buf()));
        }
        if !dockerfile_path.is_file() {
            return Err(BuildError::DockerfileNotFound(dockerfile_path.to_path_buf()));
        }

        tracing::debug!("Creating build context from: {}", context_path.display());

        let dockerfile_content = std::fs::read(dockerfile_path)?;

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            tar.append_dir_all(".", context_path)?;

            let mut header = tar::Header::new_gnu();
            header.set_size(dockerfile_content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, INJECTED_DOCKERFILE, &dockerfile_content[..])?;

            tar.into_inner()?.finish()?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());
        Self::check_context_size(archive_data.len());

        Ok(archive_data)
    }

    fn check_context_size(size: usize) {
        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "ビルドコンテキストが大きすぎます（{}MB）。.dockerignore で不要なファイルを除外してください",
                size / 1024 / 1024
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn unpack(archive: Vec<u8>) -> tempfile::TempDir {
        let extract_dir = tempdir().unwrap();
        let decoder = flate2::read::GzDecoder::new(std::io::Cursor::new(archive));
        tar::Archive::new(decoder).unpack(extract_dir.path()).unwrap();
        extract_dir
    }

    #[test]
    fn test_create_context_injects_dockerfile() {
        let repo = tempdir().unwrap();
        let context = repo.path().join("app-server");
        fs::create_dir_all(context.join("src")).unwrap();
        fs::write(context.join("Cargo.toml"), "[package]").unwrap();
        fs::write(context.join("src/main.rs"), "fn main() {}").unwrap();
        // コンテキスト内の Dockerfile とは別物を使う
        fs::write(context.join("Dockerfile"), "FROM scratch").unwrap();

        let dockerfile = repo.path().join("app-server.Dockerfile");
        fs::write(&dockerfile, "FROM rust:1\nRUN cargo build --release").unwrap();

        let archive = ContextBuilder::create_context(&context, &dockerfile).unwrap();
        let extracted = unpack(archive);

        assert!(extracted.path().join("src/main.rs").exists());
        assert_eq!(
            fs::read_to_string(extracted.path().join("Dockerfile")).unwrap(),
            "FROM scratch"
        );
        assert_eq!(
            fs::read_to_string(extracted.path().join(INJECTED_DOCKERFILE)).unwrap(),
            "FROM rust:1\nRUN cargo build --release"
        );
    }

    #[test]
    fn test_create_context_missing_paths() {
        let temp_dir = tempdir().unwrap();
        let dockerfile = temp_dir.path().join("Dockerfile");
        fs::write(&dockerfile, "FROM alpine").unwrap();

        assert!(matches!(
            ContextBuilder::create_context(&temp_dir.path().join("nope"), &dockerfile),
            Err(BuildError::ContextNotFound(_))
        ));
        assert!(matches!(
            ContextBuilder::create_context(temp_dir.path(), &temp_dir.path().join("nope")),
            Err(BuildError::DockerfileNotFound(_))
        ));
    }
}
