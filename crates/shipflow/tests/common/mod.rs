use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_ship_kdl(&self, content: &str) {
        fs::write(self.root.path().join("ship.kdl"), content).unwrap();
    }

    /// context ディレクトリと Dockerfile を作る
    pub fn write_context(&self, name: &str) {
        let dir = self.root.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Dockerfile"), "FROM alpine\n").unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    #[allow(dead_code)]
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }
}

pub const TWO_TARGETS: &str = r#"
project "lmnr"

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
