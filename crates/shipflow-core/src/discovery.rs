//! 設定ファイルの発見

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};

/// 検索するファイル名（優先順）
const CANDIDATES: [&str; 4] = ["ship.local.kdl", ".ship.local.kdl", "ship.kdl", ".ship.kdl"];

/// ship.kdl を探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 明示的な指定（--config / SHIP_CONFIG_PATH）
/// 2. カレントディレクトリ: ship.local.kdl, .ship.local.kdl, ship.kdl, .ship.kdl
/// 3. ./.shipflow/ ディレクトリ内: 同様の順序
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::NotFoundAt(path.to_path_buf()));
    }

    let current_dir = std::env::current_dir()?;
    find_config_in(&current_dir).ok_or(ConfigError::NotFound)
}

/// 指定ディレクトリから設定ファイルを探す
pub fn find_config_in(dir: &Path) -> Option<PathBuf> {
    let search = |dir: &Path| {
        CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    };

    if let Some(path) = search(dir) {
        return Some(path);
    }

    let ship_dir = dir.join(".shipflow");
    if ship_dir.is_dir() {
        return search(&ship_dir);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_config_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("ship.kdl"), "// test").unwrap();

        let found = find_config_in(temp_dir.path()).unwrap();
        assert!(found.ends_with("ship.kdl"));
    }

    #[test]
    fn test_local_file_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("ship.kdl"), "// shared").unwrap();
        fs::write(temp_dir.path().join("ship.local.kdl"), "// local").unwrap();

        let found = find_config_in(temp_dir.path()).unwrap();
        assert!(found.ends_with("ship.local.kdl"));
    }

    #[test]
    fn test_hidden_local_before_visible_shared() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(".ship.local.kdl"), "// hidden local").unwrap();
        fs::write(temp_dir.path().join("ship.kdl"), "// visible").unwrap();

        let found = find_config_in(temp_dir.path()).unwrap();
        assert!(found.ends_with(".ship.local.kdl"));
    }

    #[test]
    fn test_find_config_in_shipflow_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ship_dir = temp_dir.path().join(".shipflow");
        fs::create_dir(&ship_dir).unwrap();
        fs::write(ship_dir.join("ship.kdl"), "// nested").unwrap();

        let found = find_config_in(temp_dir.path()).unwrap();
        assert!(found.ends_with(".shipflow/ship.kdl"));
    }

    #[test]
    fn test_find_config_in_empty_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(find_config_in(temp_dir.path()).is_none());
    }

    #[test]
    fn test_explicit_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.kdl");
        fs::write(&path, "// custom").unwrap();

        assert_eq!(find_config_file(Some(&path)).unwrap(), path);

        let missing = temp_dir.path().join("missing.kdl");
        assert!(matches!(
            find_config_file(Some(&missing)),
            Err(ConfigError::NotFoundAt(_))
        ));
    }
}
