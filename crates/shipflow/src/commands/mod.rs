pub mod run;
pub mod tags;
pub mod validate;

use colored::Colorize;
use shipflow_core::TargetRegistry;
use std::path::{Path, PathBuf};

/// 設定ファイルを探して読み込む
///
/// 見つからない・不正な場合はエラーを表示して終了する。
pub fn load_config(explicit: Option<&Path>) -> (PathBuf, TargetRegistry) {
    let path = match shipflow_core::find_config_file(explicit) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{}", "✗ 設定ファイルが見つかりません".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    match shipflow_core::parse_config_file(&path) {
        Ok(registry) => (path, registry),
        Err(e) => {
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {}: {}", "ファイル".dimmed(), path.display());
            eprintln!();
            for line in e.user_message().lines() {
                eprintln!("  {}", line);
            }
            std::process::exit(1);
        }
    }
}
