use super::load_config;
use crate::EventArgs;
use colored::Colorize;
use std::path::Path;

/// ターゲットごとのタグとラベルを表示（Docker・ネットワークは使わない）
pub fn handle(config: Option<&Path>, event_args: &EventArgs) -> anyhow::Result<()> {
    let (_, registry) = load_config(config);
    let event = event_args.to_event();

    match &event.version {
        Some(version) => println!("バージョン: {}", version.cyan()),
        None => println!("バージョン: {}", "(未設定)".dimmed()),
    }
    println!();

    let mut failed = 0;
    for target in registry.list_targets() {
        println!("{} {}", "▶".blue(), target.name.cyan().bold());
        match shipflow_core::resolve_tags(&target.image, &event, &registry.tag_policy) {
            Ok(tag_set) => {
                for reference in tag_set.references(&target.image) {
                    println!("  {}", reference.green());
                }
                for (key, value) in tag_set.labels() {
                    println!("  {} {}={}", "label".dimmed(), key, value);
                }
            }
            Err(e) => {
                failed += 1;
                println!("  {} {}", "✗".red(), e);
            }
        }
        println!();
    }

    if failed > 0 {
        eprintln!(
            "{}",
            format!("✗ {}個のターゲットでタグを決定できません", failed)
                .red()
                .bold()
        );
        eprintln!("  --version か SHIP_VERSION でバージョンを指定してください");
        std::process::exit(1);
    }

    Ok(())
}
