use super::load_config;
use colored::Colorize;
use shipflow_core::AttestationPolicy;
use std::path::Path;

pub fn handle(config: Option<&Path>) -> anyhow::Result<()> {
    println!("{}", "設定を検証中...".blue());

    let (path, registry) = load_config(config);
    println!("設定ファイル: {}", path.display().to_string().cyan());
    println!("{}", "✓ 設定ファイルは正常です！".green().bold());
    println!();

    println!("サマリー:");
    if let Some(project) = &registry.project {
        println!("  プロジェクト: {}", project.cyan());
    }
    println!("  同時実行数: {}", registry.concurrency);
    let attestation = match registry.attestation {
        AttestationPolicy::Required => "required",
        AttestationPolicy::Optional => "optional",
    };
    println!("  アテステーション: {}", attestation);
    println!(
        "  タグ: latest={} sha={}",
        registry.tag_policy.latest, registry.tag_policy.sha
    );

    let targets = registry.list_targets();
    println!("  ターゲット: {}個", targets.len());
    let mut missing = 0;
    for target in targets {
        println!("    - {} ({})", target.name.cyan(), target.image);

        // パスの存在はビルド時にも確認されるが、ここでは警告だけ出す
        for (label, path) in [("context", &target.context), ("dockerfile", &target.dockerfile)] {
            if !path.exists() {
                missing += 1;
                println!(
                    "      {} {} が存在しません: {}",
                    "⚠".yellow(),
                    label,
                    path.display()
                );
            }
        }
    }

    if missing > 0 {
        println!();
        println!(
            "{}",
            format!("⚠ {}個のパスが見つかりません（ビルド時に失敗します）", missing).yellow()
        );
    }

    Ok(())
}
