use super::load_config;
use crate::RunArgs;
use crate::progress::ConsoleProgress;
use anyhow::Context;
use colored::Colorize;
use shipflow_attest::{Cosign, CosignAttestor};
use shipflow_build::{DockerAuthenticator, DockerPublisher, RegistryAuth};
use shipflow_core::{
    AttestationPolicy, BuildTarget, CancelHandle, RunCoordinator, RunError, RunOutcome, TargetError,
    TargetStatus, cancel_pair,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn handle(config: Option<&Path>, args: RunArgs) -> anyhow::Result<()> {
    let (path, registry) = load_config(config);

    let targets = match registry.select(&args.targets) {
        Ok(targets) => targets,
        Err(e) => {
            eprintln!("{}", "✗ ターゲットの指定が不正です".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    let credentials = args.credentials()?;
    let event = args.event.to_event();
    let policy = if args.allow_unattested {
        AttestationPolicy::Optional
    } else {
        registry.attestation
    };
    let concurrency = args.jobs.unwrap_or(registry.concurrency);

    println!("{}", "リリースを開始します".green().bold());
    println!("設定ファイル: {}", path.display().to_string().cyan());
    match &event.version {
        Some(version) => println!("バージョン: {}", version.cyan()),
        None => println!("バージョン: {}", "(未設定)".yellow()),
    }
    println!("ターゲット: {}個（同時実行数 {}）", targets.len(), concurrency);
    println!();

    let publisher = match DockerPublisher::connect().await {
        Ok(publisher) => publisher,
        Err(e) => {
            eprintln!("{}", "✗ Docker に接続できません".red().bold());
            eprintln!("  {}", e.user_message());
            std::process::exit(1);
        }
    };
    let authenticator = DockerAuthenticator::new(RegistryAuth::new());
    let attestor = CosignAttestor::new(Cosign::new().with_key(args.signing_key.clone()));

    let (cancel, token) = cancel_pair();
    watch_interrupt(cancel.clone());
    if let Some(secs) = args.timeout {
        watch_timeout(cancel.clone(), Duration::from_secs(secs));
    }

    let mut coordinator = RunCoordinator::new(
        Arc::new(authenticator),
        Arc::new(publisher),
        Arc::new(attestor),
    )
    .with_concurrency(concurrency)
    .with_attestation_policy(policy)
    .with_tag_policy(registry.tag_policy)
    .with_cancel_token(token)
    .with_observer(Arc::new(ConsoleProgress::new(&targets)));

    if let Some(credentials) = credentials {
        let host = credential_host(args.registry.as_deref(), &targets);
        match host {
            Some(host) => {
                if !targets.iter().any(|t| t.image.registry() == host) {
                    eprintln!(
                        "{}",
                        format!("⚠ レジストリ {} を使うターゲットがありません", host).yellow()
                    );
                }
                coordinator = coordinator.with_credentials(host, credentials);
            }
            None => tracing::warn!("No registry to scope credentials to"),
        }
    }

    let outcome = match coordinator.run(&targets, &event).await {
        Ok(outcome) => outcome,
        Err(RunError::Auth(e)) => {
            eprintln!();
            eprintln!("{}", "✗ レジストリ認証に失敗しました".red().bold());
            eprintln!("  {}", e);
            eprintln!();
            eprintln!("docker login を実行するか、--registry-username / --registry-password を指定してください");
            std::process::exit(1);
        }
        Err(RunError::Config(e)) => {
            eprintln!();
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {}", e.user_message());
            std::process::exit(1);
        }
    };

    print_summary(&outcome);

    if let Some(report_path) = &args.report {
        let json = serde_json::to_string_pretty(&outcome.report())?;
        std::fs::write(report_path, json)
            .with_context(|| format!("レポートを書き込めません: {}", report_path.display()))?;
        println!("レポート: {}", report_path.display().to_string().cyan());
    }

    if !outcome.is_success() {
        eprintln!();
        eprintln!(
            "{}",
            format!("✗ {}個のターゲットが失敗しました", outcome.failures().count())
                .red()
                .bold()
        );
        std::process::exit(1);
    }

    println!();
    println!("{}", "✓ すべてのターゲットを公開しました！".green().bold());
    Ok(())
}

/// 認証情報を渡すホスト（フラグ優先、なければ最初のターゲット）
fn credential_host(flag: Option<&str>, targets: &[BuildTarget]) -> Option<String> {
    flag.map(str::to_string)
        .or_else(|| targets.first().map(|t| t.image.registry().to_string()))
}

/// Ctrl-C でキャンセル
fn watch_interrupt(cancel: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("{}", "中断しています（プッシュ済みのイメージは署名します）...".yellow());
            cancel.cancel();
        }
    });
}

/// タイムアウトでキャンセル
fn watch_timeout(cancel: CancelHandle, timeout: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        tracing::warn!("Run timed out after {}s", timeout.as_secs());
        eprintln!(
            "{}",
            format!("⚠ タイムアウト（{}秒）のため中断します", timeout.as_secs()).yellow()
        );
        cancel.cancel();
    });
}

fn print_summary(outcome: &RunOutcome) {
    println!();
    println!("{}", "サマリー:".bold());

    for target in &outcome.outcomes {
        match &target.status {
            TargetStatus::Succeeded { published, .. } => {
                println!("  {} {}", "✓".green(), target.target.cyan());
                println!("    {}", published.pinned_reference());
                println!("    タグ: {}", published.tags().join(", "));
            }
            TargetStatus::Unattested { published, error } => {
                let mark = if target.is_failure(outcome.policy) {
                    "✗".red()
                } else {
                    "⚠".yellow()
                };
                println!("  {} {} {}", mark, target.target.cyan(), "(未署名)".yellow());
                println!("    {}", published.pinned_reference());
                println!("    アテステーション: {}", error);
            }
            TargetStatus::Failed { error } => {
                println!("  {} {}", "✗".red(), target.target.cyan());
                println!("    ステージ: {}", error.stage());
                match error {
                    TargetError::Build(e) => {
                        println!("    原因: {}", e.user_message());
                        if !e.log_excerpt().is_empty() {
                            println!("    ビルドログ（末尾）:");
                            for line in e.log_excerpt() {
                                println!("      {}", line.dimmed());
                            }
                        }
                    }
                    other => println!("    原因: {}", other),
                }
            }
        }
    }
}
