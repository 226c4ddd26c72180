mod commands;
mod progress;

use clap::{Args, Parser, Subcommand};
use shipflow_core::{Credentials, RunEvent};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ship")]
#[command(about = "リリースは、1つの ship.kdl から。", long_about = None)]
struct Cli {
    /// 設定ファイルのパス（未指定ならカレントディレクトリから探索）
    #[arg(short, long, global = true, env = "SHIP_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 全ターゲットをビルド・プッシュ・アテステーションする
    Run(RunArgs),
    /// 公開されるタグとラベルを表示する（ビルドはしない）
    Tags {
        #[command(flatten)]
        event: EventArgs,
    },
    /// 設定ファイルを検証する
    Validate,
    /// バージョン情報を表示
    Version,
}

/// リリースイベントの指定
#[derive(Args, Debug, Clone, Default)]
pub struct EventArgs {
    /// リリースバージョン（未指定なら GitHub Actions のイベントから取得）
    #[arg(long, env = "SHIP_VERSION")]
    pub version: Option<String>,

    /// ソースのリビジョン（コミット SHA）
    #[arg(long)]
    pub revision: Option<String>,

    /// ソースリポジトリの URL
    #[arg(long)]
    pub source: Option<String>,
}

impl EventArgs {
    /// GitHub Actions の環境変数にフラグの値を上書きしてイベントを作る
    pub fn to_event(&self) -> RunEvent {
        let mut event = RunEvent::from_github_env(chrono::Utc::now());
        if let Some(version) = &self.version {
            event.version = Some(version.clone());
        }
        if let Some(revision) = &self.revision {
            event.revision = Some(revision.clone());
        }
        if let Some(source) = &self.source {
            event.source = Some(source.clone());
        }
        event
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub event: EventArgs,

    /// 同時に処理するターゲット数（未指定なら ship.kdl の concurrency）
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// ラン全体のタイムアウト（秒）
    #[arg(long)]
    pub timeout: Option<u64>,

    /// 対象ターゲット（複数指定可。未指定なら全ターゲット）
    #[arg(short, long = "target", value_name = "NAME")]
    pub targets: Vec<String>,

    /// アテステーション失敗を警告として扱う
    #[arg(long)]
    pub allow_unattested: bool,

    /// JSON レポートの出力先
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// 認証情報を使うレジストリホスト（未指定なら最初のターゲットのホスト）
    #[arg(long, value_name = "HOST", env = "SHIP_REGISTRY")]
    pub registry: Option<String>,

    /// レジストリのユーザー名
    #[arg(long, env = "SHIP_REGISTRY_USERNAME")]
    pub registry_username: Option<String>,

    /// レジストリのパスワード / トークン
    #[arg(long, env = "SHIP_REGISTRY_PASSWORD", hide_env_values = true)]
    pub registry_password: Option<String>,

    /// cosign の署名鍵（未指定ならキーレス署名）
    #[arg(long, env = "SHIP_SIGNING_KEY")]
    pub signing_key: Option<String>,
}

impl RunArgs {
    /// フラグで渡された認証情報（ユーザー名とパスワードは揃っている必要がある）
    pub fn credentials(&self) -> anyhow::Result<Option<Credentials>> {
        match (&self.registry_username, &self.registry_password) {
            (Some(username), Some(password)) => {
                Ok(Some(Credentials::new(username.clone(), password.clone())))
            }
            (None, None) => Ok(None),
            _ => anyhow::bail!(
                "--registry-username と --registry-password は両方指定してください"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 進捗は stdout、ログは stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("shipflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Validate => {
            commands::validate::handle(cli.config.as_deref())?;
        }
        Commands::Tags { event } => {
            commands::tags::handle(cli.config.as_deref(), &event)?;
        }
        Commands::Run(args) => {
            commands::run::handle(cli.config.as_deref(), args).await?;
        }
    }

    Ok(())
}
