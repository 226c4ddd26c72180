//! ランコーディネーター
//!
//! レジストリごとに1回だけ認証し、ターゲットごとに tokio タスクを起動して
//! `メタデータ → ビルド → プッシュ → アテステーション` を実行する。
//! 1つのターゲットの失敗が他のターゲットを止めることはない。

use crate::cancel::CancelToken;
use crate::error::{AttestError, AuthError, RunError, TargetError};
use crate::metadata::resolve_tags;
use crate::model::{
    AttestationPolicy, BuildProvenance, BuildTarget, Credentials, DEFAULT_CONCURRENCY, RunEvent,
    RunOutcome, Session, Stage, TagPolicy, TargetOutcome, TargetState, TargetStatus,
};
use crate::stage::{Attestor, Authenticator, Publisher};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// 状態遷移の通知先（進捗表示用）
pub trait RunObserver: Send + Sync {
    fn on_state(&self, target: &str, state: &TargetState);
}

/// ランコーディネーター
pub struct RunCoordinator {
    authenticator: Arc<dyn Authenticator>,
    publisher: Arc<dyn Publisher>,
    attestor: Arc<dyn Attestor>,
    concurrency: usize,
    attestation_policy: AttestationPolicy,
    tag_policy: TagPolicy,
    cancel: CancelToken,
    observer: Option<Arc<dyn RunObserver>>,
    credentials: HashMap<String, Credentials>,
}

/// ワーカー間で共有する読み取り専用の依存
struct WorkerContext {
    publisher: Arc<dyn Publisher>,
    attestor: Arc<dyn Attestor>,
    tag_policy: TagPolicy,
    cancel: CancelToken,
    semaphore: Arc<Semaphore>,
    event: RunEvent,
}

/// ターゲット1つ分の状態チャネル
struct StateReporter {
    target: String,
    tx: watch::Sender<TargetState>,
    observer: Option<Arc<dyn RunObserver>>,
}

impl StateReporter {
    fn set(&self, state: TargetState) {
        self.tx.send_replace(state);
        if let Some(observer) = &self.observer {
            observer.on_state(&self.target, &state);
        }
    }
}

impl RunCoordinator {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        publisher: Arc<dyn Publisher>,
        attestor: Arc<dyn Attestor>,
    ) -> Self {
        Self {
            authenticator,
            publisher,
            attestor,
            concurrency: DEFAULT_CONCURRENCY,
            attestation_policy: AttestationPolicy::default(),
            tag_policy: TagPolicy::default(),
            cancel: CancelToken::never(),
            observer: None,
            credentials: HashMap::new(),
        }
    }

    /// 同時に実行するターゲット数（最低1）
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_attestation_policy(mut self, policy: AttestationPolicy) -> Self {
        self.attestation_policy = policy;
        self
    }

    pub fn with_tag_policy(mut self, policy: TagPolicy) -> Self {
        self.tag_policy = policy;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// 特定のレジストリホストにだけ使う認証情報
    ///
    /// 登録のないホストには認証情報を渡さず、Authenticator 側の既定に任せる。
    pub fn with_credentials(mut self, registry: impl Into<String>, credentials: Credentials) -> Self {
        self.credentials.insert(registry.into(), credentials);
        self
    }

    /// ランを実行
    ///
    /// 認証に失敗した場合はどのターゲットもビルドせずに `RunError::Auth` を返す。
    /// それ以外のターゲット単位の失敗は `RunOutcome` に記録される。
    pub async fn run(
        &self,
        targets: &[BuildTarget],
        event: &RunEvent,
    ) -> Result<RunOutcome, RunError> {
        let reporters: Vec<(StateReporter, watch::Receiver<TargetState>)> = targets
            .iter()
            .map(|target| {
                let (tx, rx) = watch::channel(TargetState::Pending);
                let reporter = StateReporter {
                    target: target.name.clone(),
                    tx,
                    observer: self.observer.clone(),
                };
                (reporter, rx)
            })
            .collect();

        for (reporter, _) in &reporters {
            reporter.set(TargetState::Authenticating);
        }
        let sessions = self.authenticate_all(targets).await?;

        let context = Arc::new(WorkerContext {
            publisher: Arc::clone(&self.publisher),
            attestor: Arc::clone(&self.attestor),
            tag_policy: self.tag_policy,
            cancel: self.cancel.clone(),
            semaphore: Arc::new(Semaphore::new(self.concurrency)),
            event: event.clone(),
        });

        info!(
            "Starting {} targets (concurrency {})",
            targets.len(),
            self.concurrency
        );

        let mut handles = Vec::with_capacity(targets.len());
        for (target, (reporter, rx)) in targets.iter().zip(reporters) {
            let session = Arc::clone(&sessions[target.image.registry()]);
            let context = Arc::clone(&context);
            let task_target = target.clone();
            let handle = tokio::spawn(async move {
                let outcome = run_target(&context, task_target, session, &reporter).await;
                reporter.set(outcome.state());
                outcome
            });
            handles.push((target, handle, rx));
        }

        // 各ターゲットの結果スロットはターゲット順に1回だけ埋める
        let mut outcomes = Vec::with_capacity(handles.len());
        for (target, handle, rx) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let stage = rx.borrow().stage();
                    let outcome = TargetOutcome::failed(
                        target.name.clone(),
                        target.image.clone(),
                        join_error(e, stage),
                    );
                    if let Some(observer) = &self.observer {
                        observer.on_state(&target.name, &outcome.state());
                    }
                    outcome
                }
            };
            outcomes.push(outcome);
        }

        let outcome = RunOutcome {
            outcomes,
            policy: self.attestation_policy,
        };
        info!(
            "Run finished: {} targets, {} failed",
            outcome.outcomes.len(),
            outcome.failures().count()
        );
        Ok(outcome)
    }

    /// 異なるレジストリホストごとに1回だけ認証
    async fn authenticate_all(
        &self,
        targets: &[BuildTarget],
    ) -> Result<HashMap<String, Arc<Session>>, AuthError> {
        let mut sessions = HashMap::new();
        for target in targets {
            let registry = target.image.registry();
            if sessions.contains_key(registry) {
                continue;
            }
            info!("Authenticating to {}", registry);
            let session = self
                .authenticator
                .authenticate(registry, self.credentials.get(registry))
                .await?;
            sessions.insert(registry.to_string(), Arc::new(session));
        }
        Ok(sessions)
    }
}

/// ターゲット1つ分のパイプライン
async fn run_target(
    context: &WorkerContext,
    target: BuildTarget,
    session: Arc<Session>,
    reporter: &StateReporter,
) -> TargetOutcome {
    let name = target.name.clone();
    let image = target.image.clone();
    let fail = |error: TargetError| {
        warn!(target_name = %name, stage = %error.stage(), "{}", error);
        TargetOutcome::failed(name.clone(), image.clone(), error)
    };

    let _permit = tokio::select! {
        permit = Arc::clone(&context.semaphore).acquire_owned() => permit.ok(),
        _ = context.cancel.cancelled() => return fail(TargetError::Cancelled(Stage::Metadata)),
    };

    reporter.set(TargetState::Building);

    if context.cancel.is_cancelled() {
        return fail(TargetError::Cancelled(Stage::Metadata));
    }
    let tags = match resolve_tags(&target.image, &context.event, &context.tag_policy) {
        Ok(tags) => tags,
        Err(e) => return fail(e.into()),
    };
    debug!(target_name = %name, tags = ?tags.tags(), "Resolved tags");

    info!(target_name = %name, "Building {}", target.image.with_tag(tags.primary()));
    let started_on = Utc::now();
    let built = tokio::select! {
        biased;
        result = context.publisher.build(&target, &tags) => match result {
            Ok(built) => built,
            Err(e) => return fail(e.into()),
        },
        _ = context.cancel.cancelled() => return fail(TargetError::Cancelled(Stage::Build)),
    };

    // 開始したプッシュは中断しない
    if context.cancel.is_cancelled() {
        return fail(TargetError::Cancelled(Stage::Push));
    }
    reporter.set(TargetState::Pushing);
    info!(target_name = %name, "Pushing {} tags", tags.tags().len());
    let published = match context.publisher.push(built, &tags, &session).await {
        Ok(published) => published,
        Err(e) => return fail(e.into()),
    };
    let finished_on = Utc::now();

    // プッシュ済みのイメージは必ずアテステーションまで進める
    reporter.set(TargetState::Attesting);
    info!(
        target_name = %name,
        predicate = context.attestor.predicate_type(),
        "Attesting {}",
        published.pinned_reference()
    );
    let provenance = BuildProvenance {
        target,
        event: context.event.clone(),
        tags,
        started_on,
        finished_on,
    };

    // 署名側が異常終了してもプッシュ結果は失わない
    let attestor = Arc::clone(&context.attestor);
    let subject = published.clone();
    let attestation = tokio::spawn(async move {
        attestor.attest(&subject, &provenance, &session).await
    })
    .await
    .unwrap_or_else(|e| Err(AttestError::Panicked(panic_message(e))));

    let status = match attestation {
        Ok(attestation) => {
            info!(target_name = %name, "Published {}", published.pinned_reference());
            TargetStatus::Succeeded {
                published,
                attestation,
            }
        }
        Err(error) => {
            warn!(
                target_name = %name,
                "Published {} without attestation: {}",
                published.pinned_reference(),
                error
            );
            TargetStatus::Unattested { published, error }
        }
    };

    TargetOutcome {
        target: name,
        image,
        status,
    }
}

/// タスクの異常終了を失敗原因に変換
fn join_error(error: JoinError, stage: Stage) -> TargetError {
    if error.is_cancelled() {
        return TargetError::Cancelled(stage);
    }
    TargetError::Panicked {
        stage,
        message: panic_message(error),
    }
}

/// panic のペイロードから表示用メッセージを取り出す
fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let panic = error.into_panic();
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
