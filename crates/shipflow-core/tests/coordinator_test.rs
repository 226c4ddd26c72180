//! RunCoordinator の統合テスト
//!
//! Docker やレジストリの代わりにフェイク実装を使う。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shipflow_core::{
    AttestError, AttestationPolicy, AttestationRecord, Attestor, AuthError, Authenticator,
    BuildError, BuildProvenance, BuildTarget, BuiltImage, CancelHandle, Credentials, Digest,
    ImageRef, PublishResult, Publisher, PushError, RunCoordinator, RunError, RunEvent,
    RunObserver, Session, Stage, TagPolicy, TagSet, TargetError, TargetState, TargetStatus,
    cancel_pair,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn target(name: &str) -> BuildTarget {
    target_at("registry", name)
}

fn target_at(host: &str, name: &str) -> BuildTarget {
    BuildTarget {
        name: name.to_string(),
        context: PathBuf::from(name),
        dockerfile: PathBuf::from(format!("{}/Dockerfile", name)),
        image: ImageRef::parse(&format!("{}/{}", host, name)).unwrap(),
    }
}

fn event(version: &str) -> RunEvent {
    let created = DateTime::parse_from_rfc3339("2026-10-16T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    RunEvent::new(created).with_version(version)
}

/// ターゲット名から決まるダイジェスト
fn digest_for(name: &str) -> Digest {
    let hex: String = name.bytes().map(|b| format!("{:02x}", b)).collect();
    Digest::parse(&format!("sha256:{:0>64}", hex)).unwrap()
}

#[derive(Default)]
struct FakeAuthenticator {
    /// (レジストリ, 渡されたユーザー名)
    calls: Mutex<Vec<(String, Option<String>)>>,
    fail: bool,
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn authenticate(
        &self,
        registry: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Session, AuthError> {
        self.calls
            .lock()
            .unwrap()
            .push((registry.to_string(), credentials.map(|c| c.username.clone())));
        if self.fail {
            return Err(AuthError::Rejected {
                registry: registry.to_string(),
                message: "unauthorized".to_string(),
            });
        }
        Ok(Session::new(registry, credentials.cloned()))
    }
}

#[derive(Default)]
struct FakePublisher {
    events: Arc<Mutex<Vec<String>>>,
    pushed: Mutex<Vec<(String, Digest)>>,
    fail_build: HashSet<String>,
    fail_push: HashSet<String>,
    panic_build: HashSet<String>,
    slow_build: HashSet<String>,
    build_delay: Option<Duration>,
    cancel_on_build: Option<CancelHandle>,
    cancel_on_push: Option<CancelHandle>,
    yield_after_cancel: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn build(&self, target: &BuildTarget, tags: &TagSet) -> Result<BuiltImage, BuildError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("build:{}", target.name));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        if self.slow_build.contains(&target.name) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic_build.contains(&target.name) {
            panic!("builder crashed for {}", target.name);
        }
        if let Some(handle) = &self.cancel_on_build {
            handle.cancel();
        }
        if self.fail_build.contains(&target.name) {
            return Err(BuildError::Failed {
                target: target.name.clone(),
                message: "RUN npm ci returned non-zero code: 1".to_string(),
                log_excerpt: vec!["npm ERR! code E404".to_string()],
            });
        }
        Ok(BuiltImage::new(
            target.name.clone(),
            target.image.clone(),
            format!("sha256:local-{}", target.name),
            target.image.with_tag(tags.primary()),
        ))
    }

    async fn push(
        &self,
        built: BuiltImage,
        tags: &TagSet,
        _session: &Session,
    ) -> Result<PublishResult, PushError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("push:{}", built.target()));

        if self.fail_push.contains(built.target()) {
            return Err(PushError::Rejected {
                reference: built.reference().to_string(),
                message: "denied: requested access to the resource is denied".to_string(),
            });
        }
        if let Some(handle) = &self.cancel_on_push {
            handle.cancel();
            if self.yield_after_cancel {
                tokio::task::yield_now().await;
            }
        }

        let digest = digest_for(built.target());
        self.pushed
            .lock()
            .unwrap()
            .push((built.target().to_string(), digest.clone()));
        Ok(PublishResult::new(&built, tags, digest))
    }
}

#[derive(Default)]
struct FakeAttestor {
    events: Arc<Mutex<Vec<String>>>,
    subjects: Mutex<Vec<(String, Digest)>>,
    fail: HashSet<String>,
    panic_on: HashSet<String>,
}

#[async_trait]
impl Attestor for FakeAttestor {
    fn predicate_type(&self) -> &str {
        "https://slsa.dev/provenance/v1"
    }

    async fn attest(
        &self,
        published: &PublishResult,
        provenance: &BuildProvenance,
        _session: &Session,
    ) -> Result<AttestationRecord, AttestError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("attest:{}", published.target()));
        assert_eq!(provenance.target.name, published.target());

        if self.panic_on.contains(published.target()) {
            panic!("signer crashed for {}", published.target());
        }
        if self.fail.contains(published.target()) {
            return Err(AttestError::Signing("no signing key".to_string()));
        }
        self.subjects.lock().unwrap().push((
            published.image().to_string(),
            published.digest().clone(),
        ));
        Ok(AttestationRecord {
            subject_name: published.image().to_string(),
            subject_digest: published.digest().clone(),
            predicate_type: self.predicate_type().to_string(),
            statement: serde_json::json!({}),
            signed_at: Utc::now(),
        })
    }
}

struct Fixture {
    authenticator: Arc<FakeAuthenticator>,
    publisher: Arc<FakePublisher>,
    attestor: Arc<FakeAttestor>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn new(publisher: FakePublisher, attestor: FakeAttestor) -> Self {
        Self::with_authenticator(FakeAuthenticator::default(), publisher, attestor)
    }

    fn with_authenticator(
        authenticator: FakeAuthenticator,
        mut publisher: FakePublisher,
        mut attestor: FakeAttestor,
    ) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        publisher.events = Arc::clone(&events);
        attestor.events = Arc::clone(&events);
        Self {
            authenticator: Arc::new(authenticator),
            publisher: Arc::new(publisher),
            attestor: Arc::new(attestor),
            events,
        }
    }

    fn coordinator(&self) -> RunCoordinator {
        RunCoordinator::new(
            self.authenticator.clone(),
            self.publisher.clone(),
            self.attestor.clone(),
        )
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

fn names(list: &[&str]) -> HashSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_two_targets_release_scenario() {
    let fixture = Fixture::new(FakePublisher::default(), FakeAttestor::default());
    let targets = vec![target("app-server"), target("frontend")];

    let outcome = fixture
        .coordinator()
        .run(&targets, &event("v1.2.3"))
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.outcomes.len(), 2);

    let app = outcome.get("app-server").unwrap();
    let frontend = outcome.get("frontend").unwrap();
    assert_eq!(app.state(), TargetState::Succeeded);
    assert_eq!(frontend.state(), TargetState::Succeeded);

    let digest_a = app.published().unwrap().digest();
    let digest_b = frontend.published().unwrap().digest();
    assert_ne!(digest_a, digest_b);
    assert_eq!(
        app.published().unwrap().tags(),
        ["1.2.3", "1.2", "1", "latest"]
    );

    let attestation_a = app.attestation().unwrap();
    assert_eq!(attestation_a.subject_name, "registry/app-server");
    assert_eq!(&attestation_a.subject_digest, digest_a);
    let attestation_b = frontend.attestation().unwrap();
    assert_eq!(attestation_b.subject_name, "registry/frontend");
    assert_eq!(&attestation_b.subject_digest, digest_b);
}

#[tokio::test]
async fn test_every_target_is_attempted_once() {
    let publisher = FakePublisher {
        fail_build: names(&["b"]),
        fail_push: names(&["c"]),
        ..Default::default()
    };
    let fixture = Fixture::new(publisher, FakeAttestor::default());
    let targets: Vec<_> = ["a", "b", "c", "d", "e"].iter().map(|n| target(n)).collect();

    let outcome = fixture
        .coordinator()
        .run(&targets, &event("v1.0.0"))
        .await
        .unwrap();

    assert_eq!(outcome.outcomes.len(), 5);
    assert_eq!(fixture.count("build:"), 5);
    assert_eq!(fixture.count("push:"), 4);
    assert_eq!(fixture.count("attest:"), 3);

    // 結果はターゲット定義順
    let order: Vec<_> = outcome.outcomes.iter().map(|o| o.target.as_str()).collect();
    assert_eq!(order, ["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn test_build_failure_is_isolated() {
    let publisher = FakePublisher {
        fail_build: names(&["web"]),
        ..Default::default()
    };
    let fixture = Fixture::new(publisher, FakeAttestor::default());
    let targets = vec![target("web"), target("api")];

    let outcome = fixture
        .coordinator()
        .run(&targets, &event("v1.2.3"))
        .await
        .unwrap();

    assert!(!outcome.is_success());
    let web = outcome.get("web").unwrap();
    assert_eq!(web.state(), TargetState::Failed(Stage::Build));
    let report = web.report(outcome.policy);
    assert_eq!(report.log_excerpt, vec!["npm ERR! code E404"]);
    assert!(web.published().is_none());

    assert_eq!(
        outcome.get("api").unwrap().state(),
        TargetState::Succeeded
    );
    assert!(!fixture.events().contains(&"push:web".to_string()));
}

#[tokio::test]
async fn test_push_failure_never_attests() {
    let publisher = FakePublisher {
        fail_push: names(&["api"]),
        ..Default::default()
    };
    let fixture = Fixture::new(publisher, FakeAttestor::default());

    let outcome = fixture
        .coordinator()
        .run(&[target("api")], &event("v1.2.3"))
        .await
        .unwrap();

    let api = outcome.get("api").unwrap();
    assert_eq!(api.state(), TargetState::Failed(Stage::Push));
    assert!(matches!(
        &api.status,
        TargetStatus::Failed {
            error: TargetError::Push(PushError::Rejected { .. })
        }
    ));
    assert_eq!(fixture.count("attest:"), 0);
}

#[tokio::test]
async fn test_attest_only_after_push_with_same_digest() {
    let fixture = Fixture::new(FakePublisher::default(), FakeAttestor::default());
    let targets: Vec<_> = ["a", "b", "c"].iter().map(|n| target(n)).collect();

    fixture
        .coordinator()
        .run(&targets, &event("v2.0.0"))
        .await
        .unwrap();

    let events = fixture.events();
    for name in ["a", "b", "c"] {
        let position = |kind: &str| {
            events
                .iter()
                .position(|e| e == &format!("{}:{}", kind, name))
                .unwrap()
        };
        assert!(position("build") < position("push"));
        assert!(position("push") < position("attest"));
    }

    let pushed = fixture.publisher.pushed.lock().unwrap().clone();
    let subjects = fixture.attestor.subjects.lock().unwrap().clone();
    assert_eq!(subjects.len(), 3);
    for (image, digest) in subjects {
        let name = image.trim_start_matches("registry/");
        let (_, pushed_digest) = pushed.iter().find(|(t, _)| t == name).unwrap();
        assert_eq!(&digest, pushed_digest);
    }
}

#[tokio::test]
async fn test_auth_failure_aborts_before_build() {
    let authenticator = FakeAuthenticator {
        fail: true,
        ..Default::default()
    };
    let fixture = Fixture::with_authenticator(
        authenticator,
        FakePublisher::default(),
        FakeAttestor::default(),
    );

    let result = fixture
        .coordinator()
        .run(&[target("api"), target("web")], &event("v1.2.3"))
        .await;

    assert!(matches!(result, Err(RunError::Auth(AuthError::Rejected { .. }))));
    assert!(fixture.events().is_empty());
}

#[tokio::test]
async fn test_authenticates_once_per_registry() {
    let fixture = Fixture::new(FakePublisher::default(), FakeAttestor::default());
    let targets = vec![
        target_at("ghcr.io/org", "api"),
        target_at("ghcr.io/org", "web"),
        target_at("registry.example.com", "worker"),
    ];

    let outcome = fixture
        .coordinator()
        .run(&targets, &event("v1.2.3"))
        .await
        .unwrap();

    assert!(outcome.is_success());
    let calls: Vec<_> = fixture
        .authenticator
        .calls
        .lock()
        .unwrap()
        .iter()
        .map(|(registry, _)| registry.clone())
        .collect();
    assert_eq!(calls, ["ghcr.io", "registry.example.com"]);
}

/// 認証情報は登録したホストにだけ渡る
#[tokio::test]
async fn test_credentials_are_scoped_to_their_registry() {
    let fixture = Fixture::new(FakePublisher::default(), FakeAttestor::default());
    let targets = vec![target_at("myorg", "hub"), target_at("ghcr.io/org", "gh")];

    let outcome = fixture
        .coordinator()
        .with_credentials("ghcr.io", Credentials::new("ghcr-bot", "ghp_token"))
        .run(&targets, &event("v1.2.3"))
        .await
        .unwrap();

    assert!(outcome.is_success());
    let calls = fixture.authenticator.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        [
            ("docker.io".to_string(), None),
            ("ghcr.io".to_string(), Some("ghcr-bot".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_missing_version_fails_metadata_stage() {
    let fixture = Fixture::new(FakePublisher::default(), FakeAttestor::default());
    let created = Utc::now();

    let outcome = fixture
        .coordinator()
        .run(&[target("api")], &RunEvent::new(created))
        .await
        .unwrap();

    assert_eq!(
        outcome.get("api").unwrap().state(),
        TargetState::Failed(Stage::Metadata)
    );
    assert_eq!(fixture.count("build:"), 0);
}

#[tokio::test]
async fn test_unattested_fails_only_under_required_policy() {
    for (policy, expect_success) in [
        (AttestationPolicy::Required, false),
        (AttestationPolicy::Optional, true),
    ] {
        let attestor = FakeAttestor {
            fail: names(&["api"]),
            ..Default::default()
        };
        let fixture = Fixture::new(FakePublisher::default(), attestor);

        let outcome = fixture
            .coordinator()
            .with_attestation_policy(policy)
            .run(&[target("api"), target("web")], &event("v1.2.3"))
            .await
            .unwrap();

        let api = outcome.get("api").unwrap();
        assert_eq!(api.state(), TargetState::Unattested);
        assert!(api.published().is_some());
        assert_eq!(outcome.is_success(), expect_success);
        assert_eq!(
            outcome.get("web").unwrap().state(),
            TargetState::Succeeded
        );
    }
}

#[tokio::test]
async fn test_cancel_after_push_still_attests() {
    let (handle, token) = cancel_pair();
    let publisher = FakePublisher {
        cancel_on_push: Some(handle),
        ..Default::default()
    };
    let fixture = Fixture::new(publisher, FakeAttestor::default());

    let outcome = fixture
        .coordinator()
        .with_cancel_token(token.clone())
        .run(&[target("api")], &event("v1.2.3"))
        .await
        .unwrap();

    assert!(token.is_cancelled());
    assert_eq!(
        outcome.get("api").unwrap().state(),
        TargetState::Succeeded
    );
    assert_eq!(fixture.count("attest:"), 1);
}

/// プッシュ完了と同時にキャンセルされても、プッシュ結果は捨てずに署名する
#[tokio::test]
async fn test_cancel_while_push_returns_keeps_published_image() {
    for _ in 0..50 {
        let (handle, token) = cancel_pair();
        let publisher = FakePublisher {
            cancel_on_push: Some(handle),
            yield_after_cancel: true,
            ..Default::default()
        };
        let fixture = Fixture::new(publisher, FakeAttestor::default());

        let outcome = fixture
            .coordinator()
            .with_cancel_token(token)
            .run(&[target("api")], &event("v1.2.3"))
            .await
            .unwrap();

        let api = outcome.get("api").unwrap();
        assert_eq!(api.state(), TargetState::Succeeded);
        assert_eq!(api.published().unwrap().digest(), &digest_for("api"));
        assert_eq!(fixture.count("attest:"), 1);
    }
}

/// ビルド直後のキャンセルではプッシュを始めない
#[tokio::test]
async fn test_cancel_after_build_skips_push() {
    let (handle, token) = cancel_pair();
    let publisher = FakePublisher {
        cancel_on_build: Some(handle),
        ..Default::default()
    };
    let fixture = Fixture::new(publisher, FakeAttestor::default());

    let outcome = fixture
        .coordinator()
        .with_cancel_token(token)
        .run(&[target("api")], &event("v1.2.3"))
        .await
        .unwrap();

    assert!(matches!(
        &outcome.get("api").unwrap().status,
        TargetStatus::Failed {
            error: TargetError::Cancelled(Stage::Push)
        }
    ));
    assert_eq!(fixture.count("push:"), 0);
    assert_eq!(fixture.count("attest:"), 0);
}

#[tokio::test]
async fn test_cancel_during_build() {
    let (handle, token) = cancel_pair();
    let publisher = FakePublisher {
        slow_build: names(&["api"]),
        ..Default::default()
    };
    let fixture = Fixture::new(publisher, FakeAttestor::default());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        fixture
            .coordinator()
            .with_cancel_token(token)
            .run(&[target("api")], &event("v1.2.3")),
    )
    .await
    .unwrap()
    .unwrap();

    let api = outcome.get("api").unwrap();
    assert_eq!(api.state(), TargetState::Failed(Stage::Build));
    assert!(matches!(
        &api.status,
        TargetStatus::Failed {
            error: TargetError::Cancelled(Stage::Build)
        }
    ));
    assert_eq!(fixture.count("push:"), 0);
}

#[tokio::test]
async fn test_worker_panic_is_recorded_with_stage() {
    let publisher = FakePublisher {
        panic_build: names(&["boom"]),
        ..Default::default()
    };
    let fixture = Fixture::new(publisher, FakeAttestor::default());

    let outcome = fixture
        .coordinator()
        .run(&[target("boom"), target("fine")], &event("v1.2.3"))
        .await
        .unwrap();

    match &outcome.get("boom").unwrap().status {
        TargetStatus::Failed {
            error: TargetError::Panicked { stage, message },
        } => {
            assert_eq!(*stage, Stage::Build);
            assert!(message.contains("builder crashed"));
        }
        other => panic!("Expected panicked failure, got {:?}", other),
    }
    assert_eq!(
        outcome.get("fine").unwrap().state(),
        TargetState::Succeeded
    );
}

/// 署名側の異常終了は公開済みイメージを失わず Unattested になる
#[tokio::test]
async fn test_attestor_panic_keeps_published_digest() {
    let attestor = FakeAttestor {
        panic_on: names(&["api"]),
        ..Default::default()
    };
    let fixture = Fixture::new(FakePublisher::default(), attestor);

    let outcome = fixture
        .coordinator()
        .run(&[target("api"), target("web")], &event("v1.2.3"))
        .await
        .unwrap();

    let api = outcome.get("api").unwrap();
    assert_eq!(api.state(), TargetState::Unattested);
    match &api.status {
        TargetStatus::Unattested {
            published,
            error: AttestError::Panicked(message),
        } => {
            assert_eq!(published.digest(), &digest_for("api"));
            assert!(message.contains("signer crashed"));
        }
        other => panic!("Expected unattested after panic, got {:?}", other),
    }
    let report = api.report(outcome.policy);
    assert_eq!(report.digest, Some(digest_for("api").to_string()));

    assert_eq!(
        outcome.get("web").unwrap().state(),
        TargetState::Succeeded
    );
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let publisher = FakePublisher {
        build_delay: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let fixture = Fixture::new(publisher, FakeAttestor::default());
    let targets: Vec<_> = (0..6).map(|i| target(&format!("svc{}", i))).collect();

    let outcome = fixture
        .coordinator()
        .with_concurrency(2)
        .run(&targets, &event("v1.2.3"))
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert!(fixture.publisher.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[derive(Default)]
struct RecordingObserver {
    states: Mutex<Vec<(String, TargetState)>>,
}

impl RunObserver for RecordingObserver {
    fn on_state(&self, target: &str, state: &TargetState) {
        self.states
            .lock()
            .unwrap()
            .push((target.to_string(), *state));
    }
}

#[tokio::test]
async fn test_observer_sees_state_machine() {
    let fixture = Fixture::new(FakePublisher::default(), FakeAttestor::default());
    let observer = Arc::new(RecordingObserver::default());

    fixture
        .coordinator()
        .with_observer(observer.clone())
        .with_tag_policy(TagPolicy {
            latest: false,
            sha: false,
        })
        .run(&[target("api")], &event("v1.2.3"))
        .await
        .unwrap();

    let states: Vec<_> = observer
        .states
        .lock()
        .unwrap()
        .iter()
        .map(|(_, s)| *s)
        .collect();
    assert_eq!(
        states,
        [
            TargetState::Authenticating,
            TargetState::Building,
            TargetState::Pushing,
            TargetState::Attesting,
            TargetState::Succeeded,
        ]
    );
}
