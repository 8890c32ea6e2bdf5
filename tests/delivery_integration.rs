//! End-to-end delivery flows over the in-memory backends: enqueue,
//! preference gating, template resolution, delivery execution and retry.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use courier_delivery_service::channel::telegram::{
    TelegramApiError, TelegramProvider, TelegramTransport,
};
use courier_delivery_service::channel::{ChannelProvider, ProviderRegistry};
use courier_delivery_service::domain::notification::Payload;
use courier_delivery_service::store::NotificationStore;
use courier_delivery_service::domain::preference::{
    NotificationCategory, NotificationPolicy, PreferenceResolver,
};
use courier_delivery_service::domain::template::{
    MessageTemplate, RenderedButton, TemplateEngine, TemplateResolver,
};
use courier_delivery_service::queue::{DeliveryQueue, MemoryQueue};
use courier_delivery_service::store::memory::{
    MemoryPreferenceRepository, MemoryStore, MemoryTemplateRepository,
};
use courier_delivery_service::store::StoredTemplate;
use courier_delivery_service::worker::{DeliveryOutcome, DeliveryWorker, MAX_DELIVERY_ATTEMPTS};
use courier_delivery_service::{
    Channel, NotificationService, NotificationStatus, RecipientRole, SendNotificationRequest,
};

/// Transport fake that replays a script of Bot API results and records
/// every outgoing message.
struct ScriptedTransport {
    script: Mutex<Vec<Result<String, TelegramApiError>>>,
    sent: Mutex<Vec<(i64, String)>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<String, TelegramApiError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn always_ok() -> Arc<Self> {
        Self::new(vec![])
    }

    fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn next(&self, chat_id: i64, text: &str) -> Result<String, TelegramApiError> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(format!("msg-{}", self.sent.lock().unwrap().len()))
        } else {
            script.remove(0)
        }
    }
}

#[async_trait]
impl TelegramTransport for ScriptedTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<String, TelegramApiError> {
        self.next(chat_id, text)
    }

    async fn send_message_with_buttons(
        &self,
        chat_id: i64,
        text: &str,
        _buttons: &[RenderedButton],
    ) -> Result<String, TelegramApiError> {
        self.next(chat_id, text)
    }
}

struct TestApp {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    preferences_repo: Arc<MemoryPreferenceRepository>,
    template_repo: Arc<MemoryTemplateRepository>,
    transport: Arc<ScriptedTransport>,
    service: NotificationService,
    worker: DeliveryWorker,
}

fn build_app(transport: Arc<ScriptedTransport>) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new(64));
    let preferences_repo = Arc::new(MemoryPreferenceRepository::new());
    let template_repo = Arc::new(MemoryTemplateRepository::new());

    let engine = Arc::new(TemplateEngine::new());
    engine.register(MessageTemplate {
        key: "booking.created".to_string(),
        body: "Your booking {{booking_id}} is confirmed for {{date}}.".to_string(),
        buttons: vec![],
    });

    let templates = Arc::new(TemplateResolver::new(template_repo.clone(), engine));
    let preferences = Arc::new(PreferenceResolver::new(preferences_repo.clone()));
    let providers = Arc::new(ProviderRegistry::new(vec![Arc::new(TelegramProvider::new(
        transport.clone(),
    )) as Arc<dyn ChannelProvider>]));

    let service = NotificationService::new(
        store.clone(),
        queue.clone(),
        preferences,
        templates.clone(),
    );
    let worker = DeliveryWorker::new(store.clone(), templates, providers);

    TestApp {
        store,
        queue,
        preferences_repo,
        template_repo,
        transport,
        service,
        worker,
    }
}

fn booking_request(recipient_id: &str) -> SendNotificationRequest {
    let mut variables = Payload::new();
    variables.insert("booking_id".to_string(), json!("BK-17"));
    variables.insert("date".to_string(), json!("2026-09-01"));
    SendNotificationRequest {
        event_name: "booking.created".to_string(),
        recipient_id: recipient_id.to_string(),
        recipient_chat_id: 4242,
        channel: Channel::Telegram,
        template_key: "booking.created".to_string(),
        variables,
        recipient_role: RecipientRole::default(),
    }
}

fn api_err(code: Option<i64>, description: &str) -> Result<String, TelegramApiError> {
    Err(TelegramApiError {
        code,
        description: description.to_string(),
    })
}

#[tokio::test]
async fn test_enqueue_then_deliver_end_to_end() {
    let app = build_app(ScriptedTransport::always_ok());

    let result = app.service.send(&booking_request("u1")).await.unwrap();
    assert!(!result.deduplicated);
    assert!(!result.skipped);

    // Enqueue wrote a pending row with the code-template audit snapshot
    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.status, NotificationStatus::Pending);
    assert_eq!(row.attempt_count, 0);
    assert!(row.template_version.is_none());
    assert_eq!(
        row.template_snapshot.as_deref(),
        Some("Your booking BK-17 is confirmed for 2026-09-01.")
    );

    // Exactly one job was queued
    let job = app.queue.recv().await.unwrap();
    assert_eq!(job.notification_id, result.notification_id);
    assert_eq!(app.queue.pending_len(), 0);

    let outcome = app.worker.execute(job.notification_id).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Sent);

    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.status, NotificationStatus::Sent);
    assert_eq!(row.attempt_count, 1);
    assert!(row.provider_message_id.is_some());
    assert!(row.sent_at.is_some());

    let (chat_id, text) = app.transport.sent.lock().unwrap()[0].clone();
    assert_eq!(chat_id, 4242);
    assert_eq!(text, "Your booking BK-17 is confirmed for 2026-09-01.");
}

#[tokio::test]
async fn test_duplicate_send_is_deduplicated() {
    let app = build_app(ScriptedTransport::always_ok());

    let first = app.service.send(&booking_request("u1")).await.unwrap();
    let second = app.service.send(&booking_request("u1")).await.unwrap();

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(first.notification_id, second.notification_id);
    assert_eq!(app.store.len(), 1);
    assert_eq!(app.queue.pending_len(), 1);

    // Different variables produce an independent notification
    let mut other = booking_request("u1");
    other
        .variables
        .insert("booking_id".to_string(), json!("BK-18"));
    let third = app.service.send(&other).await.unwrap();
    assert!(!third.deduplicated);
    assert_eq!(app.store.len(), 2);
}

#[tokio::test]
async fn test_disabled_preference_skips_without_side_effects() {
    let app = build_app(ScriptedTransport::always_ok());
    app.preferences_repo.put_user_preference(
        "u1",
        NotificationCategory::Transactional,
        Channel::Telegram,
        false,
    );

    let result = app.service.send(&booking_request("u1")).await.unwrap();
    assert!(result.skipped);
    assert!(!result.deduplicated);

    // The skipped row is the only side effect
    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.status, NotificationStatus::Skipped);
    assert_eq!(row.skip_reason.as_deref(), Some("USER_PREF_DISABLED"));
    assert!(row.template_snapshot.is_none());
    assert_eq!(app.queue.pending_len(), 0);
    assert_eq!(app.transport.send_count(), 0);

    // A later identical send resolves to the skipped row
    let again = app.service.send(&booking_request("u1")).await.unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.notification_id, result.notification_id);
}

#[tokio::test]
async fn test_force_deliver_overrides_user_preference() {
    let app = build_app(ScriptedTransport::always_ok());
    app.preferences_repo.put_user_preference(
        "u1",
        NotificationCategory::Security,
        Channel::Telegram,
        false,
    );
    app.preferences_repo.put_policy(NotificationPolicy {
        template_key: "booking.created".to_string(),
        category: NotificationCategory::Security,
        force_deliver: true,
        allowed_channels: vec![Channel::Telegram],
    });

    let result = app.service.send(&booking_request("u1")).await.unwrap();
    assert!(!result.skipped);
    assert_eq!(app.queue.pending_len(), 1);
}

#[tokio::test]
async fn test_database_template_wins_over_code_fallback() {
    let app = build_app(ScriptedTransport::always_ok());
    app.template_repo.put(StoredTemplate {
        template_key: "booking.created".to_string(),
        channel: Channel::Telegram,
        body: "[v2] Booking {{booking_id}} confirmed.".to_string(),
        buttons: vec![],
        version: "v2".to_string(),
        policy_version: Some("p1".to_string()),
        is_active: true,
        created_at: Utc::now(),
    });

    let result = app.service.send(&booking_request("u1")).await.unwrap();

    // Audit metadata comes from the store row: version set, snapshot is
    // the unrendered body
    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.template_version.as_deref(), Some("v2"));
    assert_eq!(row.policy_version.as_deref(), Some("p1"));
    assert_eq!(
        row.template_snapshot.as_deref(),
        Some("[v2] Booking {{booking_id}} confirmed.")
    );

    let job = app.queue.recv().await.unwrap();
    app.worker.execute(job.notification_id).await.unwrap();

    let (_, text) = app.transport.sent.lock().unwrap()[0].clone();
    assert_eq!(text, "[v2] Booking BK-17 confirmed.");
}

#[tokio::test]
async fn test_transient_failure_retries_then_succeeds() {
    let app = build_app(ScriptedTransport::new(vec![
        api_err(Some(429), "Too Many Requests: retry after 5"),
        Ok("msg-2".to_string()),
    ]));

    let result = app.service.send(&booking_request("u1")).await.unwrap();
    let job = app.queue.recv().await.unwrap();

    let outcome = app.worker.execute(job.notification_id).await.unwrap();
    let retry_after = match outcome {
        DeliveryOutcome::FailedTransient { retry_after } => retry_after,
        other => panic!("expected transient failure, got {:?}", other),
    };
    // First retry comes from the 30s table entry, jittered ±20%
    assert!(retry_after.as_secs_f64() >= 24.0 - 1e-9);
    assert!(retry_after.as_secs_f64() <= 36.0 + 1e-9);

    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.status, NotificationStatus::Failed);
    assert_eq!(row.attempt_count, 1);
    assert!(row.next_retry_at.is_some());

    // Retry succeeds
    let outcome = app.worker.execute(job.notification_id).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Sent);

    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.status, NotificationStatus::Sent);
    assert_eq!(row.attempt_count, 2);
    assert_eq!(row.provider_message_id.as_deref(), Some("msg-2"));
    assert_eq!(app.transport.send_count(), 2);
}

#[tokio::test]
async fn test_blocked_recipient_fails_permanently() {
    let app = build_app(ScriptedTransport::new(vec![api_err(
        Some(403),
        "Forbidden: bot was blocked by the user",
    )]));

    let result = app.service.send(&booking_request("u1")).await.unwrap();
    let job = app.queue.recv().await.unwrap();

    let outcome = app.worker.execute(job.notification_id).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::FailedPermanently);

    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.status, NotificationStatus::Failed);
    assert!(row.next_retry_at.is_none());
    assert!(row.error_message.unwrap().starts_with("Permanent:"));
    assert_eq!(app.transport.send_count(), 1);
}

#[tokio::test]
async fn test_attempt_budget_exhausts_into_permanent_failure() {
    let mut script = Vec::new();
    for _ in 0..MAX_DELIVERY_ATTEMPTS {
        script.push(api_err(Some(502), "Bad Gateway"));
    }
    let app = build_app(ScriptedTransport::new(script));

    let result = app.service.send(&booking_request("u1")).await.unwrap();
    let job = app.queue.recv().await.unwrap();

    for _ in 0..MAX_DELIVERY_ATTEMPTS {
        let outcome = app.worker.execute(job.notification_id).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::FailedTransient { .. }));
    }

    // The budget is spent: the next job resolves without a send attempt
    let outcome = app.worker.execute(job.notification_id).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::FailedPermanently);
    assert_eq!(app.transport.send_count(), MAX_DELIVERY_ATTEMPTS as usize);

    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.attempt_count, MAX_DELIVERY_ATTEMPTS);
    assert!(row
        .error_message
        .unwrap()
        .contains("max delivery attempts exceeded"));
}

#[tokio::test]
async fn test_requeue_resets_failed_row_only() {
    let app = build_app(ScriptedTransport::new(vec![
        api_err(Some(403), "Forbidden: bot was blocked by the user"),
        Ok("msg-2".to_string()),
    ]));

    let result = app.service.send(&booking_request("u1")).await.unwrap();
    let job = app.queue.recv().await.unwrap();
    app.worker.execute(job.notification_id).await.unwrap();

    // Failed row is eligible
    let requeued = app.service.requeue(result.notification_id).await.unwrap();
    assert!(requeued);

    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.status, NotificationStatus::Pending);
    assert!(row.error_message.is_none());
    assert!(row.next_retry_at.is_none());

    let job = app.queue.recv().await.unwrap();
    let outcome = app.worker.execute(job.notification_id).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Sent);

    // Sent rows are terminal
    let requeued = app.service.requeue(result.notification_id).await.unwrap();
    assert!(!requeued);
    // So are unknown ids
    let requeued = app.service.requeue(uuid::Uuid::new_v4()).await.unwrap();
    assert!(!requeued);
}

#[tokio::test]
async fn test_requeue_failed_bulk() {
    let app = build_app(ScriptedTransport::new(vec![
        api_err(Some(403), "Forbidden: bot was blocked by the user"),
        api_err(Some(403), "Forbidden: bot was blocked by the user"),
    ]));

    for recipient in ["u1", "u2"] {
        app.service.send(&booking_request(recipient)).await.unwrap();
        let job = app.queue.recv().await.unwrap();
        app.worker.execute(job.notification_id).await.unwrap();
    }

    let requeued = app.service.requeue_failed(10).await.unwrap();
    assert_eq!(requeued, 2);
    assert_eq!(app.queue.pending_len(), 2);

    // Everything is pending again; a second bulk pass finds nothing
    let requeued = app.service.requeue_failed(10).await.unwrap();
    assert_eq!(requeued, 0);
}

#[tokio::test]
async fn test_transient_recovery_leaves_permanent_failures_terminal() {
    let app = build_app(ScriptedTransport::new(vec![
        api_err(Some(403), "Forbidden: bot was blocked by the user"),
        api_err(Some(502), "Bad Gateway"),
        Ok("msg-3".to_string()),
    ]));

    let blocked = app.service.send(&booking_request("u1")).await.unwrap();
    let flaky = app.service.send(&booking_request("u2")).await.unwrap();
    for _ in 0..2 {
        let job = app.queue.recv().await.unwrap();
        app.worker.execute(job.notification_id).await.unwrap();
    }

    // Only the row with a scheduled retry is revived
    let recovered = app.service.recover_transient_failures(10).await.unwrap();
    assert_eq!(recovered, 1);
    assert_eq!(app.queue.pending_len(), 1);

    let blocked_row = app.store.get(blocked.notification_id).await.unwrap().unwrap();
    assert_eq!(blocked_row.status, NotificationStatus::Failed);
    assert!(blocked_row.next_retry_at.is_none());

    let flaky_row = app.store.get(flaky.notification_id).await.unwrap().unwrap();
    assert_eq!(flaky_row.status, NotificationStatus::Pending);

    let job = app.queue.recv().await.unwrap();
    assert_eq!(job.notification_id, flaky.notification_id);
    let outcome = app.worker.execute(job.notification_id).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Sent);
}

#[tokio::test]
async fn test_missing_template_enqueues_without_snapshot() {
    let app = build_app(ScriptedTransport::always_ok());
    let mut request = booking_request("u1");
    request.template_key = "unregistered.key".to_string();

    // Enqueue is deliberately tolerant of resolution failures
    let result = app.service.send(&request).await.unwrap();
    assert!(!result.skipped);

    let row = app.store.get(result.notification_id).await.unwrap().unwrap();
    assert_eq!(row.status, NotificationStatus::Pending);
    assert!(row.template_snapshot.is_none());

    // The worker settles it as a permanent failure
    let job = app.queue.recv().await.unwrap();
    let outcome = app.worker.execute(job.notification_id).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::FailedPermanently);
    assert_eq!(app.transport.send_count(), 0);
}
