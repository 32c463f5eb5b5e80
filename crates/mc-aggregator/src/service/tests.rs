use super::*;
use crate::adapters::dispatcher::ChannelDispatcher;
use crate::adapters::time::ManualTimeSource;
use crate::domain::errors::AggregatorError;
use crate::ports::inbound::AggregatorApi;
use serde_json::json;
use shared_bus::BusEvent;
use shared_types::{event_types, header_names, MessageEventPayload, ReceiveMessagePayload};
use std::time::Duration;
use tokio::sync::mpsc;

type TestService =
    AggregatorService<InMemoryGroupStore, InMemoryDedupStore, ManualTimeSource, ChannelDispatcher>;

fn service(config: AggregatorConfig) -> (TestService, ManualTimeSource, mpsc::Receiver<BusEvent>) {
    let clock = ManualTimeSource::new(0);
    let (dispatcher, events) = ChannelDispatcher::channel(64);
    let pipeline = AggregationPipeline::message_connector(&config);
    let deps = AggregatorDependencies::in_memory(&config, dispatcher).with_time_source(clock.clone());
    (AggregatorService::new(config, pipeline, deps), clock, events)
}

fn default_service() -> (TestService, ManualTimeSource, mpsc::Receiver<BusEvent>) {
    service(AggregatorConfig::new().with_group_timeout(Duration::from_secs(5)))
}

fn event(kind: &str, payload: MessageEventPayload) -> Message {
    Message::builder_from(&payload)
        .unwrap()
        .header(header_names::MESSAGE_EVENT_TYPE, kind)
        .header(header_names::APP_NAME, "rb")
        .header(header_names::MESSAGE_EVENT_NAME, "order")
        .header(header_names::MESSAGE_EVENT_CORRELATION_KEY, "42")
        .build()
}

fn waiting() -> Message {
    event(
        event_types::MESSAGE_WAITING,
        MessageEventPayload::named("order").with_correlation_key(Some("42")),
    )
}

fn sent() -> Message {
    event(
        event_types::MESSAGE_SENT,
        MessageEventPayload::named("order").with_variable("amount", 10),
    )
}

fn received() -> Message {
    event(
        event_types::MESSAGE_RECEIVED,
        MessageEventPayload::named("order").with_correlation_key(Some("42")),
    )
}

fn key() -> CorrelationKey {
    CorrelationKey::from("rb:order:42")
}

#[tokio::test]
async fn test_waiting_and_sent_release_receive_payload() {
    let (service, clock, mut events) = default_service();

    let first = service.submit(waiting()).await.unwrap();
    assert_eq!(
        first,
        SubmitOutcome::Pending {
            correlation_key: key(),
            members: 1
        }
    );

    clock.set(1_000);
    let second = service.submit(sent()).await.unwrap();
    assert_eq!(second, SubmitOutcome::Released { correlation_key: key() });

    let BusEvent::Resolved { correlation_key, message } = events.recv().await.unwrap() else {
        panic!("expected a resolved event");
    };
    assert_eq!(correlation_key, "rb:order:42");
    let payload: ReceiveMessagePayload = message.payload_as().unwrap();
    assert_eq!(payload.variables["amount"], 10);
    assert_eq!(message.header(header_names::CORRELATION_ID), Some("rb:order:42"));

    let status = service.status();
    assert_eq!(status.pending_groups, 0);
    assert_eq!(status.released, 1);
    assert_eq!(status.held_locks, 0);
}

#[tokio::test]
async fn test_unconsumed_sender_stays_buffered_after_release() {
    let (service, _clock, mut events) = default_service();
    let first = sent();
    let second = sent();

    service.submit(first).await.unwrap();
    service.submit(second.clone()).await.unwrap();
    let outcome = service.submit(waiting()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Released { correlation_key: key() });
    assert!(matches!(events.recv().await.unwrap(), BusEvent::Resolved { .. }));

    let snapshot = service.inspect(&key()).await.unwrap();
    assert_eq!(snapshot.member_ids, vec![second.id()]);
    assert_eq!(snapshot.member_kinds, vec![event_types::MESSAGE_SENT.to_owned()]);
    assert_eq!(service.status().pending_groups, 1);

    // The next subscriber picks up the buffered sender
    assert!(service.submit(waiting()).await.unwrap().is_released());
    assert_eq!(service.status().pending_groups, 0);
    assert_eq!(service.status().released, 2);
}

#[tokio::test]
async fn test_received_settles_waiting_subscriber() {
    let (service, clock, mut events) = default_service();
    service.submit(waiting()).await.unwrap();

    let outcome = service.submit(received()).await.unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Discarded {
            reason: DiscardReason::Acknowledged,
            correlation_key: Some(key())
        }
    );
    let BusEvent::Discarded(notice) = events.recv().await.unwrap() else {
        panic!("expected a discard");
    };
    assert_eq!(notice.messages.len(), 2);
    assert_eq!(service.status().pending_groups, 0);

    // Nothing is left to expire as unmatched
    clock.set(10_000);
    assert!(service.sweep_expired().await.is_idle());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_lone_received_does_not_open_group() {
    let (service, _clock, mut events) = default_service();

    let outcome = service.submit(received()).await.unwrap();

    assert_eq!(outcome.discard_reason(), Some(DiscardReason::Acknowledged));
    assert_eq!(
        events.recv().await.unwrap().discard_reason(),
        Some(DiscardReason::Acknowledged)
    );
    assert!(service.inspect(&key()).await.is_none());
    assert_eq!(service.status().pending_groups, 0);
}

#[tokio::test]
async fn test_duplicate_is_discarded() {
    let (service, _clock, mut events) = default_service();
    let message = waiting();

    service.submit(message.clone()).await.unwrap();
    let outcome = service.submit(message).await.unwrap();

    assert_eq!(outcome.discard_reason(), Some(DiscardReason::Duplicate));
    assert_eq!(
        events.recv().await.unwrap().discard_reason(),
        Some(DiscardReason::Duplicate)
    );
    let snapshot = service.inspect(&key()).await.unwrap();
    assert_eq!(snapshot.member_ids.len(), 1);
}

#[tokio::test]
async fn test_event_id_header_deduplicates_distinct_envelopes() {
    let (service, _clock, _events) = default_service();
    let a = waiting().with_header(header_names::MESSAGE_EVENT_ID, "evt-1");
    let b = sent().with_header(header_names::MESSAGE_EVENT_ID, "evt-1");

    service.submit(a).await.unwrap();
    let outcome = service.submit(b).await.unwrap();

    assert_eq!(outcome.discard_reason(), Some(DiscardReason::Duplicate));
    assert_eq!(service.status().pending_groups, 1);
}

#[tokio::test]
async fn test_missing_correlation_data() {
    let (service, _clock, mut events) = default_service();
    let message = Message::builder(json!({"name": "order"}))
        .header(header_names::MESSAGE_EVENT_NAME, "order")
        .build();

    let outcome = service.submit(message).await.unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Discarded {
            reason: DiscardReason::MissingCorrelationData,
            correlation_key: None
        }
    );
    let BusEvent::Discarded(notice) = events.recv().await.unwrap() else {
        panic!("expected a discard");
    };
    assert!(notice.detail.unwrap().contains(header_names::APP_NAME));
    assert!(service.status().pending_groups == 0);
}

#[tokio::test]
async fn test_cancelled_subscription_rejects_group() {
    let (service, _clock, mut events) = default_service();
    service.submit(waiting()).await.unwrap();

    let cancelled = event(
        event_types::MESSAGE_SUBSCRIPTION_CANCELLED,
        MessageEventPayload::named("order"),
    );
    let outcome = service.submit(cancelled).await.unwrap();

    assert_eq!(outcome.discard_reason(), Some(DiscardReason::Rejected));
    let BusEvent::Discarded(notice) = events.recv().await.unwrap() else {
        panic!("expected a discard");
    };
    assert_eq!(notice.messages.len(), 2);
    assert_eq!(service.status().pending_groups, 0);
}

#[tokio::test]
async fn test_processing_failure_discards_members() {
    let (service, _clock, mut events) = default_service();
    service.submit(waiting()).await.unwrap();

    let broken = Message::builder(json!("not an event"))
        .headers(sent().headers())
        .build();
    let outcome = service.submit(broken).await.unwrap();

    assert_eq!(outcome.discard_reason(), Some(DiscardReason::ProcessingFailed));
    let BusEvent::Discarded(notice) = events.recv().await.unwrap() else {
        panic!("expected a discard");
    };
    assert_eq!(notice.messages.len(), 2);
    assert!(notice.detail.is_some());
    assert!(service.inspect(&key()).await.is_none());
}

#[tokio::test]
async fn test_dispatch_failure_counts_and_removes_group() {
    let (service, _clock, events) = default_service();
    service.submit(waiting()).await.unwrap();
    drop(events);

    let outcome = service.submit(sent()).await.unwrap();

    assert_eq!(outcome, SubmitOutcome::DispatchFailed { correlation_key: key() });
    let status = service.status();
    assert_eq!(status.dispatch_failures, 1);
    assert_eq!(status.released, 0);
    assert_eq!(status.pending_groups, 0);
}

#[tokio::test]
async fn test_stopped_service_does_not_consume() {
    let (service, _clock, _events) = default_service();
    let message = waiting();

    service.stop();
    assert_eq!(service.submit(message.clone()).await, Err(AggregatorError::Stopped));
    assert_eq!(service.status().dedup_records, 0);

    service.start();
    assert!(matches!(
        service.submit(message).await,
        Ok(SubmitOutcome::Pending { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_lock_timeout_leaves_message_retryable() {
    let (service, _clock, _events) = service(
        AggregatorConfig::new().with_lock_timeout(Duration::from_millis(50)),
    );
    let message = waiting();

    let held = service.locks.acquire(&key()).await;
    let result = service.submit(message.clone()).await;
    assert!(matches!(result, Err(AggregatorError::LockTimeout(_))));
    assert_eq!(service.status().dedup_records, 0);

    drop(held);
    assert!(matches!(
        service.submit(message).await,
        Ok(SubmitOutcome::Pending { members: 1, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_submit_rolls_back_dedup_record() {
    let (service, _clock, _events) = service(
        AggregatorConfig::new().with_lock_timeout(Duration::from_secs(10)),
    );
    let message = waiting();

    let held = service.locks.acquire(&key()).await;
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), service.submit(message.clone())).await;
    assert!(abandoned.is_err());
    assert_eq!(service.status().dedup_records, 0);

    drop(held);
    assert_eq!(
        service.submit(message).await,
        Ok(SubmitOutcome::Pending {
            correlation_key: key(),
            members: 1
        })
    );
    assert_eq!(service.status().dedup_records, 1);
}

#[tokio::test(start_paused = true)]
async fn test_inspect_busy_key_reports_nothing_until_released() {
    let (service, _clock, _events) = service(
        AggregatorConfig::new().with_lock_timeout(Duration::from_millis(50)),
    );
    service.submit(waiting()).await.unwrap();

    let held = service.locks.acquire(&key()).await;
    assert!(service.inspect(&key()).await.is_none());

    drop(held);
    assert_eq!(service.inspect(&key()).await.unwrap().member_ids.len(), 1);
}

#[tokio::test]
async fn test_capacity_exceeded() {
    let (service, _clock, mut events) = service(AggregatorConfig::new().with_max_pending_groups(1));
    service.submit(waiting()).await.unwrap();

    let other = Message::builder(json!({}))
        .header(header_names::CORRELATION_ID, "other")
        .build();
    let outcome = service.submit(other).await.unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Discarded {
            reason: DiscardReason::CapacityExceeded,
            correlation_key: Some(CorrelationKey::from("other"))
        }
    );
    assert_eq!(
        events.recv().await.unwrap().discard_reason(),
        Some(DiscardReason::CapacityExceeded)
    );
    // Existing keys still accept members
    assert!(service.submit(sent()).await.unwrap().is_released());
}

#[tokio::test]
async fn test_sweep_discards_expired_unmatched() {
    let (service, clock, mut events) = default_service();
    service.submit(waiting()).await.unwrap();

    clock.set(4_999);
    assert!(service.sweep_expired().await.is_idle());

    clock.set(5_000);
    let report = service.sweep_expired().await;
    assert_eq!(report.discarded, 1);
    assert_eq!(
        events.recv().await.unwrap().discard_reason(),
        Some(DiscardReason::ExpiredUnmatched)
    );
    assert_eq!(service.status().pending_groups, 0);
}

#[tokio::test]
async fn test_sweep_defers_locked_group() {
    let (service, clock, _events) = default_service();
    service.submit(waiting()).await.unwrap();
    clock.set(10_000);

    let held = service.locks.acquire(&key()).await;
    let report = service.sweep_expired().await;
    assert_eq!(report.deferred, 1);
    assert_eq!(service.status().pending_groups, 1);

    drop(held);
    assert_eq!(service.sweep_expired().await.discarded, 1);
}

#[tokio::test]
async fn test_paused_sweeper_skips() {
    let (service, clock, _events) = default_service();
    service.submit(waiting()).await.unwrap();
    clock.set(10_000);

    service.pause_sweeper();
    assert!(service.sweep_expired().await.paused);
    assert_eq!(service.status().pending_groups, 1);

    service.resume_sweeper();
    assert_eq!(service.sweep_expired().await.discarded, 1);
}

#[tokio::test]
async fn test_force_expire() {
    let (service, _clock, mut events) = default_service();
    assert_eq!(service.force_expire(&key()).await, None);

    service.submit(waiting()).await.unwrap();
    let outcome = service.force_expire(&key()).await.unwrap();

    assert_eq!(outcome.discard_reason(), Some(DiscardReason::ExpiredUnmatched));
    assert!(events.recv().await.is_some());
    assert!(service.inspect(&key()).await.is_none());
}

#[tokio::test]
async fn test_partial_release_on_expiry() {
    let config = AggregatorConfig::new();
    let pipeline = AggregationPipeline::new(
        MessageEventResolver,
        ReleaseStrategyChain::first(crate::domain::release::MessageSentReleaseStrategy)
            .then(crate::domain::release::PartialReleaseOnExpiryStrategy::new(1))
            .build(),
        GroupProcessorChain::merged(),
        &config,
    );
    let (dispatcher, mut events) = ChannelDispatcher::channel(8);
    let service = AggregatorService::new(
        config.clone(),
        pipeline,
        AggregatorDependencies::in_memory(&config, dispatcher).with_time_source(ManualTimeSource::new(0)),
    );

    service.submit(waiting()).await.unwrap();
    let outcome = service.force_expire(&key()).await.unwrap();

    assert!(outcome.is_released());
    let BusEvent::Resolved { message, .. } = events.recv().await.unwrap() else {
        panic!("expected a resolved event");
    };
    assert_eq!(message.payload()["members"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_header_timeout_override() {
    let (service, clock, _events) = service(
        AggregatorConfig::new()
            .with_group_timeout(Duration::from_secs(30))
            .with_group_timeout_header(header_names::GROUP_TIMEOUT),
    );
    let message = waiting().with_header(header_names::GROUP_TIMEOUT, "2000");
    service.submit(message).await.unwrap();

    let snapshot = service.inspect(&key()).await.unwrap();
    assert_eq!(snapshot.expires_at, 2_000);

    clock.set(2_000);
    assert_eq!(service.sweep_expired().await.discarded, 1);
}
