//! # End-to-End Aggregation Scenarios
//!
//! Drives the engine through its public API with a manual clock and the
//! in-process event bus as the outbound destination.
//!
//! ## Test Categories
//!
//! 1. **Release on completion** - a group releases as soon as it is complete
//! 2. **Expiry** - incomplete groups are resolved by the sweeper
//! 3. **Discard path** - duplicates and uncorrelated messages
//! 4. **Control bus** - operator commands against a live engine
//! 5. **Delivery** - outputs a stalled subscriber cannot take

use mc_aggregator::{
    AggregationPipeline, AggregatorApi, AggregatorConfig, AggregatorDependencies,
    AggregatorService, BusDispatcher, ControlBus, ControlCommand, ControlReply, CorrelationKey,
    GroupProcessorChain, HeaderAttributeResolver, InMemoryDedupStore, InMemoryGroupStore,
    ManualTimeSource, PartialReleaseOnExpiryStrategy, ReleaseStrategyChain,
    RequiredKindsReleaseStrategy, SubmitOutcome,
};
use serde_json::json;
use shared_bus::{
    BusEvent, DiscardReason, EventFilter, EventSubscriber, InMemoryEventBus, Subscription,
};
use shared_types::{header_names, Message, MessageId};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// TEST HELPERS
// =============================================================================

type Engine = AggregatorService<
    InMemoryGroupStore,
    InMemoryDedupStore,
    ManualTimeSource,
    BusDispatcher<InMemoryEventBus>,
>;

/// Header naming the role of a member in the generic scenarios.
const ROLE: &str = "role";

struct Harness {
    engine: Arc<Engine>,
    clock: ManualTimeSource,
    events: Subscription,
}

/// Release when members with roles `start` and `match` are both present,
/// groups expire after 5s.
fn harness(release: ReleaseStrategyChain) -> Harness {
    harness_on(InMemoryEventBus::new(), release)
}

fn harness_on(bus: InMemoryEventBus, release: ReleaseStrategyChain) -> Harness {
    let config = AggregatorConfig::new().with_group_timeout(Duration::from_secs(5));
    let bus = Arc::new(bus);
    let events = bus.subscribe(EventFilter::all());
    let clock = ManualTimeSource::new(0);

    let pipeline = AggregationPipeline::new(
        HeaderAttributeResolver::new(header_names::CORRELATION_ID),
        release,
        GroupProcessorChain::merged(),
        &config,
    );
    let deps = AggregatorDependencies::in_memory(&config, BusDispatcher::new(bus))
        .with_time_source(clock.clone());

    Harness {
        engine: Arc::new(AggregatorService::new(config, pipeline, deps)),
        clock,
        events,
    }
}

fn start_and_match() -> ReleaseStrategyChain {
    ReleaseStrategyChain::first(RequiredKindsReleaseStrategy::new(["start", "match"]).on_header(ROLE))
        .build()
}

fn member(role: &str, key: &str) -> Message {
    Message::builder(json!({ "role": role }))
        .header(header_names::CORRELATION_ID, key)
        .header(ROLE, role)
        .build()
}

fn drain(events: &mut Subscription) -> Vec<BusEvent> {
    std::iter::from_fn(|| events.try_recv().ok().flatten()).collect()
}

// =============================================================================
// RELEASE ON COMPLETION
// =============================================================================

#[tokio::test]
async fn test_completing_message_releases_immediately() {
    let Harness {
        engine,
        clock,
        mut events,
    } = harness(start_and_match());

    let first = engine.submit(member("start", "K1")).await.unwrap();
    assert!(matches!(first, SubmitOutcome::Pending { members: 1, .. }));

    clock.set(1_000);
    let second = engine.submit(member("match", "K1")).await.unwrap();
    assert_eq!(
        second,
        SubmitOutcome::Released {
            correlation_key: CorrelationKey::from("K1")
        }
    );

    let BusEvent::Resolved {
        correlation_key,
        message,
    } = events.recv().await.unwrap()
    else {
        panic!("expected a resolved event");
    };
    assert_eq!(correlation_key, "K1");
    assert_eq!(
        message.payload()["members"],
        json!([{ "role": "start" }, { "role": "match" }])
    );
    assert!(engine.inspect(&CorrelationKey::from("K1")).await.is_none());
}

#[tokio::test]
async fn test_key_reused_after_release_starts_new_group() {
    let Harness {
        engine,
        clock,
        mut events,
    } = harness(start_and_match());

    engine.submit(member("start", "K")).await.unwrap();
    engine.submit(member("match", "K")).await.unwrap();

    clock.set(2_000);
    engine.submit(member("start", "K")).await.unwrap();

    let snapshot = engine.inspect(&CorrelationKey::from("K")).await.unwrap();
    assert_eq!(snapshot.member_ids.len(), 1);
    assert_eq!(snapshot.created_at, 2_000);
    assert_eq!(snapshot.expires_at, 7_000);

    let released = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, BusEvent::Resolved { .. }))
        .count();
    assert_eq!(released, 1);
}

// =============================================================================
// EXPIRY
// =============================================================================

#[tokio::test]
async fn test_incomplete_group_discarded_after_deadline() {
    let Harness {
        engine,
        clock,
        mut events,
    } = harness(start_and_match());

    engine.submit(member("start", "K2")).await.unwrap();

    clock.set(4_000);
    assert!(engine.sweep_expired().await.is_idle());

    clock.set(5_000);
    let report = engine.sweep_expired().await;
    assert_eq!(report.discarded, 1);
    assert_eq!(report.released, 0);

    let all = drain(&mut events);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].discard_reason(), Some(DiscardReason::ExpiredUnmatched));
    assert_eq!(all[0].correlation_key(), Some("K2"));
    assert_eq!(engine.status().pending_groups, 0);
}

#[tokio::test]
async fn test_forced_evaluation_may_release_partial_group() {
    let Harness {
        engine,
        clock,
        mut events,
    } = harness(
        ReleaseStrategyChain::first(RequiredKindsReleaseStrategy::new(["start", "match"]).on_header(ROLE))
            .then(PartialReleaseOnExpiryStrategy::new(2))
            .build(),
    );

    engine.submit(member("start", "A")).await.unwrap();
    engine.submit(member("other", "A")).await.unwrap();
    engine.submit(member("start", "B")).await.unwrap();

    clock.set(6_000);
    let report = engine.sweep_expired().await;

    assert_eq!(report.released, 1);
    assert_eq!(report.discarded, 1);
    let all = drain(&mut events);
    assert!(all
        .iter()
        .any(|e| matches!(e, BusEvent::Resolved { correlation_key, .. } if correlation_key == "A")));
    assert!(all
        .iter()
        .any(|e| e.correlation_key() == Some("B")
            && e.discard_reason() == Some(DiscardReason::ExpiredUnmatched)));
    assert_eq!(engine.status().pending_groups, 0);
}

// =============================================================================
// DISCARD PATH
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_appends_once() {
    let Harness {
        engine,
        clock: _clock,
        mut events,
    } = harness(start_and_match());

    let m1 = Message::builder(json!({ "role": "start" }))
        .id(MessageId::new())
        .header(header_names::CORRELATION_ID, "K3")
        .header(ROLE, "start")
        .build();

    let a = tokio::spawn({
        let engine = Arc::clone(&engine);
        let m1 = m1.clone();
        async move { engine.submit(m1).await }
    });
    let b = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.submit(m1).await }
    });
    let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

    let duplicates = outcomes
        .iter()
        .filter(|o| o.discard_reason() == Some(DiscardReason::Duplicate))
        .count();
    assert_eq!(duplicates, 1);

    let snapshot = engine.inspect(&CorrelationKey::from("K3")).await.unwrap();
    assert_eq!(snapshot.member_ids.len(), 1);

    let all = drain(&mut events);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].discard_reason(), Some(DiscardReason::Duplicate));
}

#[tokio::test]
async fn test_uncorrelated_message_discarded() {
    let Harness {
        engine, mut events, ..
    } = harness(start_and_match());

    let outcome = engine
        .submit(Message::builder(json!({ "role": "start" })).header(ROLE, "start").build())
        .await
        .unwrap();

    assert_eq!(
        outcome.discard_reason(),
        Some(DiscardReason::MissingCorrelationData)
    );
    assert_eq!(
        events.recv().await.unwrap().discard_reason(),
        Some(DiscardReason::MissingCorrelationData)
    );
    assert_eq!(engine.status().pending_groups, 0);
}

// =============================================================================
// CONTROL BUS
// =============================================================================

#[tokio::test]
async fn test_control_bus_round_trip() {
    let Harness {
        engine, mut events, ..
    } = harness(start_and_match());
    let control = ControlBus::new(Arc::clone(&engine));

    engine.submit(member("start", "K")).await.unwrap();

    let ControlReply::Snapshot { group, .. } = control.execute_line("inspect K").await else {
        panic!("expected a snapshot");
    };
    assert_eq!(group.unwrap().member_kinds.len(), 1);

    assert_eq!(
        control.execute(ControlCommand::Stop).await,
        ControlReply::Ack { command: "stop" }
    );
    assert!(engine.submit(member("match", "K")).await.is_err());

    control.execute_line("start").await;
    control.execute_line("pause-sweeper").await;
    let ControlReply::Status(status) = control.execute_line("status").await else {
        panic!("expected a status");
    };
    assert!(status.running);
    assert!(status.sweeper_paused);
    assert_eq!(status.pending_groups, 1);

    let ControlReply::Expired { outcome, .. } = control.execute_line("force-expire K").await else {
        panic!("expected an expire reply");
    };
    assert_eq!(
        outcome.and_then(|o| o.discard_reason()),
        Some(DiscardReason::ExpiredUnmatched)
    );
    assert_eq!(
        events.recv().await.unwrap().discard_reason(),
        Some(DiscardReason::ExpiredUnmatched)
    );

    assert!(matches!(
        control.execute_line("bogus").await,
        ControlReply::Error { .. }
    ));
}

// =============================================================================
// DELIVERY
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stalled_subscriber_escalates_to_dead_letter() {
    let bus = InMemoryEventBus::with_capacity(1).with_publish_timeout(Duration::from_millis(100));
    let Harness {
        engine, mut events, ..
    } = harness_on(bus, start_and_match());

    engine.submit(member("start", "A")).await.unwrap();
    assert!(engine.submit(member("match", "A")).await.unwrap().is_released());

    // A's output is still unread, so B's cannot be sent
    engine.submit(member("start", "B")).await.unwrap();
    let outcome = engine.submit(member("match", "B")).await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::DispatchFailed {
            correlation_key: CorrelationKey::from("B")
        }
    );

    let status = engine.status();
    assert_eq!(status.released, 1);
    assert_eq!(status.dispatch_failures, 1);
    assert_eq!(status.pending_groups, 0);

    let all = drain(&mut events);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].correlation_key(), Some("A"));
}
