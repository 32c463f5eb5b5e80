use super::*;
use serde_json::json;
use shared_types::{
    event_types, header_names, payload_types, MessageEventPayload, ReceiveMessagePayload,
    StartMessagePayload,
};

fn event(kind: &str, payload: &MessageEventPayload) -> Message {
    Message::builder_from(payload)
        .unwrap()
        .header(header_names::MESSAGE_EVENT_TYPE, kind)
        .header(header_names::APP_NAME, "rb")
        .header(header_names::SERVICE_FULL_NAME, "rb-service")
        .build()
}

fn group(members: Vec<Message>) -> MessageGroup {
    let mut group = MessageGroup::new("rb:order:42".into(), 0, 5_000);
    for m in members {
        group.append(m, 0);
    }
    group
}

fn sent() -> Message {
    event(
        event_types::MESSAGE_SENT,
        &MessageEventPayload::named("order")
            .with_correlation_key(Some("42"))
            .with_business_key(Some("bk-1"))
            .with_variable("amount", 10),
    )
}

#[test]
fn test_start_message_payload() {
    let start = event(
        event_types::START_MESSAGE_DEPLOYED,
        &MessageEventPayload::named("start-order"),
    );
    let output = GroupProcessorChain::message_connector()
        .process(&group(vec![start, sent()]))
        .unwrap();

    let payload: StartMessagePayload = output.payload_as().unwrap();
    assert_eq!(payload.name, "start-order");
    assert_eq!(payload.business_key.as_deref(), Some("bk-1"));
    assert_eq!(payload.variables["amount"], 10);
    assert_eq!(
        output.header(header_names::MESSAGE_PAYLOAD_TYPE),
        Some(payload_types::START_MESSAGE_PAYLOAD)
    );
}

#[test]
fn test_receive_message_payload() {
    let waiting = event(
        event_types::MESSAGE_WAITING,
        &MessageEventPayload::named("order").with_correlation_key(Some("42")),
    );
    let output = GroupProcessorChain::message_connector()
        .process(&group(vec![waiting, sent()]))
        .unwrap();

    let payload: ReceiveMessagePayload = output.payload_as().unwrap();
    assert_eq!(payload.name, "order");
    assert_eq!(payload.correlation_key.as_deref(), Some("42"));
    assert_eq!(payload.variables["amount"], 10);
    assert_eq!(
        output.header(header_names::MESSAGE_PAYLOAD_TYPE),
        Some(payload_types::RECEIVE_MESSAGE_PAYLOAD)
    );
}

#[test]
fn test_outbound_headers_copied() {
    let waiting = event(event_types::MESSAGE_WAITING, &MessageEventPayload::named("order"));
    let output = GroupProcessorChain::message_connector()
        .process(&group(vec![waiting, sent()]))
        .unwrap();

    assert_eq!(output.header(header_names::APP_NAME), Some("rb"));
    assert_eq!(output.header(header_names::SERVICE_FULL_NAME), Some("rb-service"));
    assert_eq!(output.header(header_names::CORRELATION_ID), Some("rb:order:42"));
    assert_eq!(output.header(header_names::MESSAGE_EVENT_OUTPUT_DESTINATION), None);
}

#[test]
fn test_no_matching_definition() {
    let result = GroupProcessorChain::message_connector().process(&group(vec![sent()]));

    assert_eq!(
        result,
        Err(ProcessingError::NoMatchingDefinition {
            correlation_key: "rb:order:42".into()
        })
    );
}

#[test]
fn test_subscriber_without_sender_is_missing_member() {
    let waiting = event(event_types::MESSAGE_WAITING, &MessageEventPayload::named("order"));
    let result = GroupProcessorChain::message_connector().process(&group(vec![waiting]));

    assert!(matches!(
        result,
        Err(ProcessingError::MissingMember {
            kind: event_types::MESSAGE_SENT,
            ..
        })
    ));
}

#[test]
fn test_invalid_payload_reported() {
    let waiting = Message::builder(json!("not a payload"))
        .header(header_names::MESSAGE_EVENT_TYPE, event_types::MESSAGE_WAITING)
        .build();
    let result = GroupProcessorChain::message_connector().process(&group(vec![waiting, sent()]));

    assert!(matches!(result, Err(ProcessingError::InvalidPayload { .. })));
}

#[test]
fn test_merged_members_in_arrival_order() {
    let first = Message::builder(json!({"step": "start"})).build();
    let second = Message::builder(json!({"step": "match"})).build();

    let output = GroupProcessorChain::merged()
        .process(&group(vec![first, second]))
        .unwrap();

    assert_eq!(
        output.payload(),
        &json!({"members": [{"step": "start"}, {"step": "match"}]})
    );
    assert_eq!(output.header(header_names::CORRELATION_ID), Some("rb:order:42"));
}

#[test]
fn test_second_sender_is_not_consumed() {
    let waiting = event(event_types::MESSAGE_WAITING, &MessageEventPayload::named("order"));
    let first = sent();
    let second = sent();
    let group = group(vec![first.clone(), second.clone(), waiting.clone()]);

    let consolidated = GroupProcessorChain::message_connector()
        .consolidate(&group)
        .unwrap();

    assert_eq!(consolidated.consumed, vec![waiting.id(), first.id()]);
    assert!(!consolidated.consumes(&second));
}

struct Passthrough;

impl GroupProcessor for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn process(
        &self,
        group: &MessageGroup,
        output: &mut ProcessedOutput,
    ) -> Result<(), ProcessingError> {
        output.payload = Some(json!(group.len()));
        Ok(())
    }
}

#[test]
fn test_unmarked_stages_consume_whole_group() {
    let members = vec![sent(), sent()];
    let ids: Vec<_> = members.iter().map(Message::id).collect();

    let consolidated = GroupProcessorChain::first(Passthrough)
        .build()
        .consolidate(&group(members))
        .unwrap();

    assert_eq!(consolidated.message.payload(), &json!(2));
    assert_eq!(consolidated.consumed, ids);
}

#[test]
fn test_chain_order() {
    assert_eq!(
        GroupProcessorChain::message_connector().names(),
        vec![
            "start-message-payload",
            "receive-message-payload",
            "outbound-headers"
        ]
    );
}
