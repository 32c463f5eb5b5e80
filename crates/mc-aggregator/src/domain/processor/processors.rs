//! Group processors shipped with the engine.

use super::{GroupProcessor, ProcessedOutput};
use crate::domain::errors::ProcessingError;
use crate::domain::group::MessageGroup;
use serde::Serialize;
use serde_json::{json, Value};
use shared_types::{
    event_types, header_names, payload_types, Message, MessageEventPayload, ReceiveMessagePayload,
    StartMessagePayload,
};

/// START + SENT: payload that starts a process instance named after the start
/// definition, carrying the sender's business key and variables.
///
/// Consumes the subscriber and the first SENT; later SENT members stay buffered.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartMessagePayloadProcessor;

impl GroupProcessor for StartMessagePayloadProcessor {
    fn name(&self) -> &'static str {
        "start-message-payload"
    }

    fn process(
        &self,
        group: &MessageGroup,
        output: &mut ProcessedOutput,
    ) -> Result<(), ProcessingError> {
        if output.has_payload() {
            return Ok(());
        }
        let Some(start) = group.find_kind(event_types::START_MESSAGE_DEPLOYED) else {
            return Ok(());
        };

        let sent_message = sent_member(group)?;
        let sent = decode(sent_message)?;
        let start_event = decode(start)?;

        let payload = StartMessagePayload {
            name: start_event.name,
            business_key: sent.business_key,
            variables: sent.variables,
        };
        emit(output, &payload, payload_types::START_MESSAGE_PAYLOAD, group)?;
        output.consume(start);
        output.consume(sent_message);
        Ok(())
    }
}

/// WAITING + SENT: payload that resumes the waiting instance, carrying the
/// subscription's name and correlation key and the sender's variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveMessagePayloadProcessor;

impl GroupProcessor for ReceiveMessagePayloadProcessor {
    fn name(&self) -> &'static str {
        "receive-message-payload"
    }

    fn process(
        &self,
        group: &MessageGroup,
        output: &mut ProcessedOutput,
    ) -> Result<(), ProcessingError> {
        if output.has_payload() {
            return Ok(());
        }
        let Some(waiting) = group.find_kind(event_types::MESSAGE_WAITING) else {
            return Ok(());
        };

        let sent_message = sent_member(group)?;
        let sent = decode(sent_message)?;
        let waiting_event = decode(waiting)?;

        let payload = ReceiveMessagePayload {
            name: waiting_event.name,
            correlation_key: waiting_event.correlation_key,
            variables: sent.variables,
        };
        emit(output, &payload, payload_types::RECEIVE_MESSAGE_PAYLOAD, group)?;
        output.consume(waiting);
        output.consume(sent_message);
        Ok(())
    }
}

/// Fallback: `{"members": [...]}` holding every member payload in arrival order.
/// Consumes the whole group.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergedMembersProcessor;

impl GroupProcessor for MergedMembersProcessor {
    fn name(&self) -> &'static str {
        "merged-members"
    }

    fn process(
        &self,
        group: &MessageGroup,
        output: &mut ProcessedOutput,
    ) -> Result<(), ProcessingError> {
        if output.has_payload() || group.is_empty() {
            return Ok(());
        }

        let members: Vec<Value> = group.members().iter().map(|m| m.payload().clone()).collect();
        output.payload = Some(json!({ "members": members }));
        for member in group.members() {
            output.consume(member);
        }
        output.set_header(
            header_names::MESSAGE_PAYLOAD_TYPE,
            payload_types::MERGED_MESSAGE_PAYLOAD,
        );
        Ok(())
    }
}

/// Copies routing headers from the members and stamps the correlation id.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboundHeadersProcessor;

impl GroupProcessor for OutboundHeadersProcessor {
    fn name(&self) -> &'static str {
        "outbound-headers"
    }

    fn process(
        &self,
        group: &MessageGroup,
        output: &mut ProcessedOutput,
    ) -> Result<(), ProcessingError> {
        for header in header_names::ROUTING {
            if let Some(value) = group.members().iter().find_map(|m| m.header(header)) {
                output.set_header(header, value);
            }
        }
        output.set_header(header_names::CORRELATION_ID, group.key().as_str());
        Ok(())
    }
}

fn sent_member(group: &MessageGroup) -> Result<&Message, ProcessingError> {
    group
        .find_kind(event_types::MESSAGE_SENT)
        .ok_or_else(|| ProcessingError::MissingMember {
            correlation_key: group.key().to_string(),
            kind: event_types::MESSAGE_SENT,
        })
}

fn decode(message: &Message) -> Result<MessageEventPayload, ProcessingError> {
    message
        .payload_as::<MessageEventPayload>()
        .map_err(|e| ProcessingError::InvalidPayload {
            message_id: message.id().to_string(),
            reason: e.to_string(),
        })
}

fn emit<T: Serialize>(
    output: &mut ProcessedOutput,
    payload: &T,
    payload_type: &str,
    group: &MessageGroup,
) -> Result<(), ProcessingError> {
    let value = serde_json::to_value(payload).map_err(|e| ProcessingError::InvalidPayload {
        message_id: group.key().to_string(),
        reason: e.to_string(),
    })?;
    output.payload = Some(value);
    output.set_header(header_names::MESSAGE_PAYLOAD_TYPE, payload_type);
    Ok(())
}
