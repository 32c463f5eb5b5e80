//! # Group Processor Chain
//!
//! Turns a released group into one consolidated output message.
//!
//! Stages run in order over a shared [`ProcessedOutput`]. A stage may set the
//! payload, add headers, or fail; a failure stops the chain. Stages only read
//! the group. If no stage produced a payload the group matched no known
//! definition and the chain fails with `NoMatchingDefinition`.
//!
//! Stages mark the members they used as consumed. Members nobody consumed are
//! not part of the output; the service buffers them again. A chain whose
//! stages mark nothing consumes the whole group.

mod processors;
#[cfg(test)]
mod tests;

pub use processors::{
    MergedMembersProcessor, OutboundHeadersProcessor, ReceiveMessagePayloadProcessor,
    StartMessagePayloadProcessor,
};

use crate::domain::errors::ProcessingError;
use crate::domain::group::MessageGroup;
use serde_json::Value;
use shared_types::{Headers, Message, MessageId};

/// Output accumulated across the chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedOutput {
    /// Headers of the consolidated message.
    pub headers: Headers,
    /// Payload, once a stage recognised the group.
    pub payload: Option<Value>,
    /// Members the output was built from.
    pub consumed: Vec<MessageId>,
}

impl ProcessedOutput {
    /// Set a header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Whether a payload has been produced.
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Mark a member as used by the output.
    pub fn consume(&mut self, member: &Message) {
        let id = member.id();
        if !self.consumed.contains(&id) {
            self.consumed.push(id);
        }
    }
}

/// A released group turned into its output.
#[derive(Debug, Clone, PartialEq)]
pub struct Consolidated {
    /// The consolidated message.
    pub message: Message,
    /// Members the message was built from, in the order stages consumed them.
    pub consumed: Vec<MessageId>,
}

impl Consolidated {
    /// Whether `member` went into the output.
    pub fn consumes(&self, member: &Message) -> bool {
        self.consumed.contains(&member.id())
    }
}

/// One stage of the chain.
pub trait GroupProcessor: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Enrich the output from the group.
    fn process(&self, group: &MessageGroup, output: &mut ProcessedOutput)
        -> Result<(), ProcessingError>;
}

/// Ordered, immutable list of processors.
pub struct GroupProcessorChain {
    processors: Vec<Box<dyn GroupProcessor>>,
}

impl GroupProcessorChain {
    /// Start a chain with its first stage.
    pub fn first(processor: impl GroupProcessor + 'static) -> ProcessorChainBuilder {
        ProcessorChainBuilder {
            processors: vec![Box::new(processor)],
        }
    }

    /// Chain used by the message connector.
    pub fn message_connector() -> Self {
        Self::first(StartMessagePayloadProcessor)
            .then(ReceiveMessagePayloadProcessor)
            .then(OutboundHeadersProcessor)
            .build()
    }

    /// Generic chain: the member payloads in arrival order.
    pub fn merged() -> Self {
        Self::first(MergedMembersProcessor)
            .then(OutboundHeadersProcessor)
            .build()
    }

    /// Run every stage and build the consolidated message, reporting which
    /// members it consumed.
    ///
    /// # Errors
    ///
    /// The first stage failure, or `NoMatchingDefinition` when no stage
    /// produced a payload.
    pub fn consolidate(&self, group: &MessageGroup) -> Result<Consolidated, ProcessingError> {
        let mut output = ProcessedOutput::default();

        for processor in &self.processors {
            processor.process(group, &mut output)?;
        }

        let ProcessedOutput {
            headers,
            payload,
            mut consumed,
        } = output;
        let payload = payload.ok_or_else(|| ProcessingError::NoMatchingDefinition {
            correlation_key: group.key().to_string(),
        })?;
        if consumed.is_empty() {
            consumed = group.members().iter().map(Message::id).collect();
        }

        Ok(Consolidated {
            message: Message::builder(payload).headers(&headers).build(),
            consumed,
        })
    }

    /// [`consolidate`](Self::consolidate), keeping only the message.
    ///
    /// # Errors
    ///
    /// Same as `consolidate`.
    pub fn process(&self, group: &MessageGroup) -> Result<Message, ProcessingError> {
        self.consolidate(group).map(|consolidated| consolidated.message)
    }

    /// Names of the stages in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }
}

/// Builder for [`GroupProcessorChain`].
pub struct ProcessorChainBuilder {
    processors: Vec<Box<dyn GroupProcessor>>,
}

impl ProcessorChainBuilder {
    /// Append the next stage.
    pub fn then(mut self, processor: impl GroupProcessor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Freeze the chain.
    pub fn build(self) -> GroupProcessorChain {
        GroupProcessorChain {
            processors: self.processors,
        }
    }
}
