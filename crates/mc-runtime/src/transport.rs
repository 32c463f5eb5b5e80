//! JSON-lines transport.
//!
//! Input: one serialized `Message` per line, or a control command prefixed
//! with `:`. Output: one JSON document per line.

use serde::Serialize;
use shared_types::Message;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Prefix marking a control command line.
pub const CONTROL_PREFIX: char = ':';

/// One parsed input line.
#[derive(Debug, PartialEq)]
pub enum InboundLine {
    Message(Box<Message>),
    Control(String),
    Blank,
}

/// Parse one input line.
pub fn parse_line(line: &str) -> serde_json::Result<InboundLine> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(InboundLine::Blank);
    }
    if let Some(command) = line.strip_prefix(CONTROL_PREFIX) {
        return Ok(InboundLine::Control(command.trim().to_owned()));
    }
    serde_json::from_str(line).map(|message| InboundLine::Message(Box::new(message)))
}

/// Handle for queueing output lines.
#[derive(Clone)]
pub struct OutputSink {
    sender: mpsc::Sender<String>,
}

impl OutputSink {
    /// Spawn a writer task draining into `writer`. The task ends when every
    /// sink is dropped and hands the writer back.
    pub fn spawn<W>(mut writer: W, capacity: usize) -> (Self, JoinHandle<std::io::Result<W>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<String>(capacity);
        let handle = tokio::spawn(async move {
            while let Some(line) = receiver.recv().await {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok(writer)
        });
        (Self { sender }, handle)
    }

    /// Serialize `value` and queue it. Returns `false` once the writer is gone.
    pub async fn emit<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(line) => self.sender.send(line).await.is_ok(),
            Err(e) => {
                warn!(error = %e, "Output not serializable");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::header_names;

    #[test]
    fn test_parse_message_line_with_defaults() {
        let line = r#"{"headers":{"correlationId":"K"},"payload":{"n":1}}"#;
        let InboundLine::Message(message) = parse_line(line).unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(message.header(header_names::CORRELATION_ID), Some("K"));
        assert_eq!(message.payload(), &json!({"n": 1}));
    }

    #[test]
    fn test_parse_control_and_blank_lines() {
        assert_eq!(
            parse_line("  :inspect K ").unwrap(),
            InboundLine::Control("inspect K".into())
        );
        assert_eq!(parse_line("   ").unwrap(), InboundLine::Blank);
        assert!(parse_line("{not json").is_err());
    }

    #[tokio::test]
    async fn test_output_sink_writes_lines() {
        let (sink, handle) = OutputSink::spawn(Vec::new(), 4);
        assert!(sink.emit(&json!({"a": 1})).await);
        assert!(sink.emit(&"two").await);
        drop(sink);

        let written = handle.await.unwrap().unwrap();
        assert_eq!(String::from_utf8(written).unwrap(), "{\"a\":1}\n\"two\"\n");
    }
}
