//! # Control Bus
//!
//! Operator commands addressed to a running aggregator.
//!
//! Commands have a one-line text form, used by the runtime:
//!
//! | Command | Effect |
//! |---------|--------|
//! | `status` | Operational counters |
//! | `inspect <key>` | Snapshot of one group |
//! | `force-expire <key>` | Resolve a group now, as if its deadline had passed (alias `expire`) |
//! | `pause-sweeper` / `resume-sweeper` | Suspend or resume expiry sweeps |
//! | `stop` / `start` | Refuse or accept new submissions |

use crate::domain::correlation::CorrelationKey;
use crate::domain::group::GroupSnapshot;
use crate::ports::inbound::{AggregatorApi, AggregatorStatus, SubmitOutcome};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// An operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    ForceExpire(CorrelationKey),
    Inspect(CorrelationKey),
    PauseSweeper,
    ResumeSweeper,
    Stop,
    Start,
    Status,
}

impl ControlCommand {
    /// Text name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ForceExpire(_) => "force-expire",
            Self::Inspect(_) => "inspect",
            Self::PauseSweeper => "pause-sweeper",
            Self::ResumeSweeper => "resume-sweeper",
            Self::Stop => "stop",
            Self::Start => "start",
            Self::Status => "status",
        }
    }
}

/// A command line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}'")]
    Unknown(String),

    #[error("Command '{0}' requires a correlation key")]
    MissingKey(&'static str),
}

impl FromStr for ControlCommand {
    type Err = ControlParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let verb = parts.next().filter(|v| !v.is_empty()).ok_or(ControlParseError::Empty)?;
        let key = parts
            .next()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(CorrelationKey::from);

        match verb.to_ascii_lowercase().as_str() {
            "force-expire" | "expire" => key
                .map(Self::ForceExpire)
                .ok_or(ControlParseError::MissingKey("force-expire")),
            "inspect" => key.map(Self::Inspect).ok_or(ControlParseError::MissingKey("inspect")),
            "pause-sweeper" => Ok(Self::PauseSweeper),
            "resume-sweeper" => Ok(Self::ResumeSweeper),
            "stop" => Ok(Self::Stop),
            "start" => Ok(Self::Start),
            "status" => Ok(Self::Status),
            _ => Err(ControlParseError::Unknown(verb.to_owned())),
        }
    }
}

/// Answer to a control command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reply", rename_all = "kebab-case")]
pub enum ControlReply {
    /// A state change was applied.
    Ack { command: &'static str },

    /// Result of `inspect`. `group` is absent when no group exists.
    #[serde(rename_all = "camelCase")]
    Snapshot {
        correlation_key: CorrelationKey,
        group: Option<GroupSnapshot>,
    },

    /// Result of `force-expire`. `outcome` is absent when no group existed.
    #[serde(rename_all = "camelCase")]
    Expired {
        correlation_key: CorrelationKey,
        outcome: Option<SubmitOutcome>,
    },

    Status(AggregatorStatus),

    /// The command line was rejected.
    Error { message: String },
}

/// Executes control commands against an aggregator.
pub struct ControlBus<A> {
    api: Arc<A>,
}

impl<A> Clone for ControlBus<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<A: AggregatorApi> ControlBus<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Execute one command.
    pub async fn execute(&self, command: ControlCommand) -> ControlReply {
        info!(command = command.name(), "Control command");
        match command {
            ControlCommand::ForceExpire(key) => {
                let outcome = self.api.force_expire(&key).await;
                ControlReply::Expired {
                    correlation_key: key,
                    outcome,
                }
            }
            ControlCommand::Inspect(key) => {
                let group = self.api.inspect(&key).await;
                ControlReply::Snapshot {
                    correlation_key: key,
                    group,
                }
            }
            ControlCommand::PauseSweeper => {
                self.api.pause_sweeper();
                ControlReply::Ack {
                    command: "pause-sweeper",
                }
            }
            ControlCommand::ResumeSweeper => {
                self.api.resume_sweeper();
                ControlReply::Ack {
                    command: "resume-sweeper",
                }
            }
            ControlCommand::Stop => {
                self.api.stop();
                ControlReply::Ack { command: "stop" }
            }
            ControlCommand::Start => {
                self.api.start();
                ControlReply::Ack { command: "start" }
            }
            ControlCommand::Status => ControlReply::Status(self.api.status()),
        }
    }

    /// Parse and execute a text command. Parse errors become `Error` replies.
    pub async fn execute_line(&self, line: &str) -> ControlReply {
        match line.parse::<ControlCommand>() {
            Ok(command) => self.execute(command).await,
            Err(e) => ControlReply::Error {
                message: e.to_string(),
            },
        }
    }
}
