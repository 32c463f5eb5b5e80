//! Wiring of the engine, its background tasks and the transport.

use crate::transport::{parse_line, InboundLine, OutputSink};
use anyhow::{Context, Result};
use mc_aggregator::{
    AggregationPipeline, AggregatorConfig, AggregatorDependencies, AggregatorService,
    BusDispatcher, ControlBus, ExpirySweeper, InMemoryDedupStore, InMemoryGroupStore,
    SystemTimeSource, WorkerPool,
};
use shared_bus::{EventFilter, InMemoryEventBus};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

type Engine = AggregatorService<
    InMemoryGroupStore,
    InMemoryDedupStore,
    SystemTimeSource,
    BusDispatcher<InMemoryEventBus>,
>;

/// Output lines buffered ahead of the writer.
const OUTPUT_BUFFER: usize = 1024;

/// The running correlator.
pub struct CorrelatorRuntime {
    config: AggregatorConfig,
    /// Outbound event bus (resolved, discard, dead-letter topics).
    bus: Arc<InMemoryEventBus>,
    service: Arc<Engine>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CorrelatorRuntime {
    pub fn new(config: AggregatorConfig, pipeline: AggregationPipeline) -> Self {
        Self::with_bus(config, pipeline, InMemoryEventBus::new())
    }

    /// Publish onto `bus` instead of a default one.
    pub fn with_bus(config: AggregatorConfig, pipeline: AggregationPipeline, bus: InMemoryEventBus) -> Self {
        let bus = Arc::new(bus);
        let deps = AggregatorDependencies::in_memory(&config, BusDispatcher::new(Arc::clone(&bus)));
        let service = Arc::new(AggregatorService::new(config.clone(), pipeline, deps));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            bus,
            service,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Process `input` until it ends or Ctrl-C, writing events and control
    /// replies to `output`. Returns the writer once everything is flushed.
    ///
    /// ## Shutdown Sequence
    ///
    /// 1. Stop reading input
    /// 2. Drain in-flight submissions
    /// 3. Stop the sweeper
    /// 4. Drop the engine, which closes the event stream and flushes output
    pub async fn run<R, W>(self, input: R, output: W) -> Result<W>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            config,
            bus,
            service,
            shutdown_tx,
            shutdown_rx,
        } = self;

        let (sink, writer) = OutputSink::spawn(output, OUTPUT_BUFFER);

        // Subscribe before anything can be published
        let mut events = bus.event_stream(EventFilter::all());
        let printer = {
            let sink = sink.clone();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if !sink.emit(&event).await {
                        break;
                    }
                }
            })
        };

        let sweeper = ExpirySweeper::new(Arc::clone(&service), config.sweep_interval).spawn(shutdown_rx);

        let (inbound, queue) = mpsc::channel(config.worker_pool_size.saturating_mul(4).max(1));
        let pool = tokio::spawn(WorkerPool::new(Arc::clone(&service), config.worker_pool_size).run(queue));

        let control = ControlBus::new(Arc::clone(&service));
        let mut lines = input.lines();

        info!("Correlator running, reading message events from input");
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("failed to read input")? else {
                        info!("Input closed");
                        break;
                    };
                    match parse_line(&line) {
                        Ok(InboundLine::Blank) => {}
                        Ok(InboundLine::Control(command)) => {
                            let reply = control.execute_line(&command).await;
                            sink.emit(&reply).await;
                        }
                        Ok(InboundLine::Message(message)) => {
                            if inbound.send(*message).await.is_err() {
                                error!("Worker pool stopped accepting messages");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Skipping malformed input line"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received");
                    break;
                }
            }
        }

        info!("Initiating graceful shutdown...");
        drop(inbound);
        let report = pool.await.context("worker pool task failed")?;
        info!(
            submitted = report.submitted,
            released = report.released,
            discarded = report.discarded,
            "Submissions drained"
        );

        if let Err(e) = shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
        sweeper.await.context("sweeper task failed")?;

        drop(control);
        drop(service);
        drop(bus);
        printer.await.context("event printer task failed")?;
        drop(sink);

        let output = writer
            .await
            .context("output writer task failed")?
            .context("failed to write output")?;
        info!("Shutdown complete");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn runtime() -> CorrelatorRuntime {
        let config = AggregatorConfig::new();
        let pipeline = AggregationPipeline::message_connector(&config);
        CorrelatorRuntime::new(config, pipeline)
    }

    fn output_lines(output: Vec<u8>) -> Vec<Value> {
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_run_releases_and_flushes_on_eof() {
        let input = concat!(
            r#"{"headers":{"correlationId":"K","messageEventType":"MESSAGE_WAITING"},"payload":{"name":"order"}}"#,
            "\n",
            r#"{"headers":{"correlationId":"K","messageEventType":"MESSAGE_SENT"},"payload":{"name":"order","variables":{"x":1}}}"#,
            "\n",
        );

        let output = runtime().run(input.as_bytes(), Vec::new()).await.unwrap();
        let lines = output_lines(output);

        let resolved: Vec<_> = lines.iter().filter(|l| l["event"] == "resolved").collect();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0]["correlationKey"], "K");
        assert_eq!(resolved[0]["message"]["payload"]["variables"]["x"], 1);
    }

    #[tokio::test]
    async fn test_run_answers_control_and_skips_garbage() {
        let input = ":status\nnot json\n\n:bogus\n";

        let output = runtime().run(input.as_bytes(), Vec::new()).await.unwrap();
        let lines = output_lines(output);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["reply"], "status");
        assert_eq!(lines[0]["running"], true);
        assert_eq!(lines[1]["reply"], "error");
    }
}
