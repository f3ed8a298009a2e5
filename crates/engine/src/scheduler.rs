use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, Span, debug, info, warn};

use crate::error::ConfigError;
use crate::event::FailureEvent;
use crate::notifier::Notifier;

/// Capacity of the event stream between a prober and the scheduler
pub const EVENT_BUFFER: usize = 16;

/// A prober the scheduler can run once per sweep
pub trait Probe: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> String;

    /// Start one pass over every target.
    ///
    /// The pass runs as its own task and streams failure events; the stream
    /// closes when every target has been checked.
    fn run(self: Arc<Self>) -> mpsc::Receiver<FailureEvent>;
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Failure events emitted by the probers
    pub events: usize,

    /// Events the notifier could not deliver
    pub undelivered: usize,

    pub elapsed: Duration,
}

/// Probe scheduler - runs every prober in order, once per tick
pub struct Scheduler {
    probes: Vec<Arc<dyn Probe>>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    span: Span,
}

impl Scheduler {
    /// Create a scheduler; probes run in the order given
    pub fn new(
        probes: Vec<Arc<dyn Probe>>,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
    ) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        let span = tracing::info_span!("scheduler");
        Ok(Self { probes, notifier, interval, span })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run every prober to completion, forwarding each event to the notifier
    pub async fn sweep(&self) -> SweepSummary {
        self.sweep_inner().instrument(self.span.clone()).await
    }

    async fn sweep_inner(&self) -> SweepSummary {
        let started = Instant::now();
        let mut summary = SweepSummary::default();
        info!(probes = self.probes.len(), "starting sweep");

        for probe in &self.probes {
            debug!(probe = %probe.name(), "running probe");
            let mut stream = Arc::clone(probe).run();

            while let Some(event) = stream.recv().await {
                summary.events += 1;
                if let Err(err) = self.notifier.notify(&event).await {
                    summary.undelivered += 1;
                    warn!(
                        kind = %event.kind(),
                        subject = %event.subject(),
                        error = %err,
                        "could not deliver report"
                    );
                }
            }
        }

        summary.elapsed = started.elapsed();
        info!(events = summary.events, elapsed = ?summary.elapsed, "finished sweep");
        summary
    }

    /// Sweep immediately, then once per interval, until `shutdown` completes
    pub async fn run<F>(&self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut sweeps = 0;
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = self.sweep() => sweeps += 1,
            }
        }

        info!(sweeps, "scheduler stopped");
        sweeps
    }
}
