//! Remote process prober: checks that configured programs are running on a
//! remote host.

pub mod shell;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, info, warn};

use crate::event::FailureEvent;
use crate::registry::{ProgramCheck, RemoteSession};
use crate::scheduler::{EVENT_BUFFER, Probe};

pub use shell::{RemoteShell, SshShell};

/// Command that lists PIDs matching `pattern`
pub fn presence_command(pattern: &str) -> String {
    format!("pgrep {pattern}")
}

/// Checks every program of one remote session over a single shared shell
pub struct ProcessProber {
    server: String,
    programs: Vec<ProgramCheck>,
    shell: Arc<dyn RemoteShell>,
    span: Span,
}

impl ProcessProber {
    pub fn new(session: &RemoteSession, shell: Arc<dyn RemoteShell>) -> Self {
        Self::with_programs(session.server.clone(), session.programs.clone(), shell)
    }

    /// Prober for an SSH session described by `session`
    pub fn ssh(session: RemoteSession) -> Self {
        let server = session.server.clone();
        let programs = session.programs.clone();
        Self::with_programs(server, programs, Arc::new(SshShell::new(session)))
    }

    pub fn with_programs(
        server: impl Into<String>,
        programs: Vec<ProgramCheck>,
        shell: Arc<dyn RemoteShell>,
    ) -> Self {
        let server = server.into();
        let span = tracing::info_span!("process_prober", %server);
        Self { server, programs, shell, span }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn programs(&self) -> &[ProgramCheck] {
        &self.programs
    }

    async fn check_all(&self, events: mpsc::Sender<FailureEvent>) {
        for program in &self.programs {
            info!(program = %program.name, "checking program");

            let event = match self.shell.exec(&presence_command(&program.process)).await {
                Err(err) => {
                    warn!(program = %program.name, error = %err, "remote session failed");
                    let event = FailureEvent::RemoteSessionError {
                        server_address: self.server.clone(),
                        program_name: program.name.clone(),
                        process_pattern: program.process.clone(),
                        cause: err.to_string(),
                    };
                    // A broken session cannot check anything else on this host.
                    let _ = events.send(event).await;
                    return;
                }
                Ok(output) if output.trim().is_empty() => {
                    warn!(
                        program = %program.name,
                        pattern = %program.process,
                        "no matching process"
                    );
                    FailureEvent::ProcessMissing {
                        program_name: program.name.clone(),
                        process_pattern: program.process.clone(),
                        server_address: self.server.clone(),
                    }
                }
                Ok(output) => {
                    debug!(program = %program.name, pids = %output.trim(), "process running");
                    continue;
                }
            };

            if events.send(event).await.is_err() {
                debug!("event consumer went away, stopping early");
                return;
            }
        }
    }
}

impl Probe for ProcessProber {
    fn name(&self) -> String {
        format!("process@{}", self.server)
    }

    fn run(self: Arc<Self>) -> mpsc::Receiver<FailureEvent> {
        let (events, stream) = mpsc::channel(EVENT_BUFFER);
        let span = self.span.clone();
        tokio::spawn(async move { self.check_all(events).await }.instrument(span));
        stream
    }
}
