//! Human-readable reports for failure events.
//!
//! Rendering is a pure function of the event; the engine never calls it.

use crate::event::FailureEvent;

/// Rendered report ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub subject: String,
    pub body: String,
}

/// Render a report for `event`
pub fn render(event: &FailureEvent) -> Report {
    match event {
        FailureEvent::HostUnreachable { target_name, address, cause } => Report {
            subject: format!("[watchpost] {target_name} is unreachable"),
            body: format!(
                "Host \"{target_name}\" with address {address} has failed to respond to a ping.\n\
                 \n\
                 Error:\n\
                 {cause}\n"
            ),
        },
        FailureEvent::ProcessMissing { program_name, process_pattern, server_address } => Report {
            subject: format!("[watchpost] {program_name} is not running on {server_address}"),
            body: format!(
                "Program \"{program_name}\" (process {process_pattern}) has failed on host \
                 {server_address}.\n\
                 No PID was found using \"pgrep {process_pattern}\".\n"
            ),
        },
        FailureEvent::RemoteSessionError {
            server_address,
            program_name,
            process_pattern,
            cause,
        } => {
            Report {
                subject: format!("[watchpost] could not log into {server_address}"),
                body: format!(
                    "Could not log into host {server_address} to verify whether program \
                     {program_name} ({process_pattern}) is running.\n\
                     \n\
                     Error:\n\
                     {cause}\n"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_host_unreachable() {
        let report = render(&FailureEvent::HostUnreachable {
            target_name: "db1".to_string(),
            address: "10.0.0.5".to_string(),
            cause: "no echo reply within 10s".to_string(),
        });

        assert_eq!(report.subject, "[watchpost] db1 is unreachable");
        assert!(report.body.starts_with("Host \"db1\" with address 10.0.0.5 has failed"));
        assert!(report.body.contains("no echo reply within 10s"));
    }

    #[test]
    fn test_render_process_missing_names_command() {
        let report = render(&FailureEvent::ProcessMissing {
            program_name: "web".to_string(),
            process_pattern: "gunicorn".to_string(),
            server_address: "web1".to_string(),
        });

        assert!(report.body.contains("\"pgrep gunicorn\""));
        assert!(report.subject.contains("web1"));
    }

    #[test]
    fn test_render_session_error() {
        let report = render(&FailureEvent::RemoteSessionError {
            server_address: "web1".to_string(),
            program_name: "web".to_string(),
            process_pattern: "gunicorn".to_string(),
            cause: "authentication rejected for user ops".to_string(),
        });

        assert!(report.body.contains("Could not log into host web1"));
        assert!(report.body.contains("web (gunicorn)"));
    }
}
