//! Messages exchanged between a worker and its execution unit.
//!
//! Every job-level message carries the job id so the host can correlate
//! acknowledgements and results without relying on channel ordering.

use rinzler_core::{JobId, Payload};

/// Host → unit.
#[derive(Debug, Clone)]
pub enum UnitMessage {
    /// Run the init routine with the configured init arguments.
    Init(Option<Payload>),
    /// Run the work routine on one job.
    Job { id: JobId, payload: Payload },
}

/// Unit → host.
#[derive(Debug, Clone)]
pub enum UnitEvent {
    /// Init routine finished; the unit takes jobs from now on.
    Ready,
    /// The unit picked up the job and is running it.
    Accepted { id: JobId },
    /// The job finished. With `error` set, `payload.data` holds the
    /// message reported by the work routine.
    Completed {
        id: JobId,
        error: bool,
        payload: Payload,
    },
    /// The unit crashed, failed to initialize, or produced something the
    /// host cannot decode. The unit is unusable afterwards.
    Fatal { message: String },
}

impl UnitEvent {
    /// Completion for a job whose work routine failed.
    pub fn failed(id: JobId, message: impl Into<String>) -> Self {
        UnitEvent::Completed {
            id,
            error: true,
            payload: Payload::new(serde_json::Value::String(message.into())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UnitEvent::Ready => "ready",
            UnitEvent::Accepted { .. } => "accepted",
            UnitEvent::Completed { .. } => "completed",
            UnitEvent::Fatal { .. } => "fatal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_completion_carries_message_as_data() {
        let id = JobId::new();
        match UnitEvent::failed(id.clone(), "boom") {
            UnitEvent::Completed {
                id: got,
                error,
                payload,
            } => {
                assert_eq!(got, id);
                assert!(error);
                assert_eq!(payload.data, serde_json::json!("boom"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn labels_match_wire_names() {
        assert_eq!(UnitEvent::Ready.label(), "ready");
        assert_eq!(
            UnitEvent::Accepted { id: JobId::new() }.label(),
            "accepted"
        );
        assert_eq!(
            UnitEvent::Fatal {
                message: String::new()
            }
            .label(),
            "fatal"
        );
    }
}
