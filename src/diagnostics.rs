//! Observer for failures that never propagate out of the pipeline.

use std::any::Any;
use std::fmt;

use tracing::warn;

use crate::error::DetectionFailure;

/// Frame-scoped failure that was absorbed by the pipeline.
#[derive(Debug, Clone)]
pub enum FrameFault {
    Conversion { sequence: u64, reason: String },
    Classification { sequence: u64, reason: String },
    Detection(DetectionFailure),
}

impl fmt::Display for FrameFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameFault::Conversion { sequence, reason } => {
                write!(f, "conversion of frame {sequence} failed: {reason}")
            }
            FrameFault::Classification { sequence, reason } => {
                write!(f, "classification of frame {sequence} failed: {reason}")
            }
            FrameFault::Detection(failure) => failure.fmt(f),
        }
    }
}

/// Text carried by a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, fault: FrameFault);
}

/// Logs faults at `warn` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn report(&self, fault: FrameFault) {
        warn!("{}", fault);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_text_is_recovered() {
        let payload = std::panic::catch_unwind(|| panic!("sensor gone")).unwrap_err();
        assert_eq!(panic_message(&*payload), "sensor gone");

        let code = 7;
        let payload = std::panic::catch_unwind(|| panic!("code {code}")).unwrap_err();
        assert_eq!(panic_message(&*payload), "code 7");
    }
}
