//! crates/culinary_core/src/error.rs
//!
//! The failure taxonomy of the page flows. Port errors are classified into
//! these kinds before they reach the page.

use crate::ports::PortError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// No valid session for an authenticated action. Handled by navigation.
    #[error("A valid session is required")]
    AuthRequired,

    #[error("Collaborator unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Collaborator rejected the request (status {status:?}): {body}")]
    RemoteRejected { status: Option<u16>, body: String },

    #[error("Gave up after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Store error: {0}")]
    StoreError(PortError),
}

impl FlowError {
    /// Classifies an error returned by the workflow trigger.
    pub fn from_trigger(err: PortError) -> Self {
        match err {
            PortError::Unreachable(reason) => FlowError::NetworkUnreachable(reason),
            PortError::Rejected { status, body } => FlowError::RemoteRejected {
                status: Some(status),
                body,
            },
            PortError::Unauthorized => FlowError::AuthRequired,
            other => FlowError::RemoteRejected {
                status: None,
                body: other.to_string(),
            },
        }
    }

    /// Classifies an error returned by the recipe store.
    pub fn from_store(err: PortError) -> Self {
        match err {
            PortError::Unreachable(reason) => FlowError::NetworkUnreachable(reason),
            PortError::Unauthorized => FlowError::AuthRequired,
            other => FlowError::StoreError(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_errors_keep_unreachable_and_rejected_apart() {
        assert_eq!(
            FlowError::from_trigger(PortError::Unreachable("refused".into())),
            FlowError::NetworkUnreachable("refused".into())
        );
        let rejected = FlowError::from_trigger(PortError::Rejected {
            status: 404,
            body: "webhook not registered".into(),
        });
        assert!(rejected.to_string().contains("webhook not registered"));
        assert!(matches!(
            rejected,
            FlowError::RemoteRejected { status: Some(404), .. }
        ));
    }

    #[test]
    fn store_errors_map_to_store_kind() {
        assert!(matches!(
            FlowError::from_store(PortError::Unexpected("boom".into())),
            FlowError::StoreError(_)
        ));
        assert_eq!(
            FlowError::from_store(PortError::Unauthorized),
            FlowError::AuthRequired
        );
    }
}
