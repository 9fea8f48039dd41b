//! Error taxonomy and per-item outcomes.
//!
//! Only configuration and setup problems are errors that end a run. Anything
//! that concerns a single file becomes a [`PutOutcome`] so the batch goes on.

use std::path::PathBuf;

use serde::Serialize;

/// Run-level failures.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Tree was grabbed from a different node than the one being targeted
    #[error("this tree was grabbed from {recorded} but the destination is {requested}")]
    WrongNode { recorded: String, requested: String },

    /// Transfer needs both installations on the same build
    #[error("source version {source_version} does not match destination version {destination_version}")]
    VersionMismatch { source_version: String, destination_version: String },

    #[error("cannot transfer content to the node it was grabbed from ({0})")]
    SameNodeTransfer(String),

    #[error("path does not exist: {0}")]
    PathMissing(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// No `.ccc` directory above the path, or no config record inside it
    #[error("no grabbed content tree found at or above {0}; run grab first")]
    NotTracked(PathBuf),

    #[error("no node given and none recorded by a previous grab")]
    NoNode,

    #[error("login to {node} failed: {message}")]
    Login { node: String, message: String },

    #[error("could not load the endpoint registry from {node}: {message}")]
    Registry { node: String, message: String },

    /// Instance creation returned success but the instance never showed up
    #[error("failed to create widget instance \"{0}\"")]
    InstanceNotCreated(String),
}

/// Process exit code for a failed run: 2=configuration, 3=transport setup, 1=other
pub fn exit_code_for(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<SyncError>() {
        Some(
            SyncError::WrongNode { .. }
            | SyncError::VersionMismatch { .. }
            | SyncError::SameNodeTransfer(_)
            | SyncError::NoNode,
        ) => 2,
        Some(SyncError::Login { .. } | SyncError::Registry { .. }) => 3,
        _ => 1,
    }
}

/// What happened to one put item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PutOutcome {
    /// Server accepted the write
    Applied,
    /// Nothing to send: the destination already matches, or the user opted out
    Unchanged(String),
    /// HTTP 412: someone else changed it first
    Conflict,
    /// Any other non-2xx, or an error code in a 2xx body
    Rejected { status: u16, message: String },
    /// Nothing sent (no identity, missing capability)
    Skipped(String),
    /// Local or network failure for this item only
    Failed(String),
}

impl PutOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn unchanged(reason: impl Into<String>) -> Self {
        Self::Unchanged(reason.into())
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    /// Applied, or there was nothing to do.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged(_))
    }

    /// Short column label for the summary table.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged(_) => "unchanged",
            Self::Conflict => "conflict",
            Self::Rejected { .. } => "rejected",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_kind() {
        let wrong = anyhow::Error::new(SyncError::WrongNode {
            recorded: "a".into(),
            requested: "b".into(),
        });
        assert_eq!(exit_code_for(&wrong), 2);

        let login = anyhow::Error::new(SyncError::Login {
            node: "n".into(),
            message: "401".into(),
        });
        assert_eq!(exit_code_for(&login), 3);

        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn unchanged_is_settled_but_skipped_is_not() {
        assert!(PutOutcome::unchanged("instance already exists").is_settled());
        assert!(PutOutcome::Applied.is_settled());
        assert!(!PutOutcome::skipped("no matching remote entity").is_settled());
        assert!(!PutOutcome::Conflict.is_settled());
        assert_eq!(PutOutcome::unchanged("x").label(), "unchanged");
    }
}
