// Error taxonomy for ladder operations.
//
// Callers can branch on the variant: `Unauthorized`/`NotFound`/`Validation`
// reject the request outright and guarantee nothing was written, while
// `PartialApproval` and `StoreUnavailable` are retryable.

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LadderError {
    /// The acting account is neither a permitted participant nor an admin.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A referenced record does not exist (or is already in a terminal state).
    #[error("not found: {0}")]
    NotFound(String),

    /// A match references a username with no player record.
    #[error("player not found: {0}")]
    PlayerNotFound(String),

    /// The match was moved to the approved store but a later step failed.
    /// The rating/position writes may or may not have landed; the approval is
    /// resumable via `Ladder::resume_approval`, which replays the remaining
    /// steps idempotently.
    #[error("approval of match {match_id} left incomplete: {source}")]
    PartialApproval {
        match_id: String,
        #[source]
        source: Box<LadderError>,
    },

    /// Transient storage failure. Safe to retry with backoff; best-effort
    /// paths log these and continue.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Input rejected before any write happened.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl LadderError {
    /// True for errors where retrying the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LadderError::PartialApproval { .. } | LadderError::StoreUnavailable(_)
        )
    }

    pub(crate) fn partial(match_id: &str, source: LadderError) -> Self {
        LadderError::PartialApproval {
            match_id: match_id.to_string(),
            source: Box::new(source),
        }
    }
}

impl From<StoreError> for LadderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing { ref collection, ref id } => {
                LadderError::NotFound(format!("{collection}/{id}"))
            }
            other => LadderError::StoreUnavailable(other),
        }
    }
}
