use thiserror::Error;

/// Domain failure classes, attached to `color_eyre` reports so callers can
/// `downcast_ref::<SyncError>()` for precise handling.
///
/// Integrity hiccups (e.g. a removal target already absent locally, or a
/// Collection dedup hit) are not errors: they are logged and skipped.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The platform client was not authenticated when an operation required
    /// it. Raised before any mutation; nothing is partially applied.
    #[error("platform client is not authenticated")]
    Authentication,

    /// A referenced local playlist or track id does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A remote call failed. Never retried by this engine; during a batch
    /// apply it is recorded into `SyncResult.errors` and processing continues.
    #[error("platform API error: {0}")]
    PlatformApi(String),

    /// A mutating call targeted a non-test-marked playlist outside an
    /// allowed safety level, or the emergency stop is active.
    #[error("safety violation: {0}")]
    SafetyViolation(String),
}
