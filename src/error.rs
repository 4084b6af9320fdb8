use thiserror::Error;

/// Fatal, engine-internal failures that surface on the control call that
/// triggered them (`start`, `stop`, `clear`, ...).
///
/// Recoverable conditions — a full event queue, a `FREE` for an unknown
/// object, a missing tracked class, or a panicking user callback — are
/// *not* represented here. Those are absorbed silently (logged at
/// `warn`/`debug`) per the error handling policy: nothing inside an
/// allocator or collector callback may propagate an error into host code.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `Capture::start` called while already running.
    #[error("capture is already running")]
    AlreadyRunning,

    /// `Capture::stop` called while not running.
    #[error("capture is not running")]
    NotRunning,

    /// `Capture::clear` called while running; there is no safe clear path
    /// while queued events may still reference the table being cleared.
    #[error("cannot clear while running")]
    ClearWhileRunning,

    /// The process-wide deferred-job slot could not be registered because
    /// the host runtime offers too few (at most one may ever exist).
    #[error("no deferred-job slot available from the runtime adapter")]
    DeferredSlotUnavailable,

    /// The unmanaged allocator backing the object table or event queue
    /// failed to grow.
    #[error("out of memory growing {0}")]
    OutOfMemory(&'static str),

    /// A probe chain in the object table exceeded the hard limit,
    /// indicating table corruption.
    #[error("object table probe exceeded hard limit ({0} probes)")]
    ProbeLimitExceeded(usize),
}

pub type EngineResult<T> = Result<T, EngineError>;
