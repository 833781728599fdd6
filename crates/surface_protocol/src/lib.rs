//! Capability contracts crossed between the controlling thread and the
//! render thread.
//!
//! Everything platform-specific (native windows, GL contexts, input
//! decoding) lives behind the [`Surface`] trait; the scheduling crates only
//! see these capabilities.

use std::fmt;
use std::sync::Arc;

/// An opaque paintable/swappable rendering target.
///
/// `create`, `destroy`, and `paint` run on the render thread only. `swap`
/// runs on the render thread or on a swap worker thread. Implementations are
/// shared as `Arc<dyn Surface>` and use interior mutability; registry
/// identity is pointer identity (`Arc::ptr_eq`).
pub trait Surface: Send + Sync {
    fn create(&self) -> Result<(), SurfaceError>;
    fn destroy(&self);
    fn paint(&self) -> Result<(), SurfaceError>;
    fn swap(&self) -> Result<(), SurfaceError>;
}

/// Two live handles refer to the same surface exactly when their `Arc`s
/// share an allocation.
pub fn same_surface(a: &Arc<dyn Surface>, b: &Arc<dyn Surface>) -> bool {
    Arc::ptr_eq(a, b)
}

/// A lock owned by the embedding environment that must be released around
/// long blocking waits.
///
/// The render thread may need this lock to make progress toward the very
/// event a blocked consumer is waiting for, so every potentially long wait
/// in this workspace brackets itself with `release` / `acquire`.
pub trait CooperatingLock: Send + Sync {
    /// Called before a potentially long blocking wait.
    fn release(&self);
    /// Called after the wait resolves.
    fn acquire(&self);
}

/// Default hook for embeddings without a cooperating lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCooperatingLock;

impl CooperatingLock for NoCooperatingLock {
    fn release(&self) {}
    fn acquire(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    CreateFailed { reason: String },
    PaintFailed { reason: String },
    SwapFailed { reason: String },
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceError::CreateFailed { reason } => {
                write!(f, "surface create failed: {reason}")
            }
            SurfaceError::PaintFailed { reason } => {
                write!(f, "surface paint failed: {reason}")
            }
            SurfaceError::SwapFailed { reason } => {
                write!(f, "surface swap failed: {reason}")
            }
        }
    }
}

impl std::error::Error for SurfaceError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The render thread cannot service anything; the process is expected
    /// to exit after the report.
    Fatal,
    /// A single surface misbehaved; the cycle continues without it.
    Recoverable,
}

/// Single reporting hook for every error that must not cross a thread
/// boundary as a panic.
pub trait ErrorSink: Send + Sync {
    fn report(&self, severity: ErrorSeverity, error: &SurfaceError);
}

/// Default sink: forwards to the `log` facade, tagged with severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, severity: ErrorSeverity, error: &SurfaceError) {
        match severity {
            ErrorSeverity::Fatal => log::error!("fatal: {error}"),
            ErrorSeverity::Recoverable => log::error!("recoverable: {error}"),
        }
    }
}
