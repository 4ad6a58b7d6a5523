//! Internal error taxonomy for the IPC and threading core.
//!
//! Every public syscall-shaped entry point (`sys_*`) collapses these down to
//! the plain integer/`Fid_t` status codes the calling convention expects —
//! see the module docs on [`crate::kernel`] — but internally we propagate a
//! typed [`KernelError`] with `?` like any other Rust library, rather than
//! threading status codes by hand through every helper.

use thiserror::Error;

/// Errors raised by the core's internal operations.
///
/// Maps directly onto the error taxonomy of the syscall surface: bad
/// argument, resource exhaustion, protocol violation, a gone peer, and
/// timeout. None of these are used for control flow outside the crate;
/// callers at the syscall boundary turn them back into `-1`/`NOFILE`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// An argument was out of range or otherwise invalid (bad fid, bad port,
    /// non-positive length, ...). No state was mutated.
    #[error("bad argument")]
    BadArgument,

    /// A fixed-size pool (FCBs, fids, pipes, sockets, connection requests)
    /// had no free slot. No partial reservation was made.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// The operation is not legal for the current state of the object
    /// (closing an already-closed side, listening on a bound port,
    /// connecting to a non-listener, accepting on a non-listener, ...).
    #[error("protocol violation")]
    ProtocolViolation,

    /// The peer on the other end of a pipe or socket is gone. Writers see
    /// this as an error; readers instead drain and see EOF (handled without
    /// this variant — see [`crate::ipc::pipe`]).
    #[error("remote end gone")]
    RemoteGone,

    /// A bounded wait (only `sys_Connect` has one) elapsed before the
    /// predicate became true.
    #[error("operation timed out")]
    Timeout,
}

/// Result alias used throughout the core's internal API.
pub type KernelResult<T> = Result<T, KernelError>;
