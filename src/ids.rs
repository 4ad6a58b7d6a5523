//! Opaque handles into the core's internal arenas.
//!
//! The syscall surface hands user code small integers (`Fid_t`, `Pid_t`,
//! `Tid_t`); internally those are resolved through per-process tables into
//! these handles, which index directly into the kernel's slabs. Keeping
//! them as distinct newtypes (rather than bare `u32`s) means the compiler
//! catches a `PipeId` accidentally used where a `SocketId` was meant.

/// Index into the global pipe arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub u32);

/// Index into the global FCB arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FcbId(pub u32);

/// Index into the global socket arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u32);

/// Index into the global connection-request arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnReqId(pub u32);

/// Index into the global PTCB arena. Distinct from the user-visible [`Tid`]
/// handed out by `sys_CreateThread`, per the design note against leaking
/// raw identity as a user-visible handle — a `Tid` is looked up through a
/// per-process table to reach the `PtcbId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PtcbId(pub u32);

/// Process id, index into the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

/// User-visible file id, `Fid_t` in the original calling convention: a
/// small non-negative integer naming a slot in the owning process's file
/// table, or [`crate::config::NOFILE`] on failure.
pub type FileId = i32;

/// User-visible thread id, `Tid_t`: an opaque per-process handle returned
/// by `sys_CreateThread` and consumed by `sys_ThreadJoin`/`sys_ThreadDetach`.
/// Never a raw pointer or arena index — see [`PtcbId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid(pub u64);
