//! System-wide constants for the IPC and threading core.
//!
//! Mirrors the fixed resource limits of a teaching kernel: everything here
//! is a compile-time bound rather than a runtime-configurable value, in
//! keeping with the rest of the core (no dynamic resizing of process or
//! port tables).

/// Capacity, in bytes, of a pipe's cyclic buffer.
pub const PIPE_BUFFER_SIZE: usize = 8192;

/// Highest legal port number. Ports are numbered `1..=MAX_PORT`; port `0`
/// is reserved as [`NOPORT`].
pub const MAX_PORT: u16 = 1023;

/// Port value meaning "no port" / "not bound to a port".
pub const NOPORT: u16 = 0;

/// Number of file-id slots in each process's file table (`FIDT[0..MAX_FILEID)`).
pub const MAX_FILEID: usize = 128;

/// Sentinel returned by any syscall whose normal return type is a file id.
pub const NOFILE: i32 = -1;

/// Maximum number of live processes (size of the process table).
pub const MAX_PROC: usize = 256;

/// Upper bound on concurrently live pipes. Purely a safety valve against
/// runaway allocation; legitimate programs never come close to it.
pub const MAX_PIPES: usize = 4096;

/// Upper bound on concurrently live FCBs.
pub const MAX_FCBS: usize = 4096;

/// Upper bound on concurrently live sockets.
pub const MAX_SOCKETS: usize = 2048;

/// Upper bound on connection requests queued system-wide.
pub const MAX_CONN_REQS: usize = 2048;

/// The init process's pid. Reparenting and shutdown rules single it out.
pub const INIT_PID: u32 = 1;

/// Which direction(s) of a peer socket to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Close the read side only.
    Read,
    /// Close the write side only.
    Write,
    /// Close both sides.
    Both,
}
