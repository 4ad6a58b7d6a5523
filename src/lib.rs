//! IPC and threading core for a cooperative teaching kernel.
//!
//! Three families of primitives, all reached through one [`Kernel`] handle:
//!
//! - **Pipes** ([`ipc::pipe`]) — bounded, unnamed, one reader and one
//!   writer.
//! - **Rendezvous stream sockets** ([`ipc::socket`]) — a listener on a
//!   port accepts connection requests one at a time; each accepted
//!   connection is a full-duplex byte stream.
//! - **Threads and processes** ([`task`]) — every process is one or more
//!   joinable/detachable threads; a process's last thread exiting tears
//!   down its open files and reparents its children to init.
//!
//! Every syscall-shaped operation (`sys_*` in the original, plain methods
//! on [`Kernel`] here) returns a [`error::KernelResult`] internally and is
//! documented on [`Kernel`] itself. There is no scheduler in this crate —
//! `std::thread` and the host OS schedule the underlying OS threads, and a
//! single [`std::sync::Mutex`] plus a handful of [`std::sync::Condvar`]s
//! stand in for the original's single-core kernel lock and its
//! `kernel_wait`/`kernel_broadcast`/`kernel_signal` primitives.

pub mod config;
pub mod error;
pub mod ids;
pub mod ipc;
pub mod kernel;
pub mod ring_buffer;
pub mod task;
mod util;

pub use error::{KernelError, KernelResult};
pub use ids::{FileId, Pid, Tid};
pub use kernel::Kernel;
