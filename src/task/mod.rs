//! Process and thread bookkeeping: per-process control blocks and the
//! process-visible thread control blocks layered on top of `std::thread`.

pub mod process;
pub mod thread;
