//! Bounded, unnamed pipes: one ring buffer shared by exactly one reader FCB
//! and one writer FCB.
//!
//! Ported from `kernel_pipe.c`'s `PIPE_CB` and its `pipe_read`/`pipe_write`/
//! `pipe_reader_close`/`pipe_writer_close`. The original blocks by calling
//! `kernel_wait`/`kernel_broadcast` directly inside those functions, under
//! the single kernel lock; here the blocking retry loop lives one layer up,
//! in [`crate::kernel`], which owns the lock guard and the condition
//! variables — this module only holds the buffer and reports, per attempt,
//! whether the call would need to block. The split keeps a pipe's data
//! model ignorant of how its caller chooses to wait.

use std::sync::Arc;
use std::sync::Condvar;

use crate::config::{MAX_PIPES, PIPE_BUFFER_SIZE};
use crate::ids::PipeId;
use crate::ipc::fcb::{FcbTable, FileTable, StreamKind};
use crate::ring_buffer::RingBuffer;
use crate::util::slab::Slab;

/// Result of one non-blocking attempt to read from a pipe.
pub enum ReadOutcome {
    Read(usize),
    WouldBlock,
    /// Buffer empty and the writer is gone: end of stream.
    Eof,
}

/// Result of one non-blocking attempt to write to a pipe.
pub enum WriteOutcome {
    Wrote(usize),
    WouldBlock,
    /// The reader is gone; nothing will ever drain this pipe again.
    BrokenPipe,
}

/// One pipe's shared state: the buffer, which ends are still open, and the
/// condition variables a blocked reader or writer waits on.
pub struct Pipe {
    buffer: RingBuffer,
    reader_alive: bool,
    writer_alive: bool,
    /// Signaled whenever bytes are enqueued or the writer goes away.
    pub has_data: Arc<Condvar>,
    /// Signaled whenever bytes are dequeued or the reader goes away.
    pub has_space: Arc<Condvar>,
}

impl Pipe {
    fn new() -> Self {
        Pipe {
            buffer: RingBuffer::new(PIPE_BUFFER_SIZE),
            reader_alive: true,
            writer_alive: true,
            has_data: Arc::new(Condvar::new()),
            has_space: Arc::new(Condvar::new()),
        }
    }

    /// One non-blocking attempt to read up to `buf.len()` bytes.
    pub fn try_read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        if !self.buffer.is_empty() {
            let n = self.buffer.dequeue_slice(buf);
            self.has_space.notify_all();
            ReadOutcome::Read(n)
        } else if !self.writer_alive {
            ReadOutcome::Eof
        } else {
            ReadOutcome::WouldBlock
        }
    }

    /// One non-blocking attempt to write up to `data.len()` bytes. Writes
    /// whatever fits in the free space available right now, which may be
    /// fewer bytes than requested — the caller loops until all of `data` is
    /// written or the pipe breaks.
    pub fn try_write(&mut self, data: &[u8]) -> WriteOutcome {
        if !self.reader_alive {
            return WriteOutcome::BrokenPipe;
        }
        if self.buffer.is_full() {
            return WriteOutcome::WouldBlock;
        }
        let n = self.buffer.enqueue_slice(data);
        self.has_data.notify_all();
        WriteOutcome::Wrote(n)
    }

    /// The reader end has closed. Wake any writer blocked on space so it
    /// observes the break instead of waiting forever.
    pub fn close_reader(&mut self) {
        self.reader_alive = false;
        self.has_space.notify_all();
    }

    /// The writer end has closed. Wake any reader blocked on data so it
    /// observes EOF instead of waiting forever.
    pub fn close_writer(&mut self) {
        self.writer_alive = false;
        self.has_data.notify_all();
    }
}

/// The global arena of live pipes.
pub struct PipeTable {
    slab: Slab<Pipe>,
}

impl PipeTable {
    pub fn new() -> Self {
        PipeTable { slab: Slab::with_capacity(MAX_PIPES) }
    }

    pub fn get_mut(&mut self, id: PipeId) -> Option<&mut Pipe> {
        self.slab.get_mut(id.0)
    }

    fn remove(&mut self, id: PipeId) {
        self.slab.remove(id.0);
    }

    /// Allocate a bare pipe with no FCB/fid of its own — used for the two
    /// internal pipes backing a connected socket pair, which are reached
    /// only through the owning socket's single fid, never directly.
    pub fn alloc(&mut self) -> Option<PipeId> {
        self.slab.insert(Pipe::new()).map(PipeId)
    }

    /// Counterpart to [`PipeTable::alloc`], for rollback on a failed socket
    /// connection setup.
    pub fn remove_raw(&mut self, id: PipeId) {
        self.slab.remove(id.0);
    }
}

impl Default for PipeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `sys_Pipe`: create a new pipe and reserve its two FCBs/fids atomically.
/// On resource exhaustion nothing is left behind — the pipe itself is
/// rolled back if fid/FCB reservation fails.
pub fn sys_pipe(
    pipes: &mut PipeTable,
    fcbs: &mut FcbTable,
    files: &mut FileTable,
) -> Option<(crate::ids::FileId, crate::ids::FileId)> {
    let pipe_idx = pipes.slab.insert(Pipe::new())?;
    let pipe_id = PipeId(pipe_idx);

    let kinds = [StreamKind::PipeReadEnd(pipe_id), StreamKind::PipeWriteEnd(pipe_id)];
    match crate::ipc::fcb::reserve(fcbs, files, &kinds) {
        Some(fids) => Some((fids[0], fids[1])),
        None => {
            pipes.remove(pipe_id);
            None
        }
    }
}
