//! Process-visible thread control blocks (PTCBs): the bookkeeping a thread
//! leaves behind for `sys_ThreadJoin`/`sys_ThreadDetach` to find.
//!
//! Ported from `kernel_threads.c`'s `PTCB` and its three syscalls. The
//! original also owns the low-level `TCB` — stack, saved registers, the
//! scheduler's run-queue linkage — all of which is simply `std::thread`'s
//! job here and is not reproduced. What a PTCB still tracks is exactly what
//! the spec keeps regardless of who does the scheduling: whether the
//! thread has exited, its exit value, and whether anyone detached it
//! before a joiner got there.
//!
//! A thread only ever has one PTCB and is identified to its own process by
//! an opaque [`Tid`], never by the raw [`PtcbId`] — see the design note
//! against leaking arena identity as a user-visible handle.

use std::collections::HashMap;
use std::sync::{Arc, Condvar};

use crate::config::MAX_PROC;
use crate::error::{KernelError, KernelResult};
use crate::ids::{Pid, PtcbId, Tid};
use crate::util::slab::Slab;

/// Upper bound on concurrently live threads across all processes. No fixed
/// per-process thread cap is imposed, only this system-wide arena size.
const MAX_THREADS: usize = MAX_PROC * 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    /// `sys_ThreadDetach` was called before the thread exited; no joiner
    /// will ever consume its exit value.
    Detached,
    Exited,
}

/// A thread's exit bookkeeping, shared between the thread itself (which
/// writes `state`/`exit_val` once, at exit) and whoever calls
/// `sys_ThreadJoin` on it.
pub struct Ptcb {
    pub owner: Pid,
    pub state: ThreadState,
    pub exit_val: i32,
    /// Signaled on every state transition (`Exited` or `Detached`), so a
    /// blocked joiner re-checks `state` rather than assuming why it woke.
    pub changed: Arc<Condvar>,
    /// Count of joiners currently waiting on (or about to read) this PTCB.
    /// The PTCB outlives the thread until its last joiner has collected the
    /// exit value, so concurrent `join`s on the same tid all see it.
    joiners: u32,
}

pub struct PtcbTable {
    slab: Slab<Ptcb>,
}

impl PtcbTable {
    pub fn new() -> Self {
        PtcbTable { slab: Slab::with_capacity(MAX_THREADS) }
    }

    pub fn get(&self, id: PtcbId) -> Option<&Ptcb> {
        self.slab.get(id.0)
    }

    pub fn get_mut(&mut self, id: PtcbId) -> Option<&mut Ptcb> {
        self.slab.get_mut(id.0)
    }
}

impl Default for PtcbTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-process map from the opaque [`Tid`] handed to user code to the
/// PTCB that actually tracks the thread.
pub struct ThreadTable {
    entries: HashMap<Tid, PtcbId>,
    next_tid: u64,
}

impl ThreadTable {
    pub fn new() -> Self {
        ThreadTable { entries: HashMap::new(), next_tid: 1 }
    }

    pub fn resolve(&self, tid: Tid) -> Option<PtcbId> {
        self.entries.get(&tid).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tid, PtcbId)> + '_ {
        self.entries.iter().map(|(&t, &p)| (t, p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `sys_CreateThread`'s bookkeeping half: allocate a PTCB and a fresh `Tid`
/// naming it within `owner`'s thread table. Spawning the actual OS thread
/// and wiring its completion back to [`thread_exit`] is the caller's job
/// (see [`crate::kernel`]), since it needs the kernel lock this module
/// deliberately doesn't know about.
pub fn create_thread(ptcbs: &mut PtcbTable, threads: &mut ThreadTable, owner: Pid) -> KernelResult<(Tid, PtcbId)> {
    let idx = ptcbs
        .slab
        .insert(Ptcb {
            owner,
            state: ThreadState::Running,
            exit_val: 0,
            changed: Arc::new(Condvar::new()),
            joiners: 0,
        })
        .ok_or(KernelError::ResourceExhausted)?;
    let ptcb_id = PtcbId(idx);
    let tid = Tid(threads.next_tid);
    threads.next_tid += 1;
    threads.entries.insert(tid, ptcb_id);
    Ok((tid, ptcb_id))
}

/// `sys_ThreadExit`: record the exit value and wake anyone joined or about
/// to join. If the thread was already detached, nobody will ever read
/// this value, so the PTCB is freed immediately instead of lingering.
pub fn thread_exit(ptcbs: &mut PtcbTable, threads: &mut ThreadTable, tid: Tid, exit_val: i32) {
    let Some(ptcb_id) = threads.resolve(tid) else { return };
    let Some(ptcb) = ptcbs.get_mut(ptcb_id) else { return };
    match ptcb.state {
        ThreadState::Detached => {
            if ptcb.joiners == 0 {
                ptcbs.slab.remove(ptcb_id.0);
                threads.entries.remove(&tid);
            }
        }
        ThreadState::Running => {
            ptcb.state = ThreadState::Exited;
            ptcb.exit_val = exit_val;
            ptcb.changed.notify_all();
        }
        ThreadState::Exited => unreachable!("a thread exits exactly once"),
    }
}

/// `sys_ThreadDetach`: mark the thread as detached. Fails if the tid is
/// unknown or already joined away, and — matching `kernel_threads.c:145`
/// (`if(ptcb->exited) return -1;`) — fails if the thread has already
/// exited, since there is no longer anything to detach.
pub fn detach(ptcbs: &mut PtcbTable, threads: &mut ThreadTable, tid: Tid) -> KernelResult<()> {
    let ptcb_id = threads.resolve(tid).ok_or(KernelError::BadArgument)?;
    let ptcb = ptcbs.get_mut(ptcb_id).ok_or(KernelError::BadArgument)?;
    match ptcb.state {
        ThreadState::Running => {
            ptcb.state = ThreadState::Detached;
            ptcb.changed.notify_all();
            Ok(())
        }
        ThreadState::Exited | ThreadState::Detached => Err(KernelError::ProtocolViolation),
    }
}

/// Outcome of one non-blocking look at a join target already registered
/// with [`begin_join`].
pub enum JoinOutcome {
    Done(i32),
    Detached,
    WouldBlock,
}

/// `sys_ThreadJoin`, step one: resolve `tid` and register the calling
/// thread as a joiner. Mirrors `kernel_threads.c`'s `threadref->refcount++`
/// — done once per join call, before the wait loop, so the PTCB stays
/// alive for every concurrent joiner even after the thread exits.
pub fn begin_join(ptcbs: &mut PtcbTable, threads: &mut ThreadTable, tid: Tid) -> KernelResult<PtcbId> {
    let ptcb_id = threads.resolve(tid).ok_or(KernelError::BadArgument)?;
    let ptcb = ptcbs.get_mut(ptcb_id).ok_or(KernelError::BadArgument)?;
    if ptcb.state == ThreadState::Detached {
        return Err(KernelError::ProtocolViolation);
    }
    ptcb.joiners += 1;
    Ok(ptcb_id)
}

/// One non-blocking look at a join target. The caller loops, waiting on
/// [`Ptcb::changed`] between attempts, under the kernel lock.
pub fn poll_join(ptcbs: &PtcbTable, ptcb_id: PtcbId) -> JoinOutcome {
    let ptcb = ptcbs.get(ptcb_id).expect("ptcb stays alive while a joiner holds it");
    match ptcb.state {
        ThreadState::Running => JoinOutcome::WouldBlock,
        ThreadState::Detached => JoinOutcome::Detached,
        ThreadState::Exited => JoinOutcome::Done(ptcb.exit_val),
    }
}

/// `sys_ThreadJoin`, step two: release this joiner's reference, whatever
/// the outcome. Frees the PTCB once it has exited and no joiner is left
/// holding it — `kernel_threads.c`'s `refcount--` followed by the
/// `if(refcount == 0) free(...)` check.
pub fn end_join(ptcbs: &mut PtcbTable, threads: &mut ThreadTable, tid: Tid, ptcb_id: PtcbId) {
    let Some(ptcb) = ptcbs.get_mut(ptcb_id) else { return };
    ptcb.joiners -= 1;
    if ptcb.joiners == 0 && ptcb.state == ThreadState::Exited {
        ptcbs.slab.remove(ptcb_id.0);
        threads.entries.remove(&tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_after_exit_returns_the_exit_value_and_frees_the_ptcb() {
        let mut ptcbs = PtcbTable::new();
        let mut threads = ThreadTable::new();
        let (tid, _) = create_thread(&mut ptcbs, &mut threads, Pid(1)).unwrap();

        let ptcb_id = begin_join(&mut ptcbs, &mut threads, tid).unwrap();
        assert!(matches!(poll_join(&ptcbs, ptcb_id), JoinOutcome::WouldBlock));

        thread_exit(&mut ptcbs, &mut threads, tid, 42);
        match poll_join(&ptcbs, ptcb_id) {
            JoinOutcome::Done(v) => assert_eq!(v, 42),
            _ => panic!("thread already exited, got a different outcome"),
        }
        end_join(&mut ptcbs, &mut threads, tid, ptcb_id);
        assert!(threads.resolve(tid).is_none(), "ptcb freed after its only joiner left");
    }

    #[test]
    fn two_concurrent_joiners_both_see_the_exit_value() {
        let mut ptcbs = PtcbTable::new();
        let mut threads = ThreadTable::new();
        let (tid, _) = create_thread(&mut ptcbs, &mut threads, Pid(1)).unwrap();

        let first = begin_join(&mut ptcbs, &mut threads, tid).unwrap();
        let second = begin_join(&mut ptcbs, &mut threads, tid).unwrap();

        thread_exit(&mut ptcbs, &mut threads, tid, 9);

        match poll_join(&ptcbs, first) {
            JoinOutcome::Done(v) => assert_eq!(v, 9),
            _ => panic!("first joiner should see the exit value"),
        }
        end_join(&mut ptcbs, &mut threads, tid, first);
        assert!(threads.resolve(tid).is_some(), "ptcb survives while the second joiner still holds it");

        match poll_join(&ptcbs, second) {
            JoinOutcome::Done(v) => assert_eq!(v, 9),
            _ => panic!("second joiner should still see the exit value, not a freed ptcb"),
        }
        end_join(&mut ptcbs, &mut threads, tid, second);
        assert!(threads.resolve(tid).is_none(), "ptcb freed once the last joiner leaves");
    }

    #[test]
    fn detach_then_exit_frees_without_a_joiner() {
        let mut ptcbs = PtcbTable::new();
        let mut threads = ThreadTable::new();
        let (tid, _) = create_thread(&mut ptcbs, &mut threads, Pid(1)).unwrap();

        detach(&mut ptcbs, &mut threads, tid).unwrap();
        assert_eq!(detach(&mut ptcbs, &mut threads, tid), Err(KernelError::ProtocolViolation));

        thread_exit(&mut ptcbs, &mut threads, tid, 7);
        assert!(threads.resolve(tid).is_none(), "detached thread's ptcb is freed on exit");
    }

    #[test]
    fn detach_after_exit_is_rejected_and_keeps_the_ptcb() {
        let mut ptcbs = PtcbTable::new();
        let mut threads = ThreadTable::new();
        let (tid, _) = create_thread(&mut ptcbs, &mut threads, Pid(1)).unwrap();

        thread_exit(&mut ptcbs, &mut threads, tid, 3);
        assert_eq!(detach(&mut ptcbs, &mut threads, tid), Err(KernelError::ProtocolViolation));
        assert!(threads.resolve(tid).is_some(), "rejected detach must not free the ptcb");
    }

    #[test]
    fn join_on_a_detached_thread_is_rejected() {
        let mut ptcbs = PtcbTable::new();
        let mut threads = ThreadTable::new();
        let (tid, _) = create_thread(&mut ptcbs, &mut threads, Pid(1)).unwrap();
        detach(&mut ptcbs, &mut threads, tid).unwrap();
        assert_eq!(begin_join(&mut ptcbs, &mut threads, tid).err(), Some(KernelError::ProtocolViolation));
    }
}
