//! Per-process control blocks (PCBs): process lifecycle, parent/child
//! bookkeeping, and the per-process file and thread tables.
//!
//! Ported from `kernel_proc.c`'s `PCB` and the reparenting/zombie-merge
//! logic `sys_Exit` runs once a process's last thread has exited. Address
//! space and page-directory bookkeeping is gone entirely — this core has
//! no memory model of its own, and a process here is nothing more than
//! the IPC and threading state the spec actually asks for.

use std::collections::HashSet;
use std::sync::{Arc, Condvar};

use crate::config::{INIT_PID, MAX_PROC};
use crate::error::{KernelError, KernelResult};
use crate::ids::Pid;
use crate::ipc::fcb::FileTable;
use crate::task::thread::ThreadTable;
use crate::util::slab::Slab;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Has at least one thread that hasn't called `sys_ThreadExit`.
    Active,
    /// Every thread has exited; lingers until its parent reaps it with
    /// `sys_WaitChild`.
    Zombie,
}

pub struct Pcb {
    pub parent: Pid,
    pub state: ProcessState,
    pub threads: ThreadTable,
    pub files: FileTable,
    /// The dying process's own last thread's exit value, reported to
    /// whichever ancestor eventually reaps it.
    pub exit_val: i32,
    /// Direct children still `Active` or un-reaped `Zombie`s.
    pub children: HashSet<Pid>,
    /// Children that have exited and been merged into this process's
    /// table (via its own exit or its children's), not yet reaped.
    pub exited_children: Vec<(Pid, i32)>,
    /// Signaled whenever a new entry lands in `exited_children`.
    pub wait_children: Arc<Condvar>,
}

impl Pcb {
    fn new(parent: Pid) -> Self {
        Pcb {
            parent,
            state: ProcessState::Active,
            threads: ThreadTable::new(),
            files: FileTable::new(),
            exit_val: 0,
            children: HashSet::new(),
            exited_children: Vec::new(),
            wait_children: Arc::new(Condvar::new()),
        }
    }
}

pub struct ProcessTable {
    slab: Slab<Pcb>,
}

impl ProcessTable {
    /// Create the table with process 1 (init) already resident, matching
    /// [`crate::config::INIT_PID`].
    pub fn new() -> Self {
        let mut slab = Slab::with_capacity(MAX_PROC);
        let idx = slab.insert(Pcb::new(Pid(INIT_PID))).expect("MAX_PROC >= 1");
        debug_assert_eq!(idx, INIT_PID - 1);
        ProcessTable { slab }
    }

    fn pid_of(idx: u32) -> Pid {
        Pid(idx + 1)
    }

    fn idx_of(pid: Pid) -> u32 {
        pid.0 - 1
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.slab.get(Self::idx_of(pid))
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slab.get_mut(Self::idx_of(pid))
    }

    /// `sys_Spawn`'s process-table half: create a child PCB under `parent`.
    pub fn spawn(&mut self, parent: Pid) -> KernelResult<Pid> {
        let idx = self.slab.insert(Pcb::new(parent)).ok_or(KernelError::ResourceExhausted)?;
        let pid = Self::pid_of(idx);
        if let Some(p) = self.get_mut(parent) {
            p.children.insert(pid);
        }
        Ok(pid)
    }

    /// Move every child of `dying` to init, and merge `dying`'s own
    /// zombie children into init's list. Run once, when `dying`'s last
    /// thread exits, before `dying` itself becomes a zombie.
    pub fn reparent_children_to_init(&mut self, dying: Pid) {
        let init = Pid(INIT_PID);
        let (children, exited_children) = {
            let Some(pcb) = self.get_mut(dying) else { return };
            (std::mem::take(&mut pcb.children), std::mem::take(&mut pcb.exited_children))
        };
        for &child in &children {
            if let Some(child_pcb) = self.get_mut(child) {
                child_pcb.parent = init;
            }
        }
        if let Some(init_pcb) = self.get_mut(init) {
            init_pcb.children.extend(children);
            let notify = !exited_children.is_empty();
            init_pcb.exited_children.extend(exited_children);
            if notify {
                init_pcb.wait_children.notify_all();
            }
        }
    }

    /// Transition `dying` to `Zombie` and report its exit value to its
    /// parent. `dying` must have no more `Active` threads and must already
    /// have had its children reparented via [`Self::reparent_children_to_init`].
    pub fn become_zombie(&mut self, dying: Pid, exit_val: i32) {
        let parent = {
            let Some(pcb) = self.get_mut(dying) else { return };
            pcb.state = ProcessState::Zombie;
            pcb.exit_val = exit_val;
            pcb.parent
        };
        if dying.0 == INIT_PID {
            return;
        }
        if let Some(parent_pcb) = self.get_mut(parent) {
            parent_pcb.exited_children.push((dying, exit_val));
            parent_pcb.wait_children.notify_all();
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one non-blocking attempt to service `sys_WaitChild`.
pub enum WaitOutcome {
    Reaped(Pid, i32),
    WouldBlock,
    /// `parent` has no children at all, living or zombie — matches the
    /// original's immediate `ECHILD`-style failure rather than blocking
    /// forever.
    NoChildren,
}

/// One non-blocking attempt to reap a child of `parent`. `target == None`
/// reaps the first zombie in arrival order (`sys_WaitAny`); `Some(pid)`
/// reaps that specific child if it has exited (`sys_WaitChild`).
///
/// Reaping here means the zombie's PCB slot is freed for reuse — it is the
/// only place a PCB is ever removed from the table.
pub fn try_wait_child(table: &mut ProcessTable, parent: Pid, target: Option<Pid>) -> KernelResult<WaitOutcome> {
    let pcb = table.get(parent).ok_or(KernelError::BadArgument)?;
    if pcb.children.is_empty() && pcb.exited_children.is_empty() {
        return Ok(WaitOutcome::NoChildren);
    }
    if let Some(target_pid) = target {
        if !pcb.children.contains(&target_pid) && !pcb.exited_children.iter().any(|&(p, _)| p == target_pid) {
            return Err(KernelError::BadArgument);
        }
    }

    let pcb = table.get_mut(parent).expect("checked above");
    let pos = match target {
        Some(target_pid) => pcb.exited_children.iter().position(|&(p, _)| p == target_pid),
        None => (!pcb.exited_children.is_empty()).then_some(0),
    };
    let Some(pos) = pos else {
        return Ok(WaitOutcome::WouldBlock);
    };
    let (child_pid, exit_val) = pcb.exited_children.remove(pos);
    pcb.children.remove(&child_pid);

    table.slab.remove(ProcessTable::idx_of(child_pid));
    Ok(WaitOutcome::Reaped(child_pid, exit_val))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_registers_the_child_with_its_parent() {
        let mut table = ProcessTable::new();
        let init = Pid(INIT_PID);
        let child = table.spawn(init).unwrap();
        assert!(table.get(init).unwrap().children.contains(&child));
    }

    #[test]
    fn exit_then_wait_reaps_and_frees_the_slot() {
        let mut table = ProcessTable::new();
        let init = Pid(INIT_PID);
        let child = table.spawn(init).unwrap();

        table.reparent_children_to_init(child);
        table.become_zombie(child, 5);

        match try_wait_child(&mut table, init, None).unwrap() {
            WaitOutcome::Reaped(pid, val) => {
                assert_eq!(pid, child);
                assert_eq!(val, 5);
            }
            _ => panic!("expected a reapable zombie"),
        }
        assert!(table.get(child).is_none(), "slot freed after reaping");
    }

    #[test]
    fn grandchildren_are_reparented_to_init_on_exit() {
        let mut table = ProcessTable::new();
        let init = Pid(INIT_PID);
        let mid = table.spawn(init).unwrap();
        let grandchild = table.spawn(mid).unwrap();

        table.reparent_children_to_init(mid);
        table.become_zombie(mid, 0);

        assert!(table.get(init).unwrap().children.contains(&grandchild));
        assert_eq!(table.get(grandchild).unwrap().parent, init);
    }

    #[test]
    fn waiting_with_no_children_fails_fast() {
        let mut table = ProcessTable::new();
        assert!(matches!(try_wait_child(&mut table, Pid(INIT_PID), None).unwrap(), WaitOutcome::NoChildren));
    }

    #[test]
    fn waiting_before_a_live_child_exits_would_block() {
        let mut table = ProcessTable::new();
        let init = Pid(INIT_PID);
        let _child = table.spawn(init).unwrap();
        assert!(matches!(try_wait_child(&mut table, init, None).unwrap(), WaitOutcome::WouldBlock));
    }
}
