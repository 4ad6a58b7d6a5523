//! The uniform file control block (FCB): a refcounted stream handle shared
//! across processes, plus the per-process file-id table that names it.
//!
//! Ported from `kernel_streams.h`'s `FCB`/`file_ops` pair. The original
//! dispatches `Read`/`Write`/`Close` through a `file_ops` vtable pointer;
//! here the set of stream kinds is closed (a pipe endpoint or a socket), so
//! dispatch is a plain enum match — the same choice `FdTable`'s `FdKind`
//! makes for fs/pipe/tty file descriptors, in preference to a trait object
//! nobody needs a third implementation of.

use crate::config::MAX_FCBS;
use crate::error::{KernelError, KernelResult};
use crate::ids::{FcbId, FileId, PipeId, SocketId};
use crate::util::slab::Slab;

/// What kind of stream a file id names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// The read end of a pipe.
    PipeReadEnd(PipeId),
    /// The write end of a pipe.
    PipeWriteEnd(PipeId),
    /// A socket (listener, unbound, or peer — `socket_read`/`write`/`close`
    /// further dispatch on the socket's own type).
    Socket(SocketId),
}

/// A file control block: refcount plus the stream it names.
pub struct Fcb {
    pub kind: StreamKind,
    refcount: u32,
}

impl Fcb {
    pub fn refcount(&self) -> u32 {
        self.refcount
    }
}

/// The global arena of FCBs, shared by every process.
pub struct FcbTable {
    slab: Slab<Fcb>,
}

impl FcbTable {
    pub fn new() -> Self {
        FcbTable { slab: Slab::with_capacity(MAX_FCBS) }
    }

    pub fn get(&self, id: FcbId) -> Option<&Fcb> {
        self.slab.get(id.0)
    }

    /// Bump the reference count of a live FCB. Used when a holder other
    /// than the fid table keeps the FCB alive across a blocking wait
    /// (`sys_Connect`, `sys_Accept`).
    pub fn incref(&mut self, id: FcbId) -> KernelResult<()> {
        let fcb = self.slab.get_mut(id.0).ok_or(KernelError::BadArgument)?;
        fcb.refcount += 1;
        Ok(())
    }

    /// Drop a reference. If it was the last one, the slot is freed and the
    /// stream's kind is returned so the caller can dispatch `Close` on it
    /// (pipe-close or socket-close, per [`StreamKind`]) — this table has no
    /// knowledge of what closing a pipe or socket entails.
    pub fn decref(&mut self, id: FcbId) -> KernelResult<Option<StreamKind>> {
        let fcb = self.slab.get_mut(id.0).ok_or(KernelError::BadArgument)?;
        fcb.refcount -= 1;
        if fcb.refcount == 0 {
            let kind = fcb.kind;
            self.slab.remove(id.0);
            Ok(Some(kind))
        } else {
            Ok(None)
        }
    }
}

impl Default for FcbTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-process file-id table: `FIDT[0..MAX_FILEID)` mapping small integers
/// to FCBs.
pub struct FileTable {
    entries: [Option<FcbId>; crate::config::MAX_FILEID],
}

impl FileTable {
    pub fn new() -> Self {
        FileTable { entries: [None; crate::config::MAX_FILEID] }
    }

    /// Resolve a fid to its FCB, or `None` if the id is out of range or
    /// unbound.
    pub fn get(&self, fid: FileId) -> Option<FcbId> {
        if fid < 0 {
            return None;
        }
        self.entries.get(fid as usize).copied().flatten()
    }

    /// All bound fids, for process teardown.
    pub fn bound_fids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.entries.iter().enumerate().filter_map(|(i, e)| e.map(|_| i as FileId))
    }

    /// Unbind `fid`, independent of whatever happens to the FCB it named.
    pub fn clear(&mut self, fid: FileId) {
        if fid >= 0 {
            if let Some(slot) = self.entries.get_mut(fid as usize) {
                *slot = None;
            }
        }
    }

    fn free_slots(&self, n: usize) -> Option<Vec<usize>> {
        let free: Vec<usize> =
            self.entries.iter().enumerate().filter(|(_, e)| e.is_none()).map(|(i, _)| i).take(n).collect();
        if free.len() == n {
            Some(free)
        } else {
            None
        }
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Atomically allocate `kinds.len()` fids in `files` and that many fresh
/// FCBs (refcount 1) in `fcbs`, one per kind. All-or-nothing: if either
/// pool lacks room, neither is mutated and `None` is returned.
pub fn reserve(fcbs: &mut FcbTable, files: &mut FileTable, kinds: &[StreamKind]) -> Option<Vec<FileId>> {
    let slots = files.free_slots(kinds.len())?;

    let mut inserted = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        match fcbs.slab.insert(Fcb { kind, refcount: 1 }) {
            Some(id) => inserted.push(FcbId(id)),
            None => {
                for id in inserted {
                    fcbs.slab.remove(id.0);
                }
                return None;
            }
        }
    }

    for (&slot, &fcb_id) in slots.iter().zip(inserted.iter()) {
        files.entries[slot] = Some(fcb_id);
    }
    Some(slots.into_iter().map(|i| i as FileId).collect())
}

/// Undo a [`reserve`]: return the fids to the free pool and release the
/// FCBs, without invoking `Close`. Only valid for fids just produced by
/// `reserve` that have not been otherwise touched.
pub fn unreserve(fcbs: &mut FcbTable, files: &mut FileTable, fids: &[FileId]) {
    for &fid in fids {
        if let Some(slot) = files.entries.get_mut(fid as usize) {
            if let Some(fcb_id) = slot.take() {
                fcbs.slab.remove(fcb_id.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_is_all_or_nothing_on_id_exhaustion() {
        let mut fcbs = FcbTable::new();
        let mut files = FileTable::new();
        // Fill every fid slot with junk so the next reserve has zero free ids.
        let kinds: Vec<StreamKind> = (0..crate::config::MAX_FILEID)
            .map(|i| StreamKind::Socket(SocketId(i as u32)))
            .collect();
        let fids = reserve(&mut fcbs, &mut files, &kinds).unwrap();
        assert_eq!(fids.len(), crate::config::MAX_FILEID);

        assert!(reserve(&mut fcbs, &mut files, &[StreamKind::Socket(SocketId(999))]).is_none());
        // Nothing was mutated by the failed reserve.
        assert_eq!(fcbs.slab.len(), crate::config::MAX_FILEID);
    }

    #[test]
    fn incref_decref_tracks_last_drop() {
        let mut fcbs = FcbTable::new();
        let mut files = FileTable::new();
        let fids = reserve(&mut fcbs, &mut files, &[StreamKind::Socket(SocketId(1))]).unwrap();
        let fcb_id = files.get(fids[0]).unwrap();

        fcbs.incref(fcb_id).unwrap();
        assert_eq!(fcbs.decref(fcb_id).unwrap(), None, "still one ref left");
        assert!(matches!(fcbs.decref(fcb_id).unwrap(), Some(StreamKind::Socket(_))));
        assert!(fcbs.get(fcb_id).is_none(), "slot freed on last decref");
    }

    #[test]
    fn unreserve_releases_without_close() {
        let mut fcbs = FcbTable::new();
        let mut files = FileTable::new();
        let fids = reserve(&mut fcbs, &mut files, &[StreamKind::Socket(SocketId(1))]).unwrap();
        unreserve(&mut fcbs, &mut files, &fids);
        assert!(files.get(fids[0]).is_none());
        assert_eq!(fcbs.slab.len(), 0);
    }
}
