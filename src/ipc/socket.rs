//! Rendezvous stream sockets: a listener accepts connection requests queued
//! by connectors on the same port, and each accepted connection is wired up
//! as a pair of pipes running in opposite directions.
//!
//! Ported from `kernel_socket.c`'s `SCB`/`CONNECTION_REQUEST` pair and the
//! `sys_Socket`/`sys_Listen`/`sys_Connect`/`sys_Accept`/`sys_ShutDown`
//! syscalls. As with [`crate::ipc::pipe`], the blocking retry loops for
//! `Connect`/`Accept` live in [`crate::kernel`]; this module holds the
//! socket and connection-request data model and the state transitions that
//! happen while the kernel lock is held.
//!
//! Two bugs in the original are fixed here rather than reproduced (see the
//! design notes on `socket_close` and connect-timeout cleanup): a timed-out
//! `Connect` now removes its request from the listener's queue instead of
//! leaving a dangling entry for `Accept` to trip over, and closing a PEER
//! socket now actually tears down both pipe ends instead of falling through
//! to an error return.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Condvar;

use crate::config::{ShutdownMode, MAX_CONN_REQS, MAX_SOCKETS};
use crate::error::{KernelError, KernelResult};
use crate::ids::{ConnReqId, FileId, PipeId, SocketId};
use crate::ipc::fcb::{FcbTable, FileTable, StreamKind};
use crate::ipc::pipe::PipeTable;
use crate::util::slab::Slab;

/// What a socket currently is. A socket starts `Unbound`, becomes a
/// `Listener` via `sys_Listen`, or becomes a `Peer` once connected (either
/// by `Connect` succeeding or by being handed back from `Accept`).
pub enum SocketType {
    Unbound,
    Listener {
        queue: VecDeque<ConnReqId>,
        req_available: Arc<Condvar>,
        /// Set once the listening fid is closed; wakes queued connectors
        /// with a failure instead of leaving them blocked forever.
        closed: bool,
    },
    Peer {
        /// Pipe carrying bytes from the other end to us.
        read_pipe: PipeId,
        /// Pipe carrying bytes from us to the other end.
        write_pipe: PipeId,
    },
}

pub struct Socket {
    pub port: u16,
    pub kind: SocketType,
    /// Independent of the owning FCB's refcount: a queued [`ConnReq`] holds
    /// a reference to the listener it targets, so the listener can outlive
    /// a concurrent close of its fid until every pending request drains.
    refcount: u32,
}

/// A connection request queued against a listener.
pub struct ConnReq {
    /// The connecting side's own (still-`Unbound`) socket, rewired to
    /// `Peer` in place once `Accept` admits this request.
    connector_socket: SocketId,
    listener: SocketId,
    admitted: bool,
    /// Set when the listener is closed while this request is queued.
    refused: bool,
    pub done: Arc<Condvar>,
}

impl ConnReq {
    pub fn admitted(&self) -> bool {
        self.admitted
    }

    pub fn refused(&self) -> bool {
        self.refused
    }
}

pub struct SocketTable {
    slab: Slab<Socket>,
    port_map: HashMap<u16, SocketId>,
}

impl SocketTable {
    pub fn new() -> Self {
        SocketTable { slab: Slab::with_capacity(MAX_SOCKETS), port_map: HashMap::new() }
    }

    pub fn get(&self, id: SocketId) -> Option<&Socket> {
        self.slab.get(id.0)
    }

    pub fn get_mut(&mut self, id: SocketId) -> Option<&mut Socket> {
        self.slab.get_mut(id.0)
    }

    fn incref(&mut self, id: SocketId) {
        if let Some(s) = self.slab.get_mut(id.0) {
            s.refcount += 1;
        }
    }

    /// Drop a reference; the slot is freed once it reaches zero.
    fn decref(&mut self, id: SocketId) {
        if let Some(s) = self.slab.get_mut(id.0) {
            s.refcount -= 1;
            if s.refcount == 0 {
                self.slab.remove(id.0);
            }
        }
    }
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConnReqTable {
    slab: Slab<ConnReq>,
}

impl ConnReqTable {
    pub fn new() -> Self {
        ConnReqTable { slab: Slab::with_capacity(MAX_CONN_REQS) }
    }

    pub fn get(&self, id: ConnReqId) -> Option<&ConnReq> {
        self.slab.get(id.0)
    }
}

impl Default for ConnReqTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `sys_Socket`: create a new unbound socket on `port` (or
/// [`crate::config::NOPORT`]) and reserve its fid.
pub fn sys_socket(
    sockets: &mut SocketTable,
    fcbs: &mut FcbTable,
    files: &mut FileTable,
    port: u16,
) -> KernelResult<FileId> {
    if port > crate::config::MAX_PORT {
        return Err(KernelError::BadArgument);
    }
    let idx = sockets.slab.insert(Socket { port, kind: SocketType::Unbound, refcount: 1 });
    let Some(idx) = idx else {
        return Err(KernelError::ResourceExhausted);
    };
    let socket_id = SocketId(idx);

    match crate::ipc::fcb::reserve(fcbs, files, &[StreamKind::Socket(socket_id)]) {
        Some(fids) => Ok(fids[0]),
        None => {
            sockets.slab.remove(idx);
            Err(KernelError::ResourceExhausted)
        }
    }
}

/// `sys_Listen`: bind `socket_id` to its port and make it a listener.
/// Fails if the socket isn't `Unbound`, has no port, or the port already
/// has a listener.
pub fn listen(sockets: &mut SocketTable, socket_id: SocketId) -> KernelResult<()> {
    let port = {
        let socket = sockets.slab.get(socket_id.0).ok_or(KernelError::BadArgument)?;
        if !matches!(socket.kind, SocketType::Unbound) {
            return Err(KernelError::ProtocolViolation);
        }
        if socket.port == crate::config::NOPORT {
            return Err(KernelError::BadArgument);
        }
        socket.port
    };
    if sockets.port_map.contains_key(&port) {
        return Err(KernelError::ProtocolViolation);
    }
    let socket = sockets.slab.get_mut(socket_id.0).ok_or(KernelError::BadArgument)?;
    socket.kind =
        SocketType::Listener { queue: VecDeque::new(), req_available: Arc::new(Condvar::new()), closed: false };
    sockets.port_map.insert(port, socket_id);
    Ok(())
}

/// Begin a `sys_Connect`: queue a request against the listener on `port`
/// and wake it. Returns the request id; the caller waits on
/// [`ConnReq::done`] (via [`ConnReqTable::get`]) until `admitted` or
/// `refused`, subject to its own timeout.
pub fn begin_connect(
    sockets: &mut SocketTable,
    conn_reqs: &mut ConnReqTable,
    connector_socket: SocketId,
    port: u16,
) -> KernelResult<ConnReqId> {
    let listener_id = *sockets.port_map.get(&port).ok_or(KernelError::ProtocolViolation)?;
    let listener = sockets.slab.get_mut(listener_id.0).ok_or(KernelError::ProtocolViolation)?;
    let SocketType::Listener { queue, req_available, closed } = &mut listener.kind else {
        return Err(KernelError::ProtocolViolation);
    };
    if *closed {
        return Err(KernelError::RemoteGone);
    }

    let req = ConnReq {
        connector_socket,
        listener: listener_id,
        admitted: false,
        refused: false,
        done: Arc::new(Condvar::new()),
    };
    let req_id = conn_reqs.slab.insert(req).ok_or(KernelError::ResourceExhausted)?;
    let req_id = ConnReqId(req_id);

    queue.push_back(req_id);
    req_available.notify_all();
    sockets.incref(listener_id);
    Ok(req_id)
}

/// Tear down a connect request that timed out: remove it from the
/// listener's queue (so `Accept` never sees it) and drop the reference the
/// request held on the listener.
///
/// Safe to call even if `Accept` already popped the entry — removing a
/// value that isn't present in the queue is a no-op.
pub fn cancel_connect(sockets: &mut SocketTable, conn_reqs: &mut ConnReqTable, req_id: ConnReqId) {
    let Some(req) = conn_reqs.slab.remove(req_id.0) else { return };
    if let Some(listener) = sockets.slab.get_mut(req.listener.0) {
        if let SocketType::Listener { queue, .. } = &mut listener.kind {
            queue.retain(|&id| id != req_id);
        }
    }
    sockets.decref(req.listener);
}

/// Outcome of one non-blocking attempt to pop a connection request.
pub enum AcceptOutcome {
    Admitted(FileId),
    WouldBlock,
    Closed,
}

/// One non-blocking attempt to service `sys_Accept` on `listener_id`: pops
/// the first live request from the queue (skipping any already cleaned up
/// by a timed-out connector), wires up a fresh pipe pair, and admits it.
pub fn try_accept(
    sockets: &mut SocketTable,
    conn_reqs: &mut ConnReqTable,
    pipes: &mut PipeTable,
    fcbs: &mut FcbTable,
    files: &mut FileTable,
    listener_id: SocketId,
) -> KernelResult<AcceptOutcome> {
    let listener = sockets.slab.get_mut(listener_id.0).ok_or(KernelError::BadArgument)?;
    let SocketType::Listener { queue, closed, .. } = &mut listener.kind else {
        return Err(KernelError::ProtocolViolation);
    };
    if *closed {
        return Ok(AcceptOutcome::Closed);
    }

    let mut req_id = None;
    while let Some(candidate) = queue.pop_front() {
        if conn_reqs.slab.contains(candidate.0) {
            req_id = Some(candidate);
            break;
        }
        // Entry was already cleaned up by a timed-out Connect; skip it.
    }
    let Some(req_id) = req_id else {
        return Ok(AcceptOutcome::WouldBlock);
    };

    let connector_socket = conn_reqs.get(req_id).expect("checked contains above").connector_socket;

    let client_to_server = pipes.alloc().ok_or(KernelError::ResourceExhausted)?;
    let server_to_client = match pipes.alloc() {
        Some(p) => p,
        None => {
            pipes.remove_raw(client_to_server);
            return Err(KernelError::ResourceExhausted);
        }
    };

    let acceptor_socket_idx =
        sockets.slab.insert(Socket { port: crate::config::NOPORT, kind: SocketType::Unbound, refcount: 1 });
    let Some(acceptor_socket_idx) = acceptor_socket_idx else {
        pipes.remove_raw(client_to_server);
        pipes.remove_raw(server_to_client);
        return Err(KernelError::ResourceExhausted);
    };
    let acceptor_socket_id = SocketId(acceptor_socket_idx);

    let new_fid = match crate::ipc::fcb::reserve(fcbs, files, &[StreamKind::Socket(acceptor_socket_id)]) {
        Some(fids) => fids[0],
        None => {
            sockets.slab.remove(acceptor_socket_idx);
            pipes.remove_raw(client_to_server);
            pipes.remove_raw(server_to_client);
            return Err(KernelError::ResourceExhausted);
        }
    };

    if let Some(acceptor) = sockets.slab.get_mut(acceptor_socket_id.0) {
        acceptor.kind = SocketType::Peer { read_pipe: client_to_server, write_pipe: server_to_client };
    }
    if let Some(connector) = sockets.slab.get_mut(connector_socket.0) {
        connector.kind = SocketType::Peer { read_pipe: server_to_client, write_pipe: client_to_server };
    }

    let req = conn_reqs.slab.get_mut(req_id.0).expect("checked contains above");
    req.admitted = true;
    req.done.notify_all();

    sockets.decref(listener_id);

    Ok(AcceptOutcome::Admitted(new_fid))
}

/// Resolve a `Peer` socket's read/write pipes, for `socket_read`/`socket_write`
/// dispatch. Any other socket type is a type error (read/write on an
/// unbound or listening socket return `-1` at the syscall boundary).
pub fn peer_pipes(sockets: &SocketTable, id: SocketId) -> KernelResult<(PipeId, PipeId)> {
    match sockets.get(id).ok_or(KernelError::BadArgument)?.kind {
        SocketType::Peer { read_pipe, write_pipe } => Ok((read_pipe, write_pipe)),
        _ => Err(KernelError::ProtocolViolation),
    }
}

/// `sys_ShutDown`: half- or fully-close a peer socket's pipes.
pub fn shutdown(sockets: &SocketTable, pipes: &mut PipeTable, id: SocketId, mode: ShutdownMode) -> KernelResult<()> {
    let (read_pipe, write_pipe) = peer_pipes(sockets, id)?;
    if matches!(mode, ShutdownMode::Read | ShutdownMode::Both) {
        if let Some(p) = pipes.get_mut(read_pipe) {
            p.close_reader();
        }
    }
    if matches!(mode, ShutdownMode::Write | ShutdownMode::Both) {
        if let Some(p) = pipes.get_mut(write_pipe) {
            p.close_writer();
        }
    }
    Ok(())
}

/// Dispatch for the last `decref` of a socket's FCB. Fixes the original's
/// fallthrough bug: a PEER socket's teardown is handled explicitly and
/// always succeeds, rather than falling through to an error path.
pub fn close(
    sockets: &mut SocketTable,
    conn_reqs: &mut ConnReqTable,
    pipes: &mut PipeTable,
    id: SocketId,
) -> KernelResult<()> {
    let kind_tag = sockets.get(id).ok_or(KernelError::BadArgument)?;
    match &kind_tag.kind {
        SocketType::Unbound => {}
        SocketType::Peer { read_pipe, write_pipe } => {
            let (read_pipe, write_pipe) = (*read_pipe, *write_pipe);
            if let Some(p) = pipes.get_mut(read_pipe) {
                p.close_reader();
            }
            if let Some(p) = pipes.get_mut(write_pipe) {
                p.close_writer();
            }
        }
        SocketType::Listener { .. } => {
            let port = kind_tag.port;
            sockets.port_map.remove(&port);
            if let Some(socket) = sockets.slab.get_mut(id.0) {
                if let SocketType::Listener { queue, req_available, closed } = &mut socket.kind {
                    *closed = true;
                    req_available.notify_all();
                    for req_id in queue.drain(..) {
                        if let Some(req) = conn_reqs.slab.get_mut(req_id.0) {
                            req.refused = true;
                            req.done.notify_all();
                        }
                    }
                }
            }
        }
    }
    sockets.decref(id);
    Ok(())
}
