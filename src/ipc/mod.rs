//! Inter-process communication: pipes and rendezvous stream sockets, backed
//! by the shared file-control-block layer that gives both a uniform fid.

pub mod fcb;
pub mod pipe;
pub mod socket;
