//! MPI transport: every process is an MPI rank of `MPI_COMM_WORLD`.
//!
//! All communicators of a process share the world communicator. Each message carries the
//! context of the communicator it was sent on, followed by the fingerprint of its type, so
//! that messages addressed to one communicator are never delivered on another. A message that
//! arrives for a context nobody is waiting on yet is stashed until it is asked for.
//!
//! Sends go through `MPI_Bsend` out of a buffer attached at initialization, so that they never
//! block, matching the in-process fabric.

use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use parking_lot::Mutex;
use std::{
    any::type_name,
    collections::{hash_map::Entry, HashMap, VecDeque},
    sync::Arc,
};

use super::{
    wire::{fingerprint, Message},
    Comm, CommError, Transport,
};

/// Size of the send buffer attached by [`MpiUniverse::initialize`].
pub const DEFAULT_SEND_BUFFER: usize = 256 << 20;

#[derive(Default)]
pub(super) struct MpiTransport {
    stash: Mutex<HashMap<(u64, usize), VecDeque<Vec<u8>>>>,
}

impl MpiTransport {
    pub(super) fn post<M: Message>(
        &self,
        context: u64,
        dest: usize,
        msg: &M,
    ) -> Result<(), CommError> {
        let mut bytes = Vec::new();
        context.encode(&mut bytes);
        fingerprint::<M>().encode(&mut bytes);
        msg.encode(&mut bytes);

        let world = SimpleCommunicator::world();
        world.process_at_rank(dest as i32).buffered_send(&bytes[..]);
        Ok(())
    }

    pub(super) fn take<M: Message>(&self, context: u64, src: usize) -> Result<M, CommError> {
        let mismatch = CommError::TypeMismatch {
            expected: type_name::<M>(),
        };
        let bytes = self.next_for(context, src).ok_or(mismatch.clone())?;
        // the context was checked by `next_for`
        let mut input = &bytes[8..];
        if u64::decode(&mut input) != Some(fingerprint::<M>()) {
            return Err(mismatch);
        }
        match M::decode(&mut input) {
            Some(msg) if input.is_empty() => Ok(msg),
            _ => Err(mismatch),
        }
    }

    /// Next message from world rank `src` on `context`, or `None` if a message without a
    /// readable header arrived.
    fn next_for(&self, context: u64, src: usize) -> Option<Vec<u8>> {
        if let Entry::Occupied(mut queue) = self.stash.lock().entry((context, src)) {
            let bytes = queue.get_mut().pop_front();
            if queue.get().is_empty() {
                queue.remove();
            }
            if bytes.is_some() {
                return bytes;
            }
        }

        let world = SimpleCommunicator::world();
        let peer = world.process_at_rank(src as i32);
        loop {
            let (bytes, _status) = peer.receive_vec::<u8>();
            let tag = u64::decode(&mut bytes.as_slice())?;
            if tag == context {
                return Some(bytes);
            }
            tracing::trace!(context = tag, src, "stashing message for another communicator");
            self.stash
                .lock()
                .entry((tag, src))
                .or_default()
                .push_back(bytes);
        }
    }
}

/// Launcher for SPMD programs over MPI ranks.
///
/// MPI is finalized when the universe is dropped, so every [`Comm`] obtained from it must be
/// dropped first.
///
/// ```ignore
/// let universe = dmat_core::comm::MpiUniverse::initialize()?;
/// let comm = universe.world();
/// let grid = dmat_core::Grid::square(&comm)?;
/// ```
pub struct MpiUniverse {
    universe: mpi::environment::Universe,
    transport: Arc<MpiTransport>,
}

impl MpiUniverse {
    /// Initializes MPI with a send buffer of [`DEFAULT_SEND_BUFFER`] bytes.
    pub fn initialize() -> Result<Self, CommError> {
        Self::with_send_buffer(DEFAULT_SEND_BUFFER)
    }

    /// Initializes MPI with a send buffer of `bytes` bytes. The buffer must be able to hold
    /// every message a process has sent and its peers have not received yet.
    pub fn with_send_buffer(bytes: usize) -> Result<Self, CommError> {
        let mut universe = mpi::initialize().ok_or(CommError::AlreadyInitialized)?;
        universe.set_buffer_size(bytes);
        let world = universe.world();
        tracing::debug!(
            rank = world.rank(),
            size = world.size(),
            send_buffer = bytes,
            "initialized MPI"
        );
        Ok(Self {
            universe,
            transport: Arc::new(MpiTransport::default()),
        })
    }

    /// Communicator over every MPI rank.
    pub fn world(&self) -> Comm {
        let world = self.universe.world();
        Comm::world(
            Transport::Mpi(self.transport.clone()),
            world.size() as usize,
            world.rank() as usize,
        )
    }
}
