//! Communicators.
//!
//! A [`Comm`] is an ordered group of cooperating processes running the same program. Messages
//! travel over a transport shared by every communicator of a program:
//! - [`Universe::run`] launches every process as an OS thread of the calling program and moves
//!   boxed values between them,
//! - with the `mpi` feature, [`MpiUniverse`] runs one process per MPI rank and moves encoded
//!   [`Message`]s between them.
//!
//! Each communicator has its own context, and a channel is identified by the context and the
//! ordered pair of world ranks. Sends are buffered and receives block. Collectives are built
//! from point-to-point messages and are blocking rendezvous: every member of a communicator
//! must issue the same collectives in the same order.

use assert2::assert as fancy_assert;
use std::{
    any::type_name,
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::ComplexField;
pub use crate::error::CommError;

#[cfg(feature = "mpi")]
mod mpi_backend;
mod threads;
mod wire;

#[cfg(feature = "mpi")]
pub use mpi_backend::{MpiUniverse, DEFAULT_SEND_BUFFER};
pub use threads::Universe;
pub use wire::Message;

#[derive(Clone)]
pub(crate) enum Transport {
    Threads(Arc<threads::Fabric>),
    #[cfg(feature = "mpi")]
    Mpi(Arc<mpi_backend::MpiTransport>),
}

impl Transport {
    fn same(&self, other: &Transport) -> bool {
        match (self, other) {
            (Transport::Threads(a), Transport::Threads(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "mpi")]
            (Transport::Mpi(a), Transport::Mpi(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "mpi")]
            _ => false,
        }
    }
}

/// Ordered group of processes that can exchange messages.
///
/// Ranks are positions in the group, in the order the group was created with. Cloning a
/// communicator is cheap and yields a handle to the same group.
#[derive(Clone)]
pub struct Comm {
    transport: Transport,
    context: u64,
    members: Arc<[usize]>,
    rank: usize,
    epochs: Arc<AtomicU64>,
}

impl core::fmt::Debug for Comm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Comm")
            .field("context", &self.context)
            .field("rank", &self.rank)
            .field("members", &self.members)
            .finish()
    }
}

impl Comm {
    pub(crate) fn world(transport: Transport, size: usize, rank: usize) -> Comm {
        Comm {
            transport,
            context: 0,
            members: (0..size).collect(),
            rank,
            epochs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Rank of the calling process in this communicator.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of processes in this communicator.
    #[inline]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Rank of the calling process in the universe.
    #[inline]
    pub fn world_rank(&self) -> usize {
        self.members[self.rank]
    }

    /// Returns a number that is distinct for every call on this communicator and its clones
    /// within one process. Members that make the same sequence of calls get the same numbers.
    pub fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed)
    }

    /// Creates the sub-communicator made of the given ranks of `self`, in that order.
    ///
    /// This does not communicate: every member computes the same sub-communicator
    /// independently. `label` distinguishes groups with identical members created for
    /// different purposes. Returns `None` if the calling process is not a member.
    pub fn subset(&self, label: &str, members: &[usize]) -> Result<Option<Comm>, CommError> {
        for &member in members {
            self.check_rank(member)?;
        }

        let mut hasher = DefaultHasher::new();
        self.context.hash(&mut hasher);
        label.hash(&mut hasher);
        members.hash(&mut hasher);
        let context = hasher.finish();

        let world: Arc<[usize]> = members.iter().map(|&m| self.members[m]).collect();
        Ok(members
            .iter()
            .position(|&m| m == self.rank)
            .map(|rank| Comm {
                transport: self.transport.clone(),
                context,
                members: world,
                rank,
                epochs: Arc::new(AtomicU64::new(0)),
            }))
    }

    /// Whether `self` and `other` designate the same group.
    #[inline]
    pub fn same_group(&self, other: &Comm) -> bool {
        self.transport.same(&other.transport)
            && self.context == other.context
            && self.members == other.members
    }

    fn check_rank(&self, rank: usize) -> Result<(), CommError> {
        if rank < self.size() {
            Ok(())
        } else {
            Err(CommError::InvalidRank {
                rank,
                size: self.size(),
            })
        }
    }

    /// Sends `msg` to `dest`. Sends are buffered and never block.
    pub fn send<M: Message>(&self, dest: usize, msg: M) -> Result<(), CommError> {
        self.check_rank(dest)?;
        let (src, dst) = (self.members[self.rank], self.members[dest]);
        match &self.transport {
            Transport::Threads(fabric) => fabric.post((self.context, src, dst), Box::new(msg)),
            #[cfg(feature = "mpi")]
            Transport::Mpi(mpi) => mpi.post(self.context, dst, &msg),
        }
    }

    /// Receives the next message sent by `src` on this communicator.
    pub fn recv<M: Message>(&self, src: usize) -> Result<M, CommError> {
        self.check_rank(src)?;
        let (src, dst) = (self.members[src], self.members[self.rank]);
        match &self.transport {
            Transport::Threads(fabric) => fabric
                .take((self.context, src, dst))?
                .downcast::<M>()
                .map(|msg| *msg)
                .map_err(|_| CommError::TypeMismatch {
                    expected: type_name::<M>(),
                }),
            #[cfg(feature = "mpi")]
            Transport::Mpi(mpi) => mpi.take(self.context, src),
        }
    }

    /// Sends `msg` to `dest`, then receives from `src`.
    pub fn sendrecv<M: Message, N: Message>(
        &self,
        dest: usize,
        msg: M,
        src: usize,
    ) -> Result<N, CommError> {
        self.send(dest, msg)?;
        self.recv(src)
    }

    /// Blocks until every member has entered the barrier.
    pub fn barrier(&self) -> Result<(), CommError> {
        self.all_gather(()).map(drop)
    }

    /// Broadcasts the value held by `root` to every member.
    ///
    /// # Panics
    ///
    /// Panics if `root` does not provide a value.
    pub fn broadcast<M: Message + Clone>(
        &self,
        root: usize,
        value: Option<M>,
    ) -> Result<M, CommError> {
        self.check_rank(root)?;
        if self.rank == root {
            let Some(value) = value else {
                panic!("the root of a broadcast must provide a value");
            };
            for dest in 0..self.size() {
                if dest != root {
                    self.send(dest, value.clone())?;
                }
            }
            Ok(value)
        } else {
            self.recv(root)
        }
    }

    /// Gathers one value per member on `root`, in rank order. Other members receive `None`.
    pub fn gather<M: Message>(&self, root: usize, value: M) -> Result<Option<Vec<M>>, CommError> {
        self.check_rank(root)?;
        if self.rank == root {
            let mut own = Some(value);
            let mut out = Vec::with_capacity(self.size());
            for src in 0..self.size() {
                if src == root {
                    out.extend(own.take());
                } else {
                    out.push(self.recv(src)?);
                }
            }
            Ok(Some(out))
        } else {
            self.send(root, value)?;
            Ok(None)
        }
    }

    /// Gathers one value per member on every member, in rank order.
    pub fn all_gather<M: Message + Clone>(&self, value: M) -> Result<Vec<M>, CommError> {
        for dest in 0..self.size() {
            if dest != self.rank {
                self.send(dest, value.clone())?;
            }
        }
        let mut own = Some(value);
        let mut out = Vec::with_capacity(self.size());
        for src in 0..self.size() {
            if src == self.rank {
                out.extend(own.take());
            } else {
                out.push(self.recv(src)?);
            }
        }
        Ok(out)
    }

    /// Sends `values[d]` to member `d` and returns the values received from every member, in
    /// rank order.
    ///
    /// # Panics
    ///
    /// Panics if `values.len()` differs from the size of the communicator.
    #[track_caller]
    pub fn all_to_all<M: Message>(&self, values: Vec<M>) -> Result<Vec<M>, CommError> {
        fancy_assert!(values.len() == self.size());
        let mut own = None;
        for (dest, value) in values.into_iter().enumerate() {
            if dest == self.rank {
                own = Some(value);
            } else {
                self.send(dest, value)?;
            }
        }
        let mut out = Vec::with_capacity(self.size());
        for src in 0..self.size() {
            if src == self.rank {
                out.extend(own.take());
            } else {
                out.push(self.recv(src)?);
            }
        }
        Ok(out)
    }

    /// Elementwise reduction of `values` across members.
    ///
    /// Contributions are folded in rank order on every member, so that every member obtains a
    /// bit-identical result.
    pub fn all_reduce<E: Message + Clone>(
        &self,
        values: Vec<E>,
        op: impl Fn(E, E) -> E,
    ) -> Result<Vec<E>, CommError> {
        let n = values.len();
        let mut parts = self.all_gather(values)?.into_iter();
        let mut acc = parts.next().unwrap_or_default();
        for part in parts {
            fancy_assert!(part.len() == n);
            acc = acc
                .into_iter()
                .zip(part)
                .map(|(a, b)| op(a, b))
                .collect();
        }
        Ok(acc)
    }

    /// Elementwise sum of `values` across members.
    pub fn all_reduce_sum<T: ComplexField>(&self, values: Vec<T>) -> Result<Vec<T>, CommError> {
        self.all_reduce(values, |a, b| a + b)
    }

    /// Sums `blocks[d]` across members and hands the result to member `d`.
    pub fn reduce_scatter_sum<T: ComplexField>(
        &self,
        blocks: Vec<Vec<T>>,
    ) -> Result<Vec<T>, CommError> {
        let mut parts = self.all_to_all(blocks)?.into_iter();
        let mut acc = parts.next().unwrap_or_default();
        for part in parts {
            fancy_assert!(part.len() == acc.len());
            for (a, b) in acc.iter_mut().zip(part) {
                *a = *a + b;
            }
        }
        Ok(acc)
    }
}
