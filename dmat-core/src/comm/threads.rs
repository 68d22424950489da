//! In-process transport: every process is an OS thread of the calling program.

use assert2::assert as fancy_assert;
use parking_lot::{Condvar, Mutex};
use std::{
    any::Any,
    collections::{hash_map::Entry, HashMap, VecDeque},
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use super::{Comm, CommError, Transport};

pub(super) type Payload = Box<dyn Any + Send>;

/// `(context, world source, world destination)`.
pub(super) type ChannelKey = (u64, usize, usize);

/// Shared mailboxes of every in-process rank. A channel only has an entry while it holds
/// undelivered messages.
#[derive(Default)]
pub(super) struct Fabric {
    mailboxes: Mutex<HashMap<ChannelKey, VecDeque<Payload>>>,
    arrived: Condvar,
    aborted: AtomicBool,
}

impl Fabric {
    pub(super) fn post(&self, key: ChannelKey, payload: Payload) -> Result<(), CommError> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(CommError::Aborted);
        }
        self.mailboxes
            .lock()
            .entry(key)
            .or_default()
            .push_back(payload);
        self.arrived.notify_all();
        Ok(())
    }

    pub(super) fn take(&self, key: ChannelKey) -> Result<Payload, CommError> {
        let mut mailboxes = self.mailboxes.lock();
        loop {
            if let Entry::Occupied(mut queue) = mailboxes.entry(key) {
                let payload = queue.get_mut().pop_front();
                if queue.get().is_empty() {
                    queue.remove();
                }
                if let Some(payload) = payload {
                    return Ok(payload);
                }
            }
            if self.aborted.load(Ordering::Acquire) {
                return Err(CommError::Aborted);
            }
            self.arrived.wait(&mut mailboxes);
        }
    }

    fn abort(&self) {
        let _guard = self.mailboxes.lock();
        self.aborted.store(true, Ordering::Release);
        self.arrived.notify_all();
    }

    #[cfg(test)]
    pub(super) fn open_channels(&self) -> usize {
        self.mailboxes.lock().len()
    }
}

/// Launcher for SPMD programs over in-process ranks.
pub struct Universe;

impl Universe {
    /// Runs `f` on `n_processes` processes, each receiving the world communicator, and returns
    /// the per-rank results in rank order.
    ///
    /// # Panics
    ///
    /// If any process panics, every peer blocked in a communication call wakes up with
    /// [`CommError::Aborted`], and the first panic is resumed on the calling thread.
    pub fn run<R, F>(n_processes: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(Comm) -> R + Sync,
    {
        fancy_assert!(n_processes > 0);
        tracing::debug!(n_processes, "launching universe");

        let fabric = Arc::new(Fabric::default());
        let f = &f;

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..n_processes)
                .map(|rank| {
                    let comm = Comm::world(Transport::Threads(fabric.clone()), n_processes, rank);
                    let fabric = fabric.clone();
                    std::thread::Builder::new()
                        .name(format!("rank-{rank}"))
                        .spawn_scoped(scope, move || {
                            match catch_unwind(AssertUnwindSafe(|| f(comm))) {
                                Ok(result) => result,
                                Err(payload) => {
                                    fabric.abort();
                                    resume_unwind(payload)
                                }
                            }
                        })
                        .unwrap_or_else(|err| panic!("failed to spawn rank-{rank}: {err}"))
                })
                .collect();

            let mut results = Vec::with_capacity(n_processes);
            let mut first_panic = None;
            for handle in handles {
                match handle.join() {
                    Ok(result) => results.push(result),
                    Err(payload) => {
                        fabric.abort();
                        first_panic.get_or_insert(payload);
                    }
                }
            }
            if let Some(payload) = first_panic {
                resume_unwind(payload);
            }
            results
        })
    }
}
