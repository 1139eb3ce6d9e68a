//! Correlation of outbound requests with the callbacks that complete them
//!
//! Every request issued to the radio is represented by a [`PendingOperation`] holding one or more one-shot
//! completion sinks. Resolution consumes the operation, so each operation completes exactly once; whoever
//! removes it from its queue first (the callback, the timeout or a flush) wins.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures_channel::oneshot;
use futures_lite::FutureExt;
use futures_timer::Delay;

use crate::{Error, Result};

pub(crate) type Completion<T> = oneshot::Receiver<Result<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        OperationId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct PendingOperation<T> {
    id: OperationId,
    deadline: Option<Instant>,
    sinks: Vec<oneshot::Sender<Result<T>>>,
}

impl<T: Clone> PendingOperation<T> {
    pub fn new(deadline: Option<Instant>) -> Self {
        PendingOperation {
            id: OperationId::next(),
            deadline,
            sinks: Vec::new(),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Adds a caller interested in the result of this operation.
    pub fn subscribe(&mut self) -> Completion<T> {
        let (sender, receiver) = oneshot::channel();
        self.sinks.push(sender);
        receiver
    }

    pub fn resolve(self, result: Result<T>) {
        let mut sinks = self.sinks;
        let Some(last) = sinks.pop() else {
            return;
        };
        for sink in sinks {
            // The receiver may have been dropped by a cancelled caller.
            let _ = sink.send(result.clone());
        }
        let _ = last.send(result);
    }
}

/// Per-key FIFO queues of pending operations.
pub(crate) struct PendingQueue<K, T> {
    queues: HashMap<K, VecDeque<PendingOperation<T>>>,
}

impl<K: Eq + Hash, T: Clone> PendingQueue<K, T> {
    pub fn new() -> Self {
        PendingQueue { queues: HashMap::new() }
    }

    pub fn push(&mut self, key: K, deadline: Option<Instant>) -> (OperationId, Completion<T>) {
        let mut op = PendingOperation::new(deadline);
        let completion = op.subscribe();
        let id = op.id();
        self.queues.entry(key).or_default().push_back(op);
        (id, completion)
    }

    /// Resolves the oldest operation for `key`. Returns `false` if nothing was pending.
    pub fn resolve_front(&mut self, key: &K, result: Result<T>) -> bool {
        let Some(queue) = self.queues.get_mut(key) else {
            return false;
        };
        let op = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(key);
        }
        match op {
            Some(op) => {
                op.resolve(result);
                true
            }
            None => false,
        }
    }

    /// Rejects the operation `id` if it is still queued under `key`.
    pub fn expire(&mut self, key: &K, id: OperationId, error: Error) -> bool {
        let Some(queue) = self.queues.get_mut(key) else {
            return false;
        };
        let op = queue.iter().position(|op| op.id() == id).and_then(|i| queue.remove(i));
        if queue.is_empty() {
            self.queues.remove(key);
        }
        match op {
            Some(op) => {
                op.resolve(Err(error));
                true
            }
            None => false,
        }
    }

    /// Rejects every queued operation, returning how many there were.
    pub fn drain(&mut self, error: Error) -> usize {
        let mut count = 0;
        for (_, queue) in self.queues.drain() {
            for op in queue {
                op.resolve(Err(error.clone()));
                count += 1;
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

/// Waits for `completion`, calling `expire` once `deadline` passes.
///
/// `expire` must remove the operation from wherever it is queued and reject it; if the operation was already
/// resolved it does nothing. Either way the sink then holds the final result.
pub(crate) async fn wait<T>(
    mut completion: Completion<T>,
    deadline: Option<Instant>,
    expire: impl FnOnce(),
) -> Result<T> {
    let Some(deadline) = deadline else {
        return completion.await?;
    };

    let timer = Delay::new(deadline.saturating_duration_since(Instant::now()));
    let settled = async { Some((&mut completion).await) }
        .or(async {
            timer.await;
            None
        })
        .await;

    match settled {
        Some(result) => result?,
        None => {
            expire();
            completion.await?
        }
    }
}
