use crate::key::{to_key, Key};
use crate::requester::Payload;
use crate::Result;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// A group of arguments handed to the requester in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    keys: Vec<Key>,
    args: Vec<Value>,
}

impl Batch {
    pub fn new(entries: Vec<(Key, Value)>) -> Self {
        let (keys, args) = entries.into_iter().unzip();
        Self { keys, args }
    }

    /// Canonicalizes `args` into a batch.
    pub fn from_args(args: Vec<Value>) -> Result<Self> {
        let keys = args.iter().map(to_key).collect::<Result<Vec<_>>>()?;
        Ok(Self { keys, args })
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn is_bulk(&self) -> bool {
        self.args.len() > 1
    }

    /// Key the batch outcome is recorded under.
    ///
    /// A single argument keeps its own key; a bulk batch gets a
    /// [`Key::Batch`] of its argument keys.
    pub fn key(&self) -> Key {
        match self.keys.as_slice() {
            [only] => only.clone(),
            keys => Key::batch(keys.to_vec()),
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn payload(&self) -> Payload {
        match self.args.as_slice() {
            [only] => Payload::Single(only.clone()),
            args => Payload::Bulk(args.to_vec()),
        }
    }

    pub fn into_entries(self) -> Vec<(Key, Value)> {
        self.keys.into_iter().zip(self.args).collect()
    }
}

/// Bounded FIFO between the feeder and the workers.
///
/// `push` waits while the queue is full, which is what throttles the feeder
/// when the workers fall behind. `pull` is shared by all workers.
#[derive(Debug)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Batch>,
    rx: Mutex<mpsc::Receiver<Batch>>,
    capacity: usize,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues `batch`, waiting for a free slot.
    pub async fn push(&self, batch: Batch) {
        // The receiver lives as long as the queue, so the channel cannot close.
        let _ = self.tx.send(batch).await;
    }

    /// Enqueues without waiting, handing the batch back when full.
    pub fn try_push(&self, batch: Batch) -> std::result::Result<(), Batch> {
        self.tx.try_send(batch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(b) | mpsc::error::TrySendError::Closed(b) => b,
        })
    }

    /// Waits for a free slot without committing a batch to it.
    ///
    /// Dropping the returned permit releases the slot, so a caller racing
    /// this against cancellation never loses the batch it was about to send.
    pub(crate) async fn reserve(&self) -> Option<mpsc::Permit<'_, Batch>> {
        self.tx.reserve().await.ok()
    }

    /// Takes the oldest batch, or `None` once `timeout` elapses.
    pub async fn pull(&self, timeout: Duration) -> Option<Batch> {
        tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Removes every queued batch without waiting.
    pub async fn drain(&self) -> Vec<Batch> {
        let mut rx = self.rx.lock().await;
        let mut out = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            out.push(batch);
        }
        out
    }
}
