//! Bounded sample queue between the sampling context and the pump.
//!
//! The producer never blocks: when the queue is full it evicts the oldest
//! queued sample so that the consumer always sees the most recent signal.

use crate::signal::Sample;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::warn;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

pub fn sample_queue(capacity: usize) -> (SampleProducer, SampleConsumer) {
    let (tx, rx) = bounded(capacity.max(1));
    let dropped = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let producer = SampleProducer {
        tx,
        evict_rx: rx.clone(),
        dropped: dropped.clone(),
        closed: closed.clone(),
    };
    let consumer = SampleConsumer {
        rx,
        dropped,
        closed,
    };
    (producer, consumer)
}

/// Sending half, owned by the sampler (timer callback or thread).
#[derive(Clone)]
pub struct SampleProducer {
    tx: Sender<Sample>,
    evict_rx: Receiver<Sample>,
    dropped: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl SampleProducer {
    /// Enqueue a sample, dropping the oldest one on overflow. Returns `false`
    /// once the consumer has gone away.
    pub fn push(&self, sample: Sample) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut pending = sample;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => return false,
                Err(TrySendError::Full(rejected)) => {
                    pending = rejected;
                    if self.evict_rx.try_recv().is_ok() {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if total.is_power_of_two() {
                            warn!("sample queue overflow, {total} samples dropped so far");
                        }
                    }
                }
            }
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half, owned by the single consumer context.
pub struct SampleConsumer {
    rx: Receiver<Sample>,
    dropped: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl SampleConsumer {
    /// Everything queued right now, in arrival order.
    pub fn drain(&self) -> impl Iterator<Item = Sample> + '_ {
        self.rx.try_iter()
    }

    pub fn clear(&self) -> usize {
        self.drain().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for SampleConsumer {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
