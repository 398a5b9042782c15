//! Bounded hand-off queue with a dedicated worker thread
//!
//! Every recorded stream (each video stream and the pose table) follows the
//! same pattern: the capture thread copies an item into a fixed-size ring and
//! returns immediately, and one worker thread drains the ring in FIFO order and
//! hands each item to a [`QueueSink`].
//!
//! ## Discipline
//! - Ring capacity is a power of two. At most `capacity - 1` items may be
//!   outstanding; reaching that count on submit is an overflow, reported once
//!   through the [`ErrorReporter`], after which the queue is poisoned and
//!   rejects everything until it is closed.
//! - The outstanding count and the flags live behind one short-held mutex. The
//!   condvar only wakes the worker; items travel through the ring itself.
//! - A sink error ends the stream early: it is reported once and the queue is
//!   poisoned. `finish` still runs so the output handle is released, but it is
//!   told the stream aborted and any failure there is only logged.
//! - Items are numbered in acceptance order. The number is taken under the
//!   producer lock, so concurrent producers never enqueue out of sequence.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::{ErrorReporter, RecordError, Result};

/// Default ring capacity
pub const DEFAULT_CAPACITY: usize = 16;

/// Consumer side of a [`WorkerQueue`]. Runs on the worker thread only.
pub trait QueueSink<T>: Send + 'static {
    /// Handle one item. An error terminates the stream.
    fn process(&mut self, item: T) -> Result<()>;

    /// Flush and finalise output. Called exactly once when the worker exits.
    ///
    /// `aborted` is set when `process` failed earlier; the error for that has
    /// already been reported.
    fn finish(&mut self, aborted: bool) -> Result<()>;
}

/// Counters reported when a queue is closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Items accepted into the ring
    pub submitted: u64,
    /// Items the sink processed successfully
    pub processed: u64,
    /// Items rejected at submit or discarded after an abort
    pub dropped: u64,
}

struct QueueState {
    outstanding: usize,
    submitted: u64,
    processed: u64,
    dropped: u64,
    poisoned: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
}

/// Fixed-capacity ring buffer drained by one worker thread
pub struct WorkerQueue<T: Send + 'static> {
    label: String,
    capacity: usize,
    producer: Mutex<HeapProd<T>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    errors: ErrorReporter,
}

impl<T: Send + 'static> WorkerQueue<T> {
    /// Spawn the worker thread and return the producer handle.
    ///
    /// `capacity` must be a power of two of at least 2.
    pub fn spawn<S>(label: impl Into<String>, capacity: usize, sink: S, errors: ErrorReporter) -> Result<Self>
    where
        S: QueueSink<T>,
    {
        let label = label.into();
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(RecordError::Config(format!(
                "queue capacity {} is not a power of two >= 2",
                capacity
            )));
        }

        let (producer, consumer) = HeapRb::<T>::new(capacity).split();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                outstanding: 0,
                submitted: 0,
                processed: 0,
                dropped: 0,
                poisoned: false,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker = {
            let shared = shared.clone();
            let errors = errors.clone();
            let thread_label = label.clone();
            std::thread::Builder::new()
                .name(format!("rec-{}", label.to_lowercase()))
                .spawn(move || worker_main(thread_label, consumer, sink, shared, errors))
                .map_err(|e| {
                    RecordError::BackendUnavailable(format!("Failed to spawn {} worker: {}", label, e))
                })?
        };

        Ok(Self {
            label,
            capacity,
            producer: Mutex::new(producer),
            shared,
            worker: Some(worker),
            errors,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether new items would currently be accepted
    pub fn is_accepting(&self) -> bool {
        let state = self.shared.state.lock();
        !(state.poisoned || state.shutdown)
    }

    /// Queue an item for the worker. Never blocks on the worker.
    pub fn push(&self, item: T) -> Result<()> {
        self.push_with(|_| item).map(|_| ())
    }

    /// Queue the item built by `make`, which receives the item's sequence
    /// number: 0 for the first accepted item, counting up without gaps.
    ///
    /// Returns the sequence number on success.
    pub fn push_with(&self, make: impl FnOnce(u64) -> T) -> Result<u64> {
        // Serialises producers so ring order equals acceptance order
        let mut producer = self.producer.lock();

        let sequence = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                state.dropped += 1;
                return Err(RecordError::InvalidState(format!("{} stream closing", self.label)));
            }
            if state.poisoned {
                state.dropped += 1;
                return Err(RecordError::queue_full(&self.label));
            }
            if state.outstanding >= self.capacity - 1 {
                state.poisoned = true;
                state.dropped += 1;
                drop(state);
                let err = RecordError::queue_full(&self.label);
                self.errors.report(&err);
                return Err(err);
            }
            // Only changes under the producer lock, which is held until the push
            state.submitted
        };

        // The worker pops before it decrements, so the ring always has room here
        if producer.try_push(make(sequence)).is_err() {
            let mut state = self.shared.state.lock();
            state.poisoned = true;
            state.dropped += 1;
            drop(state);
            let err = RecordError::queue_full(&self.label);
            self.errors.report(&err);
            return Err(err);
        }

        {
            let mut state = self.shared.state.lock();
            state.outstanding += 1;
            state.submitted += 1;
        }
        self.shared.wake.notify_one();
        Ok(sequence)
    }

    /// Stop accepting items, let the worker drain what is queued, finalise the
    /// sink, and join the worker.
    pub fn close(mut self) -> StreamStats {
        self.shutdown_and_join();
        let state = self.shared.state.lock();
        StreamStats {
            submitted: state.submitted,
            processed: state.processed,
            dropped: state.dropped,
        }
    }

    fn shutdown_and_join(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                self.errors
                    .report(&RecordError::aborted(&self.label, "worker thread panicked"));
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerQueue<T> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown_and_join();
        }
    }
}

fn worker_main<T, S>(label: String, mut consumer: HeapCons<T>, mut sink: S, shared: Arc<Shared>, errors: ErrorReporter)
where
    T: Send + 'static,
    S: QueueSink<T>,
{
    let mut aborted = false;
    loop {
        {
            let mut state = shared.state.lock();
            while state.outstanding == 0 && !state.shutdown {
                shared.wake.wait(&mut state);
            }
            if state.outstanding == 0 {
                // Shutdown requested and everything drained
                break;
            }
        }

        let Some(item) = consumer.try_pop() else {
            continue;
        };
        shared.state.lock().outstanding -= 1;

        if let Err(e) = sink.process(item) {
            let discarded = discard_remaining(&mut consumer);
            {
                let mut state = shared.state.lock();
                state.poisoned = true;
                state.outstanding = 0;
                state.dropped += 1 + discarded as u64;
            }
            log::warn!("[{}] stream terminated early, {} queued items discarded", label, discarded);
            errors.report(&e);
            aborted = true;
            break;
        }

        let processed = {
            let mut state = shared.state.lock();
            state.processed += 1;
            state.processed
        };
        if processed % 100 == 0 {
            log::debug!("[{}] processed {} items", label, processed);
        }
    }

    match sink.finish(aborted) {
        Ok(()) => {}
        // One error per stream; the abort was already reported
        Err(e) if aborted => log::warn!("[{}] finalising after abort failed: {}", label, e),
        Err(e) => errors.report(&e),
    }
}

/// Pop and release whatever is left in the ring, returning how many items
fn discard_remaining<T>(consumer: &mut HeapCons<T>) -> usize {
    let mut count = 0;
    while consumer.try_pop().is_some() {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, Receiver};
    use std::time::Duration;

    /// Records processed items; optionally blocks on a gate before each one
    struct Collect {
        seen: Arc<Mutex<Vec<u32>>>,
        gate: Option<Receiver<()>>,
        fail_on: Option<u32>,
        fail_finish: bool,
        /// `Some(aborted)` once finish ran
        finished: Arc<Mutex<Option<bool>>>,
    }

    impl QueueSink<u32> for Collect {
        fn process(&mut self, item: u32) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.recv().map_err(|_| RecordError::aborted("test", "gate closed"))?;
            }
            if self.fail_on == Some(item) {
                return Err(RecordError::aborted("test", "backend failure"));
            }
            self.seen.lock().push(item);
            Ok(())
        }

        fn finish(&mut self, aborted: bool) -> Result<()> {
            *self.finished.lock() = Some(aborted);
            if self.fail_finish {
                return Err(RecordError::aborted("test", "no end of stream"));
            }
            Ok(())
        }
    }

    type Seen = Arc<Mutex<Vec<u32>>>;
    type Finished = Arc<Mutex<Option<bool>>>;

    fn collector(gate: Option<Receiver<()>>, fail_on: Option<u32>) -> (Collect, Seen, Finished) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(None));
        (
            Collect {
                seen: seen.clone(),
                gate,
                fail_on,
                fail_finish: false,
                finished: finished.clone(),
            },
            seen,
            finished,
        )
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let (sink, _, _) = collector(None, None);
        let result = WorkerQueue::<u32>::spawn("test", 12, sink, ErrorReporter::log_only());
        assert!(matches!(result, Err(RecordError::Config(_))));
    }

    #[test]
    fn items_reach_sink_in_submission_order() {
        let (sink, seen, finished) = collector(None, None);
        let queue = WorkerQueue::spawn("fifo", 16, sink, ErrorReporter::log_only()).unwrap();

        let mut accepted = Vec::new();
        for i in 0..200u32 {
            if i % 7 == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
            if queue.push(i).is_ok() {
                accepted.push(i);
            } else {
                // Saturated under load; nothing after this is accepted
                break;
            }
        }

        let stats = queue.close();
        assert_eq!(*seen.lock(), accepted);
        assert_eq!(stats.processed, accepted.len() as u64);
        assert_eq!(*finished.lock(), Some(false));
    }

    #[test]
    fn concurrent_producers_get_sequences_in_ring_order() {
        let (sink, seen, _) = collector(None, None);
        // Large enough that 4 x 50 items can never saturate it
        let queue = WorkerQueue::spawn("depth", 256, sink, ErrorReporter::log_only()).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        queue.push_with(|sequence| sequence as u32).unwrap();
                    }
                });
            }
        });

        let stats = queue.close();
        assert_eq!(stats.submitted, 200);
        assert_eq!(*seen.lock(), (0..200).collect::<Vec<u32>>());
    }

    #[test]
    fn push_with_numbers_accepted_items_only() {
        let (sink, seen, _) = collector(None, None);
        let queue = WorkerQueue::spawn("ir", 16, sink, ErrorReporter::log_only()).unwrap();

        assert_eq!(queue.push_with(|n| n as u32 + 10).unwrap(), 0);
        assert_eq!(queue.push_with(|n| n as u32 + 10).unwrap(), 1);
        let stats = queue.close();
        assert_eq!(stats.submitted, 2);
        assert_eq!(*seen.lock(), vec![10, 11]);
    }

    #[test]
    fn overflow_reports_once_and_keeps_accepted_items() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let (sink, seen, _) = collector(Some(gate_rx), None);
        let (errors, error_rx) = ErrorReporter::channel();
        let queue = WorkerQueue::spawn("depth", 8, sink, errors).unwrap();

        let mut accepted = Vec::new();
        let mut rejected = 0;
        for i in 0..20u32 {
            match queue.push(i) {
                Ok(()) => accepted.push(i),
                Err(RecordError::QueueFull { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error {other}"),
            }
        }

        assert!(!queue.is_accepting());
        assert!(rejected > 0);
        // The worker may hold one item outside the ring while gated
        assert!(accepted.len() >= 7 && accepted.len() <= 8, "accepted {}", accepted.len());
        assert_eq!(accepted, (0..accepted.len() as u32).collect::<Vec<_>>());

        // Release the worker for every accepted item
        let releaser = std::thread::spawn(move || while gate_tx.send(()).is_ok() {});
        let stats = queue.close();
        releaser.join().unwrap();

        assert_eq!(*seen.lock(), accepted);
        assert_eq!(stats.submitted, accepted.len() as u64);
        assert_eq!(stats.dropped, rejected);
        assert_eq!(error_rx.try_iter().count(), 1);
    }

    #[test]
    fn sink_failure_poisons_and_finishes() {
        let (sink, seen, finished) = collector(None, Some(3));
        let (errors, error_rx) = ErrorReporter::channel();
        let queue = WorkerQueue::spawn("ir", 16, sink, errors).unwrap();

        for i in 0..5u32 {
            let _ = queue.push(i);
        }
        // Wait for the worker to hit the failure
        let message = error_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(message.contains("backend failure"));

        // Eventually rejects new work
        let mut rejected = false;
        for _ in 0..100 {
            if queue.push(99).is_err() {
                rejected = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(rejected);

        queue.close();
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(*finished.lock(), Some(true));
        assert_eq!(error_rx.try_iter().count(), 0);
    }

    #[test]
    fn finish_failure_after_abort_is_not_reported_again() {
        let (mut sink, _, finished) = collector(None, Some(1));
        sink.fail_finish = true;
        let (errors, error_rx) = ErrorReporter::channel();
        let queue = WorkerQueue::spawn("colour", 16, sink, errors).unwrap();

        for i in 0..3u32 {
            let _ = queue.push(i);
        }
        queue.close();

        assert_eq!(*finished.lock(), Some(true));
        let messages: Vec<String> = error_rx.try_iter().collect();
        assert_eq!(messages.len(), 1, "{messages:?}");
        assert!(messages[0].contains("backend failure"));
    }

    #[test]
    fn finish_failure_on_clean_close_is_reported() {
        let (mut sink, _, finished) = collector(None, None);
        sink.fail_finish = true;
        let (errors, error_rx) = ErrorReporter::channel();
        let queue = WorkerQueue::spawn("colour", 16, sink, errors).unwrap();
        queue.push(1).unwrap();
        queue.close();

        assert_eq!(*finished.lock(), Some(false));
        let messages: Vec<String> = error_rx.try_iter().collect();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("no end of stream"));
    }

    #[test]
    fn close_with_nothing_queued_still_finishes() {
        let (sink, seen, finished) = collector(None, None);
        let queue = WorkerQueue::<u32>::spawn("pose", 16, sink, ErrorReporter::log_only()).unwrap();
        let stats = queue.close();
        assert_eq!(stats, StreamStats::default());
        assert!(seen.lock().is_empty());
        assert_eq!(*finished.lock(), Some(false));
    }
}
