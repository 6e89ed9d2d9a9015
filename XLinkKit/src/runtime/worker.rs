use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use mmio_shim::log;

use crate::runtime::tid::*;
use crate::runtime::waitable::lock;
use crate::{ControlpathError, Error};

/// One deferred, re-queueable unit of work.
///
/// An item is either idle or pending. Queueing a pending item does nothing,
/// so however many times a doorbell fires before the worker gets to it,
/// the handler runs once. The pending flag is dropped right before the
/// handler runs, which lets the handler re-queue itself.
pub struct Work {
    id: WorkId,
    name: &'static str,
    pending: AtomicBool,
    func: Box<dyn Fn() + Send + Sync>,
}

impl Work {
    pub fn new<F>(name: &'static str, func: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Self {
            id: next_work_id(),
            name,
            pending: AtomicBool::new(false),
            func: Box::new(func),
        })
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self) {
        self.pending.store(false, Ordering::Release);
        (self.func)();
    }
}

impl core::fmt::Debug for Work {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Work")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pending", &self.is_pending())
            .finish()
    }
}

enum Message {
    Queue(Arc<Work>),
    QueueAt(Arc<Work>, Instant),
    Flush(Sender<()>),
    Stop,
}

/// An ordered work queue: one thread, items run strictly one after another.
///
/// Delayed items wait in a timer map keyed by their due time and move to
/// the run position when due. Destroying the queue stops the thread after
/// the running item returns; delayed items that never became due are dropped.
pub struct WorkQueue {
    name: String,
    sender: Sender<Message>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl WorkQueue {
    pub fn new(name: &str) -> Result<Arc<Self>, ControlpathError> {
        let (sender, receiver) = unbounded();
        let handle = thread::Builder::new()
            .name(String::from(name))
            .spawn(move || Self::worker_loop(receiver))
            .map_err(|_| ControlpathError::CreationError("workqueue", Error::EAGAIN))?;

        log::debug!("workqueue {} started", name);
        Ok(Arc::new(Self {
            name: String::from(name),
            sender,
            running: AtomicBool::new(true),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        }))
    }

    fn worker_loop(receiver: Receiver<Message>) {
        let mut timers: BTreeMap<(Instant, WorkId), Arc<Work>> = BTreeMap::new();

        loop {
            let now = Instant::now();
            let due: Vec<(Instant, WorkId)> = timers
                .range(..(now, WorkId::MAX))
                .map(|(key, _)| *key)
                .collect();
            for key in due {
                if let Some(work) = timers.remove(&key) {
                    work.run();
                }
            }

            let next = timers.keys().next().map(|(at, _)| *at);
            let msg = match next {
                Some(at) => match receiver.recv_timeout(at.saturating_duration_since(Instant::now())) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match receiver.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };

            match msg {
                Message::Queue(work) => work.run(),
                Message::QueueAt(work, at) => {
                    timers.insert((at, work.id), work);
                }
                Message::Flush(ack) => {
                    let _ = ack.send(());
                }
                Message::Stop => break,
            }
        }

        for (_, work) in timers {
            work.pending.store(false, Ordering::Release);
        }
    }

    /// Queue `work` to run as soon as the worker is free.
    /// Returns `false` if it was already pending or the queue is stopped.
    #[inline]
    pub fn queue(&self, work: &Arc<Work>) -> bool {
        self.queue_delayed(work, Duration::ZERO)
    }

    pub fn queue_delayed(&self, work: &Arc<Work>, delay: Duration) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        if work.pending.swap(true, Ordering::AcqRel) {
            return false;
        }

        let msg = if delay.is_zero() {
            Message::Queue(work.clone())
        } else {
            Message::QueueAt(work.clone(), Instant::now() + delay)
        };
        if self.sender.send(msg).is_err() {
            work.pending.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Wait until every item queued for immediate execution before this
    /// call has run. Delayed items are not waited for.
    pub fn flush(&self) {
        if thread::current().id() == self.thread_id || !self.running.load(Ordering::Acquire) {
            return;
        }
        let (ack, done) = bounded(1);
        if self.sender.send(Message::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    /// Stop the worker and join it. Idempotent.
    pub fn destroy(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.sender.send(Message::Stop);

        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            // the last reference may be dropped by one of our own items
            if thread::current().id() != self.thread_id {
                let _ = handle.join();
            }
        }
        log::debug!("workqueue {} destroyed", self.name);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl core::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.destroy();
    }
}
