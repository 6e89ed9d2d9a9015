//! Deferred execution for the transport engines
//!
//! The RX and TX handlers never run in interrupt context. The doorbell
//! handler only queues them onto a per-device ordered work queue, which
//! runs them one at a time on its own thread.
//!
//! # Organization
//!
//! - [`worker::WorkQueue`] is the ordered queue. It owns one thread and a mailbox; delayed items wait in a timer map.
//! - [`worker::Work`] is one re-queueable unit. Queueing a pending item is a no-op, like the kernel's `queue_work`.
//! - [`waitable::Deadline`] turns a caller timeout into a monotonic deadline for blocking read/write paths.
//!

mod tid;

pub mod waitable;
pub mod worker;

pub use waitable::{Deadline, WaitError};
pub use worker::{Work, WorkQueue};
