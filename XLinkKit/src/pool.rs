use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::{Condvar, Mutex};

use mmio_shim::log;

use crate::buffer::{BufferDescriptor, DmaArena};
use crate::list::BufferList;
use crate::runtime::waitable::{lock, wait_until};
use crate::runtime::{Deadline, WaitError};
use crate::utils::roundup;
use crate::{ControlpathError, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolKind {
    Rx,
    Tx,
}

#[derive(Default)]
struct Starvation {
    /// set when a TX allocation found the pool empty
    no_buffer: bool,
    closed: bool,
}

/// A fixed set of fragment-sized BDs, handed out and taken back without
/// touching the allocator on the data path.
///
/// Running dry is a backpressure signal, never an error: the RX engine backs
/// off, and TX writers block in [`BufferPool::wait_available`] until a BD
/// comes back.
pub struct BufferPool {
    kind: PoolKind,
    list: BufferList,
    fragment_size: usize,
    capacity: usize,
    arena: Option<Arc<DmaArena>>,
    starvation: Mutex<Starvation>,
    available: Condvar,
}

impl BufferPool {
    /// Fill a pool with `pool_size` bytes worth of BDs, rounded up to whole
    /// fragments. With `coherent_base`, the BDs are slices of one coherent
    /// arena placed at that bus address.
    pub fn new(
        kind: PoolKind,
        pool_size: usize,
        fragment_size: usize,
        coherent_base: Option<u64>,
    ) -> Result<Self, ControlpathError> {
        if fragment_size == 0 {
            return Err(ControlpathError::InvalidArg("fragment size"));
        }
        let pool_size = roundup(pool_size.max(1), fragment_size);
        let count = pool_size / fragment_size;

        let list = BufferList::new();
        let arena = match coherent_base {
            Some(phys) => {
                let arena = DmaArena::new(pool_size, phys)
                    .map_err(|e| ControlpathError::CreationError("coherent pool", e))?;
                for i in 0..count {
                    let bd = BufferDescriptor::reuse(&arena, i * fragment_size, fragment_size)
                        .ok_or(ControlpathError::CreationError("coherent pool", Error::ENOMEM))?;
                    list.put(bd);
                }
                Some(arena)
            }
            None => {
                for _ in 0..count {
                    match BufferDescriptor::alloc(fragment_size) {
                        Some(bd) => list.put(bd),
                        None => {
                            log::error!("failed to alloc all {:?} pool descriptors", kind);
                            return Err(ControlpathError::CreationError("buffer pool", Error::ENOMEM));
                        }
                    }
                }
                None
            }
        };

        log::debug!(
            "{:?} pool: {} x {} bytes{}",
            kind,
            count,
            fragment_size,
            if arena.is_some() { " (coherent)" } else { "" }
        );
        Ok(Self {
            kind,
            list,
            fragment_size,
            capacity: count,
            arena,
            starvation: Mutex::new(Starvation::default()),
            available: Condvar::new(),
        })
    }

    #[inline]
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    #[inline]
    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Number of BDs the pool was filled with
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_coherent(&self) -> bool {
        self.arena.is_some()
    }

    /// `(bytes, buffers)` currently free
    pub fn info(&self) -> (usize, usize) {
        self.list.info()
    }

    /// Take a reset BD, `None` if the pool is dry.
    pub fn alloc(&self) -> Option<Box<BufferDescriptor>> {
        let bd = match self.kind {
            PoolKind::Rx => self.list.get(),
            PoolKind::Tx => {
                // the flag is raised under the same lock `free` clears it under
                let mut st = lock(&self.starvation);
                let bd = self.list.get();
                if bd.is_none() {
                    st.no_buffer = true;
                }
                bd
            }
        };
        bd.map(|mut bd| {
            bd.reset();
            bd
        })
    }

    /// Return a BD, or a whole chain of them, to the pool.
    pub fn free(&self, bd: Box<BufferDescriptor>) {
        let mut next = Some(bd);
        while let Some(mut cur) = next {
            next = cur.take_next();
            cur.reset();
            self.list.put(cur);
        }

        if self.kind == PoolKind::Tx {
            let mut st = lock(&self.starvation);
            if st.no_buffer {
                st.no_buffer = false;
                self.available.notify_all();
            }
        }
    }

    /// Whether a TX allocation has found the pool dry since the last free
    pub fn is_starved(&self) -> bool {
        lock(&self.starvation).no_buffer
    }

    /// Block until a BD may be available again or `deadline` passes.
    pub fn wait_available(&self, deadline: &Deadline) -> Result<(), WaitError> {
        let mut st = lock(&self.starvation);
        loop {
            if st.closed {
                return Err(WaitError::Closed);
            }
            if !st.no_buffer || !self.list.is_empty() {
                return Ok(());
            }
            let (guard, timed_out) = wait_until(&self.available, st, deadline);
            st = guard;
            if timed_out && st.no_buffer && self.list.is_empty() && !st.closed {
                return Err(WaitError::TimedOut);
            }
        }
    }

    /// Wake every waiter for good, used at teardown.
    pub fn close(&self) {
        let mut st = lock(&self.starvation);
        st.closed = true;
        self.available.notify_all();
    }

    /// Drain every free BD, used by tests to starve the pool.
    pub fn drain(&self) -> Vec<Box<BufferDescriptor>> {
        core::iter::from_fn(|| self.list.get()).collect()
    }
}

impl core::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (bytes, buffers) = self.info();
        f.debug_struct("BufferPool")
            .field("kind", &self.kind)
            .field("fragment_size", &self.fragment_size)
            .field("capacity", &self.capacity)
            .field("free_buffers", &buffers)
            .field("free_bytes", &bytes)
            .finish()
    }
}
