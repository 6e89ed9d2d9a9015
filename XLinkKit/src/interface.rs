//! Logical channels multiplexed over the single ring pair.
//!
//! The RX engine delivers each received BD to the interface named by its
//! tag. Readers drain those queues; writers of every interface share the
//! device's one outgoing queue.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use mmio_shim::log;

use crate::buffer::BufferDescriptor;
use crate::consts::NUM_INTERFACES;
use crate::device::Core;
use crate::list::BufferList;
use crate::pool::BufferPool;
use crate::runtime::waitable::{lock, wait_until};
use crate::runtime::{Deadline, WaitError};
use crate::stats::{self, Stats};
use crate::DatapathError;

struct ReadState {
    /// BD partly consumed by the previous read
    partial: Option<Box<BufferDescriptor>>,
    data_available: bool,
    closed: bool,
}

pub struct Interface {
    id: u16,
    read_queue: BufferList,
    rstate: Mutex<ReadState>,
    wait: Condvar,
    opened: AtomicBool,
}

impl Interface {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            read_queue: BufferList::new(),
            rstate: Mutex::new(ReadState {
                partial: None,
                data_available: false,
                closed: false,
            }),
            wait: Condvar::new(),
            opened: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Claim the interface. Only one owner at a time.
    pub fn open(&self) -> Result<(), DatapathError> {
        self.opened
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| DatapathError::Busy(self.id))
    }

    pub fn close(&self) {
        self.opened.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Queue a received BD and wake the readers.
    pub fn deliver(&self, bd: Box<BufferDescriptor>) {
        self.read_queue.put(bd);
        let mut st = lock(&self.rstate);
        st.data_available = true;
        self.wait.notify_all();
    }

    /// Bytes queued and not yet read, including the carried-over BD
    pub fn pending_bytes(&self) -> usize {
        let st = lock(&self.rstate);
        self.read_queue.info().0 + st.partial.as_ref().map_or(0, |bd| bd.length())
    }

    /// Fill `buf` from the read queue, blocking until it is full or `deadline`
    /// passes.
    ///
    /// Fully consumed BDs go back to `pool` and count as one user packet each.
    /// A BD that did not fit is kept and continued by the next call.
    pub fn read(
        &self,
        pool: &BufferPool,
        buf: &mut [u8],
        deadline: &Deadline,
        stats: &Stats,
    ) -> Result<usize, DatapathError> {
        let want = buf.len();
        let mut done = 0;

        let mut st = lock(&self.rstate);
        loop {
            while !st.data_available {
                if st.closed {
                    return Err(DatapathError::Interrupted(done));
                }
                let (guard, timed_out) = wait_until(&self.wait, st, deadline);
                st = guard;
                if timed_out && !st.data_available {
                    return Err(if st.closed {
                        DatapathError::Interrupted(done)
                    } else {
                        DatapathError::TimeoutError(done)
                    });
                }
            }

            while done < want {
                let mut bd = match st.partial.take().or_else(|| self.read_queue.get()) {
                    Some(bd) => bd,
                    None => break,
                };
                let n = bd.length().min(want - done);
                buf[done..done + n].copy_from_slice(&bd.data()[..n]);
                bd.advance(n);
                done += n;

                if bd.length() == 0 {
                    stats::inc(&stats.rx_usr_pkts);
                    pool.free(bd);
                } else {
                    st.partial = Some(bd);
                }
            }

            if st.partial.is_none() && self.read_queue.is_empty() {
                st.data_available = false;
            }
            if done == want {
                return Ok(done);
            }
        }
    }

    /// Wake every reader with `Interrupted` and hand queued BDs back to `pool`.
    pub fn shutdown(&self, pool: &BufferPool) {
        let mut st = lock(&self.rstate);
        st.closed = true;
        st.data_available = false;
        if let Some(bd) = st.partial.take() {
            pool.free(bd);
        }
        while let Some(bd) = self.read_queue.get() {
            pool.free(bd);
        }
        self.opened.store(false, Ordering::Release);
        self.wait.notify_all();
    }
}

impl core::fmt::Debug for Interface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interface")
            .field("id", &self.id)
            .field("opened", &self.is_open())
            .field("queued", &self.read_queue.info())
            .finish()
    }
}

impl Core {
    fn interface(&self, ifc: u16) -> Result<&Interface, DatapathError> {
        if ifc >= NUM_INTERFACES {
            return Err(DatapathError::InvalidArg("interface"));
        }
        Ok(&self.interfaces[ifc as usize])
    }

    pub fn open(&self, ifc: u16) -> Result<(), DatapathError> {
        self.interface(ifc)?.open()
    }

    pub fn close(&self, ifc: u16) -> Result<(), DatapathError> {
        self.interface(ifc)?.close();
        Ok(())
    }

    pub fn read(&self, ifc: u16, buf: &mut [u8], deadline: &Deadline) -> Result<usize, DatapathError> {
        let interface = self.interface(ifc)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let res = interface.read(&self.rx_pool, buf, deadline, &self.stats);
        let done = match &res {
            Ok(n) => *n,
            Err(e) => e.transferred(),
        };
        stats::add(&self.stats.rx_usr_bytes, done);
        res
    }

    /// Split `buf` into fragment-sized TX BDs and queue them for the TX engine.
    ///
    /// Writers are serialized. When the TX pool runs dry the writer queues
    /// what it has, then waits for the engine to hand BDs back. A core that
    /// is shut down accepts nothing, and a chain that raced the shutdown is
    /// taken back and not counted as sent.
    pub fn write(&self, ifc: u16, buf: &[u8], deadline: &Deadline) -> Result<usize, DatapathError> {
        self.interface(ifc)?;
        let _wlock = lock(&self.wlock);

        let len = buf.len();
        let mut sent = 0;
        while sent < len {
            if self.is_closed() {
                return self.abort_write(ifc, sent);
            }

            let mut bds = Vec::new();
            let mut staged = 0;
            while sent + staged < len {
                let mut bd = match self.tx_pool.alloc() {
                    Some(bd) => bd,
                    None => break,
                };
                let from = sent + staged;
                let n = (len - from).min(self.fragment_size);
                bd.data_mut()[..n].copy_from_slice(&buf[from..from + n]);
                bd.set_length(n);
                bd.interface = ifc;
                staged += n;
                bds.push(bd);
            }

            let nbds = bds.len();
            if let Some(chain) = BufferDescriptor::chain(bds) {
                self.write_list.put(chain);
                self.tx_pending.store(true, Ordering::Release);
                self.start_tx();
                if self.is_closed() {
                    return self.abort_write(ifc, sent);
                }
                stats::add(&self.stats.tx_usr_pkts, nbds);
                sent += staged;
            }

            if sent < len {
                match self.tx_pool.wait_available(deadline) {
                    Ok(()) => {}
                    Err(WaitError::TimedOut) => {
                        log::debug!("write on interface {} timed out after {} bytes", ifc, sent);
                        stats::add(&self.stats.tx_usr_bytes, sent);
                        return Err(DatapathError::TimeoutError(sent));
                    }
                    Err(WaitError::Closed) => {
                        return self.abort_write(ifc, sent);
                    }
                }
            }
        }
        stats::add(&self.stats.tx_usr_bytes, sent);
        Ok(sent)
    }

    /// Called with `wlock` held once the core is closed. Anything still on
    /// the write list will never be posted.
    fn abort_write(&self, ifc: u16, sent: usize) -> Result<usize, DatapathError> {
        while let Some(bd) = self.write_list.get() {
            self.tx_pool.free(bd);
        }
        log::debug!("write on interface {} interrupted after {} bytes", ifc, sent);
        stats::add(&self.stats.tx_usr_bytes, sent);
        Err(DatapathError::Interrupted(sent))
    }
}
