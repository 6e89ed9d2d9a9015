//! Descriptor rings
//!
//! A pipe is one direction of the transport: a circular array of transfer
//! descriptors plus `head`/`tail` indices, all living in the shared region.
//! `tail` is only written by the producer and `head` only by the consumer.
//! One slot always stays empty so a full ring never looks empty.

use alloc::sync::Arc;

use mmio_shim::io::IoMem;

use crate::consts::*;
use crate::ControlpathError;

/// Which quad of the transport capability a pipe is built from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipeSel {
    Tx,
    Rx,
}

pub struct Pipe {
    mmio: Arc<IoMem>,
    /// offset of the (ring, ndesc, head, tail) quad
    base: usize,
    /// offset of descriptor 0
    ring: usize,
    ndesc: u32,
}

impl Pipe {
    /// Build a pipe from the capability record at `cap`.
    pub fn from_cap(mmio: &Arc<IoMem>, cap: usize, sel: PipeSel) -> Result<Self, ControlpathError> {
        let base = cap
            + match sel {
                PipeSel::Tx => CAP_OFF_TX,
                PipeSel::Rx => CAP_OFF_RX,
            };
        if !mmio.contains(base, 16) {
            return Err(ControlpathError::InvalidArg("pipe header out of range"));
        }

        let ndesc = mmio.rd32(base + PIPE_OFF_NDESC);
        let ring = mmio.rd32(base + PIPE_OFF_RING) as usize;
        if ndesc < 2 || !ndesc.is_power_of_two() {
            return Err(ControlpathError::InvalidArg("pipe descriptor count"));
        }
        if !mmio.contains(ring, ndesc as usize * TD_SIZE) {
            return Err(ControlpathError::InvalidArg("pipe ring out of range"));
        }

        Ok(Self {
            mmio: mmio.clone(),
            base,
            ring,
            ndesc,
        })
    }

    #[inline]
    pub fn ndesc(&self) -> u32 {
        self.ndesc
    }

    #[inline]
    pub fn next(&self, index: u32) -> u32 {
        (index + 1) % self.ndesc
    }

    #[inline]
    pub fn is_empty(head: u32, tail: u32) -> bool {
        head == tail
    }

    #[inline]
    pub fn is_full(&self, head: u32, tail: u32) -> bool {
        self.next(tail) == head
    }

    /// Descriptors posted but not yet consumed
    #[inline]
    pub fn used(&self, head: u32, tail: u32) -> u32 {
        (tail + self.ndesc - head) % self.ndesc
    }

    /// Slots the producer may still post into
    #[inline]
    pub fn free_slots(&self, head: u32, tail: u32) -> u32 {
        self.ndesc - 1 - self.used(head, tail)
    }

    #[inline]
    pub fn get_head(&self) -> u32 {
        self.mmio.rd32(self.base + PIPE_OFF_HEAD) % self.ndesc
    }

    #[inline]
    pub fn set_head(&self, head: u32) {
        self.mmio.wr32(self.base + PIPE_OFF_HEAD, head);
    }

    #[inline]
    pub fn get_tail(&self) -> u32 {
        self.mmio.rd32(self.base + PIPE_OFF_TAIL) % self.ndesc
    }

    #[inline]
    pub fn set_tail(&self, tail: u32) {
        self.mmio.wr32(self.base + PIPE_OFF_TAIL, tail);
    }

    #[inline]
    fn td(&self, index: u32) -> usize {
        self.ring + (index % self.ndesc) as usize * TD_SIZE
    }

    pub fn get_address(&self, index: u32) -> u64 {
        self.mmio.rd64(self.td(index) + TD_OFF_ADDRESS)
    }

    pub fn set_address(&self, index: u32, address: u64) {
        self.mmio.wr64(self.td(index) + TD_OFF_ADDRESS, address);
    }

    pub fn get_length(&self, index: u32) -> u32 {
        self.mmio.rd32(self.td(index) + TD_OFF_LENGTH)
    }

    pub fn set_length(&self, index: u32, length: u32) {
        self.mmio.wr32(self.td(index) + TD_OFF_LENGTH, length);
    }

    pub fn get_status(&self, index: u32) -> u16 {
        self.mmio.rd16(self.td(index) + TD_OFF_STATUS)
    }

    pub fn set_status(&self, index: u32, status: u16) {
        self.mmio.wr16(self.td(index) + TD_OFF_STATUS, status);
    }

    pub fn get_interface(&self, index: u32) -> u16 {
        self.mmio.rd16(self.td(index) + TD_OFF_INTERFACE)
    }

    pub fn set_interface(&self, index: u32, interface: u16) {
        self.mmio.wr16(self.td(index) + TD_OFF_INTERFACE, interface);
    }
}

impl core::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pipe")
            .field("ring", &format_args!("{:#x}", self.ring))
            .field("ndesc", &self.ndesc)
            .field("head", &self.get_head())
            .field("tail", &self.get_tail())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{publish_txrx, TxRxLayout};

    fn pipes(ndesc: u32) -> (Arc<IoMem>, Pipe, Pipe) {
        let layout = TxRxLayout {
            fragment_size: 256,
            tx_ndesc: ndesc,
            rx_ndesc: ndesc,
            staging_base: 0,
        };
        let mmio = Arc::new(IoMem::new(layout.region_size()));
        let cap = publish_txrx(&mmio, &layout).unwrap();
        let tx = Pipe::from_cap(&mmio, cap, PipeSel::Tx).unwrap();
        let rx = Pipe::from_cap(&mmio, cap, PipeSel::Rx).unwrap();
        (mmio, tx, rx)
    }

    #[test]
    fn usable_capacity_is_ndesc_minus_one() {
        let (_mmio, tx, _rx) = pipes(8);
        let head = tx.get_head();
        let mut tail = tx.get_tail();
        let mut posted = 0;
        while !tx.is_full(head, tail) {
            assert_eq!(tx.free_slots(head, tail), 7 - posted);
            tail = tx.next(tail);
            posted += 1;
        }
        assert_eq!(posted, 7);
        assert_eq!(tx.used(head, tail), 7);
        assert!(!Pipe::is_empty(head, tail));
    }

    #[test]
    fn wraps_around() {
        let (_mmio, tx, _rx) = pipes(4);
        assert_eq!(tx.next(3), 0);
        // head chasing tail across the wrap
        for (head, tail) in [(3u32, 1u32), (2, 1), (0, 3)] {
            assert!(tx.used(head, tail) <= 3);
            assert_eq!(tx.is_full(head, tail), tx.used(head, tail) == 3);
        }
    }

    #[test]
    fn descriptor_fields() {
        let (mmio, tx, rx) = pipes(4);
        tx.set_length(2, 1234);
        tx.set_status(2, DESC_STATUS_ERROR);
        tx.set_interface(2, 7);
        assert_eq!(tx.get_length(2), 1234);
        assert_eq!(tx.get_status(2), DESC_STATUS_ERROR);
        assert_eq!(tx.get_interface(2), 7);
        assert_eq!(tx.get_address(2), 2 * 256);
        // rx descriptors are a separate ring
        assert_eq!(rx.get_length(2), 0);
        assert_eq!(rx.get_address(0), 4 * 256);

        tx.set_tail(3);
        rx.set_head(1);
        assert_eq!(tx.get_tail(), 3);
        assert_eq!(rx.get_head(), 1);
        assert_eq!(tx.get_head(), 0);
        drop(mmio);
    }

    #[test]
    fn rejects_bad_descriptor_count() {
        let (mmio, _tx, _rx) = pipes(4);
        let cap = MMIO_HEADER_SIZE;
        mmio.wr32(cap + CAP_OFF_TX + PIPE_OFF_NDESC, 6);
        assert!(Pipe::from_cap(&mmio, cap, PipeSel::Tx).is_err());
        mmio.wr32(cap + CAP_OFF_TX + PIPE_OFF_NDESC, 1 << 20);
        assert!(Pipe::from_cap(&mmio, cap, PipeSel::Tx).is_err());
    }
}
