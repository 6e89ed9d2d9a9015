//! Capability directory
//!
//! A singly linked list of records in the shared region. Each record starts
//! with a 16-bit id and the 16-bit absolute offset of the next record; a
//! record with id `CAP_NULL` terminates the list. The side owning the BAR
//! publishes the records, the other side walks them from the root pointer.

use mmio_shim::io::{self, IoMem};
use mmio_shim::log;

use crate::consts::*;
use crate::ControlpathError;

/// Walk the directory looking for `id`.
///
/// Without `start`, the walk begins at the root pointer. A zero root (never
/// published), a terminator, an out-of-range offset or more than `CAP_TTL`
/// hops all end the walk with `None`.
pub fn find(mmio: &IoMem, start: Option<usize>, id: u16) -> Option<usize> {
    let mut offset = match start {
        Some(off) => off,
        None => mmio.rd32(MMIO_CAPABILITIES) as usize,
    };

    for _ in 0..CAP_TTL {
        if offset == 0 || !mmio.contains(offset, CAP_HDR_LEN) {
            return None;
        }
        let cap_id = mmio.rd16(offset + CAP_OFF_ID);
        if cap_id == id {
            return Some(offset);
        }
        if cap_id == CAP_NULL {
            return None;
        }
        offset = mmio.rd16(offset + CAP_OFF_NEXT) as usize;
    }

    log::warn!("capability walk for id {} exceeded {} hops", id, CAP_TTL);
    None
}

/// Locate the transport capability and check the whole record lies in the region.
pub fn find_txrx(mmio: &IoMem) -> Result<usize, ControlpathError> {
    let cap = find(mmio, None, CAP_TXRX).ok_or(ControlpathError::CapabilityNotFound(CAP_TXRX))?;
    if !mmio.contains(cap, CAP_TXRX_LEN) {
        log::warn!("txrx capability @{:#x} truncated by the end of the region", cap);
        return Err(ControlpathError::CapabilityNotFound(CAP_TXRX));
    }
    Ok(cap)
}

/// Layout of the transport capability as chosen by the publishing side
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxRxLayout {
    pub fragment_size: u32,
    pub tx_ndesc: u32,
    pub rx_ndesc: u32,
    /// bus address of the payload staging area, one fragment per ring slot
    pub staging_base: u64,
}

impl TxRxLayout {
    /// Bytes of shared region needed for the header, the record, both rings and the terminator
    pub fn region_size(&self) -> usize {
        MMIO_HEADER_SIZE
            + CAP_TXRX_LEN
            + self.ndesc() * TD_SIZE
            + CAP_HDR_LEN
    }

    /// Bytes of staging area behind the ring slots
    pub fn staging_size(&self) -> usize {
        self.ndesc() * self.fragment_size as usize
    }

    #[inline]
    fn ndesc(&self) -> usize {
        self.tx_ndesc as usize + self.rx_ndesc as usize
    }
}

/// Publish the transport capability at the first free offset after the header.
///
/// The record, both rings (slot addresses filled in, everything else zero) and
/// the terminator are written before the root pointer, so a walker that sees
/// a non-zero root sees a complete list. Returns the record offset.
pub fn publish_txrx(mmio: &IoMem, layout: &TxRxLayout) -> Result<usize, ControlpathError> {
    if mmio.len() < layout.region_size() {
        return Err(ControlpathError::InvalidArg("mmio region too small"));
    }

    let start = MMIO_HEADER_SIZE;
    let tx_ring = start + CAP_TXRX_LEN;
    let rx_ring = tx_ring + layout.tx_ndesc as usize * TD_SIZE;
    let next = rx_ring + layout.rx_ndesc as usize * TD_SIZE;
    if next > u16::MAX as usize {
        return Err(ControlpathError::InvalidArg("descriptor rings exceed capability range"));
    }

    // terminator first
    mmio.wr16(next + CAP_OFF_ID, CAP_NULL);
    mmio.wr16(next + CAP_OFF_NEXT, 0);

    let frag = layout.fragment_size as u64;
    for i in 0..layout.tx_ndesc as usize {
        let td = tx_ring + i * TD_SIZE;
        mmio.clear(td, TD_SIZE);
        mmio.wr64(td + TD_OFF_ADDRESS, layout.staging_base + i as u64 * frag);
    }
    for i in 0..layout.rx_ndesc as usize {
        let td = rx_ring + i * TD_SIZE;
        mmio.clear(td, TD_SIZE);
        mmio.wr64(
            td + TD_OFF_ADDRESS,
            layout.staging_base + (layout.tx_ndesc as u64 + i as u64) * frag,
        );
    }

    mmio.wr32(start + CAP_OFF_FRAGMENT_SIZE, layout.fragment_size);
    for (quad, ring, ndesc) in [
        (CAP_OFF_TX, tx_ring, layout.tx_ndesc),
        (CAP_OFF_RX, rx_ring, layout.rx_ndesc),
    ] {
        let base = start + quad;
        mmio.wr32(base + PIPE_OFF_RING, ring as u32);
        mmio.wr32(base + PIPE_OFF_NDESC, ndesc);
        mmio.wr32(base + PIPE_OFF_HEAD, 0);
        mmio.wr32(base + PIPE_OFF_TAIL, 0);
    }
    mmio.wr16(start + CAP_OFF_NEXT, next as u16);
    mmio.wr16(start + CAP_OFF_ID, CAP_TXRX);

    io::wmb();
    mmio.wr32(MMIO_CAPABILITIES, start as u32);

    log::debug!(
        "published txrx capability @{:#x}: tx ring @{:#x} x{}, rx ring @{:#x} x{}, fragment {}",
        start,
        tx_ring,
        layout.tx_ndesc,
        rx_ring,
        layout.rx_ndesc,
        layout.fragment_size
    );
    Ok(start)
}

/// Fragment size advertised by the transport capability at `cap`
#[inline]
pub fn fragment_size(mmio: &IoMem, cap: usize) -> u32 {
    mmio.rd32(cap + CAP_OFF_FRAGMENT_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> TxRxLayout {
        TxRxLayout {
            fragment_size: 4096,
            tx_ndesc: 8,
            rx_ndesc: 4,
            staging_base: 0x1000_0000,
        }
    }

    #[test]
    fn zeroed_region_has_no_capabilities() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE + 64);
        assert_eq!(find(&mmio, None, CAP_TXRX), None);
        assert_eq!(find(&mmio, Some(MMIO_HEADER_SIZE), CAP_TXRX), None);
    }

    #[test]
    fn cyclic_list_stops_at_ttl() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE + 64);
        let a = MMIO_HEADER_SIZE;
        let b = MMIO_HEADER_SIZE + 8;
        mmio.wr16(a + CAP_OFF_ID, 7);
        mmio.wr16(a + CAP_OFF_NEXT, b as u16);
        mmio.wr16(b + CAP_OFF_ID, 9);
        mmio.wr16(b + CAP_OFF_NEXT, a as u16);
        mmio.wr32(MMIO_CAPABILITIES, a as u32);

        assert_eq!(find(&mmio, None, 9), Some(b));
        assert_eq!(find(&mmio, None, CAP_TXRX), None);
    }

    #[test]
    fn out_of_range_next_is_not_found() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE + 16);
        let a = MMIO_HEADER_SIZE;
        mmio.wr16(a + CAP_OFF_ID, 7);
        mmio.wr16(a + CAP_OFF_NEXT, 0xfff0);
        mmio.wr32(MMIO_CAPABILITIES, a as u32);
        assert_eq!(find(&mmio, None, CAP_TXRX), None);
    }

    #[test]
    fn record_truncated_at_region_end() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE + 64);
        let cap = mmio.len() - CAP_HDR_LEN;
        mmio.wr16(cap + CAP_OFF_ID, CAP_TXRX);
        mmio.wr16(cap + CAP_OFF_NEXT, 0);
        mmio.wr32(MMIO_CAPABILITIES, cap as u32);

        // the header alone is in range, the record is not
        assert_eq!(find(&mmio, None, CAP_TXRX), Some(cap));
        assert!(matches!(
            find_txrx(&mmio),
            Err(ControlpathError::CapabilityNotFound(CAP_TXRX))
        ));
    }

    #[test]
    fn layout_sizes_do_not_wrap() {
        let layout = TxRxLayout {
            fragment_size: 1,
            tx_ndesc: u32::MAX,
            rx_ndesc: u32::MAX,
            staging_base: 0,
        };
        assert_eq!(layout.staging_size(), 2 * u32::MAX as usize);
    }

    #[test]
    fn publish_then_find() {
        let layout = layout();
        let mmio = IoMem::new(layout.region_size());
        let cap = publish_txrx(&mmio, &layout).unwrap();

        assert_eq!(find(&mmio, None, CAP_TXRX), Some(cap));
        assert_eq!(find_txrx(&mmio).unwrap(), cap);
        assert_eq!(fragment_size(&mmio, cap), 4096);

        // the record links to a terminator right after the rings
        let next = mmio.rd16(cap + CAP_OFF_NEXT) as usize;
        assert_eq!(next, cap + CAP_TXRX_LEN + 12 * TD_SIZE);
        assert_eq!(mmio.rd16(next), CAP_NULL);
        assert_eq!(find(&mmio, None, 0x55), None);

        // every slot names its own fragment of the staging area
        let rx_ring = mmio.rd32(cap + CAP_OFF_RX + PIPE_OFF_RING) as usize;
        assert_eq!(mmio.rd64(rx_ring + TD_SIZE + TD_OFF_ADDRESS), 0x1000_0000 + 9 * 4096);
    }

    #[test]
    fn publish_rejects_small_region() {
        let layout = layout();
        let mmio = IoMem::new(layout.region_size() - 1);
        assert!(publish_txrx(&mmio, &layout).is_err());
        assert_eq!(mmio.rd32(MMIO_CAPABILITIES), 0);
    }
}
