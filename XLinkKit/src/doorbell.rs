//! Doorbells: one byte per (direction, event) pair in the shared region.
//!
//! A doorbell only says "look again". Handlers re-read the ring state
//! instead of trusting the doorbell content, so a lost or duplicated
//! doorbell heals on the next run.

use mmio_shim::io::IoMem;

use crate::consts::*;
use crate::status::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ToDevice,
    FromDevice,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoorbellType {
    DataSent,
    DataReceived,
    /// to-device only
    PhyIdUpdated,
}

fn offset(dir: Direction, ty: DoorbellType) -> Option<usize> {
    match (dir, ty) {
        (Direction::ToDevice, DoorbellType::DataSent) => Some(MMIO_HTOD_TX_DOORBELL),
        (Direction::ToDevice, DoorbellType::DataReceived) => Some(MMIO_HTOD_RX_DOORBELL),
        (Direction::ToDevice, DoorbellType::PhyIdUpdated) => Some(MMIO_HTOD_PHY_ID_DOORBELL),
        (Direction::FromDevice, DoorbellType::DataSent) => Some(MMIO_DTOH_TX_DOORBELL),
        (Direction::FromDevice, DoorbellType::DataReceived) => Some(MMIO_DTOH_RX_DOORBELL),
        (Direction::FromDevice, DoorbellType::PhyIdUpdated) => None,
    }
}

impl Role {
    /// Direction of the doorbells this side rings
    #[inline]
    pub fn outbound(self) -> Direction {
        match self {
            Role::Endpoint => Direction::FromDevice,
            Role::Host => Direction::ToDevice,
        }
    }

    /// Direction of the doorbells this side answers
    #[inline]
    pub fn inbound(self) -> Direction {
        match self {
            Role::Endpoint => Direction::ToDevice,
            Role::Host => Direction::FromDevice,
        }
    }
}

pub fn set(mmio: &IoMem, dir: Direction, ty: DoorbellType) {
    if let Some(off) = offset(dir, ty) {
        mmio.wr8(off, 1);
    }
}

pub fn clear(mmio: &IoMem, dir: Direction, ty: DoorbellType) {
    if let Some(off) = offset(dir, ty) {
        mmio.wr8(off, 0);
    }
}

pub fn is_set(mmio: &IoMem, dir: Direction, ty: DoorbellType) -> bool {
    offset(dir, ty).map_or(false, |off| mmio.rd8(off) != 0)
}

/// Clear the doorbell, returning whether it was rung.
pub fn take(mmio: &IoMem, dir: Direction, ty: DoorbellType) -> bool {
    if is_set(mmio, dir, ty) {
        clear(mmio, dir, ty);
        true
    } else {
        false
    }
}

pub fn clear_all(mmio: &IoMem, dir: Direction) {
    clear(mmio, dir, DoorbellType::DataSent);
    clear(mmio, dir, DoorbellType::DataReceived);
    clear(mmio, dir, DoorbellType::PhyIdUpdated);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_ring_opposite_directions() {
        assert_eq!(Role::Endpoint.outbound(), Role::Host.inbound());
        assert_eq!(Role::Host.outbound(), Role::Endpoint.inbound());
    }

    #[test]
    fn take_clears() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE);
        set(&mmio, Direction::FromDevice, DoorbellType::DataSent);
        assert!(is_set(&mmio, Direction::FromDevice, DoorbellType::DataSent));
        assert!(!is_set(&mmio, Direction::ToDevice, DoorbellType::DataSent));
        assert!(take(&mmio, Direction::FromDevice, DoorbellType::DataSent));
        assert!(!take(&mmio, Direction::FromDevice, DoorbellType::DataSent));
    }

    #[test]
    fn phy_id_is_to_device_only() {
        let mmio = IoMem::new(MMIO_HEADER_SIZE);
        set(&mmio, Direction::FromDevice, DoorbellType::PhyIdUpdated);
        assert!(!is_set(&mmio, Direction::FromDevice, DoorbellType::PhyIdUpdated));
        set(&mmio, Direction::ToDevice, DoorbellType::PhyIdUpdated);
        assert_eq!(mmio.rd8(MMIO_HTOD_PHY_ID_DOORBELL), 1);
        clear_all(&mmio, Direction::ToDevice);
        assert_eq!(mmio.rd8(MMIO_HTOD_PHY_ID_DOORBELL), 0);
    }
}
