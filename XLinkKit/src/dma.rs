//! Copying payloads across the link.
//!
//! The engines never touch peer memory directly. They go through a
//! [`DmaEngine`] and, where the platform has one, a [`PeerMemory`] window
//! that can be copied through with the CPU when the DMA engine fails.

use mmio_shim::{log, KernelResult};

use crate::buffer::BufferDescriptor;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaDirection {
    /// local buffer to peer memory
    ToPeer,
    /// peer memory to local buffer
    FromPeer,
}

/// A DMA engine able to move bytes between local buffers and bus addresses.
///
/// `map`/`unmap` bracket a transfer for buffers that are not DMA-coherent;
/// the returned handle is opaque to the caller.
pub trait DmaEngine: Send + Sync {
    fn map(&self, len: usize, dir: DmaDirection) -> KernelResult<u64>;

    fn unmap(&self, handle: u64, len: usize, dir: DmaDirection);

    /// Transfer `dst.len()` bytes from bus address `src`, waiting for completion.
    fn read(&self, dst: &mut [u8], src: u64) -> KernelResult<()>;

    /// Transfer `src` to bus address `dst`, waiting for completion.
    fn write(&self, dst: u64, src: &[u8]) -> KernelResult<()>;
}

/// Peer memory reachable with plain CPU copies (the BAR on the endpoint).
pub trait PeerMemory: Send + Sync {
    fn memcpy_fromio(&self, dst: &mut [u8], src: u64) -> KernelResult<()>;

    fn memcpy_toio(&self, dst: u64, src: &[u8]) -> KernelResult<()>;
}

/// How a payload made it across
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyPath {
    Dma,
    /// the DMA engine failed and the CPU copied through the peer window
    Fallback,
}

/// Why a payload did not make it across
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyFault {
    /// the buffer could not be mapped, nothing was attempted
    Map(Error),
    Transfer(Error),
}

/// Copy `len` bytes at bus address `src` into the front of `bd`.
///
/// On success the BD's length is set to `len`.
pub fn copy_from_peer(
    dma: &dyn DmaEngine,
    fallback: Option<&dyn PeerMemory>,
    bd: &mut BufferDescriptor,
    src: u64,
    len: usize,
) -> Result<CopyPath, CopyFault> {
    if len > bd.capacity() {
        return Err(CopyFault::Transfer(Error::EINVAL));
    }

    let res = if bd.is_coherent() {
        transfer_in(dma, fallback, bd, src, len)
    } else {
        match dma.map(len, DmaDirection::FromPeer) {
            Ok(handle) => {
                let res = transfer_in(dma, fallback, bd, src, len);
                dma.unmap(handle, len, DmaDirection::FromPeer);
                res
            }
            Err(e) => match fallback {
                Some(bar) => {
                    log::warn!("rx dma map failed ({}), copying through the bar", e);
                    bar.memcpy_fromio(&mut bd.data_mut()[..len], src)
                        .map(|_| CopyPath::Fallback)
                        .map_err(CopyFault::Transfer)
                }
                None => Err(CopyFault::Map(e)),
            },
        }
    };
    let path = res?;

    bd.set_length(len);
    Ok(path)
}

fn transfer_in(
    dma: &dyn DmaEngine,
    fallback: Option<&dyn PeerMemory>,
    bd: &mut BufferDescriptor,
    src: u64,
    len: usize,
) -> Result<CopyPath, CopyFault> {
    let dst = &mut bd.data_mut()[..len];
    match dma.read(dst, src) {
        Ok(()) => Ok(CopyPath::Dma),
        Err(e) => match fallback {
            Some(bar) => {
                log::warn!("rx dma transfer failed ({}), copying through the bar", e);
                bar.memcpy_fromio(dst, src)
                    .map(|_| CopyPath::Fallback)
                    .map_err(CopyFault::Transfer)
            }
            None => Err(CopyFault::Transfer(e)),
        },
    }
}

/// Copy the live bytes of `bd` to bus address `dst`.
pub fn copy_to_peer(
    dma: &dyn DmaEngine,
    fallback: Option<&dyn PeerMemory>,
    bd: &BufferDescriptor,
    dst: u64,
) -> Result<CopyPath, CopyFault> {
    let src = bd.data();
    let len = src.len();

    let mapped = if bd.is_coherent() {
        None
    } else {
        match dma.map(len, DmaDirection::ToPeer) {
            Ok(handle) => Some(handle),
            Err(e) => {
                return match fallback {
                    Some(bar) => {
                        log::warn!("tx dma map failed ({}), copying through the bar", e);
                        bar.memcpy_toio(dst, src)
                            .map(|_| CopyPath::Fallback)
                            .map_err(CopyFault::Transfer)
                    }
                    None => Err(CopyFault::Map(e)),
                };
            }
        }
    };

    let res = match dma.write(dst, src) {
        Ok(()) => Ok(CopyPath::Dma),
        Err(e) => match fallback {
            Some(bar) => {
                log::warn!("tx dma transfer failed ({}), copying through the bar", e);
                bar.memcpy_toio(dst, src)
                    .map(|_| CopyPath::Fallback)
                    .map_err(CopyFault::Transfer)
            }
            None => Err(CopyFault::Transfer(e)),
        },
    };

    if let Some(handle) = mapped {
        dma.unmap(handle, len, DmaDirection::ToPeer);
    }
    res
}
