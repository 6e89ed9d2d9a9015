//! Memory-mapped I/O region shared by the two sides of a link.
//!
//! The region is treated as a byte-offset table. Every access goes through
//! an explicit-width accessor and every multi-byte value is little-endian,
//! whatever the host byte order is. Backing storage is a slice of 32-bit
//! atomics so a naturally aligned 32-bit access is a single load or store;
//! narrower writes are read-modify-write on the containing word.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{fence, AtomicU32, Ordering};

pub struct IoMem {
    words: Box<[AtomicU32]>,
    len: usize,
}

impl IoMem {
    /// Create a zeroed region of `len` bytes.
    pub fn new(len: usize) -> Self {
        let words: Vec<AtomicU32> = (0..(len + 3) / 4).map(|_| AtomicU32::new(0)).collect();
        Self {
            words: words.into_boxed_slice(),
            len,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `[offset, offset + len)` lies inside the region
    #[inline]
    pub fn contains(&self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).map_or(false, |end| end <= self.len)
    }

    #[inline]
    fn word(&self, offset: usize) -> &AtomicU32 {
        &self.words[offset >> 2]
    }

    #[inline]
    fn update(&self, offset: usize, width: usize, value: u32) {
        let shift = (offset & 3) * 8;
        let mask = ((((1u64) << (width * 8)) - 1) as u32) << shift;
        let _ = self
            .word(offset)
            .fetch_update(Ordering::Release, Ordering::Relaxed, |w| {
                Some((w & !mask) | ((value << shift) & mask))
            });
    }

    /// # Panics
    /// Accesses outside the region panic, the same way a bad BAR access faults.
    #[inline]
    pub fn rd8(&self, offset: usize) -> u8 {
        assert!(offset < self.len, "mmio read out of range: {:#x}", offset);
        (self.word(offset).load(Ordering::Acquire) >> ((offset & 3) * 8)) as u8
    }

    #[inline]
    pub fn wr8(&self, offset: usize, value: u8) {
        assert!(offset < self.len, "mmio write out of range: {:#x}", offset);
        self.update(offset, 1, value as u32);
    }

    pub fn rd16(&self, offset: usize) -> u16 {
        if offset & 3 <= 2 && offset + 2 <= self.len {
            (self.word(offset).load(Ordering::Acquire) >> ((offset & 3) * 8)) as u16
        } else {
            u16::from_le_bytes([self.rd8(offset), self.rd8(offset + 1)])
        }
    }

    pub fn wr16(&self, offset: usize, value: u16) {
        if offset & 3 <= 2 && offset + 2 <= self.len {
            self.update(offset, 2, value as u32);
        } else {
            let bytes = value.to_le_bytes();
            self.wr8(offset, bytes[0]);
            self.wr8(offset + 1, bytes[1]);
        }
    }

    pub fn rd32(&self, offset: usize) -> u32 {
        if offset & 3 == 0 && offset + 4 <= self.len {
            self.word(offset).load(Ordering::Acquire)
        } else {
            u32::from_le_bytes([
                self.rd8(offset),
                self.rd8(offset + 1),
                self.rd8(offset + 2),
                self.rd8(offset + 3),
            ])
        }
    }

    pub fn wr32(&self, offset: usize, value: u32) {
        if offset & 3 == 0 && offset + 4 <= self.len {
            self.word(offset).store(value, Ordering::Release);
        } else {
            for (i, b) in value.to_le_bytes().iter().enumerate() {
                self.wr8(offset + i, *b);
            }
        }
    }

    /// 64-bit fields are two 32-bit accesses, low half first.
    pub fn rd64(&self, offset: usize) -> u64 {
        let lo = self.rd32(offset) as u64;
        let hi = self.rd32(offset + 4) as u64;
        lo | (hi << 32)
    }

    pub fn wr64(&self, offset: usize, value: u64) {
        self.wr32(offset, value as u32);
        self.wr32(offset + 4, (value >> 32) as u32);
    }

    pub fn rd_buffer(&self, offset: usize, buf: &mut [u8]) {
        let mut i = 0;
        while i < buf.len() {
            let off = offset + i;
            if off & 3 == 0 && buf.len() - i >= 4 {
                let w = self.rd32(off);
                buf[i..i + 4].copy_from_slice(&w.to_le_bytes());
                i += 4;
            } else {
                buf[i] = self.rd8(off);
                i += 1;
            }
        }
    }

    pub fn wr_buffer(&self, offset: usize, buf: &[u8]) {
        let mut i = 0;
        while i < buf.len() {
            let off = offset + i;
            if off & 3 == 0 && buf.len() - i >= 4 {
                let mut w = [0u8; 4];
                w.copy_from_slice(&buf[i..i + 4]);
                self.wr32(off, u32::from_le_bytes(w));
                i += 4;
            } else {
                self.wr8(off, buf[i]);
                i += 1;
            }
        }
    }

    /// Zero `len` bytes starting at `offset`
    pub fn clear(&self, offset: usize, len: usize) {
        for off in offset..offset + len {
            self.wr8(off, 0);
        }
    }
}

/// Write barrier: every store issued before is visible before any store issued after.
#[inline]
pub fn wmb() {
    fence(Ordering::Release);
}

/// Read barrier
#[inline]
pub fn rmb() {
    fence(Ordering::Acquire);
}

impl core::fmt::Debug for IoMem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IoMem").field("len", &self.len).finish()
    }
}
