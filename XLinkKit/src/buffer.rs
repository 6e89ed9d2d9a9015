//! Buffer descriptors
//!
//! A BD names one fragment-sized chunk of transfer memory. The memory is
//! either a cache-line rounded heap block owned by the BD, or a slice of a
//! DMA-coherent arena shared by every BD of a pool. Arena memory is freed
//! once, with the arena; the BD wrapper itself is always freed on its own.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::consts::CACHE_LINE_SIZE;
use crate::utils::roundup;
use crate::Error;

/// A block of DMA-coherent memory with a fixed bus address.
pub struct DmaArena {
    ptr: NonNull<u8>,
    layout: Layout,
    phys: u64,
}

unsafe impl Send for DmaArena {}
unsafe impl Sync for DmaArena {}

impl DmaArena {
    pub fn new(len: usize, phys: u64) -> Result<Arc<Self>, Error> {
        if len == 0 {
            return Err(Error::EINVAL);
        }
        let layout = Layout::from_size_align(roundup(len, CACHE_LINE_SIZE), CACHE_LINE_SIZE)
            .map_err(|_| Error::EINVAL)?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(Error::ENOMEM)?;
        Ok(Arc::new(Self { ptr, layout, phys }))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn phys(&self) -> u64 {
        self.phys
    }
}

impl Drop for DmaArena {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

enum Backing {
    Heap(Vec<u8>),
    Arena { arena: Arc<DmaArena>, offset: usize },
}

pub struct BufferDescriptor {
    backing: Backing,
    /// cursor into the buffer, in bytes from its start
    data: usize,
    length: usize,
    true_len: usize,
    pub interface: u16,
    pub(crate) next: Option<Box<BufferDescriptor>>,
}

impl BufferDescriptor {
    /// Heap-backed BD. `None` under memory pressure.
    pub fn alloc(length: usize) -> Option<Box<Self>> {
        let mut mem = Vec::new();
        mem.try_reserve_exact(roundup(length.max(1), CACHE_LINE_SIZE))
            .ok()?;
        mem.resize(length, 0);
        Some(Box::new(Self {
            backing: Backing::Heap(mem),
            data: 0,
            length,
            true_len: length,
            interface: 0,
            next: None,
        }))
    }

    /// BD over `[offset, offset + length)` of a coherent arena.
    pub fn reuse(arena: &Arc<DmaArena>, offset: usize, length: usize) -> Option<Box<Self>> {
        if offset.checked_add(length)? > arena.len() {
            return None;
        }
        Some(Box::new(Self {
            backing: Backing::Arena {
                arena: arena.clone(),
                offset,
            },
            data: 0,
            length,
            true_len: length,
            interface: 0,
            next: None,
        }))
    }

    #[inline]
    pub fn is_coherent(&self) -> bool {
        matches!(self.backing, Backing::Arena { .. })
    }

    /// Bus address of the whole buffer, for arena-backed BDs
    pub fn phys_addr(&self) -> Option<u64> {
        match &self.backing {
            Backing::Arena { arena, offset } => Some(arena.phys() + *offset as u64),
            Backing::Heap(_) => None,
        }
    }

    fn head(&self) -> &[u8] {
        match &self.backing {
            Backing::Heap(mem) => &mem[..self.true_len],
            // SAFETY: BDs of one arena cover disjoint ranges and each BD is uniquely owned
            Backing::Arena { arena, offset } => unsafe {
                core::slice::from_raw_parts(arena.ptr.as_ptr().add(*offset), self.true_len)
            },
        }
    }

    fn head_mut(&mut self) -> &mut [u8] {
        let true_len = self.true_len;
        match &mut self.backing {
            Backing::Heap(mem) => &mut mem[..true_len],
            Backing::Arena { arena, offset } => unsafe {
                core::slice::from_raw_parts_mut(arena.ptr.as_ptr().add(*offset), true_len)
            },
        }
    }

    /// The live bytes: `length` bytes from the cursor
    #[inline]
    pub fn data(&self) -> &[u8] {
        let (start, end) = (self.data, self.data + self.length);
        &self.head()[start..end]
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let (start, end) = (self.data, self.data + self.length);
        &mut self.head_mut()[start..end]
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn true_len(&self) -> usize {
        self.true_len
    }

    /// Room left between the cursor and the end of the buffer
    #[inline]
    pub fn capacity(&self) -> usize {
        self.true_len - self.data
    }

    /// Clamped to the room left after the cursor.
    pub fn set_length(&mut self, length: usize) {
        self.length = length.min(self.capacity());
    }

    /// Consume `n` bytes from the front.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.length);
        self.data += n;
        self.length -= n;
    }

    /// Back to the full extent, unlinked, channel 0.
    pub fn reset(&mut self) {
        self.data = 0;
        self.length = self.true_len;
        self.next = None;
        self.interface = 0;
    }

    #[inline]
    pub fn take_next(&mut self) -> Option<Box<BufferDescriptor>> {
        self.next.take()
    }

    #[inline]
    pub fn next(&self) -> Option<&BufferDescriptor> {
        self.next.as_deref()
    }

    /// Link `bds` through `next`, in order, returning the head of the chain.
    pub fn chain(bds: Vec<Box<BufferDescriptor>>) -> Option<Box<BufferDescriptor>> {
        let mut head: Option<Box<BufferDescriptor>> = None;
        for mut bd in bds.into_iter().rev() {
            bd.next = head;
            head = Some(bd);
        }
        head
    }

    /// Number of BDs in the chain starting here
    pub fn chain_len(&self) -> usize {
        let mut n = 1;
        let mut cur = self.next();
        while let Some(bd) = cur {
            n += 1;
            cur = bd.next();
        }
        n
    }
}

impl Drop for BufferDescriptor {
    fn drop(&mut self) {
        // unlink iteratively, long chains would otherwise recurse
        let mut next = self.next.take();
        while let Some(mut bd) = next {
            next = bd.next.take();
        }
    }
}

impl core::fmt::Debug for BufferDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferDescriptor")
            .field("data", &self.data)
            .field("length", &self.length)
            .field("true_len", &self.true_len)
            .field("interface", &self.interface)
            .field("coherent", &self.is_coherent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_bd() {
        let mut bd = BufferDescriptor::alloc(100).unwrap();
        assert_eq!(bd.length(), 100);
        assert!(!bd.is_coherent());
        assert!(bd.phys_addr().is_none());

        bd.data_mut().copy_from_slice(&[7u8; 100]);
        bd.advance(30);
        assert_eq!(bd.length(), 70);
        assert_eq!(bd.data()[0], 7);

        bd.set_length(1000);
        assert_eq!(bd.length(), 70);

        bd.interface = 3;
        bd.reset();
        assert_eq!(bd.length(), 100);
        assert_eq!(bd.interface, 0);
    }

    #[test]
    fn arena_bds_are_disjoint() {
        let arena = DmaArena::new(4 * 64, 0x8000).unwrap();
        let mut a = BufferDescriptor::reuse(&arena, 0, 64).unwrap();
        let mut b = BufferDescriptor::reuse(&arena, 64, 64).unwrap();
        assert!(BufferDescriptor::reuse(&arena, 4 * 64, 1).is_none());

        a.data_mut().fill(0xaa);
        b.data_mut().fill(0xbb);
        assert!(a.data().iter().all(|x| *x == 0xaa));
        assert!(b.data().iter().all(|x| *x == 0xbb));
        assert_eq!(b.phys_addr(), Some(0x8000 + 64));

        // the arena outlives the pool that dropped its BDs
        drop(arena);
        assert_eq!(a.data().len(), 64);
    }

    #[test]
    fn chains() {
        let bds = (0..3).map(|_| BufferDescriptor::alloc(8).unwrap()).collect();
        let mut head = BufferDescriptor::chain(bds).unwrap();
        assert_eq!(head.chain_len(), 3);
        let rest = head.take_next().unwrap();
        assert_eq!(head.chain_len(), 1);
        assert_eq!(rest.chain_len(), 2);
    }

    #[test]
    fn long_chain_drops_without_recursion() {
        let bds = (0..100_000).map(|_| BufferDescriptor::alloc(1).unwrap()).collect();
        let head = BufferDescriptor::chain(bds).unwrap();
        drop(head);
    }
}
