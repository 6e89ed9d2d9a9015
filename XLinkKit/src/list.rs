use alloc::boxed::Box;
use core::ptr;

use crate::buffer::BufferDescriptor;

struct ListInner {
    head: Option<Box<BufferDescriptor>>,
    /// last node reachable from `head`, null iff `head` is `None`
    tail: *mut BufferDescriptor,
    bytes: usize,
    buffers: usize,
}

unsafe impl Send for ListInner {}

/// An intrusive FIFO of buffer descriptors with running byte/buffer totals.
///
/// Every mutation happens with the spin lock held for its whole duration,
/// so the list can be pushed from the engines and popped by readers.
pub struct BufferList {
    inner: spin::Mutex<ListInner>,
}

impl BufferList {
    pub fn new() -> Self {
        Self {
            inner: spin::Mutex::new(ListInner {
                head: None,
                tail: ptr::null_mut(),
                bytes: 0,
                buffers: 0,
            }),
        }
    }

    /// Append `bd` and everything chained behind it.
    ///
    /// The totals account for every node of the chain, not only its head.
    pub fn put(&self, mut bd: Box<BufferDescriptor>) {
        let mut bytes = 0;
        let mut buffers = 0;
        let mut last: *mut BufferDescriptor = &mut *bd;
        // SAFETY: walks nodes owned by `bd`, nothing else aliases them
        unsafe {
            loop {
                bytes += (*last).length();
                buffers += 1;
                match (*last).next.as_deref_mut() {
                    Some(next) => last = next,
                    None => break,
                }
            }
        }

        let mut inner = self.inner.lock();
        if inner.tail.is_null() {
            inner.head = Some(bd);
        } else {
            // SAFETY: tail points into the chain owned by `head`
            unsafe { (*inner.tail).next = Some(bd) };
        }
        inner.tail = last;
        inner.bytes += bytes;
        inner.buffers += buffers;
    }

    /// Pop the first BD, detached from the rest of the list.
    pub fn get(&self) -> Option<Box<BufferDescriptor>> {
        let mut inner = self.inner.lock();
        let mut bd = inner.head.take()?;
        inner.head = bd.next.take();
        if inner.head.is_none() {
            inner.tail = ptr::null_mut();
        }
        inner.bytes -= bd.length();
        inner.buffers -= 1;
        Some(bd)
    }

    /// `(bytes, buffers)` currently queued
    pub fn info(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.bytes, inner.buffers)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().buffers
    }

    /// Recount by walking the nodes
    #[cfg(test)]
    pub(crate) fn walk(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        let mut cur = inner.head.as_deref();
        let (mut bytes, mut buffers) = (0, 0);
        while let Some(bd) = cur {
            bytes += bd.length();
            buffers += 1;
            cur = bd.next();
        }
        (bytes, buffers)
    }
}

impl Default for BufferList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ListInner {
    fn drop(&mut self) {
        self.tail = ptr::null_mut();
        let mut next = self.head.take();
        while let Some(mut bd) = next {
            next = bd.take_next();
        }
    }
}

impl core::fmt::Debug for BufferList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (bytes, buffers) = self.info();
        f.debug_struct("BufferList")
            .field("bytes", &bytes)
            .field("buffers", &buffers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use rand::{Rng, SeedableRng};

    fn bd(len: usize) -> Box<BufferDescriptor> {
        BufferDescriptor::alloc(len).unwrap()
    }

    #[test]
    fn fifo_order() {
        let list = BufferList::new();
        for len in [1, 2, 3] {
            list.put(bd(len));
        }
        assert_eq!(list.info(), (6, 3));
        assert_eq!(list.get().unwrap().length(), 1);
        assert_eq!(list.get().unwrap().length(), 2);
        assert_eq!(list.get().unwrap().length(), 3);
        assert!(list.get().is_none());
        assert_eq!(list.info(), (0, 0));
    }

    #[test]
    fn put_chain_counts_every_node() {
        let list = BufferList::new();
        list.put(bd(5));
        let chain = BufferDescriptor::chain(vec![bd(10), bd(20), bd(30)]).unwrap();
        list.put(chain);
        list.put(bd(7));

        assert_eq!(list.info(), (72, 5));
        assert_eq!(list.walk(), (72, 5));

        // nodes come back one by one, unlinked
        let lens: Vec<usize> = core::iter::from_fn(|| list.get())
            .map(|bd| {
                assert!(bd.next().is_none());
                bd.length()
            })
            .collect();
        assert_eq!(lens, vec![5, 10, 20, 30, 7]);
    }

    #[test]
    fn counts_never_drift() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        let list = BufferList::new();
        for _ in 0..2000 {
            if rng.gen_bool(0.55) {
                let n = rng.gen_range(1..4);
                let bds = (0..n).map(|_| bd(rng.gen_range(1..64))).collect();
                list.put(BufferDescriptor::chain(bds).unwrap());
            } else {
                let _ = list.get();
            }
            assert_eq!(list.info(), list.walk());
            assert_eq!(list.is_empty(), list.len() == 0);
        }
    }
}
