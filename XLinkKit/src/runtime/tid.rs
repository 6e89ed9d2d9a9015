use std::sync::atomic::{AtomicUsize, Ordering};

pub(super) type WorkId = usize;

static NEXT_WORK_ID: WorkIdGenerator = WorkIdGenerator::new();

pub(super) struct WorkIdGenerator {
    next: AtomicUsize,
}

impl WorkIdGenerator {
    pub(super) const fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(super) fn next(&self) -> WorkId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[inline]
pub(super) fn next_work_id() -> WorkId {
    NEXT_WORK_ID.next()
}
