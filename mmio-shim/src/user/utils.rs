use std::time::Instant;

/// A wall-clock timer backed by the monotonic clock
pub struct KTimer {
    cur: Instant,
}

impl KTimer {
    pub fn new() -> Self {
        Self {
            cur: Instant::now(),
        }
    }

    pub fn get_passed_usec(&self) -> i64 {
        self.cur.elapsed().as_micros() as i64
    }

    pub fn reset(&mut self) {
        self.cur = Instant::now();
    }
}

impl Default for KTimer {
    fn default() -> Self {
        Self::new()
    }
}
