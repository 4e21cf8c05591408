/// Circular slot index plus the single "acquired" flag of a frame ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    index: u32,
    count: u32,
    acquired: bool,
}

impl FrameCursor {
    pub fn new(count: u32) -> Self {
        assert!(count > 0, "a frame ring needs at least one slot");
        Self {
            index: 0,
            count,
            acquired: false,
        }
    }

    /// Marks the current slot as acquired and returns it
    pub fn acquire(&mut self) -> u32 {
        assert!(!self.acquired, "frame already acquired, end it before acquiring the next one");
        self.acquired = true;
        self.index
    }

    /// Acquires a slot chosen by someone else (an XR runtime)
    pub fn acquire_at(&mut self, index: u32) -> u32 {
        assert!(index < self.count, "slot {} out of range for {} slots", index, self.count);
        self.index = index;
        self.acquire()
    }

    /// Releases the acquired slot and advances to the next one
    pub fn submit(&mut self) {
        assert!(self.acquired, "no frame acquired, nothing to submit");
        self.acquired = false;
        self.index = (self.index + 1) % self.count;
    }

    /// Releases the acquired slot without advancing
    pub fn cancel(&mut self) {
        self.acquired = false;
    }

    /// Starts over with `count` slots
    pub fn reset(&mut self, count: u32) {
        *self = Self::new(count);
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_through_slots() {
        let mut cursor = FrameCursor::new(3);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(cursor.acquire());
            assert!(cursor.is_acquired());
            cursor.submit();
        }
        assert_eq!(seen, vec![0, 1, 2, 0]);
    }

    #[test]
    #[should_panic(expected = "already acquired")]
    fn test_double_acquire() {
        let mut cursor = FrameCursor::new(2);
        cursor.acquire();
        cursor.acquire();
    }

    #[test]
    #[should_panic(expected = "nothing to submit")]
    fn test_submit_without_acquire() {
        FrameCursor::new(2).submit();
    }

    #[test]
    fn test_cancel_keeps_slot() {
        let mut cursor = FrameCursor::new(3);
        cursor.acquire();
        cursor.submit();
        assert_eq!(cursor.acquire(), 1);
        cursor.cancel();
        assert_eq!(cursor.acquire(), 1);
    }

    #[test]
    fn test_acquire_at_follows_external_index() {
        let mut cursor = FrameCursor::new(3);
        assert_eq!(cursor.acquire_at(2), 2);
        cursor.submit();
        assert_eq!(cursor.index(), 0);
    }

    #[test]
    fn test_reset_changes_count() {
        let mut cursor = FrameCursor::new(3);
        cursor.acquire();
        cursor.reset(2);
        assert!(!cursor.is_acquired());
        assert_eq!((cursor.index(), cursor.count()), (0, 2));
    }
}
