use std::collections::VecDeque;

/// A small queue where only the newest item matters.
///
/// Items carry an increasing index that may wrap around `i32::MAX`; order is
/// decided with wrapping arithmetic. Pushing into a full queue drops the
/// oldest item, and taking returns the newest and discards the rest.
/// Anything not newer than the last item taken is rejected, so a consumer
/// never goes backwards.
#[derive(Debug)]
pub struct NewestQueue<T> {
    items: VecDeque<(i32, T)>,
    capacity: usize,
    last_taken: Option<i32>,
    dropped: u64,
}

impl<T> NewestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            last_taken: None,
            dropped: 0,
        }
    }

    /// Queue `item`. Returns `false` if it was rejected as stale.
    pub fn push(&mut self, index: i32, item: T) -> bool {
        if self.last_taken.is_some_and(|last| !is_newer(index, last)) {
            self.dropped += 1;
            return false;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back((index, item));
        true
    }

    /// Take the newest item, discarding everything older.
    pub fn take_newest(&mut self) -> Option<(i32, T)> {
        let newest = self.items.pop_back()?;
        self.dropped += self.items.len() as u64;
        self.items.clear();
        self.last_taken = Some(newest.0);
        Some(newest)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_taken(&self) -> Option<i32> {
        self.last_taken
    }

    /// Items dropped as stale or superseded.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Serial-number order: `index` is newer if it lies within half the `i32`
/// range ahead of `than`.
fn is_newer(index: i32, than: i32) -> bool {
    index.wrapping_sub(than) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_oldest() {
        let mut queue = NewestQueue::new(2);
        assert!(queue.push(1, "a"));
        assert!(queue.push(2, "b"));
        assert!(queue.push(3, "c"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.take_newest(), Some((3, "c")));
        assert_eq!(queue.dropped(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn stale_items_are_rejected_after_take() {
        let mut queue = NewestQueue::new(2);
        queue.push(5, ());
        queue.take_newest();

        assert!(!queue.push(4, ()));
        assert!(!queue.push(5, ()));
        assert!(queue.push(6, ()));
        assert_eq!(queue.last_taken(), Some(5));
    }

    #[test]
    fn index_wrap_is_still_newer() {
        let mut queue = NewestQueue::new(2);
        queue.push(i32::MAX, "last before wrap");
        queue.take_newest();

        assert!(queue.push(i32::MIN, "first after wrap"));
        assert_eq!(queue.take_newest(), Some((i32::MIN, "first after wrap")));
        assert!(queue.push(i32::MIN + 1, "next"));
        assert!(!queue.push(i32::MAX, "stale"));
    }

    #[test]
    fn take_from_empty_is_none() {
        let mut queue: NewestQueue<u8> = NewestQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.take_newest().is_none());
        assert!(queue.last_taken().is_none());
    }
}
