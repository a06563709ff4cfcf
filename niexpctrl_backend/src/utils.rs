use std::cmp::min;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::StreamError;

/// Splits `0..end_pos` into consecutive chunks of at most `interval` samples.
///
/// ```
/// use niexpctrl_backend::utils::StreamCounter;
///
/// let mut counter = StreamCounter::new(10, 4);
/// assert_eq!(counter.tick_next(), Some((0, 4)));
/// assert_eq!(counter.tick_next(), Some((4, 8)));
/// assert_eq!(counter.tick_next(), Some((8, 10)));
/// assert_eq!(counter.tick_next(), None);
/// counter.reset();
/// assert_eq!(counter.tick_next(), Some((0, 4)));
/// ```
#[derive(Clone, Debug)]
pub struct StreamCounter {
    pos: usize,
    end_pos: usize,
    interval: usize,
}

impl StreamCounter {
    /// A zero `interval` is treated as one sample.
    pub fn new(end_pos: usize, interval: usize) -> Self {
        Self {
            pos: 0,
            end_pos,
            interval: interval.max(1),
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Returns the next `(start_pos, end_pos)` chunk, or `None` once the end is reached.
    pub fn tick_next(&mut self) -> Option<(usize, usize)> {
        if self.pos >= self.end_pos {
            return None;
        }
        let start_pos = self.pos;
        self.pos = min(start_pos + self.interval, self.end_pos);
        Some((start_pos, self.pos))
    }

    /// Rewinds to the beginning of the sequence
    pub fn reset(&mut self) {
        self.pos = 0;
    }
}

/// Cooperative cancellation flag shared between a stream and its controller.
///
/// Workers check the token before every buffer write, so a cancelled stream stops at the
/// next chunk boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(StreamError::Cancelled)` once cancelled
    pub fn check(&self) -> Result<(), StreamError> {
        if self.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        Ok(())
    }
}

/// Holds the busy flag of an experiment for as long as it lives.
#[derive(Debug)]
pub struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl BusyGuard {
    /// Raises `flag`, failing with [`StreamError::Busy`] if it is already raised.
    pub fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, StreamError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| StreamError::Busy)?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn chunks_tile_the_sequence(end_pos in 0usize..500, interval in 0usize..50) {
            let mut counter = StreamCounter::new(end_pos, interval);
            let mut expected_start = 0;
            while let Some((start, end)) = counter.tick_next() {
                prop_assert_eq!(start, expected_start);
                prop_assert!(end > start);
                prop_assert!(end - start <= interval.max(1));
                expected_start = end;
            }
            prop_assert_eq!(expected_start, end_pos);
        }
    }

    #[test]
    fn busy_guard_is_exclusive() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = BusyGuard::acquire(&flag).unwrap();
        assert_eq!(BusyGuard::acquire(&flag).unwrap_err(), StreamError::Busy);
        drop(guard);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(BusyGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert_eq!(token.check(), Err(StreamError::Cancelled));
    }
}
