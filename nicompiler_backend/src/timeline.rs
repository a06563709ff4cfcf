//! Per-channel ordered collection of edited instructions.
//!
//! An [`EditTimeline`] keeps [`InstrBook`]s keyed by their `start_pos` in a `BTreeMap`, so insertion
//! only needs to look at the two neighbours of the new instruction to reject overlaps.
//! Occupied intervals are `[start_pos, eff_end_pos)`, which gives "go" instructions a footprint of
//! exactly one tick at edit time. Their actual extent is decided at compile time.
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use crate::error::EditError;
use crate::instruction::InstrBook;

#[derive(Clone, Debug, Default)]
pub struct EditTimeline {
    books: BTreeMap<usize, InstrBook>,
}

impl EditTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `book`, keeping the timeline sorted by start position.
    ///
    /// Fails with [`EditError::Overlap`] if `[start_pos, eff_end_pos)` of `book` intersects
    /// the interval of any instruction already present. The timeline is unchanged on failure.
    /// `chan` only labels the error.
    ///
    /// ```
    /// # use nicompiler_backend::instruction::*;
    /// # use nicompiler_backend::timeline::EditTimeline;
    /// let mut timeline = EditTimeline::new();
    /// let func = Instruction::new_const(1.0);
    /// timeline.add("ao0", InstrBook::new(10, Some((20, false)), func.clone()).unwrap()).unwrap();
    /// // Touching intervals are fine
    /// timeline.add("ao0", InstrBook::new(0, Some((10, false)), func.clone()).unwrap()).unwrap();
    /// // 15..25 intersects 10..20
    /// assert!(timeline.add("ao0", InstrBook::new(15, Some((25, false)), func).unwrap()).is_err());
    /// assert_eq!(timeline.len(), 2);
    /// ```
    pub fn add(&mut self, chan: &str, book: InstrBook) -> Result<(), EditError> {
        let start = book.start_pos;
        let end = book.eff_end_pos();

        // Previous (or equal start) instruction must end before the new one starts
        if let Some((_, prev)) = self.books.range(..=start).next_back() {
            if prev.eff_end_pos() > start {
                return Err(Self::overlap(chan, &book, prev));
            }
        }
        // Next instruction must start after the new one ends
        if let Some((_, next)) = self.books.range((Excluded(start), Unbounded)).next() {
            if next.start_pos < end {
                return Err(Self::overlap(chan, &book, next));
            }
        }
        self.books.insert(start, book);
        Ok(())
    }

    fn overlap(chan: &str, new: &InstrBook, existing: &InstrBook) -> EditError {
        EditError::Overlap {
            chan: chan.to_string(),
            new: new.to_string(),
            existing: existing.to_string(),
        }
    }

    pub fn clear(&mut self) {
        self.books.clear()
    }

    /// Instruction with the highest start position
    pub fn last(&self) -> Option<&InstrBook> {
        self.books.values().next_back()
    }

    /// Effective end of the last instruction, `0` for an empty timeline
    pub fn last_end_pos(&self) -> usize {
        self.last().map_or(0, |book| book.eff_end_pos())
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Iterates over instructions in start order
    pub fn iter(&self) -> impl Iterator<Item = &InstrBook> + '_ {
        self.books.values()
    }
}
