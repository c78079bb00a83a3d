//! Per-declaration response cursors.
//!
//! Each declaration owns one atomic slot holding the index of the response
//! to serve next. Advancing is a single compare-and-swap loop, so concurrent
//! matches on the same declaration receive distinct, consecutive indices
//! until the sequence saturates on its last response.

use crate::declaration::Declaration;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cursor state for every declaration of one snapshot.
#[derive(Debug)]
pub struct SequenceCursor {
    slots: HashMap<String, usize>,
    positions: Vec<AtomicUsize>,
    lengths: Vec<usize>,
}

impl SequenceCursor {
    /// Create cursors at index 0, one slot per declaration in order.
    pub fn new<'a>(declarations: impl IntoIterator<Item = &'a Declaration>) -> Self {
        let mut slots = HashMap::new();
        let mut positions = Vec::new();
        let mut lengths = Vec::new();

        for (slot, declaration) in declarations.into_iter().enumerate() {
            slots.insert(declaration.id().to_string(), slot);
            positions.push(AtomicUsize::new(0));
            lengths.push(declaration.responses().len());
        }

        Self {
            slots,
            positions,
            lengths,
        }
    }

    /// Consume the current index for `declaration_id` and advance it.
    pub fn next(&self, declaration_id: &str) -> Option<usize> {
        self.slots
            .get(declaration_id)
            .map(|&slot| self.advance(slot))
    }

    /// Current index for `declaration_id` without advancing.
    pub fn peek(&self, declaration_id: &str) -> Option<usize> {
        self.slots
            .get(declaration_id)
            .map(|&slot| self.peek_slot(slot))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub(crate) fn advance(&self, slot: usize) -> usize {
        let last = self.lengths[slot].saturating_sub(1);
        match self.positions[slot].fetch_update(Ordering::AcqRel, Ordering::Acquire, |index| {
            (index < last).then_some(index + 1)
        }) {
            Ok(served) => served,
            // saturated: the last response repeats
            Err(current) => current,
        }
    }

    pub(crate) fn peek_slot(&self, slot: usize) -> usize {
        self.positions[slot].load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{DeclarationBuilder, RequestPatternBuilder, ResponseSpecBuilder};
    use std::thread;

    fn declaration(id: &str, responses: usize) -> Declaration {
        DeclarationBuilder::new(id)
            .request(RequestPatternBuilder::new("/x").method("GET").build().unwrap())
            .responses((0..responses).map(|i| {
                ResponseSpecBuilder::new()
                    .body(format!("response {i}"))
                    .build()
                    .unwrap()
            }))
            .build()
            .unwrap()
    }

    #[test]
    fn test_advances_then_saturates() {
        let declarations = vec![declaration("invoice", 3)];
        let cursor = SequenceCursor::new(&declarations);

        assert_eq!(cursor.next("invoice"), Some(0));
        assert_eq!(cursor.next("invoice"), Some(1));
        assert_eq!(cursor.next("invoice"), Some(2));
        assert_eq!(cursor.next("invoice"), Some(2));
        assert_eq!(cursor.next("invoice"), Some(2));
    }

    #[test]
    fn test_single_response_always_zero() {
        let declarations = vec![declaration("single", 1)];
        let cursor = SequenceCursor::new(&declarations);
        for _ in 0..5 {
            assert_eq!(cursor.next("single"), Some(0));
        }
    }

    #[test]
    fn test_peek_does_not_advance() {
        let declarations = vec![declaration("a", 2), declaration("b", 2)];
        let cursor = SequenceCursor::new(&declarations);

        assert_eq!(cursor.peek("a"), Some(0));
        assert_eq!(cursor.peek("a"), Some(0));
        cursor.next("a");
        assert_eq!(cursor.peek("a"), Some(1));
        assert_eq!(cursor.peek("b"), Some(0));
    }

    #[test]
    fn test_unknown_id() {
        let declarations = vec![declaration("a", 1)];
        let cursor = SequenceCursor::new(&declarations);
        assert_eq!(cursor.next("missing"), None);
        assert_eq!(cursor.peek("missing"), None);
        assert_eq!(cursor.len(), 1);
    }

    #[test]
    fn test_concurrent_advance_hands_out_each_index_once() {
        const THREADS: usize = 8;
        const CALLS: usize = 200;

        let declarations = vec![declaration("busy", THREADS * CALLS + 10)];
        let cursor = SequenceCursor::new(&declarations);

        let mut served: Vec<usize> = thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        (0..CALLS)
                            .map(|_| cursor.next("busy").unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        served.sort_unstable();
        let expected: Vec<usize> = (0..THREADS * CALLS).collect();
        assert_eq!(served, expected);
    }

    #[test]
    fn test_concurrent_advance_saturates() {
        let declarations = vec![declaration("short", 4)];
        let cursor = SequenceCursor::new(&declarations);

        let mut served: Vec<usize> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        (0..10)
                            .map(|_| cursor.next("short").unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        served.sort_unstable();
        assert_eq!(&served[..3], &[0, 1, 2]);
        assert!(served[3..].iter().all(|&index| index == 3));
        assert_eq!(cursor.peek("short"), Some(3));
    }
}
