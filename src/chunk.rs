//! Ordered output segments.
//!
//! Chunks live in an arena and are linked by index in output order. New
//! chunks are only ever inserted directly after an existing one, so a chunk's
//! position relative to everything written before it never changes. Content
//! leaves the list once its chunk and every chunk before it have ended.

use crate::error::{MinidustError, MinidustResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ChunkId(usize);

#[derive(Debug, Default)]
struct Slot {
    buf: String,
    next: Option<ChunkId>,
    ended: bool,
}

#[derive(Debug)]
pub(crate) struct ChunkList {
    slots: Vec<Slot>,
    /// First chunk that has not been flushed; `None` once everything has.
    head: Option<ChunkId>,
}

impl ChunkList {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![Slot::default()],
            head: Some(ChunkId(0)),
        }
    }

    pub(crate) const fn root() -> ChunkId {
        ChunkId(0)
    }

    fn slot(&mut self, id: ChunkId) -> MinidustResult<&mut Slot> {
        self.slots
            .get_mut(id.0)
            .ok_or_else(|| MinidustError::Protocol(format!("unknown chunk {}", id.0)))
    }

    pub(crate) fn write(&mut self, id: ChunkId, text: &str) -> MinidustResult<()> {
        let slot = self.slot(id)?;
        debug_assert!(!slot.ended, "write to ended chunk {}", id.0);
        if slot.ended {
            return Err(MinidustError::Protocol(format!(
                "write to ended chunk {}",
                id.0
            )));
        }
        slot.buf.push_str(text);
        Ok(())
    }

    /// Reserves a new chunk directly after `id`.
    pub(crate) fn insert_after(&mut self, id: ChunkId) -> MinidustResult<ChunkId> {
        let new = ChunkId(self.slots.len());
        let slot = self.slot(id)?;
        let next = slot.next.replace(new);
        self.slots.push(Slot {
            next,
            ..Slot::default()
        });
        Ok(new)
    }

    pub(crate) fn end(&mut self, id: ChunkId) -> MinidustResult<()> {
        let slot = self.slot(id)?;
        debug_assert!(!slot.ended, "chunk {} ended twice", id.0);
        if slot.ended {
            return Err(MinidustError::Protocol(format!("chunk {} ended twice", id.0)));
        }
        slot.ended = true;
        Ok(())
    }

    /// Takes the content of every ended chunk at the front of the list.
    ///
    /// Returns the coalesced text and whether the whole list has been
    /// flushed.
    pub(crate) fn flush(&mut self) -> (String, bool) {
        let mut out = String::new();
        while let Some(id) = self.head {
            let Some(slot) = self.slots.get_mut(id.0) else {
                self.head = None;
                break;
            };
            if !slot.ended {
                break;
            }
            out.push_str(&std::mem::take(&mut slot.buf));
            self.head = slot.next;
        }
        (out, self.head.is_none())
    }

    /// Drops all buffered content; nothing more will be flushed.
    pub(crate) fn discard(&mut self) {
        self.slots.clear();
        self.head = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_synchronous_chain_flushes_at_once() {
        let mut chunks = ChunkList::new();
        let root = ChunkList::root();
        chunks.write(root, "Hello ").unwrap();
        chunks.write(root, "World").unwrap();
        chunks.end(root).unwrap();
        assert_eq!(chunks.flush(), ("Hello World".to_owned(), true));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_reserved_chunk_holds_back_later_output() {
        let mut chunks = ChunkList::new();
        let root = ChunkList::root();
        chunks.write(root, "a").unwrap();
        let tail = chunks.insert_after(root).unwrap();
        chunks.write(tail, "c").unwrap();
        chunks.end(tail).unwrap();

        // The reserved chunk is still open, nothing can be emitted.
        assert_eq!(chunks.flush(), (String::new(), false));

        chunks.write(root, "b").unwrap();
        chunks.end(root).unwrap();
        assert_eq!(chunks.flush(), ("abc".to_owned(), true));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_insert_after_keeps_order() {
        let mut chunks = ChunkList::new();
        let root = ChunkList::root();
        let third = chunks.insert_after(root).unwrap();
        let second = chunks.insert_after(root).unwrap();
        chunks.write(third, "3").unwrap();
        chunks.write(second, "2").unwrap();
        chunks.write(root, "1").unwrap();
        for id in [third, second, root] {
            chunks.end(id).unwrap();
        }
        assert_eq!(chunks.flush(), ("123".to_owned(), true));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partial_flush() {
        let mut chunks = ChunkList::new();
        let root = ChunkList::root();
        let next = chunks.insert_after(root).unwrap();
        chunks.write(root, "first").unwrap();
        chunks.end(root).unwrap();
        assert_eq!(chunks.flush(), ("first".to_owned(), false));
        chunks.write(next, "second").unwrap();
        chunks.end(next).unwrap();
        assert_eq!(chunks.flush(), ("second".to_owned(), true));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_discard() {
        let mut chunks = ChunkList::new();
        chunks.write(ChunkList::root(), "lost").unwrap();
        chunks.discard();
        assert_eq!(chunks.flush(), (String::new(), true));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "ended twice")]
    fn test_double_end_is_loud() {
        let mut chunks = ChunkList::new();
        chunks.end(ChunkList::root()).unwrap();
        let _ = chunks.end(ChunkList::root());
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn test_double_end_is_an_error() {
        let mut chunks = ChunkList::new();
        chunks.end(ChunkList::root()).unwrap();
        assert!(matches!(
            chunks.end(ChunkList::root()),
            Err(MinidustError::Protocol(_))
        ));
    }
}
