use std::collections::HashMap;

use crate::{
    arena::Arena,
    ast::Var,
    error::{AllocationFailure, Fault},
    value::{CellShape, Tag, FREE_SENTINEL, WORD},
};

/// Offset of a cell from the start of the data section.
pub type Slot = u64;

/// Binds variable names to cells of the data section.
///
/// There is no free list: whether a cell is taken is decided from the bytes
/// it currently holds (see [`CellShape::classify`]).
#[derive(Debug, Default)]
pub struct SlotAllocator {
    bindings: HashMap<String, Slot>,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot bound to `var`, binding the first free window if it has none yet.
    pub fn slot_for(&mut self, arena: &Arena, var: &Var) -> Result<Slot, AllocationFailure> {
        let name = var.name();
        if name.len() != 1 {
            return Err(AllocationFailure::InvalidName { name: name.to_string() });
        }

        if let Some(&slot) = self.bindings.get(name) {
            tracing::trace!(var = name, slot, "slot cache hit");
            return Ok(slot);
        }

        let slot = first_free(arena).ok_or_else(|| AllocationFailure::StoreExhausted {
            name: name.to_string(),
        })?;
        tracing::debug!(var = name, slot, "bound new slot");
        self.bindings.insert(name.to_string(), slot);
        Ok(slot)
    }

    /// Forget the binding of `var` and return the slot it had.
    ///
    /// The cell itself is marked free by [`mark_free`] when the routine runs.
    pub fn release(&mut self, arena: &Arena, var: &Var) -> Result<Slot, AllocationFailure> {
        let slot = self.slot_for(arena, var)?;
        self.bindings.remove(var.name());
        Ok(slot)
    }

    pub fn lookup(&self, name: &str) -> Option<Slot> {
        self.bindings.get(name).copied()
    }
}

fn first_free(arena: &Arena) -> Option<Slot> {
    let mut offset = 0;
    while offset < arena.data_size() {
        let address = arena.data_base() + offset;
        let first = arena.read_u64(address).ok()?;
        let second = arena.read_u64(address + WORD).ok()?;
        match CellShape::classify(first, second) {
            CellShape::Free => return Some(offset),
            shape => offset += shape.span(),
        }
    }
    None
}

/// Mark the cell at `address` free using its own type tag: an integer gets
/// the sentinel in its value word, a string gets its length zeroed. The
/// other word is left as it was.
pub(crate) fn mark_free(arena: &mut Arena, address: u64) -> Result<(), Fault> {
    match Tag::of(arena.read_u64(address + WORD)?) {
        Tag::String { .. } => arena.write_u64(address + WORD, 0),
        Tag::Integer => arena.write_u64(address, FREE_SENTINEL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn arena_with(config: &EngineConfig) -> Arena {
        let mut arena = Arena::create(config).unwrap();
        arena.initialize();
        arena
    }

    fn arena() -> Arena {
        arena_with(&EngineConfig::default())
    }

    fn store_int(arena: &mut Arena, slot: Slot, value: u64) {
        let address = arena.data_base() + slot;
        arena.write_u64(address, value).unwrap();
        arena.write_u64(address + 8, 0).unwrap();
    }

    #[test]
    fn rejects_names_that_are_not_one_character() {
        let arena = arena();
        let mut allocator = SlotAllocator::new();
        assert_eq!(
            allocator.slot_for(&arena, &Var::new("xy")),
            Err(AllocationFailure::InvalidName { name: "xy".into() })
        );
        assert!(allocator.slot_for(&arena, &Var::new("")).is_err());
    }

    #[test]
    fn repeated_lookup_returns_same_slot() {
        let arena = arena();
        let mut allocator = SlotAllocator::new();
        let first = allocator.slot_for(&arena, &Var::new("x")).unwrap();
        let second = allocator.slot_for(&arena, &Var::new("x")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unbound_cells_stay_free_until_written() {
        // Binding alone writes nothing, so the next name sees the same window.
        let arena = arena();
        let mut allocator = SlotAllocator::new();
        let x = allocator.slot_for(&arena, &Var::new("x")).unwrap();
        let y = allocator.slot_for(&arena, &Var::new("y")).unwrap();
        assert_eq!(x, 0);
        assert_eq!(y, 0);
    }

    #[test]
    fn scan_skips_integers_and_strings() {
        let mut arena = arena();
        let mut allocator = SlotAllocator::new();
        store_int(&mut arena, 0, 7);
        let string = arena.data_base() + 16;
        arena.write_u64(string, arena.literal_base()).unwrap();
        arena.write_u64(string + 8, 3).unwrap();

        assert_eq!(allocator.slot_for(&arena, &Var::new("z")).unwrap(), 48);
    }

    #[test]
    fn released_slot_is_reused() {
        let mut arena = arena();
        let mut allocator = SlotAllocator::new();
        let x = allocator.slot_for(&arena, &Var::new("x")).unwrap();
        store_int(&mut arena, x, 1);

        let released = allocator.release(&arena, &Var::new("x")).unwrap();
        assert_eq!(released, x);
        assert_eq!(allocator.lookup("x"), None);
        let address = arena.data_base() + released;
        mark_free(&mut arena, address).unwrap();

        let y = allocator.slot_for(&arena, &Var::new("y")).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn released_string_keeps_its_pointer() {
        let mut arena = arena();
        let address = arena.data_base();
        let pointer = arena.literal_base();
        arena.write_u64(address, pointer).unwrap();
        arena.write_u64(address + 8, 5).unwrap();

        mark_free(&mut arena, address).unwrap();
        assert_eq!(arena.read_u64(address).unwrap(), pointer);
        assert_eq!(arena.read_u64(address + 8).unwrap(), 0);
    }

    #[test]
    fn exhausted_store_fails() {
        let config = EngineConfig {
            data_section_size: 32,
            ..EngineConfig::default()
        };
        let mut arena = arena_with(&config);
        let mut allocator = SlotAllocator::new();
        store_int(&mut arena, 0, 1);
        store_int(&mut arena, 16, 2);

        assert_eq!(
            allocator.slot_for(&arena, &Var::new("q")),
            Err(AllocationFailure::StoreExhausted { name: "q".into() })
        );
    }
}
