pub mod analysis;
pub mod error;
pub mod ir;
pub mod loader;
pub mod msl;
pub mod options;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod loader_tests;
#[cfg(test)]
pub(crate) mod test_util;

use std::hash::Hash;
use std::marker::PhantomData;

use indexmap::IndexMap;

pub use error::{CompilerError, Result};
pub use msl::CompilerMsl;
pub use options::{Options, Platform, ResourceBinding, VertexAttr, VertexFormat};

// =============================================================================
// Id allocation
// =============================================================================

/// Counter handing out fresh ids above a bound.
///
/// The ID type must implement `From<u32>` to convert the raw counter value.
#[derive(Debug, Clone)]
pub struct IdSource<Id> {
    next_id: u32,
    _phantom: PhantomData<Id>,
}

impl<Id: From<u32>> IdSource<Id> {
    pub fn starting_at(next_id: u32) -> Self {
        IdSource {
            next_id,
            _phantom: PhantomData,
        }
    }

    /// Reserve a contiguous block of `count` ids and return the first.
    pub fn reserve(&mut self, count: u32) -> Id {
        let id = Id::from(self.next_id);
        self.next_id += count;
        id
    }

    /// One past the highest id handed out so far.
    pub fn bound(&self) -> u32 {
        self.next_id
    }
}

/// Arena that allocates IDs and stores associated items.
///
/// Uses IndexMap for deterministic iteration order (insertion order). Items
/// may also be stored under ids that were reserved elsewhere, which is how a
/// parsed module with its own id numbering is loaded.
#[derive(Debug, Clone)]
pub struct IdArena<Id, T> {
    source: IdSource<Id>,
    items: IndexMap<Id, T>,
}

impl<Id: From<u32> + Into<u32> + Copy + Eq + Hash, T> IdArena<Id, T> {
    /// Arena whose fresh ids start at `bound`.
    pub fn with_bound(bound: u32) -> Self {
        IdArena {
            source: IdSource::starting_at(bound),
            items: IndexMap::new(),
        }
    }

    /// Reserve `count` consecutive ids; the items are stored later with `set`.
    pub fn reserve_ids(&mut self, count: u32) -> Id {
        self.source.reserve(count)
    }

    /// Store an item, replacing any previous one. Ids at or above the bound
    /// move the bound past them.
    pub fn set(&mut self, id: Id, item: T) -> Option<T> {
        let raw: u32 = id.into();
        if raw >= self.source.bound() {
            self.source = IdSource::starting_at(raw + 1);
        }
        self.items.insert(id, item)
    }

    /// Get an item by ID.
    pub fn get(&self, id: Id) -> Option<&T> {
        self.items.get(&id)
    }

    /// Get a mutable reference to an item by ID.
    pub fn get_mut(&mut self, id: Id) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    /// Iterate over all (id, item) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Id, &T)> {
        self.items.iter()
    }

    pub fn bound(&self) -> u32 {
        self.source.bound()
    }
}

// =============================================================================
// Convenience entry point
// =============================================================================

/// Compile SPIR-V words to MSL source with the given options.
pub fn compile_words(words: &[u32], options: Options) -> Result<String> {
    let ir = loader::load_words(words)?;
    let mut compiler = CompilerMsl::new(ir, options);
    compiler.compile()
}

#[cfg(test)]
mod id_arena_tests {
    use super::IdArena;

    #[test]
    fn test_reserve_after_bound() {
        let mut arena: IdArena<u32, &str> = IdArena::with_bound(10);
        arena.set(3, "three");
        let first = arena.reserve_ids(4);
        assert_eq!(first, 10);
        assert_eq!(arena.bound(), 14);
        assert_eq!(arena.reserve_ids(1), 14);
    }

    #[test]
    fn test_set_above_bound_moves_bound() {
        let mut arena: IdArena<u32, i32> = IdArena::with_bound(2);
        arena.set(7, 1);
        assert_eq!(arena.bound(), 8);
        assert_eq!(arena.get(7), Some(&1));
    }

    #[test]
    fn test_iteration_is_insertion_ordered() {
        let mut arena: IdArena<u32, char> = IdArena::with_bound(100);
        arena.set(9, 'a');
        arena.set(2, 'b');
        arena.set(5, 'c');
        let order: Vec<u32> = arena.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![9, 2, 5]);
    }
}
