//! Resource lifecycle tracking
//!
//! Client-owned objects (scene nodes, buffers) live in generational
//! arenas. A key stays valid until the object it names is released;
//! afterwards every lookup through that key reports the object as gone
//! instead of reaching whatever now occupies the slot.

use std::fmt;
use std::marker::PhantomData;

use log::warn;

/// Typed handle into an [`Arena`]
pub trait ArenaKey: Copy + fmt::Debug {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(&self) -> u32;
    fn generation(&self) -> u32;
}

/// Define a generational key type usable with [`Arena`]
macro_rules! arena_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $crate::resource::ArenaKey for $name {
            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            fn index(&self) -> u32 {
                self.index
            }

            fn generation(&self) -> u32 {
                self.generation
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}v{}", self.index, self.generation)
            }
        }
    };
}

pub(crate) use arena_key;

/// Resource lifecycle errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("resource {index}v{generation} was already released")]
    DoubleRelease { index: u32, generation: u32 },
    #[error("resource {index}v{generation} is gone")]
    Stale { index: u32, generation: u32 },
}

impl ResourceError {
    pub(crate) fn double_release<K: ArenaKey>(key: K) -> Self {
        ResourceError::DoubleRelease {
            index: key.index(),
            generation: key.generation(),
        }
    }

    pub(crate) fn stale<K: ArenaKey>(key: K) -> Self {
        ResourceError::Stale {
            index: key.index(),
            generation: key.generation(),
        }
    }
}

/// Result of a liveness-checked read
#[derive(Debug)]
pub enum Lookup<'a, T> {
    Live(&'a T),
    Gone,
}

impl<'a, T> Lookup<'a, T> {
    /// The value, if still live
    pub fn live(self) -> Option<&'a T> {
        match self {
            Lookup::Live(value) => Some(value),
            Lookup::Gone => None,
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Lookup::Gone)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational arena with O(1) liveness checks
#[derive(Debug)]
pub struct Arena<K, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            _key: PhantomData,
        }
    }

    /// Start tracking a resource, returning its key
    pub fn track(&mut self, value: T) -> K {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return K::from_parts(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        K::from_parts(index, 0)
    }

    /// Stop tracking a resource and hand it back
    ///
    /// Releasing a key a second time is a no-op reported as
    /// [`ResourceError::DoubleRelease`].
    pub fn release(&mut self, key: K) -> Result<T, ResourceError> {
        let Some(slot) = self.slots.get_mut(key.index() as usize) else {
            return Err(ResourceError::stale(key));
        };

        if slot.generation == key.generation() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(key.index());
                self.live -= 1;
                return Ok(value);
            }
        }

        if key.generation() < slot.generation {
            warn!("Resource {:?} released twice", key);
            return Err(ResourceError::double_release(key));
        }

        Err(ResourceError::stale(key))
    }

    /// Check whether a key still names a live resource
    pub fn is_live(&self, key: K) -> bool {
        self.slots
            .get(key.index() as usize)
            .is_some_and(|slot| slot.generation == key.generation() && slot.value.is_some())
    }

    /// Liveness-checked read
    pub fn lookup(&self, key: K) -> Lookup<'_, T> {
        match self.get(key) {
            Some(value) => Lookup::Live(value),
            None => Lookup::Gone,
        }
    }

    /// Liveness-checked read that fails with [`ResourceError::Stale`]
    pub fn require(&self, key: K) -> Result<&T, ResourceError> {
        self.get(key).ok_or_else(|| ResourceError::stale(key))
    }

    /// Liveness-checked mutable access
    pub fn require_mut(&mut self, key: K) -> Result<&mut T, ResourceError> {
        self.get_mut(key).ok_or_else(|| ResourceError::stale(key))
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.slots
            .get(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    /// Iterate over live resources
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (K::from_parts(index as u32, slot.generation), value))
        })
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<K: ArenaKey, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}
