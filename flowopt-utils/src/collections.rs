use std::hash::BuildHasherDefault;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

/// An insertion ordered map using the Fx hasher.  Use this instead of `FxHashMap` whenever the
/// contents get iterated, so passes stay deterministic.
pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// An insertion ordered set using the Fx hasher.
pub type FxIndexSet<K> = IndexSet<K, BuildHasherDefault<FxHasher>>;
