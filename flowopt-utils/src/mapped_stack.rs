//! A stack of values per key.
//!
//! Used while walking a tree where every node may shadow the value associated with a key for the
//! duration of its subtree, e.g., the version stacks of SSA renaming.

use std::hash::Hash;

use rustc_hash::FxHashMap;

/// A map from keys to stacks of values.  Only the top of each stack is visible through
/// [`MappedStack::get`].
#[derive(Debug, Clone)]
pub struct MappedStack<K: Eq + Hash, V> {
    container: FxHashMap<K, Vec<V>>,
}

impl<K: Eq + Hash, V> Default for MappedStack<K, V> {
    fn default() -> Self {
        MappedStack {
            container: FxHashMap::default(),
        }
    }
}

impl<K: Eq + Hash, V> MappedStack<K, V> {
    /// Push `v` as the new visible value for `k`.
    pub fn push(&mut self, k: K, v: V) {
        self.container.entry(k).or_default().push(v);
    }

    /// Pop the visible value of `k`, exposing whatever was pushed before it.
    pub fn pop(&mut self, k: &K) -> Option<V> {
        let stack = self.container.get_mut(k)?;
        let v = stack.pop();
        if stack.is_empty() {
            self.container.remove(k);
        }
        v
    }

    /// The visible value of `k`, if any.
    pub fn get(&self, k: &K) -> Option<&V> {
        self.container.get(k).and_then(|stack| stack.last())
    }

    /// Number of values currently stacked for `k`.
    pub fn depth(&self, k: &K) -> usize {
        self.container.get(k).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::MappedStack;

    #[test]
    fn shadowing_is_undone_by_pop() {
        let mut stack = MappedStack::<&str, u32>::default();
        assert!(stack.get(&"x").is_none());

        stack.push("x", 1);
        stack.push("y", 10);
        stack.push("x", 2);
        assert_eq!(stack.get(&"x"), Some(&2));
        assert_eq!(stack.depth(&"x"), 2);

        assert_eq!(stack.pop(&"x"), Some(2));
        assert_eq!(stack.get(&"x"), Some(&1));
        assert_eq!(stack.pop(&"x"), Some(1));
        assert_eq!(stack.pop(&"x"), None);
        assert_eq!(stack.get(&"y"), Some(&10));

        stack.pop(&"y");
        assert!(stack.is_empty());
    }
}
