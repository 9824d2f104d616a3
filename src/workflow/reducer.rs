// Reducers - per-field merge behavior declared by the field's type
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::ops::Deref;

/// Merge a partial update into a state field.
///
/// Returns `false` when the delta was rejected (the field is left untouched
/// or, for maps, only the non-conflicting part is applied).
pub trait Reducer {
    type Delta;

    fn reduce(&mut self, delta: Self::Delta) -> bool;
}

/// Replace old value with new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Overwrite<T>(T);

impl<T> Overwrite<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> Deref for Overwrite<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Reducer for Overwrite<T> {
    type Delta = T;

    fn reduce(&mut self, delta: T) -> bool {
        self.0 = delta;
        true
    }
}

/// Keep the first value written; later writes are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetOnce<T>(Option<T>);

impl<T> Default for SetOnce<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> SetOnce<T> {
    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl<T> Reducer for SetOnce<T> {
    type Delta = T;

    fn reduce(&mut self, delta: T) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(delta);
        true
    }
}

/// Append-only list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppendOnly<T>(Vec<T>);

impl<T> Default for AppendOnly<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Deref for AppendOnly<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> Reducer for AppendOnly<T> {
    type Delta = Vec<T>;

    fn reduce(&mut self, delta: Vec<T>) -> bool {
        self.0.extend(delta);
        true
    }
}

/// Key-disjoint union: an existing key is never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnionMap<K: Ord, V>(BTreeMap<K, V>);

impl<K: Ord, V> Default for UnionMap<K, V> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<K: Ord, V> Deref for UnionMap<K, V> {
    type Target = BTreeMap<K, V>;

    fn deref(&self) -> &BTreeMap<K, V> {
        &self.0
    }
}

impl<K: Ord, V> Reducer for UnionMap<K, V> {
    type Delta = BTreeMap<K, V>;

    fn reduce(&mut self, delta: BTreeMap<K, V>) -> bool {
        let mut disjoint = true;
        for (key, value) in delta {
            match self.0.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(_) => disjoint = false,
            }
        }
        disjoint
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for UnionMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::default();
        for (k, v) in iter {
            map.reduce(BTreeMap::from([(k, v)]));
        }
        map
    }
}

/// Values that only move forward, with terminal states that accept nothing.
pub trait Progression: PartialEq {
    fn can_advance_to(&self, next: &Self) -> bool;
}

/// A field that rejects backward transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Forward<T>(T);

impl<T> Forward<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> Deref for Forward<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Progression> Reducer for Forward<T> {
    type Delta = T;

    fn reduce(&mut self, delta: T) -> bool {
        if self.0 == delta {
            return true;
        }
        if !self.0.can_advance_to(&delta) {
            return false;
        }
        self.0 = delta;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_once_keeps_first_value() {
        let mut url = SetOnce::default();
        assert!(url.reduce("a".to_string()));
        assert!(!url.reduce("b".to_string()));
        assert_eq!(url.get().map(String::as_str), Some("a"));
    }

    #[test]
    fn test_union_map_never_overwrites() {
        let mut map: UnionMap<u32, &str> = UnionMap::default();
        assert!(map.reduce(BTreeMap::from([(1, "first")])));
        assert!(!map.reduce(BTreeMap::from([(1, "second"), (2, "other")])));
        assert_eq!(map.get(&1), Some(&"first"));
        assert_eq!(map.get(&2), Some(&"other"));
    }

    #[test]
    fn test_union_is_commutative_for_disjoint_keys() {
        let parts = vec![
            BTreeMap::from([(3u32, 'c')]),
            BTreeMap::from([(1u32, 'a')]),
            BTreeMap::from([(2u32, 'b')]),
        ];

        let mut forward: UnionMap<u32, char> = UnionMap::default();
        for p in parts.iter().cloned() {
            forward.reduce(p);
        }
        let mut backward: UnionMap<u32, char> = UnionMap::default();
        for p in parts.iter().rev().cloned() {
            backward.reduce(p);
        }
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_append_only_extends() {
        let mut errors = AppendOnly::default();
        errors.reduce(vec!["a"]);
        errors.reduce(vec!["b", "c"]);
        assert_eq!(&*errors, &["a", "b", "c"]);
    }
}
