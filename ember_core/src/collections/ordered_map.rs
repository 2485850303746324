use std::fmt::Display;

use crate::value::TaggedValue;

/// String-keyed map that keeps insertion order and exposes its entries by
/// position, so the collector can rewrite values without knowing the keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedMap {
    entries: Vec<(String, TaggedValue)>,
}

impl Display for OrderedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}

impl OrderedMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    /// Inserts or replaces; returns the previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: TaggedValue) -> Option<TaggedValue> {
        let key = key.into();
        match self.position(&key) {
            Some(pos) => Some(std::mem::replace(&mut self.entries[pos].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&TaggedValue> {
        self.position(key).map(|pos| &self.entries[pos].1)
    }

    pub fn remove(&mut self, key: &str) -> Option<TaggedValue> {
        self.position(key).map(|pos| self.entries.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    // Standard interface
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TaggedValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    // Positional access
    pub fn value_at(&self, position: usize) -> Option<&TaggedValue> {
        self.entries.get(position).map(|(_, v)| v)
    }

    pub fn value_at_mut(&mut self, position: usize) -> Option<&mut TaggedValue> {
        self.entries.get_mut(position).map(|(_, v)| v)
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, TaggedValue)>,
    {
        let mut map = Self::new();
        for (k, v) in pairs {
            map.insert(k, v);
        }
        map
    }
}
