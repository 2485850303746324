use std::fmt::Display;

use crate::value::TaggedValue;

/// Value-keyed set in insertion order. Membership is value equality, which
/// for pointers means address equality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedSet {
    members: Vec<TaggedValue>,
}

impl Display for OrderedSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{{")?;
        for (i, value) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "}}")
    }
}

impl OrderedSet {
    pub fn new() -> Self {
        Self { members: Vec::new() }
    }

    /// Returns false if the value was already present.
    pub fn insert(&mut self, value: TaggedValue) -> bool {
        if self.contains(&value) {
            return false;
        }
        self.members.push(value);
        true
    }

    pub fn contains(&self, value: &TaggedValue) -> bool {
        self.members.iter().any(|member| member == value)
    }

    pub fn remove(&mut self, value: &TaggedValue) -> bool {
        match self.members.iter().position(|member| member == value) {
            Some(pos) => {
                self.members.remove(pos);
                true
            }
            None => false,
        }
    }

    // Standard interface
    pub fn len(&self) -> usize { self.members.len() }
    pub fn is_empty(&self) -> bool { self.members.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &TaggedValue> {
        self.members.iter()
    }

    // Positional access
    pub fn member_at(&self, position: usize) -> Option<&TaggedValue> {
        self.members.get(position)
    }

    /// Rewrites a member in place. Used by the collector to forward pointers;
    /// forwarding never makes two distinct members equal.
    pub fn member_at_mut(&mut self, position: usize) -> Option<&mut TaggedValue> {
        self.members.get_mut(position)
    }
}

impl FromIterator<TaggedValue> for OrderedSet {
    fn from_iter<I: IntoIterator<Item = TaggedValue>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}
