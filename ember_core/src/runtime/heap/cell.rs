use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{
    collections::{OrderedMap, OrderedSet},
    error::EmberError,
    value::{Address, TaggedValue},
};

/// Shape a cell is allocated with. Fixed for the life of the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellShape {
    List,
    Map,
    Set,
}

impl Display for CellShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellShape::List => write!(f, "list"),
            CellShape::Map => write!(f, "map"),
            CellShape::Set => write!(f, "set"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellKey {
    Index(usize),
    Name(String),
    Member(TaggedValue),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellPayload {
    List(Vec<TaggedValue>),
    Map(OrderedMap),
    Set(OrderedSet),
}

/// Uniform positional view over a cell's values. The collector only ever
/// talks to cells through this trait.
pub trait CellData {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, position: usize) -> Option<&TaggedValue>;

    fn update(&mut self, position: usize, value: TaggedValue) -> Result<(), EmberError>;

    fn keys(&self) -> Vec<CellKey>;
}

impl CellData for CellPayload {
    fn len(&self) -> usize {
        match self {
            CellPayload::List(items) => items.len(),
            CellPayload::Map(map) => map.len(),
            CellPayload::Set(set) => set.len(),
        }
    }

    fn get(&self, position: usize) -> Option<&TaggedValue> {
        match self {
            CellPayload::List(items) => items.get(position),
            CellPayload::Map(map) => map.value_at(position),
            CellPayload::Set(set) => set.member_at(position),
        }
    }

    fn update(&mut self, position: usize, value: TaggedValue) -> Result<(), EmberError> {
        let len = self.len();
        let slot = match self {
            CellPayload::List(items) => items.get_mut(position),
            CellPayload::Map(map) => map.value_at_mut(position),
            CellPayload::Set(set) => set.member_at_mut(position),
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EmberError::index_out_of_range(position, len)),
        }
    }

    fn keys(&self) -> Vec<CellKey> {
        match self {
            CellPayload::List(items) => (0..items.len()).map(CellKey::Index).collect(),
            CellPayload::Map(map) => map.keys().cloned().map(CellKey::Name).collect(),
            CellPayload::Set(set) => set.iter().cloned().map(CellKey::Member).collect(),
        }
    }
}

impl CellPayload {
    pub fn shape(&self) -> CellShape {
        match self {
            CellPayload::List(_) => CellShape::List,
            CellPayload::Map(_) => CellShape::Map,
            CellPayload::Set(_) => CellShape::Set,
        }
    }

    /// Empty payload of the same shape, left behind in an evacuated cell.
    pub fn empty_like(&self) -> Self {
        match self {
            CellPayload::List(_) => CellPayload::List(Vec::new()),
            CellPayload::Map(_) => CellPayload::Map(OrderedMap::new()),
            CellPayload::Set(_) => CellPayload::Set(OrderedSet::new()),
        }
    }

    // Shape-checked accessors

    pub fn as_list(&self) -> Result<&Vec<TaggedValue>, EmberError> {
        match self {
            CellPayload::List(items) => Ok(items),
            other => Err(EmberError::shape_mismatch(CellShape::List, other.shape())),
        }
    }

    pub fn as_list_mut(&mut self) -> Result<&mut Vec<TaggedValue>, EmberError> {
        match self {
            CellPayload::List(items) => Ok(items),
            other => Err(EmberError::shape_mismatch(CellShape::List, other.shape())),
        }
    }

    pub fn as_map(&self) -> Result<&OrderedMap, EmberError> {
        match self {
            CellPayload::Map(map) => Ok(map),
            other => Err(EmberError::shape_mismatch(CellShape::Map, other.shape())),
        }
    }

    pub fn as_map_mut(&mut self) -> Result<&mut OrderedMap, EmberError> {
        match self {
            CellPayload::Map(map) => Ok(map),
            other => Err(EmberError::shape_mismatch(CellShape::Map, other.shape())),
        }
    }

    pub fn as_set(&self) -> Result<&OrderedSet, EmberError> {
        match self {
            CellPayload::Set(set) => Ok(set),
            other => Err(EmberError::shape_mismatch(CellShape::Set, other.shape())),
        }
    }

    pub fn as_set_mut(&mut self) -> Result<&mut OrderedSet, EmberError> {
        match self {
            CellPayload::Set(set) => Ok(set),
            other => Err(EmberError::shape_mismatch(CellShape::Set, other.shape())),
        }
    }
}

impl Display for CellPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellPayload::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            CellPayload::Map(map) => write!(f, "{}", map),
            CellPayload::Set(set) => write!(f, "{}", set),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeapCell {
    pub payload: CellPayload,
    /// Set once the cell has been evacuated; never cleared afterwards.
    pub forward_address: Option<Address>,
}

impl HeapCell {
    pub fn new(payload: CellPayload) -> Self {
        Self {
            payload,
            forward_address: None,
        }
    }

    pub fn shape(&self) -> CellShape {
        self.payload.shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(values: &[f64]) -> Vec<TaggedValue> {
        values.iter().map(|n| TaggedValue::number(*n)).collect()
    }

    #[test]
    fn positional_view_is_uniform_across_shapes() {
        let list = CellPayload::List(numbers(&[1.0, 2.0]));
        let map = CellPayload::Map(OrderedMap::from_pairs(vec![
            ("a".to_string(), TaggedValue::number(1.0)),
            ("b".to_string(), TaggedValue::number(2.0)),
        ]));
        let set = CellPayload::Set(numbers(&[1.0, 2.0]).into_iter().collect());

        for payload in [list, map, set] {
            assert_eq!(payload.len(), 2);
            assert_eq!(payload.get(1), Some(&TaggedValue::number(2.0)));
            assert_eq!(payload.get(2), None);
        }
    }

    #[test]
    fn update_rewrites_map_values_not_keys() {
        let mut map = CellPayload::Map(OrderedMap::from_pairs(vec![(
            "k".to_string(),
            TaggedValue::number(1.0),
        )]));
        map.update(0, TaggedValue::boolean(true)).unwrap();
        assert_eq!(map.keys(), vec![CellKey::Name("k".to_string())]);
        assert_eq!(map.as_map().unwrap().get("k"), Some(&TaggedValue::boolean(true)));
        assert!(map.update(1, TaggedValue::null()).is_err());
    }

    #[test]
    fn accessors_reject_other_shapes() {
        let mut list = CellPayload::List(Vec::new());
        let err = list.as_map_mut().unwrap_err();
        assert_eq!(
            err.error_type,
            crate::error::EmberErrorType::ShapeMismatch {
                expected: CellShape::Map,
                found: CellShape::List
            }
        );
        assert!(list.as_set().is_err());
        assert!(list.as_list().is_ok());
    }

    #[test]
    fn empty_like_keeps_shape() {
        let set = CellPayload::Set(numbers(&[4.0]).into_iter().collect());
        let hollow = set.empty_like();
        assert_eq!(hollow.shape(), CellShape::Set);
        assert!(hollow.is_empty());
    }
}
