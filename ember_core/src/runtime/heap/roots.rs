use crate::{
    error::EmberError,
    runtime::{CellData, CellPayload},
    value::TaggedValue,
};

pub type RootVisitor<'a> = dyn FnMut(&mut TaggedValue) -> Result<(), EmberError> + 'a;

/// Values the mutator holds directly. The collector rewrites every pointer it
/// visits with the pointee's current address.
pub trait RootSet {
    fn visit_roots(&mut self, visitor: &mut RootVisitor<'_>) -> Result<(), EmberError>;
}

impl RootSet for [TaggedValue] {
    fn visit_roots(&mut self, visitor: &mut RootVisitor<'_>) -> Result<(), EmberError> {
        for value in self.iter_mut() {
            visitor(value)?;
        }
        Ok(())
    }
}

impl<const N: usize> RootSet for [TaggedValue; N] {
    fn visit_roots(&mut self, visitor: &mut RootVisitor<'_>) -> Result<(), EmberError> {
        self.as_mut_slice().visit_roots(visitor)
    }
}

impl RootSet for Vec<TaggedValue> {
    fn visit_roots(&mut self, visitor: &mut RootVisitor<'_>) -> Result<(), EmberError> {
        self.as_mut_slice().visit_roots(visitor)
    }
}

// A payload that is about to be allocated is rooted until it lands in to-space.
impl RootSet for CellPayload {
    fn visit_roots(&mut self, visitor: &mut RootVisitor<'_>) -> Result<(), EmberError> {
        for position in 0..self.len() {
            let mut value = match self.get(position) {
                Some(value) if value.is_pointer() => value.clone(),
                _ => continue,
            };
            visitor(&mut value)?;
            self.update(position, value)?;
        }
        Ok(())
    }
}

impl<A: RootSet + ?Sized, B: RootSet + ?Sized> RootSet for (&mut A, &mut B) {
    fn visit_roots(&mut self, visitor: &mut RootVisitor<'_>) -> Result<(), EmberError> {
        self.0.visit_roots(visitor)?;
        self.1.visit_roots(visitor)
    }
}

/// Root set with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoots;

impl RootSet for NoRoots {
    fn visit_roots(&mut self, _visitor: &mut RootVisitor<'_>) -> Result<(), EmberError> {
        Ok(())
    }
}
