use std::fmt;

use crate::{
    error::EmberError,
    output_manager::OutputSink,
    runtime::{CellKey, CellPayload, CellShape, Collector},
    value::{Address, TaggedValue},
};

pub type NativeResult = Result<Option<TaggedValue>, EmberError>;
pub type NativeFn = fn(Option<TaggedValue>, Vec<TaggedValue>, &mut NativeContext) -> NativeResult;

/// What a native can reach while it runs.
pub struct NativeContext<'a> {
    pub gc: &'a mut Collector,
    /// The VM stack, with the receiver and arguments already popped.
    pub stack: &'a mut Vec<TaggedValue>,
    pub output: &'a OutputSink,
}

impl NativeContext<'_> {
    /// Allocate with the VM stack and `locals` as roots.
    pub fn alloc(
        &mut self,
        payload: CellPayload,
        locals: &mut [TaggedValue],
    ) -> Result<Address, EmberError> {
        self.gc.alloc(payload, &mut (&mut *self.stack, locals))
    }

    /// Text form of a value. Cells print their contents one level deep.
    pub fn render(&mut self, value: &TaggedValue) -> Result<String, EmberError> {
        match value {
            TaggedValue::Pointer(Some(address)) => {
                Ok(self.gc.cell(*address)?.payload.to_string())
            }
            other => Ok(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub has_return_value: bool,
    pub expects_receiver: bool,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("has_return_value", &self.has_return_value)
            .field("expects_receiver", &self.expects_receiver)
            .finish()
    }
}

/// Host functions in call-index order.
#[derive(Debug, Clone, Default)]
pub struct NativeTable {
    functions: Vec<NativeFunction>,
}

impl NativeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register("push", 1, false, true, native_push);
        table.register("pop", 0, true, true, native_pop);
        table.register("insert", 2, false, true, native_insert);
        table.register("remove", 1, true, true, native_remove);
        table.register("len", 0, true, true, native_len);
        table.register("keys", 0, true, true, native_keys);
        table.register("delete", 1, true, true, native_delete);
        table.register("add", 1, true, true, native_add);
        table.register("has", 1, true, true, native_has);
        table.register("print", 1, false, false, native_print);
        table.register("str", 1, true, false, native_str);
        table
    }

    /// Append a native and return its call index.
    pub fn register(
        &mut self,
        name: &'static str,
        arity: usize,
        has_return_value: bool,
        expects_receiver: bool,
        func: NativeFn,
    ) -> usize {
        self.functions.push(NativeFunction {
            name,
            arity,
            has_return_value,
            expects_receiver,
            func,
        });
        self.functions.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&NativeFunction> {
        self.functions.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NativeFunction> {
        self.functions.iter()
    }
}

// Argument helpers

fn receiver_address(name: &str, receiver: Option<TaggedValue>) -> Result<Address, EmberError> {
    match receiver {
        Some(TaggedValue::Pointer(Some(address))) => Ok(address),
        Some(other) => Err(EmberError::invalid_operands(format!(
            "{} expects a heap cell receiver, got {}",
            name,
            other.type_tag()
        ))),
        None => Err(EmberError::invalid_operands(format!("{} expects a receiver", name))),
    }
}

fn take_arg(name: &str, args: &mut std::vec::IntoIter<TaggedValue>) -> Result<TaggedValue, EmberError> {
    args.next().ok_or_else(|| EmberError::stack_underflow(name))
}

fn index_arg(name: &str, value: &TaggedValue) -> Result<usize, EmberError> {
    match value {
        TaggedValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
        other => Err(EmberError::invalid_operands(format!(
            "{} expects a non-negative integer index, got {}",
            name, other
        ))),
    }
}

fn key_arg(name: &str, value: TaggedValue) -> Result<String, EmberError> {
    match value {
        TaggedValue::Str(key) => Ok(key),
        other => Err(EmberError::invalid_operands(format!(
            "{} expects a string key, got {}",
            name,
            other.type_tag()
        ))),
    }
}

// List natives

pub fn native_push(receiver: Option<TaggedValue>, args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let list = receiver_address("push", receiver)?;
    let mut args = args.into_iter();
    let value = take_arg("push", &mut args)?;
    let len = ctx.gc.len(list)?;
    ctx.gc.insert(list, vec![value], len)?;
    Ok(None)
}

pub fn native_pop(receiver: Option<TaggedValue>, _args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let list = receiver_address("pop", receiver)?;
    let len = ctx.gc.len(list)?;
    if len == 0 {
        ctx.gc.cell(list)?.payload.as_list()?;
        return Err(EmberError::index_out_of_range(0, 0));
    }
    Ok(ctx.gc.take(list, len - 1, 1)?.pop())
}

pub fn native_insert(receiver: Option<TaggedValue>, args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let list = receiver_address("insert", receiver)?;
    let mut args = args.into_iter();
    let index = index_arg("insert", &take_arg("insert", &mut args)?)?;
    let value = take_arg("insert", &mut args)?;
    ctx.gc.insert(list, vec![value], index)?;
    Ok(None)
}

pub fn native_remove(receiver: Option<TaggedValue>, args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let list = receiver_address("remove", receiver)?;
    let mut args = args.into_iter();
    let index = index_arg("remove", &take_arg("remove", &mut args)?)?;
    let mut removed = ctx.gc.take(list, index, 1)?;
    match removed.pop() {
        Some(value) => Ok(Some(value)),
        None => Err(EmberError::index_out_of_range(index, 0)),
    }
}

pub fn native_len(receiver: Option<TaggedValue>, _args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let len = match receiver {
        Some(TaggedValue::Str(s)) => s.chars().count(),
        other => {
            let cell = receiver_address("len", other)?;
            ctx.gc.len(cell)?
        }
    };
    Ok(Some(TaggedValue::Number(len as f64)))
}

// Map natives

pub fn native_keys(receiver: Option<TaggedValue>, _args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let map = receiver_address("keys", receiver)?;
    let shape = ctx.gc.shape(map)?;
    if shape != CellShape::Map {
        return Err(EmberError::shape_mismatch(CellShape::Map, shape));
    }
    let names = ctx
        .gc
        .keys(map)?
        .into_iter()
        .filter_map(|key| match key {
            CellKey::Name(name) => Some(TaggedValue::Str(name)),
            _ => None,
        })
        .collect();
    let address = ctx.alloc(CellPayload::List(names), &mut [])?;
    Ok(Some(TaggedValue::pointer(address)))
}

pub fn native_delete(receiver: Option<TaggedValue>, args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let map = receiver_address("delete", receiver)?;
    let mut args = args.into_iter();
    let key = key_arg("delete", take_arg("delete", &mut args)?)?;
    Ok(Some(TaggedValue::Bool(ctx.gc.delete(map, &key)?)))
}

// Set natives

pub fn native_add(receiver: Option<TaggedValue>, args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let set = receiver_address("add", receiver)?;
    let mut args = args.into_iter();
    let value = take_arg("add", &mut args)?;
    Ok(Some(TaggedValue::Bool(ctx.gc.add_member(set, value)?)))
}

pub fn native_has(receiver: Option<TaggedValue>, args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let cell = receiver_address("has", receiver)?;
    let mut args = args.into_iter();
    let key = take_arg("has", &mut args)?;
    let found = match ctx.gc.shape(cell)? {
        CellShape::Set => ctx.gc.has_member(cell, key)?,
        CellShape::Map => {
            let key = key_arg("has", key)?;
            ctx.gc.get_field(cell, &key)?.is_some()
        }
        CellShape::List => return Err(EmberError::shape_mismatch(CellShape::Set, CellShape::List)),
    };
    Ok(Some(TaggedValue::Bool(found)))
}

// Output

pub fn native_print(_receiver: Option<TaggedValue>, args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let mut args = args.into_iter();
    let value = take_arg("print", &mut args)?;
    let line = ctx.render(&value)?;
    log::info!("{}", line);
    ctx.output.write_line(line);
    Ok(None)
}

pub fn native_str(_receiver: Option<TaggedValue>, args: Vec<TaggedValue>, ctx: &mut NativeContext) -> NativeResult {
    let mut args = args.into_iter();
    let value = take_arg("str", &mut args)?;
    Ok(Some(TaggedValue::Str(ctx.render(&value)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::GcConfig, error::EmberErrorType};

    struct Harness {
        gc: Collector,
        stack: Vec<TaggedValue>,
        output: OutputSink,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                gc: Collector::new(GcConfig::with_heap_size(64)),
                stack: Vec::new(),
                output: OutputSink::new(),
            }
        }

        fn call(&mut self, name: &str, receiver: Option<TaggedValue>, args: Vec<TaggedValue>) -> NativeResult {
            let table = NativeTable::standard();
            let native = table.get(table.index_of(name).unwrap()).unwrap().clone();
            let mut ctx = NativeContext {
                gc: &mut self.gc,
                stack: &mut self.stack,
                output: &self.output,
            };
            (native.func)(receiver, args, &mut ctx)
        }

        fn list(&mut self, values: &[f64]) -> TaggedValue {
            let payload = CellPayload::List(values.iter().map(|n| TaggedValue::number(*n)).collect());
            let address = self.gc.alloc(payload, &mut self.stack).unwrap();
            TaggedValue::pointer(address)
        }
    }

    #[test]
    fn standard_table_order_is_fixed() {
        let table = NativeTable::standard();
        let names: Vec<_> = table.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec!["push", "pop", "insert", "remove", "len", "keys", "delete", "add", "has", "print", "str"]
        );
        assert!(!table.get(9).unwrap().expects_receiver);
        assert!(table.get(1).unwrap().has_return_value);
    }

    #[test]
    fn push_then_pop() {
        let mut h = Harness::new();
        let list = h.list(&[1.0]);
        h.call("push", Some(list.clone()), vec![TaggedValue::number(2.0)]).unwrap();
        let len = h.call("len", Some(list.clone()), vec![]).unwrap();
        assert_eq!(len, Some(TaggedValue::number(2.0)));
        let popped = h.call("pop", Some(list.clone()), vec![]).unwrap();
        assert_eq!(popped, Some(TaggedValue::number(2.0)));
    }

    #[test]
    fn pop_on_empty_list_fails() {
        let mut h = Harness::new();
        let list = h.list(&[]);
        let err = h.call("pop", Some(list), vec![]).unwrap_err();
        assert_eq!(err.error_type, EmberErrorType::IndexOutOfRange { index: 0, len: 0 });
    }

    #[test]
    fn insert_and_remove_by_index() {
        let mut h = Harness::new();
        let list = h.list(&[1.0, 3.0]);
        h.call("insert", Some(list.clone()), vec![TaggedValue::number(1.0), TaggedValue::number(2.0)])
            .unwrap();
        let removed = h.call("remove", Some(list.clone()), vec![TaggedValue::number(0.0)]).unwrap();
        assert_eq!(removed, Some(TaggedValue::number(1.0)));
        assert_eq!(h.call("str", None, vec![list]).unwrap(), Some(TaggedValue::string("[2, 3]")));
    }

    #[test]
    fn keys_allocates_a_new_list() {
        let mut h = Harness::new();
        let mut map = crate::collections::OrderedMap::new();
        map.insert("b", TaggedValue::number(1.0));
        map.insert("a", TaggedValue::number(2.0));
        let address = h.gc.alloc(CellPayload::Map(map), &mut h.stack).unwrap();
        h.stack.push(TaggedValue::pointer(address));

        let keys = h.call("keys", Some(TaggedValue::pointer(address)), vec![]).unwrap().unwrap();
        assert_eq!(h.call("str", None, vec![keys]).unwrap(), Some(TaggedValue::string("[b, a]")));
        let deleted = h
            .call("delete", Some(TaggedValue::pointer(address)), vec![TaggedValue::string("a")])
            .unwrap();
        assert_eq!(deleted, Some(TaggedValue::boolean(true)));
    }

    #[test]
    fn receiver_must_be_a_cell() {
        let mut h = Harness::new();
        let err = h.call("push", Some(TaggedValue::number(1.0)), vec![TaggedValue::number(2.0)]).unwrap_err();
        assert_eq!(err.error_type, EmberErrorType::InvalidOperands);
        assert_eq!(
            h.call("len", Some(TaggedValue::string("héllo")), vec![]).unwrap(),
            Some(TaggedValue::number(5.0))
        );
    }

    #[test]
    fn print_writes_to_the_sink() {
        let mut h = Harness::new();
        h.call("print", None, vec![TaggedValue::number(18.0)]).unwrap();
        assert_eq!(h.output.lines(), vec!["18".to_string()]);
    }
}
