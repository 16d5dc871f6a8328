//! Host-provided procedures: `Kind::LoadEnv` resolves `print`/`debug`/
//! `make`/`import` to a [`Value::BuiltinFunction`] rather than generated
//! IR, and `Kind::Call` dispatches here instead of invoking a procedure.

use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::{VmError, VmResult};
use crate::value::{TypeKind, Value};

/// `make` is the only builtin a testable scenario exercises end to end —
/// allocating a fixed-length array. `print`/`debug` write to the log since
/// there's no host I/O surface in scope; `import` is a no-op stub.
pub fn call(name: &str, args: Vec<Value>) -> VmResult<Value> {
    match name {
        "print" => {
            for arg in &args {
                log::info!("{}", display(arg));
            }
            Ok(Value::Default)
        }
        "debug" => {
            for arg in &args {
                log::debug!("{arg:?}");
            }
            Ok(Value::Default)
        }
        "make" => make(args),
        "import" => Ok(Value::Default),
        other => Err(VmError::UnknownBuiltin { name: other.to_string() }),
    }
}

/// `.make <type> <count>` allocates `count` elements of `Value::Default`.
/// The element type only affects the array's `Value::Type` tag; nothing
/// here enforces it against what's later stored.
fn make(mut args: Vec<Value>) -> VmResult<Value> {
    if args.len() != 2 {
        return Err(VmError::NotCallable { value: format!("make/{}", args.len()) });
    }
    let count = args.pop().expect("checked len == 2");
    let _ty = args.pop().expect("checked len == 2");
    let len = match count {
        Value::I64(n) if n >= 0 => n as usize,
        Value::I64(n) => return Err(VmError::IndexOutOfBounds { index: n, len: 0 }),
        _ => 0,
    };
    Ok(Value::Array(Rc::new(RefCell::new(vec![Value::Default; len]))))
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Default => "default".to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Str(v) => v.clone(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.borrow().iter().map(display).collect();
            format!("[{}]", rendered.join(", "))
        }
        other => format!("<{}>", other.type_name()),
    }
}

/// Primitive type/factory handles, keyed by the name `Kind::TypeLiteral`
/// carries. Shared between the evaluator (to resolve a `TypeLiteral`
/// instruction) and anything inspecting a type name produced from one.
pub fn type_literal(name: &str) -> Value {
    match name {
        "i32" => type_value(name, TypeKind::I32),
        "i64" => type_value(name, TypeKind::I64),
        "bool" => type_value(name, TypeKind::Bool),
        "f64" => type_value(name, TypeKind::F64),
        "str" => type_value(name, TypeKind::Str),
        "any" => type_value(name, TypeKind::Any),
        "array" => Value::Factory { name: name.to_string(), product: TypeKind::Array },
        "slice" => Value::Factory { name: name.to_string(), product: TypeKind::Slice },
        _ => Value::Null,
    }
}

fn type_value(name: &str, kind: TypeKind) -> Value {
    Value::Type { name: name.to_string(), kind, element: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_allocates_default_filled_array() {
        let result = make(vec![type_literal("i64"), Value::I64(3)]).unwrap();
        let Value::Array(items) = result else { panic!("expected an array") };
        assert_eq!(items.borrow().len(), 3);
        assert!(matches!(items.borrow()[0], Value::Default));
    }

    #[test]
    fn array_and_slice_resolve_to_factories() {
        assert!(matches!(type_literal("array"), Value::Factory { product: TypeKind::Array, .. }));
        assert!(matches!(type_literal("slice"), Value::Factory { product: TypeKind::Slice, .. }));
    }
}
