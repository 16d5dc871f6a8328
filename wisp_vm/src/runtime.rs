//! Call-frame storage: one per procedure invocation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// The values produced during one procedure invocation, indexed by
/// assignment id, plus a link to the lexical scope the invoked procedure
/// was defined in.
///
/// `parent` is `None` for the top-level `_init` run and `Some` for
/// anything invoked through a `Value::Procedure`, whose `closure` carries
/// the frame active at the point its `ProcedureDefinition` instruction
/// executed. A read that misses locally falls back to the parent chain —
/// this is how a nested procedure resolves a name it never itself
/// assigns, a self-call among them.
#[derive(Debug)]
pub struct Frame {
    parent: Option<Rc<Frame>>,
    values: RefCell<HashMap<u32, Value>>,
}

impl Frame {
    pub fn new(parent: Option<Rc<Frame>>) -> Self {
        Frame { parent, values: RefCell::new(HashMap::new()) }
    }

    pub fn get(&self, id: u32) -> Value {
        if let Some(value) = self.values.borrow().get(&id) {
            return value.clone();
        }
        match &self.parent {
            Some(parent) => parent.get(id),
            None => Value::Null,
        }
    }

    pub fn set(&self, id: u32, value: Value) {
        self.values.borrow_mut().insert(id, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_miss_falls_back_to_the_parent_chain() {
        let root = Rc::new(Frame::new(None));
        root.set(7, Value::I64(42));
        let child = Frame::new(Some(root.clone()));
        assert!(matches!(child.get(7), Value::I64(42)));
        assert!(matches!(child.get(8), Value::Null));
    }

    #[test]
    fn a_local_binding_shadows_the_parent() {
        let root = Rc::new(Frame::new(None));
        root.set(1, Value::I64(1));
        let child = Frame::new(Some(root));
        child.set(1, Value::I64(2));
        assert!(matches!(child.get(1), Value::I64(2)));
    }
}
