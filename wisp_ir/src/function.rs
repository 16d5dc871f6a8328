use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::block::Block;

/// A procedure: an ordered list of basic blocks. Blocks are appended in
/// generation order and never reordered after the post-pass, so block index
/// doubles as insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub blocks: Vec<Block>,
}

impl Procedure {
    pub fn new(name: impl Into<String>) -> Self {
        Procedure {
            name: name.into(),
            blocks: Vec::new(),
        }
    }

    pub fn push_block(&mut self, name: impl Into<String>) -> usize {
        let index = self.blocks.len();
        self.blocks.push(Block::new(index, name));
        index
    }
}

/// An ordered list of procedures, indexed by both insertion order and name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub procedures: Vec<Procedure>,
    by_name: IndexMap<String, usize>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_procedure(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        let index = self.procedures.len();
        self.by_name.insert(name.clone(), index);
        self.procedures.push(Procedure::new(name));
        index
    }

    pub fn procedure_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn procedure(&self, index: usize) -> &Procedure {
        &self.procedures[index]
    }

    pub fn procedure_mut(&mut self, index: usize) -> &mut Procedure {
        &mut self.procedures[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedures_are_addressable_by_name_and_index() {
        let mut program = Program::new();
        let idx = program.push_procedure("_init");
        assert_eq!(program.procedure_index("_init"), Some(idx));
        assert_eq!(program.procedure(idx).name, "_init");
    }
}
