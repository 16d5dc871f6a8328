use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::instruction::{Instruction, Kind};

/// A straight-line run of instructions with one entry and at most one
/// non-fallthrough exit. Predecessors accumulate as the generator wires up
/// control flow; `sealed` becomes true once that predecessor set is final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub index: usize,
    pub name: String,
    pub instructions: Vec<Instruction>,
    pub assignment_offsets: HashMap<u32, usize>,
    pub symbols: HashMap<String, u32>,
    pub predecessors: Vec<usize>,
    pub sealed: bool,
    pub incomplete_phis: Vec<u32>,
}

impl Block {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Block {
            index,
            name: name.into(),
            instructions: Vec::new(),
            assignment_offsets: HashMap::new(),
            symbols: HashMap::new(),
            predecessors: Vec::new(),
            sealed: false,
            incomplete_phis: Vec::new(),
        }
    }

    /// Appends an instruction, recording where its assignment id lives so
    /// later lookups (phi resolution, the register emitter) don't need a
    /// linear scan.
    pub fn push(&mut self, instruction: Instruction) -> u32 {
        let id = instruction.index;
        self.assignment_offsets.insert(id, self.instructions.len());
        self.instructions.push(instruction);
        id
    }

    pub fn instruction(&self, id: u32) -> Option<&Instruction> {
        self.assignment_offsets.get(&id).map(|&off| &self.instructions[off])
    }

    pub fn instruction_mut(&mut self, id: u32) -> Option<&mut Instruction> {
        self.assignment_offsets
            .get(&id)
            .copied()
            .map(move |off| &mut self.instructions[off])
    }

    pub fn last_index(&self) -> Option<usize> {
        if self.instructions.is_empty() {
            None
        } else {
            Some(self.instructions.len() - 1)
        }
    }

    pub fn has_terminator(&self) -> bool {
        self.instructions.last().is_some_and(Instruction::is_terminator)
    }

    /// Stable-partitions instructions so every `Phi` precedes every
    /// non-`Phi`, satisfying the phi-placement invariant before the
    /// post-pass linearizes assignment ids. Rebuilds the offset map since
    /// positions shift.
    pub fn move_phis_first(&mut self) {
        let (phis, rest): (Vec<_>, Vec<_>) =
            self.instructions.drain(..).partition(|i| i.kind == Kind::Phi);
        self.instructions = phis.into_iter().chain(rest).collect();
        self.assignment_offsets.clear();
        for (offset, instruction) in self.instructions.iter().enumerate() {
            self.assignment_offsets.insert(instruction.index, offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::ValueType;

    #[test]
    fn move_phis_first_keeps_relative_order_within_each_group() {
        let mut block = Block::new(0, "b");
        block.push(Instruction::new(Kind::Add, ValueType::I64, 1));
        block.push(Instruction::new(Kind::Phi, ValueType::I64, 2));
        block.push(Instruction::new(Kind::Sub, ValueType::I64, 3));
        block.push(Instruction::new(Kind::Phi, ValueType::I64, 4));
        block.move_phis_first();
        let kinds: Vec<_> = block.instructions.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![Kind::Phi, Kind::Phi, Kind::Add, Kind::Sub]);
        assert_eq!(block.instruction(4).unwrap().index, 4);
    }
}
