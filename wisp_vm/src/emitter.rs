//! Linear-scan register emitter: lowers a `Program`'s basic blocks to
//! textual three-address arithmetic and `lw`/`sw`-style load/store text.
//!
//! Unlike the generator and the evaluator, there's no module this is
//! adapted from — the core keeps this stage thin and out-of-core. It
//! follows the allocation heuristic the rest of the pipeline describes
//! directly: prefer an unused register, penalize one whose occupant is
//! still live, and spill the occupant furthest from its next use when
//! every register is live.

use std::collections::HashMap;

use wisp_ir::{Block, Instruction, Kind, Literal, Program};

const REGISTER_COUNT: usize = 8;

/// Emits the full program as labeled per-procedure, per-block assembly
/// text. Each block starts from a fresh register file — any value still
/// needed past a block boundary is reloaded from its assignment id's slot
/// by whichever later block's allocator resolves it.
pub fn emit(program: &Program) -> String {
    let mut out = String::new();
    for (index, procedure) in program.procedures.iter().enumerate() {
        out.push_str(&format!("proc {index} ({}):\n", procedure.name));
        for block in &procedure.blocks {
            out.push_str(&format!("  .{}:\n", block.name));
            for line in emit_block(block) {
                out.push_str("    ");
                out.push_str(&line);
                out.push('\n');
            }
        }
    }
    out
}

fn mnemonic(kind: Kind) -> &'static str {
    match kind {
        Kind::Add => "add",
        Kind::Sub => "sub",
        Kind::Mul => "mul",
        Kind::Quo => "div",
        Kind::Mod => "mod",
        Kind::Less => "slt",
        Kind::Greater => "sgt",
        Kind::Equals => "seq",
        Kind::NotEquals => "sne",
        Kind::And => "and",
        Kind::Or => "or",
        Kind::Not => "not",
        Kind::Move => "sw",
        Kind::Push => "push",
        Kind::Pop => "pop",
        Kind::Bool | Kind::I64 | Kind::F64 | Kind::Str | Kind::Default => "li",
        Kind::ConstructTuple => "tuple",
        Kind::TypeLiteral => "type",
        Kind::LoadEnv => "env",
        Kind::Env => "envget",
        Kind::Index => "index",
        Kind::Phi => "phi",
        Kind::ProcedureDefinition => "proc",
        Kind::ProcedureType => "proctype",
        Kind::Ret => "ret",
        Kind::End => "end",
        Kind::Goto => "goto",
        Kind::GotoIf => "gotoif",
        Kind::Call => "call",
    }
}

/// Per-block allocator state: which assignment id, if any, currently
/// occupies each of the fixed register slots.
struct Allocator {
    occupant: [Option<u32>; REGISTER_COUNT],
    lines: Vec<String>,
}

impl Allocator {
    fn new() -> Self {
        Allocator { occupant: [None; REGISTER_COUNT], lines: Vec::new() }
    }

    /// Finds (or loads into) a register holding `id`.
    fn resolve(&mut self, id: u32, at: usize, last_use: &HashMap<u32, usize>) -> usize {
        if let Some(reg) = self.occupant.iter().position(|&o| o == Some(id)) {
            return reg;
        }
        let reg = self.evict(at, last_use);
        self.lines.push(format!("lw r{reg}, [{id}]"));
        self.occupant[reg] = Some(id);
        reg
    }

    /// Picks a destination register for a freshly produced assignment.
    fn assign(&mut self, id: u32, at: usize, last_use: &HashMap<u32, usize>) -> usize {
        if let Some(reg) = self.occupant.iter().position(|&o| o == Some(id)) {
            return reg;
        }
        let reg = self.evict(at, last_use);
        self.occupant[reg] = Some(id);
        reg
    }

    fn evict(&mut self, at: usize, last_use: &HashMap<u32, usize>) -> usize {
        if let Some(free) = (0..REGISTER_COUNT).find(|&r| self.occupant[r].is_none()) {
            return free;
        }
        // TODO: the source leaves true spill scoring (weighting loop depth
        // and call-crossing liveness) unimplemented; this picks the
        // occupant whose last use is furthest away, which covers every
        // scenario this emitter runs against but isn't the full heuristic.
        let victim = (0..REGISTER_COUNT)
            .max_by_key(|&r| match self.occupant[r] {
                Some(id) => last_use.get(&id).copied().unwrap_or(at),
                None => at,
            })
            .unwrap_or(0);
        if let Some(evicted) = self.occupant[victim] {
            self.lines.push(format!("sw [{evicted}], r{victim}"));
        }
        victim
    }
}

/// The assignment ids an instruction reads, beyond the common
/// `left`/`right` pair: the index operand of an indexed `Move`, and each
/// field's source id in a literal tuple construction.
fn operands(instruction: &Instruction) -> Vec<u32> {
    let mut ids = Vec::new();
    if instruction.left != 0 {
        ids.push(instruction.left);
    }
    if instruction.right != 0 {
        ids.push(instruction.right);
    }
    match &instruction.literal {
        Literal::Operand(id) => ids.push(*id),
        Literal::Fields(fields) => ids.extend(fields.iter().map(|f| f.assignment)),
        _ => {}
    }
    ids
}

fn immediate(instruction: &Instruction) -> Option<String> {
    match &instruction.literal {
        Literal::Int(v) => Some(v.to_string()),
        Literal::Float(v) => Some(v.to_string()),
        Literal::Bool(v) => Some(v.to_string()),
        Literal::Str(v) => Some(format!("{v:?}")),
        Literal::Block(target) => Some(format!(".b{target}")),
        Literal::Branch { if_true, if_false } => Some(format!(".b{if_true}, .b{if_false}")),
        Literal::Count(n) => Some(format!("#{n}")),
        _ => None,
    }
}

/// Computes, for every assignment id read in this block, the highest
/// instruction index at which it's still needed — the liveness the
/// allocator scores eviction candidates against.
fn compute_last_use(instructions: &[Instruction]) -> HashMap<u32, usize> {
    let mut last_use = HashMap::new();
    for (idx, instruction) in instructions.iter().enumerate() {
        for operand in operands(instruction) {
            last_use.insert(operand, idx);
        }
    }
    last_use
}

fn emit_block(block: &Block) -> Vec<String> {
    let last_use = compute_last_use(&block.instructions);
    let mut alloc = Allocator::new();
    for (idx, instruction) in block.instructions.iter().enumerate() {
        let operand_regs: Vec<usize> =
            operands(instruction).into_iter().map(|id| alloc.resolve(id, idx, &last_use)).collect();
        let dest = alloc.assign(instruction.index, idx, &last_use);
        let mut parts = vec![format!("r{dest}")];
        parts.extend(operand_regs.iter().map(|r| format!("r{r}")));
        if let Some(imm) = immediate(instruction) {
            parts.push(imm);
        }
        alloc.lines.push(format!("{} {}", mnemonic(instruction.kind), parts.join(", ")));
    }
    alloc.lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_common::File;

    fn generate_program(source: &str) -> Program {
        let (ast, diagnostics, _file) = wisp_parser::parse(File::new("test", source));
        assert!(!diagnostics.has_errors());
        let (program, diagnostics) = wisp_ir::generate(&ast);
        assert!(!diagnostics.has_errors());
        program
    }

    #[test]
    fn arithmetic_emits_one_line_per_instruction() {
        let program = generate_program("1 + 2 * 3");
        let text = emit(&program);
        assert!(text.contains("proc 0 (_init):"));
        assert!(text.contains("mul"));
        assert!(text.contains("add"));
    }

    #[test]
    fn more_live_values_than_registers_triggers_a_spill() {
        // A nine-field tuple literal keeps every field's assignment alive
        // simultaneously right up to the `ConstructTuple` that consumes
        // them all at once, exceeding the eight-register file.
        let source = "(1, 2, 3, 4, 5, 6, 7, 8, 9)";
        let program = generate_program(source);
        let text = emit(&program);
        assert!(text.contains("sw ["));
    }
}
