use std::collections::HashMap;

use log::trace;

use wisp_common::{Diagnostic, Diagnostics, Pos};
use wisp_lexer::TokenKind;
use wisp_parser::Node;

use crate::error::GenError;
use crate::function::Program;
use crate::instruction::{Instruction, Kind, Literal, PhiEntry, TupleField, ValueType};

/// Primitive type names and the two generic container factories: resolved
/// to a `TypeLiteral` instruction rather than a block-local binding, so the
/// virtual machine can hand back its `Value::Type`/`Value::Factory` handle
/// for them regardless of whether anything in scope happens to shadow them.
const TYPE_NAMES: &[&str] = &["i32", "i64", "bool", "f64", "str", "any", "array", "slice"];

/// Host-provided procedures, resolved to a `LoadEnv` read from the virtual
/// machine's environment table rather than generated IR.
const BUILTIN_NAMES: &[&str] = &["print", "debug", "make", "import"];

/// Lowers an abstract syntax tree into a [`Program`] of basic-block control
/// flow graphs in static single assignment form: one graph for the
/// top-level `_init` procedure plus one per nested procedure definition.
/// Construction follows the incomplete-phi approach — a symbol read in an
/// unsealed block (a loop header whose back edge hasn't been lowered yet)
/// gets a placeholder phi that is resolved once the block seals.
pub struct Generator {
    program: Program,
    counter: u32,
    diagnostics: Diagnostics,
    /// The `(proc, block)` a nested procedure definition is lexically
    /// enclosed by, innermost last. A name unresolved in a procedure's own
    /// entry block (no local binding, no predecessors to chain phis through)
    /// falls back to the enclosing scope instead of erroring immediately —
    /// this is how a procedure can call itself by name, or read a binding
    /// from the scope it was defined in.
    scope_stack: Vec<(usize, usize)>,
}

/// Lowers `ast` (expected to be a [`Node::Program`]) into its SSA-form
/// [`Program`], together with any diagnostics generation produced.
/// Generation never aborts: an undefined symbol or a node shape outside
/// this generator's coverage still produces a `Default` value so the rest
/// of the tree keeps lowering.
pub fn generate(ast: &Node) -> (Program, Diagnostics) {
    let mut generator = Generator::new();
    generator.run(ast);
    (generator.program, generator.diagnostics)
}

impl Generator {
    fn new() -> Self {
        Generator {
            program: Program::new(),
            counter: 1,
            diagnostics: Diagnostics::new(),
            scope_stack: Vec::new(),
        }
    }

    fn report(&mut self, error: GenError) {
        let (pos, end) = error.span();
        self.diagnostics.push(Diagnostic::generator(error.to_string(), pos, end));
    }

    fn next_id(&mut self) -> u32 {
        let id = self.counter;
        self.counter += 1;
        id
    }

    fn fresh(&mut self, kind: Kind, ty: ValueType) -> Instruction {
        let id = self.next_id();
        Instruction::new(kind, ty, id)
    }

    fn emit(&mut self, proc: usize, block: usize, instruction: Instruction) -> u32 {
        let id = instruction.index;
        self.program.procedure_mut(proc).blocks[block].push(instruction);
        id
    }

    fn new_block(&mut self, proc: usize, name: &str, predecessors: Vec<usize>, sealed: bool) -> usize {
        let index = self.program.procedure_mut(proc).push_block(name);
        let block = &mut self.program.procedure_mut(proc).blocks[index];
        block.predecessors = predecessors;
        block.sealed = sealed;
        index
    }

    fn bind(&mut self, proc: usize, block: usize, name: &str, id: u32) {
        self.program.procedure_mut(proc).blocks[block].symbols.insert(name.to_string(), id);
    }

    fn seal_block(&mut self, proc: usize, block: usize) {
        if self.program.procedure(proc).blocks[block].sealed {
            return;
        }
        self.program.procedure_mut(proc).blocks[block].sealed = true;
        let incomplete = std::mem::take(&mut self.program.procedure_mut(proc).blocks[block].incomplete_phis);
        for id in incomplete {
            let name = self.program.procedure(proc).blocks[block]
                .instruction(id)
                .and_then(|i| i.symbol.clone())
                .expect("an incomplete phi always carries the symbol it stands for");
            self.resolve_phi(proc, block, &name, id);
        }
    }

    /// Fills in a phi's predecessor table once every predecessor is known,
    /// recursing into each predecessor to find (or itself insert) the
    /// binding of `name` reaching it.
    fn resolve_phi(&mut self, proc: usize, block: usize, name: &str, phi_id: u32) {
        let predecessors = self.program.procedure(proc).blocks[block].predecessors.clone();
        let mut entries = Vec::with_capacity(predecessors.len());
        for predecessor in predecessors {
            let assignment = self.lookup_symbol(proc, predecessor, name, Pos::NONE);
            entries.push(PhiEntry { predecessor, assignment });
        }
        let instruction = self.program.procedure_mut(proc).blocks[block]
            .instruction_mut(phi_id)
            .expect("phi id was just inserted into this block");
        instruction.literal = Literal::Phi(entries);
    }

    /// Resolves `name` to the assignment that defines it at `block`.
    /// Primitive type/factory names and builtin procedure names
    /// short-circuit to a fresh `TypeLiteral`/`LoadEnv` every time;
    /// everything else is a local binding (direct hit) or a new `Phi` —
    /// resolved immediately if the block is already sealed, deferred onto
    /// `incomplete_phis` if it still expects more predecessors (a loop
    /// header does, until its back edge is lowered), and reported as
    /// undefined if the block has no predecessors at all.
    fn lookup_symbol(&mut self, proc: usize, block: usize, name: &str, pos: Pos) -> u32 {
        if TYPE_NAMES.contains(&name) {
            let instruction = self.fresh(Kind::TypeLiteral, ValueType::Type).with_symbol(name);
            return self.emit(proc, block, instruction);
        }
        if BUILTIN_NAMES.contains(&name) {
            let instruction = self.fresh(Kind::LoadEnv, ValueType::Any).with_symbol(name);
            return self.emit(proc, block, instruction);
        }
        if let Some(&id) = self.program.procedure(proc).blocks[block].symbols.get(name) {
            return id;
        }
        let (sealed, has_predecessors) = {
            let b = &self.program.procedure(proc).blocks[block];
            (b.sealed, !b.predecessors.is_empty())
        };
        if sealed && !has_predecessors {
            // No predecessor to chain a phi through — this is a procedure's
            // own entry block. Resolve through the enclosing scope instead,
            // which is how a procedure calls itself by name or reads a
            // binding from the scope it was defined in.
            if let Some((outer_proc, outer_block)) = self.scope_stack.last().copied() {
                let outer_id = self.lookup_symbol(outer_proc, outer_block, name, pos);
                self.bind(proc, block, name, outer_id);
                return outer_id;
            }
            self.report(GenError::UndefinedSymbol {
                name: name.to_string(),
                pos,
                end: pos,
            });
            let inst = self.fresh(Kind::Default, ValueType::Any);
            return self.emit(proc, block, inst);
        }
        let phi = self
            .fresh(Kind::Phi, ValueType::Any)
            .with_symbol(name)
            .with_literal(Literal::Phi(Vec::new()));
        let id = self.emit(proc, block, phi);
        self.bind(proc, block, name, id);
        if sealed {
            self.resolve_phi(proc, block, name, id);
        } else {
            self.program.procedure_mut(proc).blocks[block].incomplete_phis.push(id);
        }
        id
    }

    fn run(&mut self, ast: &Node) {
        let proc = self.program.push_procedure("_init");
        let entry = self.new_block(proc, "entry", vec![], true);
        let (value, last) = self.lower(ast, proc, entry);
        if !self.program.procedure(proc).blocks[last].has_terminator() {
            let end = self.fresh(Kind::End, ValueType::Any).with_operands(value, 0);
            self.emit(proc, last, end);
        }
        self.postprocess();
    }

    fn lower_sequence(&mut self, nodes: &[Node], proc: usize, block: usize) -> (u32, usize) {
        let mut last = 0;
        let mut cur = block;
        for node in nodes {
            let (id, next) = self.lower(node, proc, cur);
            last = id;
            cur = next;
        }
        (last, cur)
    }

    /// Lowers one AST node, returning the assignment id of the value it
    /// produces and the block execution continues in afterward (usually
    /// `block` itself; branching constructs return their join block).
    fn lower(&mut self, node: &Node, proc: usize, block: usize) -> (u32, usize) {
        trace!("generating {node:?} in block {block}");
        match node {
            Node::Program { nodes } | Node::Block { nodes, .. } => self.lower_sequence(nodes, proc, block),

            Node::Tuple { nodes, .. } => self.lower_tuple(nodes, proc, block),

            Node::Assign { left, right } => self.lower_assign(left, right, proc, block),

            // A bare `a ∈ b` outside a `for` clause has no loop to attach
            // to; evaluate both sides for their diagnostics and drop the
            // membership test itself.
            Node::Each { left, right } => {
                let (_, cur) = self.lower(left, proc, block);
                self.lower(right, proc, cur)
            }

            // Type ascription doesn't change the value a node produces;
            // checking the ascribed type against it is out of scope.
            Node::As { node, .. } => self.lower(node, proc, block),

            Node::If { cond, true_body, false_body } => {
                self.lower_if(cond, true_body, false_body.as_deref(), proc, block)
            }

            Node::For { clause, body, keyword } => self.lower_for(clause, body, *keyword, proc, block),

            Node::Match { item, conditions, bodies, .. } => {
                self.lower_match(item, conditions, bodies, proc, block)
            }

            Node::Return { expr, .. } => {
                let (value, cur) = self.lower(expr, proc, block);
                let ret = self.fresh(Kind::Ret, ValueType::Any).with_operands(value, 0);
                self.emit(proc, cur, ret);
                (value, cur)
            }

            // `break`/`continue` parse but aren't wired to an enclosing
            // loop's exit/header block; `for` only lowers `each ∈ range`
            // clauses today, so there is no loop-block context to target.
            Node::Branch { .. } => {
                let inst = self.fresh(Kind::Default, ValueType::Any);
                (self.emit(proc, block, inst), block)
            }

            Node::Call { procedure, arguments, .. } => self.lower_call(procedure, arguments, proc, block),

            Node::Indexor { node, index, .. } => {
                let (target, cur) = self.lower(node, proc, block);
                let (idx, cur) = self.lower(index, proc, cur);
                let inst = self.fresh(Kind::Index, ValueType::Any).with_operands(target, idx);
                (self.emit(proc, cur, inst), cur)
            }

            Node::Selector { node, selection } => {
                let (target, cur) = self.lower(node, proc, block);
                let field = match selection.as_ref() {
                    Node::Identifier { name, .. } => name.clone(),
                    other => {
                        self.report(GenError::UnhandledNode { pos: other.start(), end: other.end() });
                        String::new()
                    }
                };
                let inst = self.fresh(Kind::Env, ValueType::Any).with_operands(target, 0).with_symbol(field);
                (self.emit(proc, cur, inst), cur)
            }

            Node::Construct { ty, value, .. } => {
                let (ty_id, cur) = self.lower(ty, proc, block);
                let (val_id, cur) = self.lower(value, proc, cur);
                let inst = self.fresh(Kind::ConstructTuple, ValueType::Tuple).with_operands(ty_id, val_id);
                (self.emit(proc, cur, inst), cur)
            }

            Node::ProcedureType { .. } => {
                let inst = self.fresh(Kind::ProcedureType, ValueType::Type);
                (self.emit(proc, block, inst), block)
            }

            Node::ProcedureDefinition { proc_type, body } => {
                self.lower_procedure_definition(proc_type, body, proc, block)
            }

            Node::Default { .. } => {
                let inst = self.fresh(Kind::Default, ValueType::Any);
                (self.emit(proc, block, inst), block)
            }

            Node::Int { value, .. } => {
                let inst = self.fresh(Kind::I64, ValueType::I64).with_literal(Literal::Int(*value));
                (self.emit(proc, block, inst), block)
            }

            Node::Float { value, .. } => {
                let inst = self.fresh(Kind::F64, ValueType::F64).with_literal(Literal::Float(*value));
                (self.emit(proc, block, inst), block)
            }

            Node::String { value, .. } => {
                let inst = self.fresh(Kind::Str, ValueType::Str).with_literal(Literal::Str(value.clone()));
                (self.emit(proc, block, inst), block)
            }

            // A rune lowers to its codepoint; the VM's `Str` kind with a
            // single-character literal is reserved for actual strings.
            Node::Rune { value, .. } => {
                let codepoint = value.chars().next().map_or(0, |c| c as i64);
                let inst = self.fresh(Kind::I64, ValueType::I64).with_literal(Literal::Int(codepoint));
                (self.emit(proc, block, inst), block)
            }

            Node::True { .. } => {
                let inst = self.fresh(Kind::Bool, ValueType::Bool).with_literal(Literal::Bool(true));
                (self.emit(proc, block, inst), block)
            }

            Node::False { .. } => {
                let inst = self.fresh(Kind::Bool, ValueType::Bool).with_literal(Literal::Bool(false));
                (self.emit(proc, block, inst), block)
            }

            Node::Range { left, left_inclusive, right, right_inclusive, .. } => {
                let (lo, hi, cur) =
                    self.lower_range_bounds(left, *left_inclusive, right, *right_inclusive, proc, block);
                let inst = self.fresh(Kind::ConstructTuple, ValueType::Range).with_operands(lo, hi);
                (self.emit(proc, cur, inst), cur)
            }

            Node::Identifier { name, pos } => (self.lookup_symbol(proc, block, name, *pos), block),

            // Array/slice/pointer modifiers are a type-checking concern;
            // lower straight through to the underlying expression.
            Node::TypeSpec { spec, .. } => self.lower(spec, proc, block),

            Node::Spread { node, .. } => self.lower(node, proc, block),

            Node::Prefix { op, node, .. } => self.lower_prefix(*op, node, proc, block),

            Node::Infix { op, left, right, .. } => self.lower_infix(*op, left, right, proc, block),

            Node::Empty => (0, block),
        }
    }

    /// Lowers a range's two endpoints to a canonical half-open `[lo, hi)`
    /// pair, materializing a `+1` on whichever end the bracket shape marked
    /// exclusive-of-the-open-end so every one of the four inclusivity
    /// combinations reduces to the same comparison downstream.
    fn lower_range_bounds(
        &mut self,
        left: &Node,
        left_inclusive: bool,
        right: &Node,
        right_inclusive: bool,
        proc: usize,
        block: usize,
    ) -> (u32, u32, usize) {
        let (lo, cur) = self.lower(left, proc, block);
        let (hi, cur) = self.lower(right, proc, cur);
        let lo = if left_inclusive { lo } else { self.add_one(lo, proc, cur) };
        let hi = if right_inclusive { self.add_one(hi, proc, cur) } else { hi };
        (lo, hi, cur)
    }

    fn add_one(&mut self, id: u32, proc: usize, block: usize) -> u32 {
        let one = self.fresh(Kind::I64, ValueType::I64).with_literal(Literal::Int(1));
        let one_id = self.emit(proc, block, one);
        let add = self.fresh(Kind::Add, ValueType::I64).with_operands(id, one_id);
        self.emit(proc, block, add)
    }

    fn lower_tuple(&mut self, nodes: &[Node], proc: usize, block: usize) -> (u32, usize) {
        let mut cur = block;
        let mut fields = Vec::with_capacity(nodes.len());
        for (i, field_node) in nodes.iter().enumerate() {
            let (name, value_node) = match field_node {
                Node::Assign { left, right } => match left.as_ref() {
                    Node::Identifier { name, .. } => (name.clone(), right.as_ref()),
                    _ => (i.to_string(), field_node),
                },
                Node::As { node, ty } => match node.as_ref() {
                    Node::Identifier { name, .. } => (name.clone(), ty.as_ref()),
                    _ => (i.to_string(), field_node),
                },
                Node::Identifier { name, .. } => (name.clone(), field_node),
                _ => (i.to_string(), field_node),
            };
            let (id, next) = self.lower(value_node, proc, cur);
            cur = next;
            fields.push(TupleField { name, assignment: id });
        }
        let inst = self.fresh(Kind::ConstructTuple, ValueType::Tuple).with_literal(Literal::Fields(fields));
        (self.emit(proc, cur, inst), cur)
    }

    fn lower_assign(&mut self, left: &Node, right: &Node, proc: usize, block: usize) -> (u32, usize) {
        // `name: λ (...) → ...` binds `name` to the procedure before its
        // body is lowered, so a self-call inside the body resolves through
        // the enclosing-scope fallback in `lookup_symbol` instead of
        // reporting an undefined symbol.
        if let (Node::Identifier { name, .. }, Node::ProcedureDefinition { proc_type, body }) = (left, right) {
            let (value, cur) = self.lower_procedure_definition_named(proc_type, body, proc, block, Some(name));
            self.bind(proc, cur, name, value);
            return (value, cur);
        }
        let (value, mut cur) = self.lower(right, proc, block);
        match left {
            Node::Identifier { name, .. } => self.bind(proc, cur, name, value),
            Node::Indexor { node, index, .. } => {
                let (target, next) = self.lower(node, proc, cur);
                cur = next;
                let (idx, next) = self.lower(index, proc, cur);
                cur = next;
                let inst = self
                    .fresh(Kind::Move, ValueType::Any)
                    .with_operands(target, value)
                    .with_literal(Literal::Operand(idx));
                self.emit(proc, cur, inst);
            }
            Node::Selector { node, selection } => {
                let (target, next) = self.lower(node, proc, cur);
                cur = next;
                let field = match &**selection {
                    Node::Identifier { name, .. } => name.clone(),
                    other => {
                        self.report(GenError::UnhandledNode { pos: other.start(), end: other.end() });
                        String::new()
                    }
                };
                let inst = self.fresh(Kind::Move, ValueType::Any).with_operands(target, value).with_symbol(field);
                self.emit(proc, cur, inst);
            }
            other => self.report(GenError::UnhandledNode { pos: other.start(), end: other.end() }),
        }
        (value, cur)
    }

    fn lower_if(
        &mut self,
        cond: &Node,
        true_body: &Node,
        false_body: Option<&Node>,
        proc: usize,
        block: usize,
    ) -> (u32, usize) {
        let (cond_id, cond_block) = self.lower(cond, proc, block);
        let true_block = self.new_block(proc, "if_true", vec![cond_block], true);
        let false_block = self.new_block(proc, "if_false", vec![cond_block], true);
        let branch = self
            .fresh(Kind::GotoIf, ValueType::Any)
            .with_operands(cond_id, 0)
            .with_literal(Literal::Branch { if_true: true_block, if_false: false_block });
        self.emit(proc, cond_block, branch);

        let (true_value, true_end) = self.lower(true_body, proc, true_block);
        let (false_value, false_end) = match false_body {
            Some(body) => self.lower(body, proc, false_block),
            // A missing `~` arm still needs a value flowing into the join
            // phi; `Default` stands in for it.
            None => {
                let default = self.fresh(Kind::Default, ValueType::Any);
                let id = self.emit(proc, false_block, default);
                (id, false_block)
            }
        };

        let join = self.new_block(proc, "if_join", vec![true_end, false_end], true);
        if !self.program.procedure(proc).blocks[true_end].has_terminator() {
            let goto_true = self.fresh(Kind::Goto, ValueType::Any).with_literal(Literal::Block(join));
            self.emit(proc, true_end, goto_true);
        }
        if !self.program.procedure(proc).blocks[false_end].has_terminator() {
            let goto_false = self.fresh(Kind::Goto, ValueType::Any).with_literal(Literal::Block(join));
            self.emit(proc, false_end, goto_false);
        }

        let phi = self.fresh(Kind::Phi, ValueType::Any).with_literal(Literal::Phi(vec![
            PhiEntry { predecessor: true_end, assignment: true_value },
            PhiEntry { predecessor: false_end, assignment: false_value },
        ]));
        let result = self.emit(proc, join, phi);
        (result, join)
    }

    /// Only `x ∈ range[lo‥hi]` clauses lower; general each-expression
    /// iteration over arrays or slices isn't wired.
    fn lower_for(&mut self, clause: &Node, body: &Node, keyword: Pos, proc: usize, block: usize) -> (u32, usize) {
        let Node::Each { left, right } = clause else {
            self.report(GenError::UnhandledNode { pos: keyword, end: keyword });
            return (0, block);
        };
        let Node::Identifier { name: loop_var, .. } = left.as_ref() else {
            self.report(GenError::UnhandledNode { pos: left.start(), end: left.end() });
            return (0, block);
        };
        let Node::Range { left: lo_node, left_inclusive, right: hi_node, right_inclusive, .. } = right.as_ref()
        else {
            self.report(GenError::UnhandledNode { pos: right.start(), end: right.end() });
            return (0, block);
        };

        let (lo, hi, pre) =
            self.lower_range_bounds(lo_node, *left_inclusive, hi_node, *right_inclusive, proc, block);
        // Bind the loop variable's entry value in the predecessor block so
        // the header's phi resolves it there like any other binding.
        self.bind(proc, pre, loop_var, lo);

        let header = self.new_block(proc, "for_header", vec![pre], false);
        let goto_header = self.fresh(Kind::Goto, ValueType::Any).with_literal(Literal::Block(header));
        self.emit(proc, pre, goto_header);

        let i_phi = self.fresh(Kind::Phi, ValueType::I64).with_symbol(loop_var.as_str());
        let i_id = self.emit(proc, header, i_phi);
        self.bind(proc, header, loop_var, i_id);
        self.program.procedure_mut(proc).blocks[header].incomplete_phis.push(i_id);

        let cmp = self.fresh(Kind::Less, ValueType::Bool).with_operands(i_id, hi);
        let cmp_id = self.emit(proc, header, cmp);

        let body_block = self.new_block(proc, "for_body", vec![header], true);
        let exit_block = self.new_block(proc, "for_exit", vec![header], true);
        let branch = self
            .fresh(Kind::GotoIf, ValueType::Any)
            .with_operands(cmp_id, 0)
            .with_literal(Literal::Branch { if_true: body_block, if_false: exit_block });
        self.emit(proc, header, branch);

        let (_, body_end) = self.lower(body, proc, body_block);

        let one = self.fresh(Kind::I64, ValueType::I64).with_literal(Literal::Int(1));
        let one_id = self.emit(proc, body_end, one);
        let inc = self.fresh(Kind::Add, ValueType::I64).with_operands(i_id, one_id);
        let inc_id = self.emit(proc, body_end, inc);
        self.bind(proc, body_end, loop_var, inc_id);
        let latch_goto = self.fresh(Kind::Goto, ValueType::Any).with_literal(Literal::Block(header));
        self.emit(proc, body_end, latch_goto);

        self.program.procedure_mut(proc).blocks[header].predecessors.push(body_end);
        self.seal_block(proc, header);

        (0, exit_block)
    }

    fn lower_match(
        &mut self,
        item: &Node,
        conditions: &[Node],
        bodies: &[Node],
        proc: usize,
        block: usize,
    ) -> (u32, usize) {
        let (subject, mut cur) = self.lower(item, proc, block);
        let mut case_ends = Vec::new();
        let mut case_values = Vec::new();
        let mut has_wildcard = false;

        for (cond, body) in conditions.iter().zip(bodies.iter()) {
            if matches!(cond, Node::Default { .. }) {
                let (value, end) = self.lower(body, proc, cur);
                case_ends.push(end);
                case_values.push(value);
                has_wildcard = true;
                break;
            }
            let (cond_value, cond_block) = self.lower(cond, proc, cur);
            let eq = self.fresh(Kind::Equals, ValueType::Bool).with_operands(subject, cond_value);
            let eq_id = self.emit(proc, cond_block, eq);

            let case_block = self.new_block(proc, "match_case", vec![cond_block], true);
            let next_block = self.new_block(proc, "match_next", vec![cond_block], true);
            let branch = self
                .fresh(Kind::GotoIf, ValueType::Any)
                .with_operands(eq_id, 0)
                .with_literal(Literal::Branch { if_true: case_block, if_false: next_block });
            self.emit(proc, cond_block, branch);

            let (value, end) = self.lower(body, proc, case_block);
            case_ends.push(end);
            case_values.push(value);
            cur = next_block;
        }

        if !has_wildcard {
            let default = self.fresh(Kind::Default, ValueType::Any);
            let value = self.emit(proc, cur, default);
            case_ends.push(cur);
            case_values.push(value);
        }

        let join = self.new_block(proc, "match_join", case_ends.clone(), true);
        for &end in &case_ends {
            if !self.program.procedure(proc).blocks[end].has_terminator() {
                let goto = self.fresh(Kind::Goto, ValueType::Any).with_literal(Literal::Block(join));
                self.emit(proc, end, goto);
            }
        }
        let entries = case_ends
            .iter()
            .zip(case_values.iter())
            .map(|(&predecessor, &assignment)| PhiEntry { predecessor, assignment })
            .collect();
        let phi = self.fresh(Kind::Phi, ValueType::Any).with_literal(Literal::Phi(entries));
        let result = self.emit(proc, join, phi);
        (result, join)
    }

    fn lower_call(&mut self, procedure: &Node, arguments: &[Node], proc: usize, block: usize) -> (u32, usize) {
        let mut cur = block;
        let mut arg_ids = Vec::with_capacity(arguments.len());
        for arg in arguments {
            let (id, next) = self.lower(arg, proc, cur);
            cur = next;
            arg_ids.push(id);
        }
        // Pushed in declaration order so a callee popping in reverse
        // declaration order (the last-declared parameter sits on top of
        // the stack) retrieves the matching argument.
        for id in arg_ids {
            let push = self.fresh(Kind::Push, ValueType::Any).with_operands(id, 0);
            self.emit(proc, cur, push);
        }
        let (callee, next) = self.lower(procedure, proc, cur);
        cur = next;
        // The pushed argument count travels with the call since a builtin
        // callee has no procedure body of its own `Pop`s to self-describe
        // how many values it consumes off the shared stack.
        let call = self
            .fresh(Kind::Call, ValueType::Any)
            .with_operands(callee, 0)
            .with_literal(Literal::Count(arguments.len() as u32));
        let result = self.emit(proc, cur, call);
        (result, cur)
    }

    fn lower_procedure_definition(
        &mut self,
        proc_type: &Node,
        body: &Node,
        proc: usize,
        block: usize,
    ) -> (u32, usize) {
        self.lower_procedure_definition_named(proc_type, body, proc, block, None)
    }

    /// `own_name`, when set, is bound to a reserved assignment id in the
    /// *caller's* block before the body is lowered, so a reference to that
    /// name from inside the body (a procedure calling itself) resolves
    /// instead of reporting an undefined symbol.
    fn lower_procedure_definition_named(
        &mut self,
        proc_type: &Node,
        body: &Node,
        proc: usize,
        block: usize,
        own_name: Option<&str>,
    ) -> (u32, usize) {
        let Node::ProcedureType { args, .. } = proc_type else {
            self.report(GenError::UnhandledNode { pos: proc_type.start(), end: proc_type.end() });
            return (0, block);
        };

        let reserved = own_name.map(|_| self.next_id());
        if let (Some(id), Some(n)) = (reserved, own_name) {
            self.bind(proc, block, n, id);
        }

        let name = format!("_proc{}", self.program.procedures.len());
        let new_proc = self.program.push_procedure(name);
        let entry = self.new_block(new_proc, "entry", vec![], true);

        // Pop in reverse declaration order: the last-declared parameter is
        // the first value the caller's push sequence leaves on top.
        for field in args.iter().rev() {
            let pop = self.fresh(Kind::Pop, ValueType::Any);
            let id = self.emit(new_proc, entry, pop);
            self.bind(new_proc, entry, &field.name, id);
        }

        self.scope_stack.push((proc, block));
        let (body_value, body_end) = self.lower(body, new_proc, entry);
        self.scope_stack.pop();
        if !self.program.procedure(new_proc).blocks[body_end].has_terminator() {
            let ret = self.fresh(Kind::Ret, ValueType::Any).with_operands(body_value, 0);
            self.emit(new_proc, body_end, ret);
        }

        let id = reserved.unwrap_or_else(|| self.next_id());
        let inst = Instruction::new(Kind::ProcedureDefinition, ValueType::Procedure, id)
            .with_literal(Literal::ProcedureIndex(new_proc));
        let result = self.emit(proc, block, inst);
        (result, block)
    }

    fn lower_prefix(&mut self, op: TokenKind, node: &Node, proc: usize, block: usize) -> (u32, usize) {
        let (operand, cur) = self.lower(node, proc, block);
        match op {
            TokenKind::Not => {
                let inst = self.fresh(Kind::Not, ValueType::Bool).with_operands(operand, 0);
                (self.emit(proc, cur, inst), cur)
            }
            // Each unary form lowers as its binary operator applied against
            // that operator's algebraic identity element.
            TokenKind::Sub => {
                let zero_inst = self.fresh(Kind::I64, ValueType::I64).with_literal(Literal::Int(0));
                let zero = self.emit(proc, cur, zero_inst);
                let inst = self.fresh(Kind::Sub, ValueType::I64).with_operands(zero, operand);
                (self.emit(proc, cur, inst), cur)
            }
            TokenKind::Mul => {
                let one_inst = self.fresh(Kind::I64, ValueType::I64).with_literal(Literal::Int(1));
                let one = self.emit(proc, cur, one_inst);
                let inst = self.fresh(Kind::Mul, ValueType::I64).with_operands(one, operand);
                (self.emit(proc, cur, inst), cur)
            }
            TokenKind::And => {
                let true_inst = self.fresh(Kind::Bool, ValueType::Bool).with_literal(Literal::Bool(true));
                let truth = self.emit(proc, cur, true_inst);
                let inst = self.fresh(Kind::And, ValueType::Bool).with_operands(truth, operand);
                (self.emit(proc, cur, inst), cur)
            }
            _ => {
                self.report(GenError::UnhandledNode { pos: node.start(), end: node.end() });
                (operand, cur)
            }
        }
    }

    fn lower_infix(&mut self, op: TokenKind, left: &Node, right: &Node, proc: usize, block: usize) -> (u32, usize) {
        let (l, cur) = self.lower(left, proc, block);
        let (r, cur) = self.lower(right, proc, cur);
        if matches!(op, TokenKind::LessEqual | TokenKind::GreaterEqual) {
            // `a <= b` is `!(b < a)`; `a >= b` is `!(a < b)` — there's no
            // dedicated kind for either.
            let (lhs, rhs) = if op == TokenKind::LessEqual { (r, l) } else { (l, r) };
            let less = self.fresh(Kind::Less, ValueType::Bool).with_operands(lhs, rhs);
            let less_id = self.emit(proc, cur, less);
            let not_inst = self.fresh(Kind::Not, ValueType::Bool).with_operands(less_id, 0);
            return (self.emit(proc, cur, not_inst), cur);
        }
        let (kind, ty) = match op {
            TokenKind::Add => (Kind::Add, ValueType::I64),
            TokenKind::Sub => (Kind::Sub, ValueType::I64),
            TokenKind::Mul => (Kind::Mul, ValueType::I64),
            TokenKind::Quo => (Kind::Quo, ValueType::I64),
            TokenKind::Mod => (Kind::Mod, ValueType::I64),
            TokenKind::And => (Kind::And, ValueType::Bool),
            TokenKind::Or => (Kind::Or, ValueType::Bool),
            TokenKind::Equal => (Kind::Equals, ValueType::Bool),
            TokenKind::NotEqual => (Kind::NotEquals, ValueType::Bool),
            TokenKind::Less => (Kind::Less, ValueType::Bool),
            TokenKind::Greater => (Kind::Greater, ValueType::Bool),
            _ => {
                self.report(GenError::UnhandledNode { pos: left.start(), end: right.end() });
                (Kind::Default, ValueType::Any)
            }
        };
        let inst = self.fresh(kind, ty).with_operands(l, r);
        (self.emit(proc, cur, inst), cur)
    }

    /// Three cleanup passes over the finished program: move every phi to
    /// the front of its block, then assign dense, monotonically increasing
    /// assignment ids across the whole program in block order, rewriting
    /// every reference (`left`/`right`, phi predecessor tables, tuple
    /// fields, indexed-move operands) through the old-to-new mapping.
    fn postprocess(&mut self) {
        for proc in self.program.procedures.iter_mut() {
            for block in proc.blocks.iter_mut() {
                block.move_phis_first();
            }
        }

        let mut remap: HashMap<u32, u32> = HashMap::new();
        let mut next: u32 = 1;
        for proc in self.program.procedures.iter() {
            for block in proc.blocks.iter() {
                for instruction in block.instructions.iter() {
                    remap.insert(instruction.index, next);
                    next += 1;
                }
            }
        }

        for proc in self.program.procedures.iter_mut() {
            for block in proc.blocks.iter_mut() {
                for instruction in block.instructions.iter_mut() {
                    instruction.index = remap[&instruction.index];
                    if instruction.left != 0 {
                        instruction.left = remap[&instruction.left];
                    }
                    if instruction.right != 0 {
                        instruction.right = remap[&instruction.right];
                    }
                    match &mut instruction.literal {
                        Literal::Phi(entries) => {
                            for entry in entries.iter_mut() {
                                entry.assignment = remap[&entry.assignment];
                            }
                        }
                        Literal::Fields(fields) => {
                            for field in fields.iter_mut() {
                                field.assignment = remap[&field.assignment];
                            }
                        }
                        Literal::Operand(operand) => *operand = remap[operand],
                        _ => {}
                    }
                }
                block.assignment_offsets.clear();
                for (offset, instruction) in block.instructions.iter().enumerate() {
                    block.assignment_offsets.insert(instruction.index, offset);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_common::File;

    fn generate_source(source: &str) -> Program {
        let (ast, diagnostics, _file) = wisp_parser::parse(File::new("test", source));
        assert!(!diagnostics.has_errors(), "parse errors: {:?}", diagnostics.messages);
        let (program, diagnostics) = generate(&ast);
        assert!(!diagnostics.has_errors(), "generation errors: {:?}", diagnostics.messages);
        program
    }

    #[test]
    fn assignment_ids_are_dense_and_start_at_one() {
        let program = generate_source("a: 1; b: a + 2");
        let mut ids: Vec<u32> =
            program.procedures.iter().flat_map(|p| p.blocks.iter()).flat_map(|b| b.instructions.iter().map(|i| i.index)).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=ids.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn every_phi_precedes_non_phi_instructions_in_its_block() {
        let program = generate_source("k: 1; j: k = 1 ⇒ 2 ~ 3");
        for proc in &program.procedures {
            for block in &proc.blocks {
                let mut seen_non_phi = false;
                for instruction in &block.instructions {
                    if instruction.is_phi() {
                        assert!(!seen_non_phi, "phi found after a non-phi instruction");
                    } else {
                        seen_non_phi = true;
                    }
                }
            }
        }
    }

    #[test]
    fn if_without_an_else_arm_still_produces_a_complete_phi() {
        let program = generate_source("k: 1; k = 1 ⇒ 2");
        let init = &program.procedures[0];
        let join = init.blocks.iter().find(|b| b.name == "if_join").expect("an if_join block");
        let phi = join.instructions.iter().find(|i| i.is_phi()).expect("a phi in the join block");
        let Literal::Phi(entries) = &phi.literal else { panic!("expected a phi literal") };
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn for_each_over_a_range_seals_its_header_after_the_back_edge() {
        let program = generate_source("∀ i ∈ range[0‥3] → { a: i }");
        let init = &program.procedures[0];
        let header = init.blocks.iter().find(|b| b.name == "for_header").expect("a for_header block");
        assert!(header.sealed);
        assert_eq!(header.predecessors.len(), 2);
        assert!(header.incomplete_phis.is_empty());
    }

    #[test]
    fn procedure_definitions_pop_arguments_in_reverse_declaration_order() {
        let program = generate_source("f: λ (a i64, b i64) → a - b");
        let defined = program.procedures.iter().find(|p| p.name == "_proc0").expect("a nested procedure");
        let pops: Vec<&str> = defined.blocks[0]
            .instructions
            .iter()
            .filter(|i| i.kind == Kind::Pop)
            .map(|i| {
                defined.blocks[0]
                    .symbols
                    .iter()
                    .find(|(_, &id)| id == i.index)
                    .map(|(name, _)| name.as_str())
                    .unwrap_or("")
            })
            .collect();
        assert_eq!(pops, vec!["b", "a"]);
    }

    #[test]
    fn match_with_a_default_case_builds_a_phi_covering_every_arm() {
        let program = generate_source("k: 3; match k { 3 ⇒ 5, 2 ⇒ 5, _ ⇒ 7 }");
        let init = &program.procedures[0];
        let join = init.blocks.iter().find(|b| b.name == "match_join").expect("a match_join block");
        let phi = join.instructions.iter().find(|i| i.is_phi()).expect("a phi in the join block");
        let Literal::Phi(entries) = &phi.literal else { panic!("expected a phi literal") };
        assert_eq!(entries.len(), 3);
    }
}
