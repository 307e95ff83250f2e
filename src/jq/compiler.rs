//! jq AST to bytecode compiler: threads a current-value register through
//! a linearized pipeline, using an emit-stack discipline (`collect_values`,
//! `emit_buffer`) to materialize generator-like expressions into concrete
//! lists. `compile_update` holds parent references during a path descent
//! and reassembles the container chain in reverse on the way back out.
//! `Arg::Int`/`Arg::Str` carry literal operands the same way
//! `crate::lua::compiler::Compiler` uses them for its own loop counters.
//!
//! Two lowering choices worth noting (see `DESIGN.md`):
//! - `//` lowers to the single dedicated `Coalesce` opcode rather than an
//!   explicit null-check-and-branch, at the cost of evaluating both sides
//!   eagerly instead of short-circuiting.
//! - the legacy aggregator-string `reduce("sum")`/`reduce("min", ...)`
//!   form (reachable from the parser whenever `reduce` is immediately
//!   followed by `(`, since the keyword form requires a following `as`)
//!   has no dedicated runtime opcode, so the aggregator name is resolved
//!   to a fixed opcode at compile time against a table of known names.

use super::ast::{flatten_pipe, BinOp, JqNode, Literal, ObjectKey, UnOp};
use crate::bytecode::{Arg, Instruction, OpCode};
use crate::vm::{EngineError, EngineResult};
use smol_str::SmolStr;

/// The register the compiled program's top-level `Mov` seeds from the
/// embedder-supplied input value.
const INPUT_REGISTER: &str = "__jq_input";
/// The register threaded through the pipeline as `.`.
const CURRENT_REGISTER: &str = "__jq_curr";

fn var_reg_name(name: &str) -> SmolStr {
    SmolStr::new(format!("__jq_var_{name}"))
}

fn literal_arg(lit: &Literal) -> Arg {
    match lit {
        Literal::Null => Arg::Nil,
        Literal::Bool(b) => Arg::Bool(*b),
        Literal::Int(i) => Arg::Int(*i),
        Literal::Float(f) => Arg::Float(*f),
        Literal::Str(s) => Arg::Str(s.clone()),
    }
}

/// A single step in a decomposed assignment target: `.a.b[0] = x` walks
/// as `[Field(a), Field(b), Index(0)]`, root to leaf.
enum PathStep {
    Field(SmolStr),
    Index(JqNode),
}

fn decompose_path(node: &JqNode) -> (JqNode, Vec<PathStep>) {
    let mut steps = Vec::new();
    let mut current = node;
    loop {
        match current {
            JqNode::Field(name, source) => {
                steps.push(PathStep::Field(name.clone()));
                current = source;
            }
            JqNode::Index(source, index) => {
                steps.push(PathStep::Index((**index).clone()));
                current = source;
            }
            _ => break,
        }
    }
    steps.reverse();
    (current.clone(), steps)
}

struct Compiler {
    out: Vec<Instruction>,
    next_id: u32,
    label_stack: Vec<(SmolStr, SmolStr)>,
}

impl Compiler {
    fn new() -> Compiler {
        Compiler { out: Vec::new(), next_id: 0, label_stack: Vec::new() }
    }

    fn new_temp(&mut self) -> SmolStr {
        let n = self.next_id;
        self.next_id += 1;
        SmolStr::new(format!("__jq_tmp{n}"))
    }

    fn new_label(&mut self, prefix: &str) -> SmolStr {
        let n = self.next_id;
        self.next_id += 1;
        SmolStr::new(format!("__{prefix}_{n}"))
    }

    fn find_label(&self, name: &str) -> Option<SmolStr> {
        self.label_stack.iter().rev().find(|(n, _)| n == name).map(|(_, target)| target.clone())
    }

    fn emit(&mut self, op: OpCode, args: Vec<Arg>) {
        self.out.push(Instruction::new(op, args, None));
    }

    fn emit_label(&mut self, name: impl Into<SmolStr>) {
        self.out.push(Instruction::label(name));
    }

    fn emit_literal_load(&mut self, dest: &str, lit: &Literal) {
        self.emit(OpCode::LoadConst, vec![Arg::sym(dest), literal_arg(lit)]);
    }

    // -- pipeline ---------------------------------------------------

    fn compile_pipeline(&mut self, stages: &[JqNode], current_reg: &str) -> EngineResult<()> {
        let Some(stage) = stages.first() else {
            self.emit(OpCode::Emit, vec![Arg::sym(current_reg)]);
            return Ok(());
        };
        let rest = &stages[1..];

        match stage {
            JqNode::Identity => self.compile_pipeline(rest, current_reg),

            JqNode::Literal(lit) => {
                let dest = self.new_temp();
                self.emit_literal_load(&dest, lit);
                self.compile_pipeline(rest, &dest)
            }

            JqNode::Field(..)
            | JqNode::ObjectLiteral(..)
            | JqNode::UnaryOp(..)
            | JqNode::BinaryOp(..)
            | JqNode::Index(..)
            | JqNode::Slice(..)
            | JqNode::VarRef(..) => {
                let dest = self.eval_expression(stage, current_reg)?;
                self.compile_pipeline(rest, &dest)
            }

            JqNode::AsBinding(source, name) => {
                let value_reg = self.eval_expression(source, current_reg)?;
                self.emit(OpCode::Mov, vec![Arg::sym(var_reg_name(name)), Arg::sym(value_reg)]);
                self.compile_pipeline(rest, current_reg)
            }

            JqNode::Sequence(branches) => {
                for branch in branches {
                    let mut combined = flatten_pipe(branch.clone());
                    combined.extend_from_slice(rest);
                    self.compile_pipeline(&combined, current_reg)?;
                }
                Ok(())
            }

            JqNode::Label(name, body) => {
                let break_label = self.new_label("jq_label_break");
                self.label_stack.push((name.clone(), break_label.clone()));
                let mut combined = flatten_pipe((**body).clone());
                combined.extend_from_slice(rest);
                self.compile_pipeline(&combined, current_reg)?;
                self.label_stack.pop();
                self.emit_label(break_label);
                Ok(())
            }

            JqNode::Break(name) => {
                let target = self
                    .find_label(name)
                    .ok_or_else(|| EngineError::semantic(format!("break to unknown label ${name}")))?;
                self.emit(OpCode::Jmp, vec![Arg::sym(target)]);
                Ok(())
            }

            JqNode::UpdateAssignment(target, expr) => self.compile_update(target, expr, current_reg, rest),

            JqNode::IfElse(cond, then_branch, else_branch) => {
                let cond_reg = self.eval_expression(cond, current_reg)?;
                let false_label = self.new_label("jq_if_false");
                let done_label = self.new_label("jq_if_done");
                self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(false_label.clone())]);
                let mut then_stages = flatten_pipe((**then_branch).clone());
                then_stages.extend_from_slice(rest);
                self.compile_pipeline(&then_stages, current_reg)?;
                self.emit(OpCode::Jmp, vec![Arg::sym(done_label.clone())]);
                self.emit_label(false_label);
                if let Some(else_branch) = else_branch {
                    let mut else_stages = flatten_pipe((**else_branch).clone());
                    else_stages.extend_from_slice(rest);
                    self.compile_pipeline(&else_stages, current_reg)?;
                }
                self.emit_label(done_label);
                Ok(())
            }

            JqNode::TryCatch(try_expr, catch_expr) => {
                self.compile_try(try_expr, catch_expr.as_deref(), current_reg, rest)
            }

            JqNode::Reduce(source, var_name, init, update) => {
                self.compile_reduce_kw(source, var_name, init, update, current_reg, rest)
            }

            JqNode::Foreach(source, var_name, init, update, extract) => {
                self.compile_foreach(source, var_name, init, update, extract.as_deref(), current_reg, rest)
            }

            JqNode::IndexAll(source) => {
                let source_reg = self.eval_expression(source, current_reg)?;
                let index_reg = self.new_temp();
                let length_reg = self.new_temp();
                let cond_reg = self.new_temp();
                let elem_reg = self.new_temp();
                let loop_label = self.new_label("jq_loop");
                let end_label = self.new_label("jq_end");

                self.emit(OpCode::LoadConst, vec![Arg::sym(index_reg.clone()), Arg::Int(0)]);
                self.emit(OpCode::LenValue, vec![Arg::sym(length_reg.clone()), Arg::sym(source_reg.clone())]);
                self.emit_label(loop_label.clone());
                self.emit(OpCode::Lt, vec![Arg::sym(cond_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(length_reg)]);
                self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(end_label.clone())]);
                self.emit(OpCode::GetIndex, vec![Arg::sym(elem_reg.clone()), Arg::sym(source_reg), Arg::sym(index_reg.clone())]);

                self.compile_pipeline(rest, &elem_reg)?;

                self.emit(OpCode::Add, vec![Arg::sym(index_reg.clone()), Arg::sym(index_reg.clone()), Arg::Int(1)]);
                self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
                self.emit_label(end_label);
                Ok(())
            }

            JqNode::FunctionCall(name, args) => self.compile_function_call(name, args, current_reg, rest),

            JqNode::ArrayConstructor(inner) => {
                let arr_reg = match inner {
                    Some(e) => self.collect_values(e, current_reg)?,
                    None => {
                        let t = self.new_temp();
                        self.emit(OpCode::NewList, vec![Arg::sym(t.clone())]);
                        t
                    }
                };
                self.compile_pipeline(rest, &arr_reg)
            }
        }
    }

    fn compile_update(&mut self, target: &JqNode, expr: &JqNode, current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let (base, steps) = decompose_path(target);
        if !matches!(base, JqNode::Identity) {
            return Err(EngineError::semantic("update assignment currently supports paths starting from ."));
        }

        // (is_field, parent_register, field-name-or-index-register)
        let mut parent_links: Vec<(bool, SmolStr, Arg)> = Vec::new();
        let mut container_reg = SmolStr::new(current_reg);

        let n = steps.len();
        for step in &steps[..n.saturating_sub(1)] {
            match step {
                PathStep::Field(name) => {
                    let child = self.new_temp();
                    self.emit(OpCode::ObjGet, vec![Arg::sym(child.clone()), Arg::sym(container_reg.clone()), Arg::Str(name.clone())]);
                    parent_links.push((true, container_reg.clone(), Arg::Str(name.clone())));
                    container_reg = child;
                }
                PathStep::Index(index_node) => {
                    let index_reg = self.eval_expression(index_node, current_reg)?;
                    let child = self.new_temp();
                    self.emit(OpCode::GetIndex, vec![Arg::sym(child.clone()), Arg::sym(container_reg.clone()), Arg::sym(index_reg.clone())]);
                    parent_links.push((false, container_reg.clone(), Arg::sym(index_reg)));
                    container_reg = child;
                }
            }
        }

        enum AssignKind {
            Identity,
            Field(SmolStr),
            Index(SmolStr),
        }

        let (assign_kind, old_value_reg) = if let Some(last) = steps.last() {
            match last {
                PathStep::Field(name) => {
                    let old = self.new_temp();
                    self.emit(OpCode::ObjGet, vec![Arg::sym(old.clone()), Arg::sym(container_reg.clone()), Arg::Str(name.clone())]);
                    (AssignKind::Field(name.clone()), old)
                }
                PathStep::Index(index_node) => {
                    let index_reg = self.eval_expression(index_node, current_reg)?;
                    let old = self.new_temp();
                    self.emit(OpCode::GetIndex, vec![Arg::sym(old.clone()), Arg::sym(container_reg.clone()), Arg::sym(index_reg.clone())]);
                    (AssignKind::Index(index_reg), old)
                }
            }
        } else {
            (AssignKind::Identity, SmolStr::new(current_reg))
        };

        let new_value_reg = self.eval_expression(expr, &old_value_reg)?;

        let updated_reg = match &assign_kind {
            AssignKind::Identity => {
                self.emit(OpCode::Mov, vec![Arg::sym(current_reg), Arg::sym(new_value_reg)]);
                SmolStr::new(current_reg)
            }
            AssignKind::Field(name) => {
                self.emit(OpCode::ObjSet, vec![Arg::sym(container_reg.clone()), Arg::Str(name.clone()), Arg::sym(new_value_reg)]);
                container_reg.clone()
            }
            AssignKind::Index(index_reg) => {
                self.emit(OpCode::SetIndex, vec![Arg::sym(container_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(new_value_reg)]);
                container_reg.clone()
            }
        };

        let mut child_reg = updated_reg;
        for (is_field, parent_reg, key) in parent_links.into_iter().rev() {
            if is_field {
                self.emit(OpCode::ObjSet, vec![Arg::sym(parent_reg.clone()), key, Arg::sym(child_reg.clone())]);
            } else {
                self.emit(OpCode::SetIndex, vec![Arg::sym(parent_reg.clone()), key, Arg::sym(child_reg.clone())]);
            }
            child_reg = parent_reg;
        }

        self.compile_pipeline(rest, current_reg)
    }

    fn compile_try(&mut self, try_expr: &JqNode, catch_expr: Option<&JqNode>, current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let buffer_reg = self.new_temp();
        let error_reg = self.new_temp();
        let catch_label = self.new_label("jq_try_catch");
        let done_label = self.new_label("jq_try_done");

        self.emit(OpCode::NewList, vec![Arg::sym(buffer_reg.clone())]);
        self.emit(OpCode::PushEmit, vec![Arg::sym(buffer_reg.clone())]);
        self.emit(
            OpCode::TryBegin,
            vec![Arg::sym(catch_label.clone()), Arg::sym(error_reg.clone()), Arg::sym(buffer_reg.clone())],
        );
        let try_stages = flatten_pipe(try_expr.clone());
        self.compile_pipeline(&try_stages, current_reg)?;
        self.emit(OpCode::TryEnd, vec![]);
        self.emit(OpCode::PopEmit, vec![]);

        self.emit_buffer_inline(&buffer_reg, rest)?;
        self.emit(OpCode::Jmp, vec![Arg::sym(done_label.clone())]);

        self.emit_label(catch_label);
        self.emit(OpCode::PopEmit, vec![]);
        if let Some(catch_expr) = catch_expr {
            let mut catch_stages = flatten_pipe(catch_expr.clone());
            catch_stages.extend_from_slice(rest);
            self.compile_pipeline(&catch_stages, &error_reg)?;
        }
        self.emit_label(done_label);
        Ok(())
    }

    /// Collects every value a generator expression produces into a fresh
    /// list register.
    fn collect_values(&mut self, node: &JqNode, input_reg: &str) -> EngineResult<SmolStr> {
        let buffer_reg = self.new_temp();
        self.emit(OpCode::NewList, vec![Arg::sym(buffer_reg.clone())]);
        self.emit(OpCode::PushEmit, vec![Arg::sym(buffer_reg.clone())]);
        let stages = flatten_pipe(node.clone());
        self.compile_pipeline(&stages, input_reg)?;
        self.emit(OpCode::PopEmit, vec![]);
        Ok(buffer_reg)
    }

    /// Re-runs `rest` once per item in `buffer_reg`, as a standalone
    /// statement (no outer loop to fall through to).
    fn emit_buffer(&mut self, buffer_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        self.emit_buffer_inline(buffer_reg, rest)
    }

    fn emit_buffer_inline(&mut self, buffer_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let index_reg = self.new_temp();
        let length_reg = self.new_temp();
        let cond_reg = self.new_temp();
        let item_reg = self.new_temp();
        let loop_label = self.new_label("jq_iter_loop");
        let end_label = self.new_label("jq_iter_end");

        self.emit(OpCode::LoadConst, vec![Arg::sym(index_reg.clone()), Arg::Int(0)]);
        self.emit(OpCode::LenValue, vec![Arg::sym(length_reg.clone()), Arg::sym(buffer_reg)]);
        self.emit_label(loop_label.clone());
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(length_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(end_label.clone())]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(item_reg.clone()), Arg::sym(buffer_reg), Arg::sym(index_reg.clone())]);
        self.compile_pipeline(rest, &item_reg)?;
        self.emit(OpCode::Add, vec![Arg::sym(index_reg.clone()), Arg::sym(index_reg.clone()), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(end_label);
        Ok(())
    }

    fn compile_reduce_kw(
        &mut self,
        source: &JqNode,
        var_name: &str,
        init: &JqNode,
        update: &JqNode,
        current_reg: &str,
        rest: &[JqNode],
    ) -> EngineResult<()> {
        let values_buffer = self.collect_values(source, current_reg)?;
        let acc_reg = self.eval_expression(init, current_reg)?;
        let len_reg = self.new_temp();
        let index_reg = self.new_temp();
        let cond_reg = self.new_temp();
        let item_reg = self.new_temp();
        let loop_label = self.new_label("jq_reduce_loop");
        let end_label = self.new_label("jq_reduce_end");

        self.emit(OpCode::LenValue, vec![Arg::sym(len_reg.clone()), Arg::sym(values_buffer.clone())]);
        self.emit(OpCode::LoadConst, vec![Arg::sym(index_reg.clone()), Arg::Int(0)]);
        self.emit_label(loop_label.clone());
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(len_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(end_label.clone())]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(item_reg.clone()), Arg::sym(values_buffer), Arg::sym(index_reg.clone())]);
        self.emit(OpCode::Mov, vec![Arg::sym(var_reg_name(var_name)), Arg::sym(item_reg)]);
        let new_acc = self.eval_expression(update, &acc_reg)?;
        self.emit(OpCode::Mov, vec![Arg::sym(acc_reg.clone()), Arg::sym(new_acc)]);
        self.emit(OpCode::Add, vec![Arg::sym(index_reg.clone()), Arg::sym(index_reg.clone()), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(end_label);

        self.compile_pipeline(rest, &acc_reg)
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_foreach(
        &mut self,
        source: &JqNode,
        var_name: &str,
        init: &JqNode,
        update: &JqNode,
        extract: Option<&JqNode>,
        current_reg: &str,
        rest: &[JqNode],
    ) -> EngineResult<()> {
        let values_buffer = self.collect_values(source, current_reg)?;
        let acc_reg = self.eval_expression(init, current_reg)?;
        let len_reg = self.new_temp();
        let index_reg = self.new_temp();
        let cond_reg = self.new_temp();
        let item_reg = self.new_temp();
        let loop_label = self.new_label("jq_foreach_loop");
        let end_label = self.new_label("jq_foreach_end");

        self.emit(OpCode::LenValue, vec![Arg::sym(len_reg.clone()), Arg::sym(values_buffer.clone())]);
        self.emit(OpCode::LoadConst, vec![Arg::sym(index_reg.clone()), Arg::Int(0)]);
        self.emit_label(loop_label.clone());
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(len_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(end_label.clone())]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(item_reg.clone()), Arg::sym(values_buffer), Arg::sym(index_reg.clone())]);
        self.emit(OpCode::Mov, vec![Arg::sym(var_reg_name(var_name)), Arg::sym(item_reg)]);
        let new_acc = self.eval_expression(update, &acc_reg)?;
        self.emit(OpCode::Mov, vec![Arg::sym(acc_reg.clone()), Arg::sym(new_acc)]);

        match extract {
            Some(extract_expr) => {
                let extract_stages = flatten_pipe(extract_expr.clone());
                self.compile_pipeline(&extract_stages, &acc_reg)?;
            }
            None => self.emit(OpCode::Emit, vec![Arg::sym(acc_reg.clone())]),
        }

        self.emit(OpCode::Add, vec![Arg::sym(index_reg.clone()), Arg::sym(index_reg.clone()), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(end_label);

        self.compile_pipeline(rest, current_reg)
    }

    fn compile_while(&mut self, cond: &JqNode, update: &JqNode, current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let cond_reg = self.new_temp();
        let loop_label = self.new_label("jq_while_loop");
        let end_label = self.new_label("jq_while_end");

        self.emit_label(loop_label.clone());
        let c = self.eval_expression(cond, current_reg)?;
        self.emit(OpCode::Mov, vec![Arg::sym(cond_reg.clone()), Arg::sym(c)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(end_label.clone())]);
        self.compile_pipeline(rest, current_reg)?;
        let updated = self.eval_expression(update, current_reg)?;
        self.emit(OpCode::Mov, vec![Arg::sym(current_reg), Arg::sym(updated)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(end_label);
        Ok(())
    }

    fn compile_until(&mut self, cond: &JqNode, update: &JqNode, current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let cond_reg = self.new_temp();
        let loop_label = self.new_label("jq_until_loop");

        self.emit_label(loop_label.clone());
        self.compile_pipeline(rest, current_reg)?;
        let c = self.eval_expression(cond, current_reg)?;
        self.emit(OpCode::Mov, vec![Arg::sym(cond_reg.clone()), Arg::sym(c)]);
        let updated = self.eval_expression(update, current_reg)?;
        self.emit(OpCode::Mov, vec![Arg::sym(current_reg), Arg::sym(updated)]);
        self.emit(OpCode::Jnz, vec![Arg::sym(cond_reg), Arg::sym(loop_label)]);
        self.compile_pipeline(rest, current_reg)
    }

    // -- expressions --------------------------------------------------

    fn eval_expression(&mut self, node: &JqNode, base_reg: &str) -> EngineResult<SmolStr> {
        match node {
            JqNode::Identity => Ok(SmolStr::new(base_reg)),

            JqNode::Literal(lit) => {
                let dest = self.new_temp();
                self.emit_literal_load(&dest, lit);
                Ok(dest)
            }

            JqNode::VarRef(name) => Ok(var_reg_name(name)),

            JqNode::UnaryOp(op, operand) => {
                let operand_reg = self.eval_expression(operand, base_reg)?;
                let dest = self.new_temp();
                match op {
                    UnOp::Neg => self.emit(OpCode::Neg, vec![Arg::sym(dest.clone()), Arg::sym(operand_reg)]),
                    UnOp::Not => self.emit(OpCode::Not, vec![Arg::sym(dest.clone()), Arg::sym(operand_reg)]),
                }
                Ok(dest)
            }

            JqNode::BinaryOp(op, left, right) => self.eval_binary(*op, left, right, base_reg),

            JqNode::Field(..) => {
                let mut names = Vec::new();
                let mut src = node;
                while let JqNode::Field(name, inner) = src {
                    names.push(name.clone());
                    src = inner;
                }
                let mut current = self.eval_expression(src, base_reg)?;
                for name in names.into_iter().rev() {
                    let dest = self.new_temp();
                    self.emit(OpCode::ObjGet, vec![Arg::sym(dest.clone()), Arg::sym(current), Arg::Str(name)]);
                    current = dest;
                }
                Ok(current)
            }

            JqNode::ObjectLiteral(pairs) => {
                let obj_reg = self.new_temp();
                self.emit(OpCode::NewObject, vec![Arg::sym(obj_reg.clone())]);
                for (key, value_expr) in pairs {
                    let value_reg = self.eval_expression(value_expr, base_reg)?;
                    let ObjectKey::Literal(key_name) = key;
                    self.emit(OpCode::ObjSet, vec![Arg::sym(obj_reg.clone()), Arg::Str(key_name.clone()), Arg::sym(value_reg)]);
                }
                Ok(obj_reg)
            }

            JqNode::Index(source, index) => {
                let container = self.eval_expression(source, base_reg)?;
                let idx = self.eval_expression(index, base_reg)?;
                let dest = self.new_temp();
                self.emit(OpCode::GetIndex, vec![Arg::sym(dest.clone()), Arg::sym(container), Arg::sym(idx)]);
                Ok(dest)
            }

            JqNode::Slice(source, start, end) => self.eval_slice(source, start.as_deref(), end.as_deref(), base_reg),

            other => self.compile_expression(other, base_reg),
        }
    }

    fn eval_binary(&mut self, op: BinOp, left: &JqNode, right: &JqNode, base_reg: &str) -> EngineResult<SmolStr> {
        use BinOp::*;
        match op {
            Add | Sub | Mul | Div | Mod | Eq | Gt | Lt | And | Or => {
                let left_reg = self.eval_expression(left, base_reg)?;
                let right_reg = self.eval_expression(right, base_reg)?;
                let dest = self.new_temp();
                let opcode = match op {
                    Add => OpCode::Add,
                    Sub => OpCode::Sub,
                    Mul => OpCode::Mul,
                    Div => OpCode::Div,
                    Mod => OpCode::Mod,
                    Eq => OpCode::Eq,
                    Gt => OpCode::Gt,
                    Lt => OpCode::Lt,
                    And => OpCode::And,
                    Or => OpCode::Or,
                    _ => unreachable!(),
                };
                self.emit(opcode, vec![Arg::sym(dest.clone()), Arg::sym(left_reg), Arg::sym(right_reg)]);
                Ok(dest)
            }
            Ne => {
                let eq_reg = self.eval_binary(Eq, left, right, base_reg)?;
                let dest = self.new_temp();
                self.emit(OpCode::Not, vec![Arg::sym(dest.clone()), Arg::sym(eq_reg)]);
                Ok(dest)
            }
            Ge => {
                let lt_reg = self.eval_binary(Lt, left, right, base_reg)?;
                let dest = self.new_temp();
                self.emit(OpCode::Not, vec![Arg::sym(dest.clone()), Arg::sym(lt_reg)]);
                Ok(dest)
            }
            Le => {
                let gt_reg = self.eval_binary(Gt, left, right, base_reg)?;
                let dest = self.new_temp();
                self.emit(OpCode::Not, vec![Arg::sym(dest.clone()), Arg::sym(gt_reg)]);
                Ok(dest)
            }
            Coalesce => {
                let left_reg = self.eval_expression(left, base_reg)?;
                let right_reg = self.eval_expression(right, base_reg)?;
                let dest = self.new_temp();
                self.emit(OpCode::Coalesce, vec![Arg::sym(dest.clone()), Arg::sym(left_reg), Arg::sym(right_reg)]);
                Ok(dest)
            }
        }
    }

    /// The long three-step bounds clamp jq's `.[a:b]` applies to both
    /// `start` and `end`: negative values count from the end, then the
    /// result is floored at `0` and capped at `length`.
    fn normalize_slice_bound(&mut self, bound_reg: &str, length_reg: &str, cond_reg: &str) {
        let neg_cont = self.new_label("jq_slice_cont1");
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg), Arg::sym(bound_reg), Arg::Int(0)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(neg_cont.clone())]);
        self.emit(OpCode::Add, vec![Arg::sym(bound_reg), Arg::sym(bound_reg), Arg::sym(length_reg)]);
        self.emit_label(neg_cont);

        let floor_cont = self.new_label("jq_slice_cont2");
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg), Arg::sym(bound_reg), Arg::Int(0)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(floor_cont.clone())]);
        self.emit(OpCode::LoadConst, vec![Arg::sym(bound_reg), Arg::Int(0)]);
        self.emit_label(floor_cont);

        let ceil_cont = self.new_label("jq_slice_cont3");
        self.emit(OpCode::Gt, vec![Arg::sym(cond_reg), Arg::sym(bound_reg), Arg::sym(length_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(ceil_cont.clone())]);
        self.emit(OpCode::Mov, vec![Arg::sym(bound_reg), Arg::sym(length_reg)]);
        self.emit_label(ceil_cont);
    }

    fn eval_slice(&mut self, source: &JqNode, start: Option<&JqNode>, end: Option<&JqNode>, base_reg: &str) -> EngineResult<SmolStr> {
        let src = self.eval_expression(source, base_reg)?;
        let result = self.new_temp();
        self.emit(OpCode::NewList, vec![Arg::sym(result.clone())]);

        let length = self.new_temp();
        self.emit(OpCode::LenValue, vec![Arg::sym(length.clone()), Arg::sym(src.clone())]);

        let start_reg = self.new_temp();
        match start {
            None => self.emit(OpCode::LoadConst, vec![Arg::sym(start_reg.clone()), Arg::Int(0)]),
            Some(node) => {
                let v = self.eval_expression(node, base_reg)?;
                self.emit(OpCode::Mov, vec![Arg::sym(start_reg.clone()), Arg::sym(v)]);
            }
        }

        let end_reg = self.new_temp();
        match end {
            None => self.emit(OpCode::Mov, vec![Arg::sym(end_reg.clone()), Arg::sym(length.clone())]),
            Some(node) => {
                let v = self.eval_expression(node, base_reg)?;
                self.emit(OpCode::Mov, vec![Arg::sym(end_reg.clone()), Arg::sym(v)]);
            }
        }

        let cond = self.new_temp();
        self.normalize_slice_bound(&start_reg, &length, &cond);
        self.normalize_slice_bound(&end_reg, &length, &cond);

        let i = self.new_temp();
        self.emit(OpCode::Mov, vec![Arg::sym(i.clone()), Arg::sym(start_reg)]);
        self.emit(OpCode::PushEmit, vec![Arg::sym(result.clone())]);
        let loop_label = self.new_label("jq_slice_loop");
        let done_label = self.new_label("jq_slice_done");
        self.emit_label(loop_label.clone());
        self.emit(OpCode::Lt, vec![Arg::sym(cond.clone()), Arg::sym(i.clone()), Arg::sym(end_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond), Arg::sym(done_label.clone())]);
        let item = self.new_temp();
        self.emit(OpCode::GetIndex, vec![Arg::sym(item.clone()), Arg::sym(src), Arg::sym(i.clone())]);
        self.emit(OpCode::Emit, vec![Arg::sym(item)]);
        self.emit(OpCode::Add, vec![Arg::sym(i.clone()), Arg::sym(i), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(done_label);
        self.emit(OpCode::PopEmit, vec![]);
        Ok(result)
    }

    /// Collapses a generator subexpression to its last emitted value, or
    /// `null` if it emitted nothing.
    fn compile_expression(&mut self, expr: &JqNode, base_reg: &str) -> EngineResult<SmolStr> {
        let buffer_reg = self.new_temp();
        self.emit(OpCode::NewList, vec![Arg::sym(buffer_reg.clone())]);
        self.emit(OpCode::PushEmit, vec![Arg::sym(buffer_reg.clone())]);
        let stages = flatten_pipe(expr.clone());
        self.compile_pipeline(&stages, base_reg)?;
        self.emit(OpCode::PopEmit, vec![]);

        let len_reg = self.new_temp();
        let index_reg = self.new_temp();
        let value_reg = self.new_temp();
        let empty_label = self.new_label("jq_expr_empty");
        let done_label = self.new_label("jq_expr_done");

        self.emit(OpCode::LenValue, vec![Arg::sym(len_reg.clone()), Arg::sym(buffer_reg.clone())]);
        self.emit(OpCode::Jz, vec![Arg::sym(len_reg.clone()), Arg::sym(empty_label.clone())]);
        self.emit(OpCode::Sub, vec![Arg::sym(index_reg.clone()), Arg::sym(len_reg), Arg::Int(1)]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(value_reg.clone()), Arg::sym(buffer_reg), Arg::sym(index_reg)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(done_label.clone())]);
        self.emit_label(empty_label);
        self.emit(OpCode::LoadConst, vec![Arg::sym(value_reg.clone()), Arg::Nil]);
        self.emit_label(done_label);
        Ok(value_reg)
    }

    // -- builtins -------------------------------------------------------

    fn unary_value_op(&mut self, op: OpCode, current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let dest = self.new_temp();
        self.emit(op, vec![Arg::sym(dest.clone()), Arg::sym(current_reg)]);
        self.compile_pipeline(rest, &dest)
    }

    /// Computes the parallel per-element key list `sort_by`/`unique_by`/
    /// `min_by`/`max_by`/`group_by` all need.
    fn compile_keys_buffer(&mut self, array_reg: &str, key_expr: &JqNode) -> EngineResult<SmolStr> {
        let keys_buf = self.new_temp();
        self.emit(OpCode::NewList, vec![Arg::sym(keys_buf.clone())]);
        let index_reg = self.new_temp();
        let length_reg = self.new_temp();
        let cond_reg = self.new_temp();
        let elem_reg = self.new_temp();
        self.emit(OpCode::LoadConst, vec![Arg::sym(index_reg.clone()), Arg::Int(0)]);
        self.emit(OpCode::LenValue, vec![Arg::sym(length_reg.clone()), Arg::sym(array_reg)]);
        let loop_label = self.new_label("jq_keyed_loop");
        let end_label = self.new_label("jq_keyed_end");
        self.emit_label(loop_label.clone());
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(length_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(end_label.clone())]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(elem_reg.clone()), Arg::sym(array_reg), Arg::sym(index_reg.clone())]);
        let key_reg = self.eval_expression(key_expr, &elem_reg)?;
        self.emit(OpCode::PushEmit, vec![Arg::sym(keys_buf.clone())]);
        self.emit(OpCode::Emit, vec![Arg::sym(key_reg)]);
        self.emit(OpCode::PopEmit, vec![]);
        self.emit(OpCode::Add, vec![Arg::sym(index_reg.clone()), Arg::sym(index_reg.clone()), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(end_label);
        Ok(keys_buf)
    }

    fn compile_walk(&mut self, expr: &JqNode, current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let paths_reg = self.new_temp();
        self.emit(OpCode::PathsAll, vec![Arg::sym(paths_reg.clone()), Arg::sym(current_reg)]);
        let index_reg = self.new_temp();
        let length_reg = self.new_temp();
        let cond_reg = self.new_temp();
        let path_reg = self.new_temp();
        let value_reg = self.new_temp();
        let result_buffer = self.new_temp();
        let zero_reg = self.new_temp();
        let new_value_reg = self.new_temp();
        let single_path_reg = self.new_temp();

        let loop_label = self.new_label("jq_walk_loop");
        let end_label = self.new_label("jq_walk_end");

        self.emit(OpCode::LoadConst, vec![Arg::sym(index_reg.clone()), Arg::Int(0)]);
        self.emit(OpCode::LenValue, vec![Arg::sym(length_reg.clone()), Arg::sym(paths_reg.clone())]);
        self.emit(OpCode::LoadConst, vec![Arg::sym(zero_reg.clone()), Arg::Int(0)]);
        self.emit_label(loop_label.clone());
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(length_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg.clone()), Arg::sym(end_label.clone())]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(path_reg.clone()), Arg::sym(paths_reg.clone()), Arg::sym(index_reg.clone())]);
        self.emit(OpCode::GetPathValue, vec![Arg::sym(value_reg.clone()), Arg::sym(current_reg), Arg::sym(path_reg.clone())]);

        self.emit(OpCode::NewList, vec![Arg::sym(result_buffer.clone())]);
        self.emit(OpCode::PushEmit, vec![Arg::sym(result_buffer.clone())]);
        let expr_stages = flatten_pipe(expr.clone());
        self.compile_pipeline(&expr_stages, &value_reg)?;
        self.emit(OpCode::PopEmit, vec![]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(new_value_reg.clone()), Arg::sym(result_buffer), Arg::sym(zero_reg)]);

        self.emit(OpCode::NewList, vec![Arg::sym(single_path_reg.clone())]);
        self.emit(OpCode::PushEmit, vec![Arg::sym(single_path_reg.clone())]);
        self.emit(OpCode::Emit, vec![Arg::sym(path_reg)]);
        self.emit(OpCode::PopEmit, vec![]);
        self.emit(OpCode::SetPaths, vec![Arg::sym(current_reg), Arg::sym(single_path_reg), Arg::sym(new_value_reg)]);

        self.emit(OpCode::Add, vec![Arg::sym(index_reg.clone()), Arg::sym(index_reg.clone()), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(end_label);
        self.compile_pipeline(rest, current_reg)
    }

    fn compile_map(&mut self, expr: &JqNode, current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let result_reg = self.new_temp();
        self.emit(OpCode::NewList, vec![Arg::sym(result_reg.clone())]);
        self.emit(OpCode::PushEmit, vec![Arg::sym(result_reg.clone())]);

        let index_reg = self.new_temp();
        let length_reg = self.new_temp();
        let cond_reg = self.new_temp();
        let elem_reg = self.new_temp();
        let loop_label = self.new_label("jq_map_loop");
        let end_label = self.new_label("jq_map_end");

        self.emit(OpCode::LoadConst, vec![Arg::sym(index_reg.clone()), Arg::Int(0)]);
        self.emit(OpCode::LenValue, vec![Arg::sym(length_reg.clone()), Arg::sym(current_reg)]);
        self.emit_label(loop_label.clone());
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(length_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(end_label.clone())]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(elem_reg.clone()), Arg::sym(current_reg), Arg::sym(index_reg.clone())]);

        let expr_stages = flatten_pipe(expr.clone());
        self.compile_pipeline(&expr_stages, &elem_reg)?;

        self.emit(OpCode::Add, vec![Arg::sym(index_reg.clone()), Arg::sym(index_reg.clone()), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(end_label);
        self.emit(OpCode::PopEmit, vec![]);
        self.compile_pipeline(rest, &result_reg)
    }

    /// `select(f)`: collects every value `f` emits against `.`, flattens
    /// one level, and keeps `.` in the pipeline iff at least one emitted
    /// value is truthy. Not a boolean short-circuit: `f` always runs to
    /// completion.
    fn compile_select(&mut self, expr: &JqNode, current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let cond_buffer = self.new_temp();
        self.emit(OpCode::NewList, vec![Arg::sym(cond_buffer.clone())]);
        self.emit(OpCode::PushEmit, vec![Arg::sym(cond_buffer.clone())]);
        let expr_stages = flatten_pipe(expr.clone());
        self.compile_pipeline(&expr_stages, current_reg)?;
        self.emit(OpCode::PopEmit, vec![]);

        let flat_buffer = self.new_temp();
        self.emit(OpCode::Flatten, vec![Arg::sym(flat_buffer.clone()), Arg::sym(cond_buffer)]);

        let len_reg = self.new_temp();
        let index_reg = self.new_temp();
        let cond_reg = self.new_temp();
        let item_reg = self.new_temp();
        let truth_reg = self.new_temp();
        let loop_label = self.new_label("jq_select_loop");
        let skip_item_label = self.new_label("jq_select_skip_item");
        let scan_done_label = self.new_label("jq_select_scan_done");
        let skip_label = self.new_label("jq_select_skip");

        self.emit(OpCode::LenValue, vec![Arg::sym(len_reg.clone()), Arg::sym(flat_buffer.clone())]);
        self.emit(OpCode::LoadConst, vec![Arg::sym(truth_reg.clone()), Arg::Int(0)]);
        self.emit(OpCode::LoadConst, vec![Arg::sym(index_reg.clone()), Arg::Int(0)]);
        self.emit_label(loop_label.clone());
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(len_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg.clone()), Arg::sym(scan_done_label.clone())]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(item_reg.clone()), Arg::sym(flat_buffer), Arg::sym(index_reg.clone())]);
        self.emit(OpCode::Jz, vec![Arg::sym(item_reg), Arg::sym(skip_item_label.clone())]);
        self.emit(OpCode::LoadConst, vec![Arg::sym(truth_reg.clone()), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(scan_done_label.clone())]);
        self.emit_label(skip_item_label);
        self.emit(OpCode::Add, vec![Arg::sym(index_reg.clone()), Arg::sym(index_reg.clone()), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(scan_done_label);
        self.emit(OpCode::Jz, vec![Arg::sym(truth_reg), Arg::sym(skip_label.clone())]);
        self.compile_pipeline(rest, current_reg)?;
        self.emit_label(skip_label);
        Ok(())
    }

    fn compile_function_call(&mut self, name: &str, args: &[JqNode], current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        match (name, args.len()) {
            ("path", 1) | ("paths", 1) => {
                let values_reg = self.collect_values(&args[0], current_reg)?;
                let paths_reg = self.new_temp();
                self.emit(OpCode::PathsMatch, vec![Arg::sym(paths_reg.clone()), Arg::sym(current_reg), Arg::sym(values_reg)]);
                self.emit_buffer(&paths_reg, rest)
            }
            ("paths", 0) => {
                let paths_reg = self.new_temp();
                self.emit(OpCode::PathsAll, vec![Arg::sym(paths_reg.clone()), Arg::sym(current_reg)]);
                self.emit_buffer(&paths_reg, rest)
            }
            ("setpath", 2) => {
                let paths_reg = self.collect_values(&args[0], current_reg)?;
                let value_reg = self.eval_expression(&args[1], current_reg)?;
                self.emit(OpCode::SetPaths, vec![Arg::sym(current_reg), Arg::sym(paths_reg), Arg::sym(value_reg)]);
                self.compile_pipeline(rest, current_reg)
            }
            ("del", 1) => {
                let values_reg = self.collect_values(&args[0], current_reg)?;
                let paths_reg = self.new_temp();
                self.emit(OpCode::PathsMatch, vec![Arg::sym(paths_reg.clone()), Arg::sym(current_reg), Arg::sym(values_reg)]);
                self.emit(OpCode::DelPaths, vec![Arg::sym(current_reg), Arg::sym(paths_reg)]);
                self.compile_pipeline(rest, current_reg)
            }
            ("walk", 1) => self.compile_walk(&args[0], current_reg, rest),
            ("input", 0) => {
                let dest = self.new_temp();
                self.emit(OpCode::Input, vec![Arg::sym(dest.clone())]);
                self.compile_pipeline(rest, &dest)
            }
            ("inputs", 0) => {
                let buffer_reg = self.new_temp();
                self.emit(OpCode::Inputs, vec![Arg::sym(buffer_reg.clone())]);
                self.emit_buffer(&buffer_reg, rest)
            }
            ("halt", 0) => {
                self.emit(OpCode::HaltNow, vec![]);
                Ok(())
            }
            ("halt_error", 0) => {
                self.emit(OpCode::HaltError, vec![Arg::Nil]);
                Ok(())
            }
            ("halt_error", 1) => {
                let message_reg = self.eval_expression(&args[0], current_reg)?;
                self.emit(OpCode::HaltError, vec![Arg::sym(message_reg)]);
                Ok(())
            }
            ("while", 2) => self.compile_while(&args[0], &args[1], current_reg, rest),
            ("until", 2) => self.compile_until(&args[0], &args[1], current_reg, rest),
            ("tostring", 0) => self.unary_value_op(OpCode::Tostring, current_reg, rest),
            ("tonumber", 0) => self.unary_value_op(OpCode::Tonumber, current_reg, rest),
            ("split", 1) => {
                let sep_reg = self.eval_expression(&args[0], current_reg)?;
                let dest = self.new_temp();
                self.emit(OpCode::Split, vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(sep_reg)]);
                self.compile_pipeline(rest, &dest)
            }
            ("gsub", 2) => {
                let pattern_reg = self.eval_expression(&args[0], current_reg)?;
                let replacement_reg = self.eval_expression(&args[1], current_reg)?;
                let dest = self.new_temp();
                self.emit(
                    OpCode::Gsub,
                    vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(pattern_reg), Arg::sym(replacement_reg)],
                );
                self.compile_pipeline(rest, &dest)
            }
            ("sort", 0) => self.unary_value_op(OpCode::Sort, current_reg, rest),
            ("sort_by", 1) => {
                let keys_buf = self.compile_keys_buffer(current_reg, &args[0])?;
                let dest = self.new_temp();
                self.emit(OpCode::SortBy, vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(keys_buf)]);
                self.compile_pipeline(rest, &dest)
            }
            ("unique", 0) => self.unary_value_op(OpCode::Unique, current_reg, rest),
            ("unique_by", 1) => {
                let keys_buf = self.compile_keys_buffer(current_reg, &args[0])?;
                let dest = self.new_temp();
                self.emit(OpCode::UniqueBy, vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(keys_buf)]);
                self.compile_pipeline(rest, &dest)
            }
            ("min", 0) => self.unary_value_op(OpCode::Min, current_reg, rest),
            ("max", 0) => self.unary_value_op(OpCode::Max, current_reg, rest),
            ("min_by", 1) => {
                let keys_buf = self.compile_keys_buffer(current_reg, &args[0])?;
                let dest = self.new_temp();
                self.emit(OpCode::MinBy, vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(keys_buf)]);
                self.compile_pipeline(rest, &dest)
            }
            ("max_by", 1) => {
                let keys_buf = self.compile_keys_buffer(current_reg, &args[0])?;
                let dest = self.new_temp();
                self.emit(OpCode::MaxBy, vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(keys_buf)]);
                self.compile_pipeline(rest, &dest)
            }
            ("group_by", 1) => {
                let keys_buf = self.compile_keys_buffer(current_reg, &args[0])?;
                let dest = self.new_temp();
                self.emit(OpCode::GroupBy, vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(keys_buf)]);
                self.compile_pipeline(rest, &dest)
            }
            ("keys", 0) => self.unary_value_op(OpCode::Keys, current_reg, rest),
            ("has", 1) => {
                let needle = self.eval_expression(&args[0], current_reg)?;
                let dest = self.new_temp();
                self.emit(OpCode::Has, vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(needle)]);
                self.compile_pipeline(rest, &dest)
            }
            ("contains", 1) => {
                let needle = self.eval_expression(&args[0], current_reg)?;
                let dest = self.new_temp();
                self.emit(OpCode::Contains, vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(needle)]);
                self.compile_pipeline(rest, &dest)
            }
            ("add", 0) => self.unary_value_op(OpCode::AggAdd, current_reg, rest),
            ("join", 0) | ("join", 1) => {
                let sep_reg = match args.first() {
                    Some(arg) => self.eval_expression(arg, current_reg)?,
                    None => {
                        let sep = self.new_temp();
                        self.emit(OpCode::LoadConst, vec![Arg::sym(sep.clone()), Arg::Str(SmolStr::new(""))]);
                        sep
                    }
                };
                let dest = self.new_temp();
                self.emit(OpCode::Join, vec![Arg::sym(dest.clone()), Arg::sym(current_reg), Arg::sym(sep_reg)]);
                self.compile_pipeline(rest, &dest)
            }
            ("reverse", 0) => self.unary_value_op(OpCode::Reverse, current_reg, rest),
            ("first", 0) => self.unary_value_op(OpCode::First, current_reg, rest),
            ("last", 0) => self.unary_value_op(OpCode::Last, current_reg, rest),
            ("any", 0) => self.unary_value_op(OpCode::Any, current_reg, rest),
            ("all", 0) => self.unary_value_op(OpCode::All, current_reg, rest),
            ("length", 0) => self.unary_value_op(OpCode::LenValue, current_reg, rest),
            ("flatten", 0) => self.unary_value_op(OpCode::Flatten, current_reg, rest),
            ("flatten", _) => {
                let array_reg = self.eval_expression(&args[0], current_reg)?;
                let dest = self.new_temp();
                self.emit(OpCode::Flatten, vec![Arg::sym(dest.clone()), Arg::sym(array_reg)]);
                self.compile_pipeline(rest, &dest)
            }
            ("map", 1) => self.compile_map(&args[0], current_reg, rest),
            ("select", 1) => self.compile_select(&args[0], current_reg, rest),
            ("reduce", _) => self.compile_legacy_reduce(args, current_reg, rest),
            _ => Err(EngineError::semantic(format!("unsupported jq function: {name}/{}", args.len()))),
        }
    }

    /// The legacy aggregator-string form `reduce("sum")` /
    /// `reduce(.items; "sum")` / `reduce(.items; "sum"; 10)`: reachable
    /// from the parser whenever `reduce` is immediately followed by `(`
    /// (the keyword `reduce EXPR as $x (init; update)` form requires a
    /// following `as` and never reaches here). There is no runtime opcode
    /// for a generic aggregator dispatch, so the aggregator name — which
    /// must be a literal string — is resolved to a fixed opcode at compile
    /// time.
    fn compile_legacy_reduce(&mut self, args: &[JqNode], current_reg: &str, rest: &[JqNode]) -> EngineResult<()> {
        let (array_expr, op_literal, init_expr): (Option<&JqNode>, Option<&JqNode>, Option<&JqNode>) = match args.len() {
            0 => (None, None, None),
            1 => match &args[0] {
                JqNode::Literal(Literal::Str(_)) => (None, Some(&args[0]), None),
                other => (Some(other), None, None),
            },
            2 => (Some(&args[0]), Some(&args[1]), None),
            _ => (Some(&args[0]), Some(&args[1]), Some(&args[2])),
        };

        let array_reg = match array_expr {
            Some(expr) => self.eval_expression(expr, current_reg)?,
            None => SmolStr::new(current_reg),
        };

        let op_name = match op_literal {
            Some(JqNode::Literal(Literal::Str(s))) => s.to_ascii_lowercase(),
            Some(_) => return Err(EngineError::semantic("reduce aggregator name must be a string literal")),
            None => "sum".to_string(),
        };

        let init_reg = match init_expr {
            Some(expr) => Some(self.eval_expression(expr, current_reg)?),
            None => None,
        };

        let dest = match op_name.as_str() {
            "sum" => self.compile_legacy_fold(&array_reg, init_reg.as_deref(), OpCode::Add, 0)?,
            "product" => self.compile_legacy_fold(&array_reg, init_reg.as_deref(), OpCode::Mul, 1)?,
            "count" => {
                let dest = self.new_temp();
                self.emit(OpCode::LenValue, vec![Arg::sym(dest.clone()), Arg::sym(array_reg)]);
                dest
            }
            "min" => {
                let dest = self.new_temp();
                self.emit(OpCode::Min, vec![Arg::sym(dest.clone()), Arg::sym(array_reg)]);
                dest
            }
            "max" => {
                let dest = self.new_temp();
                self.emit(OpCode::Max, vec![Arg::sym(dest.clone()), Arg::sym(array_reg)]);
                dest
            }
            other => return Err(EngineError::semantic(format!("unsupported reduce aggregator: {other}"))),
        };
        self.compile_pipeline(rest, &dest)
    }

    fn compile_legacy_fold(&mut self, array_reg: &str, init_reg: Option<&str>, op: OpCode, identity: i64) -> EngineResult<SmolStr> {
        let acc_reg = self.new_temp();
        match init_reg {
            Some(init) => self.emit(OpCode::Mov, vec![Arg::sym(acc_reg.clone()), Arg::sym(init)]),
            None => self.emit(OpCode::LoadConst, vec![Arg::sym(acc_reg.clone()), Arg::Int(identity)]),
        }
        let index_reg = self.new_temp();
        let length_reg = self.new_temp();
        let cond_reg = self.new_temp();
        let item_reg = self.new_temp();
        let loop_label = self.new_label("jq_legacy_reduce_loop");
        let end_label = self.new_label("jq_legacy_reduce_end");
        self.emit(OpCode::LoadConst, vec![Arg::sym(index_reg.clone()), Arg::Int(0)]);
        self.emit(OpCode::LenValue, vec![Arg::sym(length_reg.clone()), Arg::sym(array_reg)]);
        self.emit_label(loop_label.clone());
        self.emit(OpCode::Lt, vec![Arg::sym(cond_reg.clone()), Arg::sym(index_reg.clone()), Arg::sym(length_reg)]);
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(end_label.clone())]);
        self.emit(OpCode::GetIndex, vec![Arg::sym(item_reg.clone()), Arg::sym(array_reg), Arg::sym(index_reg.clone())]);
        self.emit(op, vec![Arg::sym(acc_reg.clone()), Arg::sym(acc_reg.clone()), Arg::sym(item_reg)]);
        self.emit(OpCode::Add, vec![Arg::sym(index_reg.clone()), Arg::sym(index_reg.clone()), Arg::Int(1)]);
        self.emit(OpCode::Jmp, vec![Arg::sym(loop_label)]);
        self.emit_label(end_label);
        Ok(acc_reg)
    }
}

/// Compiles a parsed jq filter into a bytecode program. The program reads
/// its input from `__jq_input` (the caller/VM setup seeds this register
/// before the first `step`) and emits its output through the standard
/// `vm.output`/emit-stack discipline.
pub fn compile(node: JqNode) -> EngineResult<Vec<Instruction>> {
    let mut c = Compiler::new();
    c.emit(OpCode::Mov, vec![Arg::sym(CURRENT_REGISTER), Arg::sym(INPUT_REGISTER)]);
    let stages = flatten_pipe(node);
    c.compile_pipeline(&stages, CURRENT_REGISTER)?;
    c.emit(OpCode::Halt, vec![]);
    Ok(c.out)
}

pub(crate) fn input_register() -> &'static str {
    INPUT_REGISTER
}

#[cfg(test)]
mod compiler_tests {
    use crate::jq::run_filter;
    use crate::value::{new_object, Value};

    #[test]
    fn an_array_constructor_collects_every_emitted_value_into_one_array() {
        let result = run_filter("[.[] | . * 2]", Value::list(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(result, vec![Value::list(vec![Value::Int(2), Value::Int(4)])]);
    }

    #[test]
    fn an_empty_array_constructor_with_no_inner_expression_is_the_empty_array() {
        let result = run_filter("[]", Value::Nil).unwrap();
        assert_eq!(result, vec![Value::list(vec![])]);
    }

    #[test]
    fn select_keeps_the_input_only_when_the_predicate_emits_a_truthy_value() {
        let result = run_filter(".[] | select(. > 1)", Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])).unwrap();
        assert_eq!(result, vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn the_legacy_aggregator_reduce_form_sums_by_default() {
        let result = run_filter("reduce(.)", Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])).unwrap();
        assert_eq!(result, vec![Value::Int(6)]);
    }

    #[test]
    fn a_slice_with_a_negative_start_counts_from_the_end() {
        let result = run_filter(".[-2:]", Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])).unwrap();
        assert_eq!(result, vec![Value::list(vec![Value::Int(2), Value::Int(3)])]);
    }

    #[test]
    fn foreach_with_an_extract_clause_emits_once_per_update_not_once_per_source_item() {
        let result = run_filter("[foreach .[] as $x (0; . + $x; . * 10)]", Value::list(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(result, vec![Value::list(vec![Value::Int(10), Value::Int(30)])]);
    }

    #[test]
    fn label_break_exits_the_pipeline_at_the_matching_label() {
        let result = run_filter("label $out | .[] | (if . == 2 then break $out else . end)", Value::list(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
        ]))
        .unwrap();
        assert_eq!(result, vec![Value::Int(1)]);
    }

    #[test]
    fn compound_update_assignment_applies_the_operator_in_place_per_field() {
        let input = new_object(vec![("count".into(), Value::Int(1))]);
        let result = run_filter(".count += 5", input).unwrap();
        assert_eq!(result, vec![new_object(vec![("count".into(), Value::Int(6))])]);
    }

    #[test]
    fn try_catch_recovers_the_caught_error_message_into_the_pipeline() {
        let result = run_filter("try (. + null) catch .", Value::Int(1)).unwrap();
        assert_eq!(result, vec![Value::str("attempt to perform arithmetic on a nil value")]);
    }
}
