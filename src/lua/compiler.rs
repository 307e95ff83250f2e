//! Lua AST → bytecode lowering.
//!
//! One flat `Vec<Instruction>` for the whole chunk: the main chunk's body
//! is emitted first (so execution can start at `pc == 0` without a `Call`),
//! followed by a `Halt`, followed by every nested function body, each
//! behind its own `Label`. Functions are never fallen into — the only way
//! to reach one is a `Closure`/`CallValue` pair — so the `Halt` after the
//! main body is reachable code, not dead code.
//!
//! Registers are named `r<decl-id>` for locals/parameters and `t<n>` for
//! compiler temporaries; both are safe to reuse across functions because
//! the VM gives every call frame a fresh register file. Labels share one global counter for the same reason
//! `LabelTable::build` requires: every label in the program must be
//! unique, not just unique per function.

use super::ast::*;
use super::scope::ScopeInfo;
use crate::bytecode::{Arg, Instruction, InstructionDebug, OpCode};
use crate::vm::{EngineError, EngineResult};
use smol_str::SmolStr;
use std::collections::VecDeque;

struct Compiler<'a> {
    scope: &'a ScopeInfo,
    out: Vec<Instruction>,
    next_id: u32,
    pending: VecDeque<FunctionBody>,
    queued: std::collections::HashSet<FuncId>,
    current_func_id: FuncId,
    current_name: SmolStr,
    file: SmolStr,
    loop_stack: Vec<String>,
}

impl<'a> Compiler<'a> {
    fn new(scope: &'a ScopeInfo, file: SmolStr) -> Compiler<'a> {
        Compiler {
            scope,
            out: Vec::new(),
            next_id: 0,
            pending: VecDeque::new(),
            queued: std::collections::HashSet::new(),
            current_func_id: 0,
            current_name: SmolStr::new_static("<chunk>"),
            file,
            loop_stack: Vec::new(),
        }
    }

    fn fresh_tmp(&mut self) -> String {
        let n = self.next_id;
        self.next_id += 1;
        format!("t{n}")
    }

    fn fresh_label(&mut self) -> String {
        let n = self.next_id;
        self.next_id += 1;
        format!("L{n}")
    }

    fn debug(&self, pos: Pos) -> Option<InstructionDebug> {
        Some(InstructionDebug::new(self.file.clone(), pos.line, pos.column, self.current_name.clone()))
    }

    fn emit(&mut self, op: OpCode, args: Vec<Arg>, pos: Pos) {
        let debug = self.debug(pos);
        self.out.push(Instruction::new(op, args, debug));
    }

    fn emit_label(&mut self, name: impl Into<SmolStr>) {
        self.out.push(Instruction::label(name));
    }

    fn is_captured(&self, decl: DeclId) -> bool {
        self.scope.get(&self.current_func_id).map(|i| i.captured_locals.contains(&decl)).unwrap_or(false)
    }

    fn upvalue_index(&self, decl: DeclId) -> usize {
        self.scope
            .get(&self.current_func_id)
            .and_then(|i| i.upvalues.iter().position(|(d, _)| *d == decl))
            .unwrap_or(0)
    }

    fn nil_tmp(&mut self, pos: Pos) -> String {
        let t = self.fresh_tmp();
        self.emit(OpCode::LoadImm, vec![Arg::sym(t.clone()), Arg::Nil], pos);
        t
    }

    fn declare_local(&mut self, decl: DeclId, value_reg: &str, pos: Pos) {
        let dst = format!("r{decl}");
        if self.is_captured(decl) {
            self.emit(OpCode::MakeCell, vec![Arg::sym(dst), Arg::sym(value_reg.to_string())], pos);
        } else {
            self.emit(OpCode::Mov, vec![Arg::sym(dst), Arg::sym(value_reg.to_string())], pos);
        }
    }

    fn assign_to_target(&mut self, target: &Expr, value_reg: &str) -> EngineResult<()> {
        let pos = target.pos();
        match target {
            Expr::Name(name, resolved, _) => match resolved.get() {
                Some(VarRef::Local(decl)) => {
                    if self.is_captured(decl) {
                        self.emit(OpCode::CellSet, vec![Arg::sym(format!("r{decl}")), Arg::sym(value_reg.to_string())], pos);
                    } else {
                        self.emit(OpCode::Mov, vec![Arg::sym(format!("r{decl}")), Arg::sym(value_reg.to_string())], pos);
                    }
                }
                Some(VarRef::Upvalue(decl)) => {
                    let idx = self.upvalue_index(decl);
                    let cell_tmp = self.fresh_tmp();
                    self.emit(OpCode::BindUpvalue, vec![Arg::sym(cell_tmp.clone()), Arg::Int(idx as i64)], pos);
                    self.emit(OpCode::CellSet, vec![Arg::sym(cell_tmp), Arg::sym(value_reg.to_string())], pos);
                }
                Some(VarRef::Global) | None => {
                    self.emit(OpCode::Mov, vec![Arg::sym(format!("G_{name}")), Arg::sym(value_reg.to_string())], pos);
                }
            },
            Expr::Index(obj, idx, _) => {
                let obj_reg = self.compile_expr_single(obj)?;
                let idx_reg = self.compile_expr_single(idx)?;
                self.emit(OpCode::TableSet, vec![Arg::sym(obj_reg), Arg::sym(idx_reg), Arg::sym(value_reg.to_string())], pos);
            }
            Expr::Field(obj, name, _) => {
                let obj_reg = self.compile_expr_single(obj)?;
                self.emit(OpCode::TableSet, vec![Arg::sym(obj_reg), Arg::Str(name.clone()), Arg::sym(value_reg.to_string())], pos);
            }
            _ => return Err(EngineError::semantic("invalid assignment target")),
        }
        Ok(())
    }

    // ---- expressions ----

    /// Evaluates `e` and returns a register holding exactly one value,
    /// truncating any multi-value expression.
    fn compile_expr_single(&mut self, e: &Expr) -> EngineResult<String> {
        let pos = e.pos();
        match e {
            Expr::Nil(_) => {
                let t = self.fresh_tmp();
                self.emit(OpCode::LoadImm, vec![Arg::sym(t.clone()), Arg::Nil], pos);
                Ok(t)
            }
            Expr::True(_) => {
                let t = self.fresh_tmp();
                self.emit(OpCode::LoadImm, vec![Arg::sym(t.clone()), Arg::Bool(true)], pos);
                Ok(t)
            }
            Expr::False(_) => {
                let t = self.fresh_tmp();
                self.emit(OpCode::LoadImm, vec![Arg::sym(t.clone()), Arg::Bool(false)], pos);
                Ok(t)
            }
            Expr::Int(i, _) => {
                let t = self.fresh_tmp();
                self.emit(OpCode::LoadImm, vec![Arg::sym(t.clone()), Arg::Int(*i)], pos);
                Ok(t)
            }
            Expr::Float(f, _) => {
                let t = self.fresh_tmp();
                self.emit(OpCode::LoadImm, vec![Arg::sym(t.clone()), Arg::Float(*f)], pos);
                Ok(t)
            }
            Expr::Str(s, _) => {
                let t = self.fresh_tmp();
                self.emit(OpCode::LoadImm, vec![Arg::sym(t.clone()), Arg::Str(s.clone())], pos);
                Ok(t)
            }
            Expr::Vararg(_) => {
                let t = self.fresh_tmp();
                let va = format!("va{}", self.current_func_id);
                self.emit(OpCode::VarargFirst, vec![Arg::sym(t.clone()), Arg::sym(va)], pos);
                Ok(t)
            }
            Expr::Name(name, resolved, _) => {
                let t = self.fresh_tmp();
                match resolved.get() {
                    Some(VarRef::Local(decl)) => {
                        if self.is_captured(decl) {
                            self.emit(OpCode::CellGet, vec![Arg::sym(t.clone()), Arg::sym(format!("r{decl}"))], pos);
                        } else {
                            self.emit(OpCode::Mov, vec![Arg::sym(t.clone()), Arg::sym(format!("r{decl}"))], pos);
                        }
                    }
                    Some(VarRef::Upvalue(decl)) => {
                        let idx = self.upvalue_index(decl);
                        let cell_tmp = self.fresh_tmp();
                        self.emit(OpCode::BindUpvalue, vec![Arg::sym(cell_tmp.clone()), Arg::Int(idx as i64)], pos);
                        self.emit(OpCode::CellGet, vec![Arg::sym(t.clone()), Arg::sym(cell_tmp)], pos);
                    }
                    Some(VarRef::Global) | None => {
                        self.emit(OpCode::Mov, vec![Arg::sym(t.clone()), Arg::sym(format!("G_{name}"))], pos);
                    }
                }
                Ok(t)
            }
            Expr::Index(obj, idx, _) => {
                let obj_reg = self.compile_expr_single(obj)?;
                let idx_reg = self.compile_expr_single(idx)?;
                let t = self.fresh_tmp();
                self.emit(OpCode::TableGet, vec![Arg::sym(t.clone()), Arg::sym(obj_reg), Arg::sym(idx_reg)], pos);
                Ok(t)
            }
            Expr::Field(obj, name, _) => {
                let obj_reg = self.compile_expr_single(obj)?;
                let t = self.fresh_tmp();
                self.emit(OpCode::TableGet, vec![Arg::sym(t.clone()), Arg::sym(obj_reg), Arg::Str(name.clone())], pos);
                Ok(t)
            }
            Expr::Call(callee, args, _) => {
                self.compile_call_raw(callee, None, args)?;
                let t = self.fresh_tmp();
                self.emit(OpCode::Result, vec![Arg::sym(t.clone())], pos);
                Ok(t)
            }
            Expr::MethodCall(obj, name, args, _) => {
                self.compile_call_raw(obj, Some(name), args)?;
                let t = self.fresh_tmp();
                self.emit(OpCode::Result, vec![Arg::sym(t.clone())], pos);
                Ok(t)
            }
            Expr::Function(body, _) => self.compile_closure_body(body),
            Expr::Table(fields, _) => self.compile_table_ctor(fields, pos),
            Expr::Binary(BinOp::And, a, b, _) => self.compile_shortcircuit(true, a, b),
            Expr::Binary(BinOp::Or, a, b, _) => self.compile_shortcircuit(false, a, b),
            Expr::Binary(op, a, b, _) => self.compile_binop(*op, a, b, pos),
            Expr::Unary(op, a, _) => self.compile_unop(*op, a, pos),
            Expr::Paren(inner, _) => self.compile_expr_single(inner),
        }
    }

    /// Evaluates a multi-valued expression (call/method-call/`...`) into a
    /// register holding a `Value::List` of every result. Only called where `Expr::is_multi()` holds.
    fn compile_expr_multi_as_list(&mut self, e: &Expr) -> EngineResult<String> {
        let pos = e.pos();
        match e {
            Expr::Vararg(_) => Ok(format!("va{}", self.current_func_id)),
            Expr::Call(callee, args, _) => {
                self.compile_call_raw(callee, None, args)?;
                let t = self.fresh_tmp();
                self.emit(OpCode::ResultList, vec![Arg::sym(t.clone())], pos);
                Ok(t)
            }
            Expr::MethodCall(obj, name, args, _) => {
                self.compile_call_raw(obj, Some(name), args)?;
                let t = self.fresh_tmp();
                self.emit(OpCode::ResultList, vec![Arg::sym(t.clone())], pos);
                Ok(t)
            }
            other => self.compile_expr_single(other),
        }
    }

    fn compile_shortcircuit(&mut self, is_and: bool, a: &Expr, b: &Expr) -> EngineResult<String> {
        let pos = a.pos();
        let a_reg = self.compile_expr_single(a)?;
        let result = self.fresh_tmp();
        self.emit(OpCode::Mov, vec![Arg::sym(result.clone()), Arg::sym(a_reg)], pos);
        let end = self.fresh_label();
        if is_and {
            self.emit(OpCode::Jz, vec![Arg::sym(result.clone()), Arg::sym(end.clone())], pos);
        } else {
            self.emit(OpCode::Jnz, vec![Arg::sym(result.clone()), Arg::sym(end.clone())], pos);
        }
        let b_reg = self.compile_expr_single(b)?;
        self.emit(OpCode::Mov, vec![Arg::sym(result.clone()), Arg::sym(b_reg)], pos);
        self.emit_label(end);
        Ok(result)
    }

    fn compile_binop(&mut self, op: BinOp, a: &Expr, b: &Expr, pos: Pos) -> EngineResult<String> {
        let a_reg = self.compile_expr_single(a)?;
        let b_reg = self.compile_expr_single(b)?;
        let t = self.fresh_tmp();
        let args2 = vec![Arg::sym(t.clone()), Arg::sym(a_reg.clone()), Arg::sym(b_reg.clone())];
        match op {
            BinOp::Add => self.emit(OpCode::Add, args2, pos),
            BinOp::Sub => self.emit(OpCode::Sub, args2, pos),
            BinOp::Mul => self.emit(OpCode::Mul, args2, pos),
            BinOp::Div => self.emit(OpCode::Div, args2, pos),
            BinOp::IDiv => self.emit(OpCode::IDiv, args2, pos),
            BinOp::Mod => self.emit(OpCode::Mod, args2, pos),
            BinOp::Pow => self.emit(OpCode::Pow, args2, pos),
            BinOp::Concat => self.emit(OpCode::Concat, args2, pos),
            BinOp::Eq => self.emit(OpCode::Eq, args2, pos),
            BinOp::BAnd => self.emit(OpCode::AndBit, args2, pos),
            BinOp::BOr => self.emit(OpCode::OrBit, args2, pos),
            BinOp::BXor => self.emit(OpCode::Xor, args2, pos),
            BinOp::Shl => self.emit(OpCode::Shl, args2, pos),
            BinOp::Shr => self.emit(OpCode::Shr, args2, pos),
            BinOp::Lt => self.emit(OpCode::Lt, args2, pos),
            BinOp::Gt => self.emit(OpCode::Gt, args2, pos),
            BinOp::Ne => {
                self.emit(OpCode::Eq, args2, pos);
                self.emit(OpCode::Not, vec![Arg::sym(t.clone()), Arg::sym(t.clone())], pos);
            }
            BinOp::Le => {
                self.emit(OpCode::Gt, args2, pos);
                self.emit(OpCode::Not, vec![Arg::sym(t.clone()), Arg::sym(t.clone())], pos);
            }
            BinOp::Ge => {
                self.emit(OpCode::Lt, args2, pos);
                self.emit(OpCode::Not, vec![Arg::sym(t.clone()), Arg::sym(t.clone())], pos);
            }
            BinOp::And | BinOp::Or => unreachable!("handled by compile_shortcircuit"),
        }
        Ok(t)
    }

    fn compile_unop(&mut self, op: UnOp, a: &Expr, pos: Pos) -> EngineResult<String> {
        let a_reg = self.compile_expr_single(a)?;
        let t = self.fresh_tmp();
        let args2 = vec![Arg::sym(t.clone()), Arg::sym(a_reg)];
        match op {
            UnOp::Neg => self.emit(OpCode::Neg, args2, pos),
            UnOp::Not => self.emit(OpCode::Not, args2, pos),
            UnOp::Len => self.emit(OpCode::TableLen, args2, pos),
            UnOp::BNot => self.emit(OpCode::NotBit, args2, pos),
        }
        Ok(t)
    }

    fn compile_table_ctor(&mut self, fields: &[TableField], pos: Pos) -> EngineResult<String> {
        let t = self.fresh_tmp();
        self.emit(OpCode::TableNew, vec![Arg::sym(t.clone())], pos);
        for (i, field) in fields.iter().enumerate() {
            let is_last = i + 1 == fields.len();
            match field {
                TableField::Positional(e) => {
                    if is_last && e.is_multi() {
                        let list_reg = self.compile_expr_multi_as_list(e)?;
                        self.emit(OpCode::TableExtend, vec![Arg::sym(t.clone()), Arg::sym(list_reg)], pos);
                    } else {
                        let v = self.compile_expr_single(e)?;
                        self.emit(OpCode::TableAppend, vec![Arg::sym(t.clone()), Arg::sym(v)], pos);
                    }
                }
                TableField::Named(name, e) => {
                    let v = self.compile_expr_single(e)?;
                    self.emit(OpCode::TableSet, vec![Arg::sym(t.clone()), Arg::Str(name.clone()), Arg::sym(v)], pos);
                }
                TableField::Indexed(k, e) => {
                    let k_reg = self.compile_expr_single(k)?;
                    let v = self.compile_expr_single(e)?;
                    self.emit(OpCode::TableSet, vec![Arg::sym(t.clone()), Arg::sym(k_reg), Arg::sym(v)], pos);
                }
            }
        }
        Ok(t)
    }

    /// Emits `Param`s and a `CallValue`, leaving the callee's `last_return`
    /// ready for `Result`/`ResultMulti`/`ResultList` at the call site.
    fn compile_call_raw(&mut self, callee: &Expr, method: Option<&SmolStr>, call_args: &[Expr]) -> EngineResult<()> {
        let pos = callee.pos();
        let callee_reg = self.compile_expr_single(callee)?;
        let target_reg = if let Some(m) = method {
            let t = self.fresh_tmp();
            self.emit(OpCode::TableGet, vec![Arg::sym(t.clone()), Arg::sym(callee_reg.clone()), Arg::Str(m.clone())], pos);
            self.emit(OpCode::Param, vec![Arg::sym(callee_reg)], pos);
            t
        } else {
            callee_reg
        };
        for (i, a) in call_args.iter().enumerate() {
            let is_last = i + 1 == call_args.len();
            if is_last && a.is_multi() {
                let list_reg = self.compile_expr_multi_as_list(a)?;
                self.emit(OpCode::ParamExpand, vec![Arg::sym(list_reg)], a.pos());
            } else {
                let v = self.compile_expr_single(a)?;
                self.emit(OpCode::Param, vec![Arg::sym(v)], a.pos());
            }
        }
        self.emit(OpCode::CallValue, vec![Arg::sym(target_reg)], pos);
        Ok(())
    }

    /// Emits a `Closure` for `body`'s label, resolving each of its
    /// upvalues from the function currently being compiled, and queues
    /// `body` itself for compilation.
    fn compile_closure_body(&mut self, body: &FunctionBody) -> EngineResult<String> {
        let pos = body.pos;
        let label = format!("fn{}", body.id);
        let upvalues = self.scope.get(&body.id).map(|i| i.upvalues.clone()).unwrap_or_default();
        let mut cell_args = Vec::with_capacity(upvalues.len());
        for (decl, source) in &upvalues {
            match source {
                UpvalueSource::ParentLocal(d) => cell_args.push(Arg::sym(format!("r{d}"))),
                UpvalueSource::ParentUpvalue(d) => {
                    let idx = self.upvalue_index(*d);
                    let tmp = self.fresh_tmp();
                    self.emit(OpCode::BindUpvalue, vec![Arg::sym(tmp.clone()), Arg::Int(idx as i64)], pos);
                    cell_args.push(Arg::sym(tmp));
                }
            }
            let _ = decl;
        }
        let dst = self.fresh_tmp();
        let mut cargs = vec![Arg::sym(dst.clone()), Arg::sym(label.clone())];
        cargs.extend(cell_args);
        self.emit(OpCode::Closure, cargs, pos);
        if self.queued.insert(body.id) {
            self.pending.push_back(body.clone());
        }
        Ok(dst)
    }

    // ---- statements ----

    fn compile_rhs_values(&mut self, num_targets: usize, exprs: &[Expr]) -> EngineResult<Vec<String>> {
        let mut values = Vec::with_capacity(num_targets.max(exprs.len()));
        for (i, e) in exprs.iter().enumerate() {
            let is_last = i + 1 == exprs.len();
            if is_last && e.is_multi() {
                let list_reg = self.compile_expr_multi_as_list(e)?;
                let already = exprs.len() - 1;
                let need = num_targets.saturating_sub(already);
                for k in 0..need {
                    let tmp = self.fresh_tmp();
                    self.emit(OpCode::GetIndex, vec![Arg::sym(tmp.clone()), Arg::sym(list_reg.clone()), Arg::Int(k as i64)], e.pos());
                    values.push(tmp);
                }
            } else {
                values.push(self.compile_expr_single(e)?);
            }
        }
        let pos = exprs.last().map(|e| e.pos()).unwrap_or_default();
        while values.len() < num_targets {
            values.push(self.nil_tmp(pos));
        }
        values.truncate(num_targets);
        Ok(values)
    }

    fn compile_block(&mut self, block: &Block) -> EngineResult<()> {
        for stmt in block {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> EngineResult<()> {
        match stmt {
            Stmt::Expr(e) => match e {
                Expr::Call(callee, args, _) => self.compile_call_raw(callee, None, args),
                Expr::MethodCall(obj, name, args, _) => self.compile_call_raw(obj, Some(name), args),
                _ => {
                    self.compile_expr_single(e)?;
                    Ok(())
                }
            },
            Stmt::Local { names, exprs, pos } => {
                let values = self.compile_rhs_values(names.len(), exprs)?;
                for ((_, decl), reg) in names.iter().zip(values.iter()) {
                    self.declare_local(*decl, reg, *pos);
                }
                Ok(())
            }
            Stmt::Assign { targets, exprs, .. } => {
                let values = self.compile_rhs_values(targets.len(), exprs)?;
                for (target, reg) in targets.iter().zip(values.iter()) {
                    self.assign_to_target(target, reg)?;
                }
                Ok(())
            }
            Stmt::If { arms, else_block, .. } => self.compile_if(arms, else_block),
            Stmt::While { cond, body, .. } => self.compile_while(cond, body),
            Stmt::Repeat { body, cond, .. } => self.compile_repeat(body, cond),
            Stmt::NumericFor { var, start, limit, step, body, pos } => {
                self.compile_numeric_for(var, start, limit, step.as_ref(), body, *pos)
            }
            Stmt::GenericFor { names, exprs, body, pos } => self.compile_generic_for(names, exprs, body, *pos),
            Stmt::Do(body) => self.compile_block(body),
            Stmt::Return(exprs, pos) => self.compile_return(exprs, *pos),
            Stmt::Break(pos) => {
                let label = self
                    .loop_stack
                    .last()
                    .cloned()
                    .ok_or_else(|| EngineError::semantic("break outside a loop"))?;
                self.emit(OpCode::Jmp, vec![Arg::sym(label)], *pos);
                Ok(())
            }
            Stmt::Goto(name, pos) => {
                self.emit(OpCode::Jmp, vec![Arg::sym(format!("user_{}_{}", self.current_func_id, name))], *pos);
                Ok(())
            }
            Stmt::Label(name, _) => {
                self.emit_label(format!("user_{}_{}", self.current_func_id, name));
                Ok(())
            }
            Stmt::FunctionDecl { target, body, .. } => {
                let closure_reg = self.compile_closure_body(body)?;
                self.assign_to_target(target, &closure_reg)
            }
            Stmt::LocalFunction { name, body, pos } => {
                let decl_f = name.1;
                if self.is_captured(decl_f) {
                    let nil = self.nil_tmp(*pos);
                    self.emit(OpCode::MakeCell, vec![Arg::sym(format!("r{decl_f}")), Arg::sym(nil)], *pos);
                }
                let closure_reg = self.compile_closure_body(body)?;
                if self.is_captured(decl_f) {
                    self.emit(OpCode::CellSet, vec![Arg::sym(format!("r{decl_f}")), Arg::sym(closure_reg)], *pos);
                } else {
                    self.emit(OpCode::Mov, vec![Arg::sym(format!("r{decl_f}")), Arg::sym(closure_reg)], *pos);
                }
                Ok(())
            }
        }
    }

    fn compile_if(&mut self, arms: &[(Expr, Block)], else_block: &Option<Block>) -> EngineResult<()> {
        let end = self.fresh_label();
        for (cond, body) in arms {
            let pos = cond.pos();
            let cond_reg = self.compile_expr_single(cond)?;
            let next = self.fresh_label();
            self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(next.clone())], pos);
            self.compile_block(body)?;
            self.emit(OpCode::Jmp, vec![Arg::sym(end.clone())], pos);
            self.emit_label(next);
        }
        if let Some(b) = else_block {
            self.compile_block(b)?;
        }
        self.emit_label(end);
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block) -> EngineResult<()> {
        let top = self.fresh_label();
        let end = self.fresh_label();
        self.emit_label(top.clone());
        let cond_reg = self.compile_expr_single(cond)?;
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(end.clone())], cond.pos());
        self.loop_stack.push(end.clone());
        self.compile_block(body)?;
        self.loop_stack.pop();
        self.emit(OpCode::Jmp, vec![Arg::sym(top)], cond.pos());
        self.emit_label(end);
        Ok(())
    }

    fn compile_repeat(&mut self, body: &Block, cond: &Expr) -> EngineResult<()> {
        let top = self.fresh_label();
        let end = self.fresh_label();
        self.emit_label(top.clone());
        self.loop_stack.push(end.clone());
        self.compile_block(body)?;
        self.loop_stack.pop();
        let cond_reg = self.compile_expr_single(cond)?;
        self.emit(OpCode::Jz, vec![Arg::sym(cond_reg), Arg::sym(top)], cond.pos());
        self.emit_label(end);
        Ok(())
    }

    fn compile_numeric_for(
        &mut self,
        var: &(SmolStr, DeclId),
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
        pos: Pos,
    ) -> EngineResult<()> {
        let start_reg = self.compile_expr_single(start)?;
        let limit_reg = self.compile_expr_single(limit)?;
        let step_reg = match step {
            Some(s) => self.compile_expr_single(s)?,
            None => {
                let t = self.fresh_tmp();
                self.emit(OpCode::LoadImm, vec![Arg::sym(t.clone()), Arg::Int(1)], pos);
                t
            }
        };
        let ctrl = self.fresh_tmp();
        self.emit(OpCode::Mov, vec![Arg::sym(ctrl.clone()), Arg::sym(start_reg)], pos);
        let neg_step = self.fresh_tmp();
        self.emit(OpCode::Lt, vec![Arg::sym(neg_step.clone()), Arg::sym(step_reg.clone()), Arg::Int(0)], pos);

        let top = self.fresh_label();
        let body_label = self.fresh_label();
        let neg_branch = self.fresh_label();
        let end = self.fresh_label();
        self.emit_label(top.clone());

        let le_tmp = self.fresh_tmp();
        self.emit(OpCode::Gt, vec![Arg::sym(le_tmp.clone()), Arg::sym(ctrl.clone()), Arg::sym(limit_reg.clone())], pos);
        self.emit(OpCode::Not, vec![Arg::sym(le_tmp.clone()), Arg::sym(le_tmp.clone())], pos);
        let ge_tmp = self.fresh_tmp();
        self.emit(OpCode::Lt, vec![Arg::sym(ge_tmp.clone()), Arg::sym(ctrl.clone()), Arg::sym(limit_reg.clone())], pos);
        self.emit(OpCode::Not, vec![Arg::sym(ge_tmp.clone()), Arg::sym(ge_tmp.clone())], pos);

        self.emit(OpCode::Jnz, vec![Arg::sym(neg_step.clone()), Arg::sym(neg_branch.clone())], pos);
        self.emit(OpCode::Jz, vec![Arg::sym(le_tmp), Arg::sym(end.clone())], pos);
        self.emit(OpCode::Jmp, vec![Arg::sym(body_label.clone())], pos);
        self.emit_label(neg_branch);
        self.emit(OpCode::Jz, vec![Arg::sym(ge_tmp), Arg::sym(end.clone())], pos);
        self.emit_label(body_label);

        self.declare_local(var.1, &ctrl, pos);
        self.loop_stack.push(end.clone());
        self.compile_block(body)?;
        self.loop_stack.pop();

        let next_ctrl = self.fresh_tmp();
        self.emit(OpCode::Add, vec![Arg::sym(next_ctrl.clone()), Arg::sym(ctrl.clone()), Arg::sym(step_reg)], pos);
        self.emit(OpCode::Mov, vec![Arg::sym(ctrl), Arg::sym(next_ctrl)], pos);
        self.emit(OpCode::Jmp, vec![Arg::sym(top)], pos);
        self.emit_label(end);
        Ok(())
    }

    fn compile_generic_for(&mut self, names: &[(SmolStr, DeclId)], exprs: &[Expr], body: &Block, pos: Pos) -> EngineResult<()> {
        // The `in` clause's expression list follows the same adjustment
        // rule as a multiple assignment's right-hand side: only the last
        // expression, if multi-valued, expands to fill the remaining
        // iterator/state/control slots — the common `for k, v in pairs(t)
        // do` idiom relies on `pairs(t)`'s three-value return doing
        // exactly that.
        let mut values = self.compile_rhs_values(3, exprs)?;
        let ctrl = values.pop().unwrap();
        let state_reg = values.pop().unwrap();
        let iter_reg = values.pop().unwrap();
        // `ctrl` is a single fixed register, updated in place every
        // iteration — the loop body reached by `Jmp top` below must see
        // the previous iteration's control value, not a fresh name.

        let top = self.fresh_label();
        let end = self.fresh_label();
        self.emit_label(top.clone());

        self.emit(OpCode::Param, vec![Arg::sym(state_reg.clone())], pos);
        self.emit(OpCode::Param, vec![Arg::sym(ctrl.clone())], pos);
        self.emit(OpCode::CallValue, vec![Arg::sym(iter_reg.clone())], pos);

        let mut result_regs = Vec::with_capacity(names.len().max(1));
        for _ in 0..names.len().max(1) {
            result_regs.push(self.fresh_tmp());
        }
        self.emit(OpCode::ResultMulti, result_regs.iter().map(|r| Arg::sym(r.clone())).collect(), pos);

        let is_nil = self.fresh_tmp();
        self.emit(OpCode::Eq, vec![Arg::sym(is_nil.clone()), Arg::sym(result_regs[0].clone()), Arg::Nil], pos);
        self.emit(OpCode::Jnz, vec![Arg::sym(is_nil), Arg::sym(end.clone())], pos);

        self.emit(OpCode::Mov, vec![Arg::sym(ctrl.clone()), Arg::sym(result_regs[0].clone())], pos);

        for ((_, decl), reg) in names.iter().zip(result_regs.iter()) {
            self.declare_local(*decl, reg, pos);
        }

        self.loop_stack.push(end.clone());
        self.compile_block(body)?;
        self.loop_stack.pop();
        self.emit(OpCode::Jmp, vec![Arg::sym(top)], pos);
        self.emit_label(end);
        Ok(())
    }

    fn compile_return(&mut self, exprs: &[Expr], pos: Pos) -> EngineResult<()> {
        if exprs.is_empty() {
            self.emit(OpCode::ReturnMulti, vec![], pos);
        } else if exprs.len() == 1 && exprs[0].is_multi() {
            let list_reg = self.compile_expr_multi_as_list(&exprs[0])?;
            self.emit(OpCode::ReturnList, vec![Arg::sym(list_reg)], pos);
        } else {
            let mut regs = Vec::with_capacity(exprs.len());
            for e in exprs {
                regs.push(self.compile_expr_single(e)?);
            }
            self.emit(OpCode::ReturnMulti, regs.into_iter().map(Arg::sym).collect(), pos);
        }
        Ok(())
    }
}

impl<'a> Compiler<'a> {
    fn compile_main(&mut self, chunk: &FunctionBody) -> EngineResult<()> {
        self.current_func_id = chunk.id;
        self.current_name = SmolStr::new_static("<chunk>");
        self.emit(OpCode::Vararg, vec![Arg::sym(format!("va{}", chunk.id))], chunk.pos);
        self.compile_block(&chunk.body)?;
        self.emit(OpCode::Halt, vec![], chunk.pos);
        Ok(())
    }

    fn compile_function(&mut self, body: &FunctionBody) -> EngineResult<()> {
        self.current_func_id = body.id;
        self.current_name = if body.name_hint.is_empty() { SmolStr::new_static("?") } else { body.name_hint.clone() };
        self.emit_label(format!("fn{}", body.id));
        for (_, decl) in &body.params {
            if self.is_captured(*decl) {
                let tmp = self.fresh_tmp();
                self.emit(OpCode::Arg, vec![Arg::sym(tmp.clone())], body.pos);
                self.emit(OpCode::MakeCell, vec![Arg::sym(format!("r{decl}")), Arg::sym(tmp)], body.pos);
            } else {
                self.emit(OpCode::Arg, vec![Arg::sym(format!("r{decl}"))], body.pos);
            }
        }
        if body.is_vararg {
            self.emit(OpCode::Vararg, vec![Arg::sym(format!("va{}", body.id))], body.pos);
        }
        self.compile_block(&body.body)?;
        self.emit(OpCode::ReturnMulti, vec![], body.pos);
        Ok(())
    }
}

/// Compiles a parsed, analyzed chunk into a flat instruction stream.
/// `file` names the source for tracebacks.
pub fn compile(chunk: &FunctionBody, scope: &ScopeInfo, file: impl Into<SmolStr>) -> EngineResult<Vec<Instruction>> {
    let mut c = Compiler::new(scope, file.into());
    c.queued.insert(chunk.id);
    c.compile_main(chunk)?;
    while let Some(body) = c.pending.pop_front() {
        if body.id == chunk.id {
            continue;
        }
        c.compile_function(&body)?;
    }
    Ok(c.out)
}
