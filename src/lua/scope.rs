//! Per-function captured-locals and upvalue-ordering analysis. One pre-pass over the whole chunk, walked in the same order the
//! parser produced the tree, so an ancestor function's locally-visible
//! scope at the point a nested function is defined matches exactly what
//! the parser saw there.

use super::ast::*;
use ahash::AHashMap;
use smol_str::SmolStr;
use std::collections::HashSet;

/// Mapping `function-AST-node → FunctionInfo`, keyed by [`FuncId`].
pub type ScopeInfo = AHashMap<FuncId, FunctionInfo>;

struct FuncScope {
    func_id: FuncId,
    scopes: Vec<AHashMap<SmolStr, DeclId>>,
    info: FunctionInfo,
    upvalue_index: AHashMap<DeclId, usize>,
}

impl FuncScope {
    fn new(func_id: FuncId, has_vararg: bool) -> FuncScope {
        FuncScope {
            func_id,
            scopes: vec![AHashMap::default()],
            info: FunctionInfo { captured_locals: HashSet::new(), upvalues: Vec::new(), has_vararg },
            upvalue_index: AHashMap::default(),
        }
    }

    fn push_block(&mut self) {
        self.scopes.push(AHashMap::default());
    }

    fn pop_block(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &SmolStr, decl: DeclId) {
        self.scopes.last_mut().unwrap().insert(name.clone(), decl);
    }

    fn find_local(&self, name: &str) -> Option<DeclId> {
        for scope in self.scopes.iter().rev() {
            if let Some(decl) = scope.get(name) {
                return Some(*decl);
            }
        }
        None
    }

    fn add_upvalue(&mut self, decl: DeclId, source: UpvalueSource) {
        if !self.upvalue_index.contains_key(&decl) {
            self.upvalue_index.insert(decl, self.info.upvalues.len());
            self.info.upvalues.push((decl, source));
        }
    }
}

pub struct Analyzer {
    stack: Vec<FuncScope>,
    result: ScopeInfo,
}

impl Analyzer {
    fn new() -> Analyzer {
        Analyzer { stack: Vec::new(), result: AHashMap::default() }
    }

    fn resolve_name(&mut self, name: &str) -> VarRef {
        let cur = self.stack.len() - 1;
        if let Some(decl) = self.stack[cur].find_local(name) {
            return VarRef::Local(decl);
        }
        let mut found: Option<(usize, DeclId)> = None;
        for idx in (0..cur).rev() {
            if let Some(decl) = self.stack[idx].find_local(name) {
                found = Some((idx, decl));
                break;
            }
        }
        let Some((ancestor_idx, decl)) = found else {
            return VarRef::Global;
        };
        self.stack[ancestor_idx].info.captured_locals.insert(decl);
        for idx in (ancestor_idx + 1)..=cur {
            let source = if idx == ancestor_idx + 1 {
                UpvalueSource::ParentLocal(decl)
            } else {
                UpvalueSource::ParentUpvalue(decl)
            };
            self.stack[idx].add_upvalue(decl, source);
        }
        VarRef::Upvalue(decl)
    }

    fn enter_function(&mut self, body: &FunctionBody) {
        self.stack.push(FuncScope::new(body.id, body.is_vararg));
        for (name, decl) in &body.params {
            self.stack.last_mut().unwrap().declare(name, *decl);
        }
        self.walk_block(&body.body);
        let scope = self.stack.pop().unwrap();
        self.result.insert(scope.func_id, scope.info);
    }

    fn walk_block(&mut self, block: &Block) {
        self.stack.last_mut().unwrap().push_block();
        for stmt in block {
            self.walk_stmt(stmt);
        }
        self.stack.last_mut().unwrap().pop_block();
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => self.walk_expr(e),
            Stmt::Local { names, exprs, .. } => {
                for e in exprs {
                    self.walk_expr(e);
                }
                for (name, decl) in names {
                    self.stack.last_mut().unwrap().declare(name, *decl);
                }
            }
            Stmt::Assign { targets, exprs, .. } => {
                for e in exprs {
                    self.walk_expr(e);
                }
                for t in targets {
                    self.walk_expr(t);
                }
            }
            Stmt::If { arms, else_block, .. } => {
                for (cond, body) in arms {
                    self.walk_expr(cond);
                    self.walk_block(body);
                }
                if let Some(b) = else_block {
                    self.walk_block(b);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.walk_expr(cond);
                self.walk_block(body);
            }
            Stmt::Repeat { body, cond, .. } => {
                // `until` sees the body's locals, so the
                // condition is walked inside the same block scope.
                self.stack.last_mut().unwrap().push_block();
                for stmt in body {
                    self.walk_stmt(stmt);
                }
                self.walk_expr(cond);
                self.stack.last_mut().unwrap().pop_block();
            }
            Stmt::NumericFor { var, start, limit, step, body, .. } => {
                self.walk_expr(start);
                self.walk_expr(limit);
                if let Some(s) = step {
                    self.walk_expr(s);
                }
                self.stack.last_mut().unwrap().push_block();
                self.stack.last_mut().unwrap().declare(&var.0, var.1);
                for stmt in body {
                    self.walk_stmt(stmt);
                }
                self.stack.last_mut().unwrap().pop_block();
            }
            Stmt::GenericFor { names, exprs, body, .. } => {
                for e in exprs {
                    self.walk_expr(e);
                }
                self.stack.last_mut().unwrap().push_block();
                for (name, decl) in names {
                    self.stack.last_mut().unwrap().declare(name, *decl);
                }
                for stmt in body {
                    self.walk_stmt(stmt);
                }
                self.stack.last_mut().unwrap().pop_block();
            }
            Stmt::Do(body) => self.walk_block(body),
            Stmt::Return(exprs, _) => {
                for e in exprs {
                    self.walk_expr(e);
                }
            }
            Stmt::Break(_) | Stmt::Goto(_, _) | Stmt::Label(_, _) => {}
            Stmt::FunctionDecl { target, body, .. } => {
                self.walk_expr(target);
                self.enter_function(body);
            }
            Stmt::LocalFunction { name, body, .. } => {
                // Visible to its own body (recursion) per Lua's
                // `local function` sugar: declare before analyzing the body.
                self.stack.last_mut().unwrap().declare(&name.0, name.1);
                self.enter_function(body);
            }
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Nil(_) | Expr::True(_) | Expr::False(_) | Expr::Vararg(_)
            | Expr::Int(_, _) | Expr::Float(_, _) | Expr::Str(_, _) => {}
            Expr::Name(name, resolved, _) => {
                let r = self.resolve_name(name);
                resolved.set(Some(r));
            }
            Expr::Index(obj, idx, _) => {
                self.walk_expr(obj);
                self.walk_expr(idx);
            }
            Expr::Field(obj, _, _) => self.walk_expr(obj),
            Expr::Call(callee, args, _) => {
                self.walk_expr(callee);
                for a in args {
                    self.walk_expr(a);
                }
            }
            Expr::MethodCall(obj, _, args, _) => {
                self.walk_expr(obj);
                for a in args {
                    self.walk_expr(a);
                }
            }
            Expr::Function(body, _) => self.enter_function(body),
            Expr::Table(fields, _) => {
                for f in fields {
                    match f {
                        TableField::Positional(e) => self.walk_expr(e),
                        TableField::Named(_, e) => self.walk_expr(e),
                        TableField::Indexed(k, v) => {
                            self.walk_expr(k);
                            self.walk_expr(v);
                        }
                    }
                }
            }
            Expr::Binary(_, a, b, _) => {
                self.walk_expr(a);
                self.walk_expr(b);
            }
            Expr::Unary(_, a, _) => self.walk_expr(a),
            Expr::Paren(a, _) => self.walk_expr(a),
        }
    }
}

/// Analyzes a whole chunk, returning per-function capture/upvalue info
/// indexed by [`FuncId`].
pub fn analyze(chunk: &FunctionBody) -> ScopeInfo {
    let mut analyzer = Analyzer::new();
    analyzer.enter_function(chunk);
    analyzer.result
}

#[cfg(test)]
mod scope_tests {
    use super::*;
    use crate::lua::ast::*;

    fn name_expr(s: &str) -> Expr {
        Expr::name(s, Pos::default())
    }

    #[test]
    fn a_local_referenced_from_a_nested_function_is_captured_as_an_upvalue() {
        // local x = 1
        // function() return x end
        let inner = FunctionBody {
            id: 1,
            params: vec![],
            is_vararg: false,
            body: vec![Stmt::Return(vec![name_expr("x")], Pos::default())],
            name_hint: "inner".into(),
            pos: Pos::default(),
        };
        let outer = FunctionBody {
            id: 0,
            params: vec![],
            is_vararg: false,
            body: vec![
                Stmt::Local { names: vec![("x".into(), 100)], exprs: vec![], pos: Pos::default() },
                Stmt::Expr(Expr::Function(Box::new(inner), Pos::default())),
            ],
            name_hint: "outer".into(),
            pos: Pos::default(),
        };

        let info = analyze(&outer);
        assert!(info[&0].captured_locals.contains(&100));
        assert_eq!(info[&1].upvalues, vec![(100, UpvalueSource::ParentLocal(100))]);
    }

    #[test]
    fn an_undeclared_name_resolves_to_global_not_a_local_or_upvalue() {
        let chunk = FunctionBody {
            id: 0,
            params: vec![],
            is_vararg: false,
            body: vec![Stmt::Expr(name_expr("undeclared"))],
            name_hint: "main".into(),
            pos: Pos::default(),
        };
        let Stmt::Expr(Expr::Name(_, resolved, _)) = &chunk.body[0] else { unreachable!() };
        analyze(&chunk);
        assert_eq!(resolved.get(), Some(VarRef::Global));
    }

    #[test]
    fn a_local_shadows_an_outer_local_of_the_same_name_within_its_block() {
        let chunk = FunctionBody {
            id: 0,
            params: vec![],
            is_vararg: false,
            body: vec![
                Stmt::Local { names: vec![("x".into(), 1)], exprs: vec![], pos: Pos::default() },
                Stmt::Do(vec![
                    Stmt::Local { names: vec![("x".into(), 2)], exprs: vec![], pos: Pos::default() },
                    Stmt::Expr(name_expr("x")),
                ]),
            ],
            name_hint: "main".into(),
            pos: Pos::default(),
        };
        let Stmt::Do(inner_block) = &chunk.body[1] else { unreachable!() };
        let Stmt::Expr(Expr::Name(_, resolved, _)) = &inner_block[1] else { unreachable!() };
        analyze(&chunk);
        assert_eq!(resolved.get(), Some(VarRef::Local(2)));
    }
}
