//! Lua AST. Every node carries a source position
//! (`Pos`), and name-expressions/function bodies carry a resolution slot
//! the scope analyzer fills in.

use smol_str::SmolStr;
use std::cell::Cell;

pub type DeclId = u32;
pub type FuncId = u32;

#[derive(Debug, Clone, Copy, Default)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

/// What a variable name resolves to, filled in by the scope analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRef {
    Local(DeclId),
    Upvalue(DeclId),
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add, Sub, Mul, Div, IDiv, Mod, Pow, Concat,
    Eq, Ne, Lt, Le, Gt, Ge,
    And, Or,
    BAnd, BOr, BXor, Shl, Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg, Not, Len, BNot,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Nil(Pos),
    True(Pos),
    False(Pos),
    Vararg(Pos),
    Int(i64, Pos),
    Float(f64, Pos),
    Str(SmolStr, Pos),
    /// A name reference; `resolved` is filled in by the scope analyzer.
    Name(SmolStr, Cell<Option<VarRef>>, Pos),
    Index(Box<Expr>, Box<Expr>, Pos),
    Field(Box<Expr>, SmolStr, Pos),
    Call(Box<Expr>, Vec<Expr>, Pos),
    MethodCall(Box<Expr>, SmolStr, Vec<Expr>, Pos),
    Function(Box<FunctionBody>, Pos),
    Table(Vec<TableField>, Pos),
    Binary(BinOp, Box<Expr>, Box<Expr>, Pos),
    Unary(UnOp, Box<Expr>, Pos),
    /// `(expr)`: truncates a multi-value expression to exactly one value.
    Paren(Box<Expr>, Pos),
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Nil(p) | Expr::True(p) | Expr::False(p) | Expr::Vararg(p)
            | Expr::Int(_, p) | Expr::Float(_, p) | Expr::Str(_, p)
            | Expr::Name(_, _, p) | Expr::Index(_, _, p) | Expr::Field(_, _, p)
            | Expr::Call(_, _, p) | Expr::MethodCall(_, _, _, p) | Expr::Function(_, p)
            | Expr::Table(_, p) | Expr::Binary(_, _, _, p) | Expr::Unary(_, _, p)
            | Expr::Paren(_, p) => *p,
        }
    }

    /// True for expressions whose call-site cardinality can be > 1: a
    /// direct call, method call, or `...`, and *only* when not parenthesized.
    pub fn is_multi(&self) -> bool {
        matches!(self, Expr::Call(..) | Expr::MethodCall(..) | Expr::Vararg(_))
    }

    pub fn name(name: impl Into<SmolStr>, pos: Pos) -> Expr {
        Expr::Name(name.into(), Cell::new(None), pos)
    }
}

#[derive(Debug, Clone)]
pub enum TableField {
    Positional(Expr),
    Named(SmolStr, Expr),
    Indexed(Expr, Expr),
}

#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub id: FuncId,
    pub params: Vec<(SmolStr, DeclId)>,
    pub is_vararg: bool,
    pub body: Block,
    pub name_hint: SmolStr,
    pub pos: Pos,
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Local { names: Vec<(SmolStr, DeclId)>, exprs: Vec<Expr>, pos: Pos },
    Assign { targets: Vec<Expr>, exprs: Vec<Expr>, pos: Pos },
    If { arms: Vec<(Expr, Block)>, else_block: Option<Block>, pos: Pos },
    While { cond: Expr, body: Block, pos: Pos },
    Repeat { body: Block, cond: Expr, pos: Pos },
    NumericFor { var: (SmolStr, DeclId), start: Expr, limit: Expr, step: Option<Expr>, body: Block, pos: Pos },
    GenericFor { names: Vec<(SmolStr, DeclId)>, exprs: Vec<Expr>, body: Block, pos: Pos },
    Do(Block),
    Return(Vec<Expr>, Pos),
    Break(Pos),
    Goto(SmolStr, Pos),
    Label(SmolStr, Pos),
    FunctionDecl { target: Expr, is_method: bool, body: FunctionBody, pos: Pos },
    LocalFunction { name: (SmolStr, DeclId), body: FunctionBody, pos: Pos },
}

/// Where an upvalue slot is bound from when its owning closure is
/// constructed: either the immediately enclosing function's own named
/// register (captured as a fresh `Cell`), or a slot the enclosing function
/// itself already receives as one of *its* upvalues (a pass-through).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueSource {
    ParentLocal(DeclId),
    ParentUpvalue(DeclId),
}

/// Per-function analysis result produced by the scope analyzer.
#[derive(Debug, Clone, Default)]
pub struct FunctionInfo {
    pub captured_locals: std::collections::HashSet<DeclId>,
    /// Ordered by first reference, stable across recompilations.
    pub upvalues: Vec<(DeclId, UpvalueSource)>,
    pub has_vararg: bool,
}
