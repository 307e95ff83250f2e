//! Recursive-descent statement parser, precedence-climbing expression
//! parser.

use super::ast::*;
use super::token::{Lexer, Token, TokenKind};
use crate::vm::EngineError;
use smol_str::SmolStr;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    cur: Token,
    ahead: Option<Token>,
    next_decl: DeclId,
    next_func: FuncId,
}

type PResult<T> = Result<T, EngineError>;

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> PResult<Parser<'a>> {
        let mut lexer = Lexer::new(src);
        let cur = lexer.next_token()?;
        Ok(Parser { lexer, cur, ahead: None, next_decl: 0, next_func: 0 })
    }

    fn fresh_decl(&mut self) -> DeclId {
        let id = self.next_decl;
        self.next_decl += 1;
        id
    }

    fn fresh_func(&mut self) -> FuncId {
        let id = self.next_func;
        self.next_func += 1;
        id
    }

    fn pos(&self) -> Pos {
        Pos { line: self.cur.line, column: self.cur.column }
    }

    fn bump(&mut self) -> PResult<Token> {
        let next = match self.ahead.take() {
            Some(t) => t,
            None => self.lexer.next_token()?,
        };
        Ok(std::mem::replace(&mut self.cur, next))
    }

    fn peek2(&mut self) -> PResult<&Token> {
        if self.ahead.is_none() {
            self.ahead = Some(self.lexer.next_token()?);
        }
        Ok(self.ahead.as_ref().unwrap())
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.cur.kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> PResult<bool> {
        if self.check(kind) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<()> {
        if self.check(&kind) {
            self.bump()?;
            Ok(())
        } else {
            Err(EngineError::syntactic(format!(
                "expected {} at {}:{}, found {:?}",
                what, self.cur.line, self.cur.column, self.cur.kind
            )))
        }
    }

    fn expect_name(&mut self) -> PResult<SmolStr> {
        match self.cur.kind.clone() {
            TokenKind::Name(n) => {
                self.bump()?;
                Ok(n)
            }
            other => Err(EngineError::syntactic(format!(
                "expected name at {}:{}, found {:?}",
                self.cur.line, self.cur.column, other
            ))),
        }
    }

    pub fn parse_chunk(&mut self) -> PResult<FunctionBody> {
        let pos = self.pos();
        let body = self.parse_block()?;
        if !self.check(&TokenKind::Eof) {
            return Err(EngineError::syntactic(format!(
                "unexpected token {:?} at {}:{}",
                self.cur.kind, self.cur.line, self.cur.column
            )));
        }
        Ok(FunctionBody {
            id: self.fresh_func(),
            params: Vec::new(),
            is_vararg: true,
            body,
            name_hint: SmolStr::new("main chunk"),
            pos,
        })
    }

    fn block_follow(&self) -> bool {
        matches!(
            self.cur.kind,
            TokenKind::Eof
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
        )
    }

    fn parse_block(&mut self) -> PResult<Block> {
        let mut stmts = Vec::new();
        while !self.block_follow() {
            if self.check(&TokenKind::Return) {
                stmts.push(self.parse_return()?);
                break;
            }
            if let Some(stmt) = self.parse_statement()? {
                stmts.push(stmt);
            }
        }
        Ok(stmts)
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let pos = self.pos();
        self.bump()?;
        let mut exprs = Vec::new();
        if !self.block_follow() && !self.check(&TokenKind::Semi) {
            exprs.push(self.parse_expr()?);
            while self.eat(&TokenKind::Comma)? {
                exprs.push(self.parse_expr()?);
            }
        }
        self.eat(&TokenKind::Semi)?;
        Ok(Stmt::Return(exprs, pos))
    }

    fn parse_statement(&mut self) -> PResult<Option<Stmt>> {
        let pos = self.pos();
        match self.cur.kind.clone() {
            TokenKind::Semi => {
                self.bump()?;
                Ok(None)
            }
            TokenKind::DColon => {
                self.bump()?;
                let name = self.expect_name()?;
                self.expect(TokenKind::DColon, "'::'")?;
                Ok(Some(Stmt::Label(name, pos)))
            }
            TokenKind::Break => {
                self.bump()?;
                Ok(Some(Stmt::Break(pos)))
            }
            TokenKind::Goto => {
                self.bump()?;
                let name = self.expect_name()?;
                Ok(Some(Stmt::Goto(name, pos)))
            }
            TokenKind::Do => {
                self.bump()?;
                let body = self.parse_block()?;
                self.expect(TokenKind::End, "'end'")?;
                Ok(Some(Stmt::Do(body)))
            }
            TokenKind::While => {
                self.bump()?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Do, "'do'")?;
                let body = self.parse_block()?;
                self.expect(TokenKind::End, "'end'")?;
                Ok(Some(Stmt::While { cond, body, pos }))
            }
            TokenKind::Repeat => {
                self.bump()?;
                let body = self.parse_block()?;
                self.expect(TokenKind::Until, "'until'")?;
                let cond = self.parse_expr()?;
                Ok(Some(Stmt::Repeat { body, cond, pos }))
            }
            TokenKind::If => Ok(Some(self.parse_if()?)),
            TokenKind::For => Ok(Some(self.parse_for(pos)?)),
            TokenKind::Function => Ok(Some(self.parse_function_stmt(pos)?)),
            TokenKind::Local => Ok(Some(self.parse_local(pos)?)),
            _ => Ok(Some(self.parse_expr_or_assign(pos)?)),
        }
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let pos = self.pos();
        self.bump()?;
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Then, "'then'")?;
        let body = self.parse_block()?;
        arms.push((cond, body));
        while self.check(&TokenKind::Elseif) {
            self.bump()?;
            let cond = self.parse_expr()?;
            self.expect(TokenKind::Then, "'then'")?;
            let body = self.parse_block()?;
            arms.push((cond, body));
        }
        let else_block = if self.eat(&TokenKind::Else)? {
            Some(self.parse_block()?)
        } else {
            None
        };
        self.expect(TokenKind::End, "'end'")?;
        Ok(Stmt::If { arms, else_block, pos })
    }

    fn parse_for(&mut self, pos: Pos) -> PResult<Stmt> {
        self.bump()?;
        let first = self.expect_name()?;
        if self.check(&TokenKind::Assign) {
            self.bump()?;
            let start = self.parse_expr()?;
            self.expect(TokenKind::Comma, "','")?;
            let limit = self.parse_expr()?;
            let step = if self.eat(&TokenKind::Comma)? {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(TokenKind::Do, "'do'")?;
            let body = self.parse_block()?;
            self.expect(TokenKind::End, "'end'")?;
            let var = (first, self.fresh_decl());
            Ok(Stmt::NumericFor { var, start, limit, step, body, pos })
        } else {
            let mut names = vec![(first, self.fresh_decl())];
            while self.eat(&TokenKind::Comma)? {
                let n = self.expect_name()?;
                names.push((n, self.fresh_decl()));
            }
            self.expect(TokenKind::In, "'in'")?;
            let mut exprs = vec![self.parse_expr()?];
            while self.eat(&TokenKind::Comma)? {
                exprs.push(self.parse_expr()?);
            }
            self.expect(TokenKind::Do, "'do'")?;
            let body = self.parse_block()?;
            self.expect(TokenKind::End, "'end'")?;
            Ok(Stmt::GenericFor { names, exprs, body, pos })
        }
    }

    fn parse_function_stmt(&mut self, pos: Pos) -> PResult<Stmt> {
        self.bump()?;
        let first = self.expect_name()?;
        let mut target = Expr::name(first.clone(), pos);
        let mut name_hint = first;
        let mut is_method = false;
        loop {
            if self.eat(&TokenKind::Dot)? {
                let field = self.expect_name()?;
                name_hint = field.clone();
                target = Expr::Field(Box::new(target), field, pos);
            } else if self.eat(&TokenKind::Colon)? {
                let field = self.expect_name()?;
                name_hint = field.clone();
                target = Expr::Field(Box::new(target), field, pos);
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let body = self.parse_function_body(pos, name_hint, is_method)?;
        Ok(Stmt::FunctionDecl { target, is_method, body, pos })
    }

    fn parse_function_body(&mut self, pos: Pos, name_hint: SmolStr, is_method: bool) -> PResult<FunctionBody> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if is_method {
            params.push((SmolStr::new("self"), self.fresh_decl()));
        }
        let mut is_vararg = false;
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.eat(&TokenKind::Ellipsis)? {
                    is_vararg = true;
                    break;
                }
                let n = self.expect_name()?;
                params.push((n, self.fresh_decl()));
                if !self.eat(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        self.expect(TokenKind::End, "'end'")?;
        Ok(FunctionBody { id: self.fresh_func(), params, is_vararg, body, name_hint, pos })
    }

    fn parse_local(&mut self, pos: Pos) -> PResult<Stmt> {
        self.bump()?;
        if self.eat(&TokenKind::Function)? {
            let n = self.expect_name()?;
            let decl = self.fresh_decl();
            let body = self.parse_function_body(pos, n.clone(), false)?;
            return Ok(Stmt::LocalFunction { name: (n, decl), body, pos });
        }
        let mut names = Vec::new();
        loop {
            let n = self.expect_name()?;
            // Lua attribute syntax `<const>`/`<close>` is accepted and ignored.
            if self.eat(&TokenKind::Lt)? {
                self.expect_name()?;
                self.expect(TokenKind::Gt, "'>'")?;
            }
            names.push((n, self.fresh_decl()));
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        let mut exprs = Vec::new();
        if self.eat(&TokenKind::Assign)? {
            exprs.push(self.parse_expr()?);
            while self.eat(&TokenKind::Comma)? {
                exprs.push(self.parse_expr()?);
            }
        }
        Ok(Stmt::Local { names, exprs, pos })
    }

    fn parse_expr_or_assign(&mut self, pos: Pos) -> PResult<Stmt> {
        let first = self.parse_suffixed_expr()?;
        if self.check(&TokenKind::Assign) || self.check(&TokenKind::Comma) {
            let mut targets = vec![first];
            while self.eat(&TokenKind::Comma)? {
                targets.push(self.parse_suffixed_expr()?);
            }
            self.expect(TokenKind::Assign, "'='")?;
            let mut exprs = vec![self.parse_expr()?];
            while self.eat(&TokenKind::Comma)? {
                exprs.push(self.parse_expr()?);
            }
            Ok(Stmt::Assign { targets, exprs, pos })
        } else {
            match &first {
                Expr::Call(..) | Expr::MethodCall(..) => Ok(Stmt::Expr(first)),
                _ => Err(EngineError::syntactic(format!(
                    "syntax error: expression statement must be a call at {}:{}",
                    pos.line, pos.column
                ))),
            }
        }
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_cmp()?;
        while self.check(&TokenKind::And) {
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_cmp()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bor()?;
        loop {
            let op = match self.cur.kind {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::LtEq => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::GtEq => BinOp::Ge,
                _ => break,
            };
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_bor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_bor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bxor()?;
        while self.check(&TokenKind::Pipe) {
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_bxor()?;
            lhs = Expr::Binary(BinOp::BOr, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_bxor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_band()?;
        while self.check(&TokenKind::Tilde) {
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_band()?;
            lhs = Expr::Binary(BinOp::BXor, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_band(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_shift()?;
        while self.check(&TokenKind::Amp) {
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary(BinOp::BAnd, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_concat()?;
        loop {
            let op = match self.cur.kind {
                TokenKind::Shl => BinOp::Shl,
                TokenKind::Shr => BinOp::Shr,
                _ => break,
            };
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_concat()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    /// Right-associative.
    fn parse_concat(&mut self) -> PResult<Expr> {
        let lhs = self.parse_additive()?;
        if self.check(&TokenKind::DDot) {
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_concat()?;
            Ok(Expr::Binary(BinOp::Concat, Box::new(lhs), Box::new(rhs), pos))
        } else {
            Ok(lhs)
        }
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.cur.kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.cur.kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DSlash => BinOp::IDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        let op = match self.cur.kind {
            TokenKind::Not => UnOp::Not,
            TokenKind::Hash => UnOp::Len,
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Tilde => UnOp::BNot,
            _ => return self.parse_pow(),
        };
        self.bump()?;
        let operand = self.parse_unary()?;
        Ok(Expr::Unary(op, Box::new(operand), pos))
    }

    /// Right-associative, binds tighter than unary on its left (`-x^2` is
    /// `-(x^2)`) but the recursive call above already handles that by
    /// parsing unary first.
    fn parse_pow(&mut self) -> PResult<Expr> {
        let lhs = self.parse_suffixed_expr_or_primary()?;
        if self.check(&TokenKind::Caret) {
            let pos = self.pos();
            self.bump()?;
            let rhs = self.parse_unary()?;
            Ok(Expr::Binary(BinOp::Pow, Box::new(lhs), Box::new(rhs), pos))
        } else {
            Ok(lhs)
        }
    }

    fn parse_suffixed_expr_or_primary(&mut self) -> PResult<Expr> {
        self.parse_suffixed_expr()
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        match self.cur.kind.clone() {
            TokenKind::Nil => {
                self.bump()?;
                Ok(Expr::Nil(pos))
            }
            TokenKind::True => {
                self.bump()?;
                Ok(Expr::True(pos))
            }
            TokenKind::False => {
                self.bump()?;
                Ok(Expr::False(pos))
            }
            TokenKind::Ellipsis => {
                self.bump()?;
                Ok(Expr::Vararg(pos))
            }
            TokenKind::Int(i) => {
                self.bump()?;
                Ok(Expr::Int(i, pos))
            }
            TokenKind::Float(f) => {
                self.bump()?;
                Ok(Expr::Float(f, pos))
            }
            TokenKind::Str(s) => {
                self.bump()?;
                Ok(Expr::Str(s, pos))
            }
            TokenKind::Function => {
                self.bump()?;
                let body = self.parse_function_body(pos, SmolStr::new("anonymous"), false)?;
                Ok(Expr::Function(Box::new(body), pos))
            }
            TokenKind::Name(n) => {
                self.bump()?;
                Ok(Expr::name(n, pos))
            }
            TokenKind::LParen => {
                self.bump()?;
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::Paren(Box::new(inner), pos))
            }
            TokenKind::LBrace => self.parse_table(pos),
            other => Err(EngineError::syntactic(format!(
                "unexpected token {:?} at {}:{}",
                other, pos.line, pos.column
            ))),
        }
    }

    /// A primary expression followed by zero or more postfix suffixes:
    /// `.name`, `[expr]`, `:name(args)`, `(args)`, a table, or a string
    /// (the latter two are Lua's bare call-argument sugar).
    fn parse_suffixed_expr(&mut self) -> PResult<Expr> {
        let mut e = self.parse_primary()?;
        loop {
            let pos = self.pos();
            match self.cur.kind.clone() {
                TokenKind::Dot => {
                    self.bump()?;
                    let field = self.expect_name()?;
                    e = Expr::Field(Box::new(e), field, pos);
                }
                TokenKind::LBracket => {
                    self.bump()?;
                    let idx = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    e = Expr::Index(Box::new(e), Box::new(idx), pos);
                }
                TokenKind::Colon => {
                    self.bump()?;
                    let method = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    e = Expr::MethodCall(Box::new(e), method, args, pos);
                }
                TokenKind::LParen | TokenKind::LBrace | TokenKind::Str(_) => {
                    let args = self.parse_call_args()?;
                    e = Expr::Call(Box::new(e), args, pos);
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn parse_call_args(&mut self) -> PResult<Vec<Expr>> {
        let pos = self.pos();
        match self.cur.kind.clone() {
            TokenKind::LParen => {
                self.bump()?;
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    args.push(self.parse_expr()?);
                    while self.eat(&TokenKind::Comma)? {
                        args.push(self.parse_expr()?);
                    }
                }
                self.expect(TokenKind::RParen, "')'")?;
                Ok(args)
            }
            TokenKind::Str(s) => {
                self.bump()?;
                Ok(vec![Expr::Str(s, pos)])
            }
            TokenKind::LBrace => Ok(vec![self.parse_table(pos)?]),
            _ => Err(EngineError::syntactic(format!(
                "expected call arguments at {}:{}",
                pos.line, pos.column
            ))),
        }
    }

    fn parse_table(&mut self, pos: Pos) -> PResult<Expr> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::LBracket) {
                self.bump()?;
                let key = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "']'")?;
                self.expect(TokenKind::Assign, "'='")?;
                let value = self.parse_expr()?;
                fields.push(TableField::Indexed(key, value));
            } else if let TokenKind::Name(n) = self.cur.kind.clone() {
                if matches!(self.peek2()?.kind, TokenKind::Assign) {
                    self.bump()?;
                    self.bump()?;
                    let value = self.parse_expr()?;
                    fields.push(TableField::Named(n, value));
                } else {
                    fields.push(TableField::Positional(self.parse_expr()?));
                }
            } else {
                fields.push(TableField::Positional(self.parse_expr()?));
            }
            if !self.eat(&TokenKind::Comma)? && !self.eat(&TokenKind::Semi)? {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::Table(fields, pos))
    }
}

/// Parses a full chunk. `DeclId`s and `FuncId`s are assigned densely
/// starting at 0, ready for [`crate::lua::scope`] to index side-tables by.
pub fn parse(src: &str) -> Result<FunctionBody, EngineError> {
    let mut parser = Parser::new(src)?;
    parser.parse_chunk()
}

