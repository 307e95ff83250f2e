//! jq parser: recursive descent + precedence climbing,
//! `def` parsing with a final structural-substitution inlining pass.
//!
//! A stop-token-stack mechanism (tracked here as
//! `stop_ident_stack`/`stop_type_stack`/`stop_same_depth_stack`) threads
//! through every `parse_expression` call so constructs like
//! `if/then/elif/else/end`, `reduce ... as $x (init;update)`, `def ...;`
//! and compound-assignment RHSes can share one recursive-descent chain
//! without separate grammar productions per context. `label`/`break`
//! parsing (`parse_label`/`parse_break`) follows the same primary-expression
//! grammar line as the rest of the postfix chain.

use super::ast::*;
use super::token::{Lexer, Token, TokenKind};
use crate::vm::{EngineError, EngineResult};
use smol_str::SmolStr;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StopTok {
    Comma,
    Semicolon,
    RParen,
    RBrace,
    RBracket,
    Pipe,
}

fn stop_tok_of(kind: &TokenKind) -> Option<StopTok> {
    match kind {
        TokenKind::Comma => Some(StopTok::Comma),
        TokenKind::Semicolon => Some(StopTok::Semicolon),
        TokenKind::RParen => Some(StopTok::RParen),
        TokenKind::RBrace => Some(StopTok::RBrace),
        TokenKind::RBracket => Some(StopTok::RBracket),
        TokenKind::Pipe => Some(StopTok::Pipe),
        _ => None,
    }
}

fn is_keyword_literal(name: &str) -> bool {
    matches!(name, "true" | "false" | "null")
}

#[derive(Default, Clone, Copy)]
struct StopOpts {
    idents: &'static [&'static str],
    types: &'static [StopTok],
    same_depth_types: &'static [StopTok],
}

#[derive(Clone)]
struct FunctionDefinition {
    params: Vec<SmolStr>,
    body: JqNode,
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    definitions: HashMap<SmolStr, FunctionDefinition>,
    user_function_names: HashSet<SmolStr>,
    stop_ident_stack: Vec<HashSet<SmolStr>>,
    stop_type_stack: Vec<HashSet<StopTok>>,
    stop_same_depth_stack: Vec<HashMap<StopTok, HashSet<i32>>>,
    inlining_stack: Vec<SmolStr>,
    nesting_depth: i32,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Parser {
        Parser {
            tokens,
            index: 0,
            definitions: HashMap::new(),
            user_function_names: HashSet::new(),
            stop_ident_stack: vec![HashSet::new()],
            stop_type_stack: vec![HashSet::new()],
            stop_same_depth_stack: vec![HashMap::new()],
            inlining_stack: Vec::new(),
            nesting_depth: 0,
        }
    }

    // ---- token-stream helpers ----

    fn current(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn peek_next(&self) -> &Token {
        self.tokens.get(self.index + 1).unwrap_or_else(|| self.tokens.last().unwrap())
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.index].clone();
        self.index += 1;
        match tok.kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => self.nesting_depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                self.nesting_depth = (self.nesting_depth - 1).max(0)
            }
            _ => {}
        }
        tok
    }

    fn match_tok(&mut self, kind: &TokenKind) -> bool {
        if &self.current().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> EngineResult<Token> {
        if &self.current().kind == kind {
            Ok(self.advance())
        } else {
            Err(EngineError::syntactic(format!("expected {what} at position {}", self.current().pos)))
        }
    }

    fn expect_var(&mut self) -> EngineResult<SmolStr> {
        match self.current().kind.clone() {
            TokenKind::Var(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(EngineError::syntactic(format!("expected a $variable at position {}", self.current().pos))),
        }
    }

    fn expect_ident(&mut self) -> EngineResult<SmolStr> {
        match self.current().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(EngineError::syntactic(format!("expected an identifier at position {}", self.current().pos))),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> EngineResult<()> {
        match &self.current().kind {
            TokenKind::Ident(name) if name.as_str() == keyword => {
                self.advance();
                Ok(())
            }
            _ => Err(EngineError::syntactic(format!(
                "expected keyword '{keyword}' at position {}",
                self.current().pos
            ))),
        }
    }

    fn current_is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Ident(name) if name.as_str() == keyword)
    }

    fn with_stop<T>(&mut self, opts: StopOpts, f: impl FnOnce(&mut Self) -> EngineResult<T>) -> EngineResult<T> {
        let mut new_idents = self.stop_ident_stack.last().cloned().unwrap_or_default();
        new_idents.extend(opts.idents.iter().map(|s| SmolStr::new(*s)));
        let mut new_types = self.stop_type_stack.last().cloned().unwrap_or_default();
        new_types.extend(opts.types.iter().copied());
        let mut new_same_depth = self.stop_same_depth_stack.last().cloned().unwrap_or_default();
        if !opts.same_depth_types.is_empty() {
            let base_depth = self.nesting_depth;
            for tok in opts.same_depth_types {
                new_same_depth.entry(*tok).or_default().insert(base_depth);
            }
        }
        self.stop_ident_stack.push(new_idents);
        self.stop_type_stack.push(new_types);
        self.stop_same_depth_stack.push(new_same_depth);
        let result = f(self);
        self.stop_ident_stack.pop();
        self.stop_type_stack.pop();
        self.stop_same_depth_stack.pop();
        result
    }

    fn should_stop(&self) -> bool {
        let tok = self.current();
        if let Some(st) = stop_tok_of(&tok.kind) {
            if self.stop_type_stack.last().unwrap().contains(&st) {
                return true;
            }
            if let Some(depths) = self.stop_same_depth_stack.last().unwrap().get(&st) {
                if depths.contains(&self.nesting_depth) {
                    return true;
                }
            }
        }
        if let TokenKind::Ident(name) = &tok.kind {
            if self.stop_ident_stack.last().unwrap().contains(name.as_str()) {
                return true;
            }
        }
        false
    }

    // ---- top level ----

    fn parse_program(&mut self) -> EngineResult<JqNode> {
        while self.current_is_keyword("def") {
            self.parse_definition()?;
        }
        let body = self.parse_expression(StopOpts::default())?;
        self.inline_node(&body)
    }

    fn parse_definition(&mut self) -> EngineResult<()> {
        self.advance(); // 'def'
        let name = self.expect_ident()?;
        let mut params = Vec::new();
        if self.match_tok(&TokenKind::LParen) {
            if !matches!(self.current().kind, TokenKind::RParen) {
                loop {
                    params.push(self.expect_var()?);
                    if !self.match_tok(&TokenKind::Semicolon) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
        }
        self.expect(&TokenKind::Colon, "':'")?;
        self.user_function_names.insert(name.clone());
        let body = self.parse_expression(StopOpts { types: &[StopTok::Semicolon], ..Default::default() })?;
        self.expect(&TokenKind::Semicolon, "';'")?;
        self.definitions.insert(name, FunctionDefinition { params, body });
        Ok(())
    }

    // ---- expression precedence chain (low -> high) ----

    fn parse_expression(&mut self, opts: StopOpts) -> EngineResult<JqNode> {
        self.with_stop(opts, |p| p.parse_union())
    }

    fn parse_union(&mut self) -> EngineResult<JqNode> {
        let mut exprs = vec![self.parse_pipe()?];
        while !self.should_stop() && self.match_tok(&TokenKind::Comma) {
            exprs.push(self.parse_pipe()?);
        }
        if exprs.len() == 1 {
            Ok(exprs.pop().unwrap())
        } else {
            Ok(JqNode::Sequence(exprs))
        }
    }

    fn parse_pipe(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_update()?;
        loop {
            if self.should_stop() {
                break;
            }
            if self.current_is_keyword("as") {
                self.advance();
                let var = self.expect_var()?;
                node = JqNode::AsBinding(Box::new(node), var);
                continue;
            }
            if self.match_tok(&TokenKind::Pipe) {
                let right = self.parse_update()?;
                node = JqNode::Pipe(Box::new(node), Box::new(right));
                continue;
            }
            break;
        }
        Ok(node)
    }

    fn parse_update(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_or()?;
        let rhs_opts = StopOpts { same_depth_types: &[StopTok::Pipe], ..Default::default() };
        loop {
            if self.should_stop() {
                break;
            }
            let desugared_op = if self.match_tok(&TokenKind::PipeAssign) {
                None
            } else if self.match_tok(&TokenKind::PlusAssign) {
                Some(BinOp::Add)
            } else if self.match_tok(&TokenKind::MinusAssign) {
                Some(BinOp::Sub)
            } else if self.match_tok(&TokenKind::StarAssign) {
                Some(BinOp::Mul)
            } else if self.match_tok(&TokenKind::SlashAssign) {
                Some(BinOp::Div)
            } else if self.match_tok(&TokenKind::PercentAssign) {
                Some(BinOp::Mod)
            } else if self.match_tok(&TokenKind::CoalesceAssign) {
                Some(BinOp::Coalesce)
            } else {
                break;
            };
            let rhs = self.parse_expression(rhs_opts)?;
            let expr = match desugared_op {
                None => rhs,
                Some(op) => JqNode::BinaryOp(op, Box::new(JqNode::Identity), Box::new(rhs)),
            };
            node = JqNode::UpdateAssignment(Box::new(node), Box::new(expr));
        }
        Ok(node)
    }

    fn parse_or(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_and()?;
        while self.current_is_keyword("or") {
            if self.should_stop() {
                break;
            }
            self.advance();
            let right = self.parse_and()?;
            node = JqNode::BinaryOp(BinOp::Or, Box::new(node), Box::new(right));
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_coalesce()?;
        while self.current_is_keyword("and") {
            if self.should_stop() {
                break;
            }
            self.advance();
            let right = self.parse_coalesce()?;
            node = JqNode::BinaryOp(BinOp::And, Box::new(node), Box::new(right));
        }
        Ok(node)
    }

    fn parse_coalesce(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_equality()?;
        while self.match_tok(&TokenKind::Coalesce) {
            if self.should_stop() {
                break;
            }
            let right = self.parse_equality()?;
            node = JqNode::BinaryOp(BinOp::Coalesce, Box::new(node), Box::new(right));
        }
        Ok(node)
    }

    fn parse_equality(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_comparison()?;
        loop {
            if self.should_stop() {
                break;
            }
            if self.match_tok(&TokenKind::EqEq) {
                let right = self.parse_comparison()?;
                node = JqNode::BinaryOp(BinOp::Eq, Box::new(node), Box::new(right));
                continue;
            }
            if self.match_tok(&TokenKind::Neq) {
                let right = self.parse_comparison()?;
                node = JqNode::BinaryOp(BinOp::Ne, Box::new(node), Box::new(right));
                continue;
            }
            break;
        }
        Ok(node)
    }

    fn parse_comparison(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_additive()?;
        loop {
            if self.should_stop() {
                break;
            }
            if self.match_tok(&TokenKind::Gte) {
                let right = self.parse_additive()?;
                node = JqNode::BinaryOp(BinOp::Ge, Box::new(node), Box::new(right));
                continue;
            }
            if self.match_tok(&TokenKind::Lte) {
                let right = self.parse_additive()?;
                node = JqNode::BinaryOp(BinOp::Le, Box::new(node), Box::new(right));
                continue;
            }
            if self.match_tok(&TokenKind::Gt) {
                let right = self.parse_additive()?;
                node = JqNode::BinaryOp(BinOp::Gt, Box::new(node), Box::new(right));
                continue;
            }
            if self.match_tok(&TokenKind::Lt) {
                let right = self.parse_additive()?;
                node = JqNode::BinaryOp(BinOp::Lt, Box::new(node), Box::new(right));
                continue;
            }
            break;
        }
        Ok(node)
    }

    fn parse_additive(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_multiplicative()?;
        loop {
            if self.should_stop() {
                break;
            }
            if self.match_tok(&TokenKind::Plus) {
                let right = self.parse_multiplicative()?;
                node = JqNode::BinaryOp(BinOp::Add, Box::new(node), Box::new(right));
                continue;
            }
            if self.match_tok(&TokenKind::Minus) {
                let right = self.parse_multiplicative()?;
                node = JqNode::BinaryOp(BinOp::Sub, Box::new(node), Box::new(right));
                continue;
            }
            break;
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_unary()?;
        loop {
            if self.should_stop() {
                break;
            }
            if self.match_tok(&TokenKind::Star) {
                let right = self.parse_unary()?;
                node = JqNode::BinaryOp(BinOp::Mul, Box::new(node), Box::new(right));
                continue;
            }
            if self.match_tok(&TokenKind::Slash) {
                let right = self.parse_unary()?;
                node = JqNode::BinaryOp(BinOp::Div, Box::new(node), Box::new(right));
                continue;
            }
            if self.match_tok(&TokenKind::Percent) {
                let right = self.parse_unary()?;
                node = JqNode::BinaryOp(BinOp::Mod, Box::new(node), Box::new(right));
                continue;
            }
            break;
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> EngineResult<JqNode> {
        if self.current_is_keyword("not") {
            self.advance();
            return Ok(JqNode::UnaryOp(UnOp::Not, Box::new(self.parse_unary()?)));
        }
        if matches!(self.current().kind, TokenKind::Minus) {
            self.advance();
            return Ok(JqNode::UnaryOp(UnOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> EngineResult<JqNode> {
        let mut node = self.parse_primary()?;
        loop {
            if self.should_stop() {
                break;
            }
            if self.match_tok(&TokenKind::Dot) {
                let name = self.expect_ident()?;
                node = JqNode::Field(name, Box::new(node));
                continue;
            }
            if let TokenKind::Ident(name) = self.current().kind.clone() {
                if !is_keyword_literal(&name) && matches!(node, JqNode::Identity) {
                    self.advance();
                    node = JqNode::Field(name, Box::new(node));
                    continue;
                }
            }
            if self.match_tok(&TokenKind::LBracket) {
                if self.match_tok(&TokenKind::RBracket) {
                    node = JqNode::IndexAll(Box::new(node));
                    continue;
                }
                if self.match_tok(&TokenKind::Colon) {
                    let end = self.parse_optional_bracket_expr(&TokenKind::RBracket)?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    node = JqNode::Slice(Box::new(node), None, end);
                    continue;
                }
                let first = self.parse_expression(StopOpts::default())?;
                if self.match_tok(&TokenKind::RBracket) {
                    node = JqNode::Index(Box::new(node), Box::new(first));
                    continue;
                }
                self.expect(&TokenKind::Colon, "':'")?;
                let end = self.parse_optional_bracket_expr(&TokenKind::RBracket)?;
                self.expect(&TokenKind::RBracket, "']'")?;
                node = JqNode::Slice(Box::new(node), Some(Box::new(first)), end);
                continue;
            }
            break;
        }
        Ok(node)
    }

    fn parse_optional_bracket_expr(&mut self, closing: &TokenKind) -> EngineResult<Option<Box<JqNode>>> {
        if &self.current().kind == closing {
            Ok(None)
        } else {
            Ok(Some(Box::new(self.parse_expression(StopOpts::default())?)))
        }
    }

    fn parse_primary(&mut self) -> EngineResult<JqNode> {
        let tok = self.current().clone();
        match &tok.kind {
            TokenKind::Dot => {
                self.advance();
                Ok(JqNode::Identity)
            }
            TokenKind::Var(name) => {
                let name = name.clone();
                self.advance();
                Ok(JqNode::VarRef(name))
            }
            TokenKind::Ident(name) if name == "if" => self.parse_if(),
            TokenKind::Ident(name) if name == "try" => self.parse_try(),
            TokenKind::Ident(name) if name == "reduce" && !matches!(self.peek_next().kind, TokenKind::LParen) => {
                self.parse_reduce()
            }
            TokenKind::Ident(name) if name == "foreach" => self.parse_foreach(),
            TokenKind::Ident(name) if name == "label" => self.parse_label(),
            TokenKind::Ident(name) if name == "break" => self.parse_break(),
            TokenKind::Ident(name) if !is_keyword_literal(name) => {
                let ident = name.clone();
                self.advance();
                if self.match_tok(&TokenKind::LParen) {
                    let args = self.parse_arguments()?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    Ok(JqNode::FunctionCall(ident, args))
                } else if self.user_function_names.contains(&ident) {
                    Ok(JqNode::FunctionCall(ident, Vec::new()))
                } else {
                    Ok(JqNode::Field(ident, Box::new(JqNode::Identity)))
                }
            }
            TokenKind::Int(_) | TokenKind::Float(_) | TokenKind::Str(_) | TokenKind::Ident(_) => {
                let lit = literal_from_token(&tok.kind)?;
                self.advance();
                Ok(JqNode::Literal(lit))
            }
            TokenKind::LBrace => self.parse_object_literal(),
            TokenKind::LBracket => {
                self.advance();
                if self.match_tok(&TokenKind::RBracket) {
                    return Ok(JqNode::ArrayConstructor(None));
                }
                let inner = self.parse_expression(StopOpts { types: &[StopTok::RBracket], ..Default::default() })?;
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(JqNode::ArrayConstructor(Some(Box::new(inner))))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression(StopOpts::default())?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            _ => Err(EngineError::syntactic(format!("unexpected token at position {}", tok.pos))),
        }
    }

    fn parse_if(&mut self) -> EngineResult<JqNode> {
        self.expect_keyword("if")?;
        self.parse_if_chain(true)
    }

    fn parse_if_chain(&mut self, expect_end: bool) -> EngineResult<JqNode> {
        let cond = self.parse_expression(StopOpts { idents: &["then"], ..Default::default() })?;
        self.expect_keyword("then")?;
        let then_branch = self.parse_expression(StopOpts { idents: &["elif", "else", "end"], ..Default::default() })?;
        let else_branch = if self.current_is_keyword("elif") {
            self.advance();
            Some(Box::new(self.parse_if_chain(false)?))
        } else if self.current_is_keyword("else") {
            self.advance();
            Some(Box::new(self.parse_expression(StopOpts { idents: &["end"], ..Default::default() })?))
        } else {
            None
        };
        if expect_end {
            self.expect_keyword("end")?;
        }
        Ok(JqNode::IfElse(Box::new(cond), Box::new(then_branch), else_branch))
    }

    fn parse_try(&mut self) -> EngineResult<JqNode> {
        self.expect_keyword("try")?;
        let expr = self.parse_expression(StopOpts { idents: &["catch"], ..Default::default() })?;
        let catch_expr = if self.current_is_keyword("catch") {
            self.advance();
            Some(Box::new(self.parse_expression(StopOpts::default())?))
        } else {
            None
        };
        Ok(JqNode::TryCatch(Box::new(expr), catch_expr))
    }

    fn parse_reduce(&mut self) -> EngineResult<JqNode> {
        self.expect_keyword("reduce")?;
        let source = self.parse_expression(StopOpts { idents: &["as"], ..Default::default() })?;
        self.expect_keyword("as")?;
        let var = self.expect_var()?;
        self.expect(&TokenKind::LParen, "'('")?;
        let init = self.parse_expression(StopOpts { same_depth_types: &[StopTok::Semicolon], ..Default::default() })?;
        self.expect(&TokenKind::Semicolon, "';'")?;
        let update = self.parse_expression(StopOpts { same_depth_types: &[StopTok::RParen], ..Default::default() })?;
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(JqNode::Reduce(Box::new(source), var, Box::new(init), Box::new(update)))
    }

    fn parse_foreach(&mut self) -> EngineResult<JqNode> {
        self.expect_keyword("foreach")?;
        let source = self.parse_expression(StopOpts { idents: &["as"], ..Default::default() })?;
        self.expect_keyword("as")?;
        let var = self.expect_var()?;
        self.expect(&TokenKind::LParen, "'('")?;
        let init = self.parse_expression(StopOpts { same_depth_types: &[StopTok::Semicolon], ..Default::default() })?;
        self.expect(&TokenKind::Semicolon, "';'")?;
        let update =
            self.parse_expression(StopOpts { same_depth_types: &[StopTok::Semicolon, StopTok::RParen], ..Default::default() })?;
        let extract = if matches!(self.current().kind, TokenKind::Semicolon) {
            self.advance();
            Some(Box::new(self.parse_expression(StopOpts { same_depth_types: &[StopTok::RParen], ..Default::default() })?))
        } else {
            None
        };
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(JqNode::Foreach(Box::new(source), var, Box::new(init), Box::new(update), extract))
    }

    fn parse_label(&mut self) -> EngineResult<JqNode> {
        self.expect_keyword("label")?;
        let name = self.expect_var()?;
        self.expect(&TokenKind::Pipe, "'|'")?;
        let body = self.parse_expression(StopOpts::default())?;
        Ok(JqNode::Label(name, Box::new(body)))
    }

    fn parse_break(&mut self) -> EngineResult<JqNode> {
        self.expect_keyword("break")?;
        let name = self.expect_var()?;
        Ok(JqNode::Break(name))
    }

    fn parse_arguments(&mut self) -> EngineResult<Vec<JqNode>> {
        let mut args = Vec::new();
        if matches!(self.current().kind, TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression(StopOpts {
                types: &[StopTok::Comma, StopTok::Semicolon, StopTok::RParen],
                ..Default::default()
            })?);
            if self.match_tok(&TokenKind::Comma) || self.match_tok(&TokenKind::Semicolon) {
                continue;
            }
            break;
        }
        Ok(args)
    }

    fn parse_object_literal(&mut self) -> EngineResult<JqNode> {
        self.advance(); // '{'
        let mut pairs = Vec::new();
        if !matches!(self.current().kind, TokenKind::RBrace) {
            loop {
                let key = match self.current().kind.clone() {
                    TokenKind::Str(s) => {
                        self.advance();
                        ObjectKey::Literal(s)
                    }
                    TokenKind::Ident(name) => {
                        self.advance();
                        ObjectKey::Literal(name)
                    }
                    _ => return Err(EngineError::syntactic(format!("invalid object key at position {}", self.current().pos))),
                };
                self.expect(&TokenKind::Colon, "':'")?;
                let value = self.parse_expression(StopOpts { types: &[StopTok::Comma, StopTok::RBrace], ..Default::default() })?;
                pairs.push((key, value));
                if !self.match_tok(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(JqNode::ObjectLiteral(pairs))
    }

    // ---- def inlining ----

    fn inline_node(&mut self, node: &JqNode) -> EngineResult<JqNode> {
        if self.definitions.is_empty() {
            return Ok(node.clone());
        }
        match node {
            JqNode::Pipe(a, b) => Ok(JqNode::Pipe(Box::new(self.inline_node(a)?), Box::new(self.inline_node(b)?))),
            JqNode::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.inline_node(item)?);
                }
                Ok(JqNode::Sequence(out))
            }
            JqNode::IfElse(cond, then_b, else_b) => {
                let else_b = match else_b {
                    Some(e) => Some(Box::new(self.inline_node(e)?)),
                    None => None,
                };
                Ok(JqNode::IfElse(Box::new(self.inline_node(cond)?), Box::new(self.inline_node(then_b)?), else_b))
            }
            JqNode::TryCatch(try_e, catch_e) => {
                let catch_e = match catch_e {
                    Some(c) => Some(Box::new(self.inline_node(c)?)),
                    None => None,
                };
                Ok(JqNode::TryCatch(Box::new(self.inline_node(try_e)?), catch_e))
            }
            JqNode::FunctionCall(name, args) => {
                let mut inlined_args = Vec::with_capacity(args.len());
                for a in args {
                    inlined_args.push(self.inline_node(a)?);
                }
                let Some(def) = self.definitions.get(name).cloned() else {
                    return Ok(JqNode::FunctionCall(name.clone(), inlined_args));
                };
                if def.params.len() != inlined_args.len() {
                    return Err(EngineError::semantic(format!(
                        "function {name} expects {} args, got {}",
                        def.params.len(),
                        inlined_args.len()
                    )));
                }
                if self.inlining_stack.contains(name) {
                    return Err(EngineError::semantic(format!("recursive function definitions are not supported: {name}")));
                }
                let mapping: HashMap<SmolStr, JqNode> = def.params.into_iter().zip(inlined_args).collect();
                self.inlining_stack.push(name.clone());
                let substituted = substitute(&def.body, &mapping);
                let result = self.inline_node(&substituted);
                self.inlining_stack.pop();
                result
            }
            JqNode::ObjectLiteral(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    out.push((k.clone(), self.inline_node(v)?));
                }
                Ok(JqNode::ObjectLiteral(out))
            }
            JqNode::Field(name, src) => Ok(JqNode::Field(name.clone(), Box::new(self.inline_node(src)?))),
            JqNode::UnaryOp(op, operand) => Ok(JqNode::UnaryOp(*op, Box::new(self.inline_node(operand)?))),
            JqNode::BinaryOp(op, a, b) => Ok(JqNode::BinaryOp(*op, Box::new(self.inline_node(a)?), Box::new(self.inline_node(b)?))),
            JqNode::UpdateAssignment(target, expr) => {
                Ok(JqNode::UpdateAssignment(Box::new(self.inline_node(target)?), Box::new(self.inline_node(expr)?)))
            }
            JqNode::Index(src, idx) => Ok(JqNode::Index(Box::new(self.inline_node(src)?), Box::new(self.inline_node(idx)?))),
            JqNode::Slice(src, start, end) => {
                let start = match start {
                    Some(s) => Some(Box::new(self.inline_node(s)?)),
                    None => None,
                };
                let end = match end {
                    Some(e) => Some(Box::new(self.inline_node(e)?)),
                    None => None,
                };
                Ok(JqNode::Slice(Box::new(self.inline_node(src)?), start, end))
            }
            JqNode::IndexAll(src) => Ok(JqNode::IndexAll(Box::new(self.inline_node(src)?))),
            JqNode::AsBinding(src, name) => Ok(JqNode::AsBinding(Box::new(self.inline_node(src)?), name.clone())),
            JqNode::Reduce(src, var, init, upd) => Ok(JqNode::Reduce(
                Box::new(self.inline_node(src)?),
                var.clone(),
                Box::new(self.inline_node(init)?),
                Box::new(self.inline_node(upd)?),
            )),
            JqNode::Foreach(src, var, init, upd, ext) => {
                let ext = match ext {
                    Some(e) => Some(Box::new(self.inline_node(e)?)),
                    None => None,
                };
                Ok(JqNode::Foreach(
                    Box::new(self.inline_node(src)?),
                    var.clone(),
                    Box::new(self.inline_node(init)?),
                    Box::new(self.inline_node(upd)?),
                    ext,
                ))
            }
            JqNode::Label(name, body) => Ok(JqNode::Label(name.clone(), Box::new(self.inline_node(body)?))),
            JqNode::ArrayConstructor(inner) => match inner {
                Some(e) => Ok(JqNode::ArrayConstructor(Some(Box::new(self.inline_node(e)?)))),
                None => Ok(JqNode::ArrayConstructor(None)),
            },
            other => Ok(other.clone()),
        }
    }
}

/// Raw AST substitution for a `def`'s parameters (call-by-name, not
/// call-by-value): every `VarRef` naming a parameter is replaced by the
/// caller's already-inlined argument subtree.
fn substitute(node: &JqNode, mapping: &HashMap<SmolStr, JqNode>) -> JqNode {
    match node {
        JqNode::VarRef(name) => mapping.get(name).cloned().unwrap_or_else(|| node.clone()),
        JqNode::Pipe(a, b) => JqNode::Pipe(Box::new(substitute(a, mapping)), Box::new(substitute(b, mapping))),
        JqNode::Sequence(items) => JqNode::Sequence(items.iter().map(|i| substitute(i, mapping)).collect()),
        JqNode::IfElse(c, t, e) => JqNode::IfElse(
            Box::new(substitute(c, mapping)),
            Box::new(substitute(t, mapping)),
            e.as_ref().map(|e| Box::new(substitute(e, mapping))),
        ),
        JqNode::TryCatch(t, c) => {
            JqNode::TryCatch(Box::new(substitute(t, mapping)), c.as_ref().map(|c| Box::new(substitute(c, mapping))))
        }
        JqNode::FunctionCall(name, args) => {
            JqNode::FunctionCall(name.clone(), args.iter().map(|a| substitute(a, mapping)).collect())
        }
        JqNode::ObjectLiteral(pairs) => {
            JqNode::ObjectLiteral(pairs.iter().map(|(k, v)| (k.clone(), substitute(v, mapping))).collect())
        }
        JqNode::Field(name, src) => JqNode::Field(name.clone(), Box::new(substitute(src, mapping))),
        JqNode::UnaryOp(op, operand) => JqNode::UnaryOp(*op, Box::new(substitute(operand, mapping))),
        JqNode::BinaryOp(op, a, b) => JqNode::BinaryOp(*op, Box::new(substitute(a, mapping)), Box::new(substitute(b, mapping))),
        JqNode::UpdateAssignment(t, e) => {
            JqNode::UpdateAssignment(Box::new(substitute(t, mapping)), Box::new(substitute(e, mapping)))
        }
        JqNode::Index(s, i) => JqNode::Index(Box::new(substitute(s, mapping)), Box::new(substitute(i, mapping))),
        JqNode::Slice(s, a, b) => JqNode::Slice(
            Box::new(substitute(s, mapping)),
            a.as_ref().map(|x| Box::new(substitute(x, mapping))),
            b.as_ref().map(|x| Box::new(substitute(x, mapping))),
        ),
        JqNode::IndexAll(s) => JqNode::IndexAll(Box::new(substitute(s, mapping))),
        JqNode::AsBinding(s, name) => JqNode::AsBinding(Box::new(substitute(s, mapping)), name.clone()),
        JqNode::Reduce(s, v, i, u) => JqNode::Reduce(
            Box::new(substitute(s, mapping)),
            v.clone(),
            Box::new(substitute(i, mapping)),
            Box::new(substitute(u, mapping)),
        ),
        JqNode::Foreach(s, v, i, u, e) => JqNode::Foreach(
            Box::new(substitute(s, mapping)),
            v.clone(),
            Box::new(substitute(i, mapping)),
            Box::new(substitute(u, mapping)),
            e.as_ref().map(|x| Box::new(substitute(x, mapping))),
        ),
        JqNode::Label(name, body) => JqNode::Label(name.clone(), Box::new(substitute(body, mapping))),
        JqNode::ArrayConstructor(inner) => {
            JqNode::ArrayConstructor(inner.as_ref().map(|e| Box::new(substitute(e, mapping))))
        }
        other => other.clone(),
    }
}

fn literal_from_token(kind: &TokenKind) -> EngineResult<Literal> {
    match kind {
        TokenKind::Int(i) => Ok(Literal::Int(*i)),
        TokenKind::Float(f) => Ok(Literal::Float(*f)),
        TokenKind::Str(s) => Ok(Literal::Str(s.clone())),
        TokenKind::Ident(name) => match name.as_str() {
            "true" => Ok(Literal::Bool(true)),
            "false" => Ok(Literal::Bool(false)),
            "null" => Ok(Literal::Null),
            other => Err(EngineError::syntactic(format!("unsupported literal token '{other}'"))),
        },
        _ => Err(EngineError::syntactic("expected a literal")),
    }
}

fn tokenize(source: &str) -> EngineResult<Vec<Token>> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token()?;
        let is_eof = matches!(tok.kind, TokenKind::Eof);
        tokens.push(tok);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}

/// Parses `source` into an AST with every `def` already inlined.
pub fn parse(source: &str) -> EngineResult<JqNode> {
    let mut parser = Parser::new(tokenize(source)?);
    let expr = parser.parse_program()?;
    parser.expect(&TokenKind::Eof, "end of input")?;
    Ok(expr)
}

#[cfg(test)]
mod parser_tests {
    use super::*;

    #[test]
    fn a_pipe_chain_parses_left_associatively() {
        let node = parse(".a | .b | .c").unwrap();
        let JqNode::Pipe(ab, c) = node else { panic!("expected a pipe") };
        assert!(matches!(*c, JqNode::Field(ref name, _) if name == "c"));
        let JqNode::Pipe(a, b) = *ab else { panic!("expected a nested pipe") };
        assert!(matches!(*a, JqNode::Field(ref name, _) if name == "a"));
        assert!(matches!(*b, JqNode::Field(ref name, _) if name == "b"));
    }

    #[test]
    fn bracket_slice_with_both_bounds_omitted_parses_as_index_all() {
        let node = parse(".[]").unwrap();
        assert!(matches!(node, JqNode::IndexAll(_)));
    }

    #[test]
    fn a_plain_assign_op_desugars_to_an_update_wrapping_the_bare_rhs() {
        let node = parse(".a += 1").unwrap();
        let JqNode::UpdateAssignment(_, expr) = node else { panic!("expected an update assignment") };
        assert!(matches!(*expr, JqNode::BinaryOp(BinOp::Add, _, _)));
    }

    #[test]
    fn def_bodies_are_inlined_by_substituting_params_with_the_callers_arguments() {
        let node = parse("def inc(x): x + 1; inc(5)").unwrap();
        assert!(matches!(node, JqNode::BinaryOp(BinOp::Add, _, _)));
    }

    #[test]
    fn a_recursive_def_is_rejected_at_parse_time() {
        let err = parse("def loop: loop; loop").unwrap_err();
        assert!(err.message.contains("recursive"));
    }

    #[test]
    fn an_unknown_bareword_after_identity_becomes_a_field_access() {
        let node = parse(".foo").unwrap();
        assert!(matches!(node, JqNode::Field(ref name, _) if name == "foo"));
    }
}
