//! Call scripts
//!
//! A small expression language for driving a traced program from the CLI:
//!
//! ```text
//! let path = require('path')
//! let joined = path.join('a', 'b')
//! let emitter = new (require('events'))()
//! emitter.on('data', fn(x) => console.log('got', x))
//! try { assert.ok(false) } catch (e) { console.log(e.message) }
//! ```
//!
//! Statements: `let`, expression statements, assignment, `throw`, `return`
//! (inside `fn` bodies) and `try`/`catch`. Expressions: literals, arrays,
//! objects, member and index access, calls, `new`, `fn(a, b) => ...`
//! callbacks, `+ - * /`, equality, `!`, unary `-` and `typeof`. Names that are
//! not declared resolve against the global object.

use crate::error::TraceError;
use crate::realm::{BuiltinKind, Realm};
use crate::value::{call, construct, Completion, PropertyKey, Throw, Value};
use logos::Logos;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
enum Token {
    #[token("let")]
    Let,
    #[token("new")]
    New,
    #[token("fn")]
    Fn,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("throw")]
    Throw,
    #[token("return")]
    Return,
    #[token("typeof")]
    Typeof,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("undefined")]
    Undefined,

    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    #[regex(r"'([^'\\]|\\.)*'", parse_string)]
    Str(String),

    #[token("=>")]
    Arrow,
    #[token("===")]
    StrictEq,
    #[token("!==")]
    StrictNe,
    #[token("==")]
    LooseEq,
    #[token("!=")]
    LooseNe,
    #[token("=")]
    Assign,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("!")]
    Bang,
}

impl Token {
    /// Keywords double as property names after `.`
    fn keyword(&self) -> Option<&'static str> {
        Some(match self {
            Self::Let => "let",
            Self::New => "new",
            Self::Fn => "fn",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Throw => "throw",
            Self::Return => "return",
            Self::Typeof => "typeof",
            Self::This => "this",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Undefined => "undefined",
            _ => return None,
        })
    }
}

fn parse_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let slice = lex.slice();
    Some(unescape(&slice[1..slice.len() - 1]))
}

fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some('0') => result.push('\0'),
            Some(other) => result.push(other),
            None => break,
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Negate,
    Not,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    This,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(Box<Expr>, Vec<Expr>),
    Lambda(Rc<Lambda>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Assign(Box<Expr>, Box<Expr>),
}

#[derive(Debug)]
struct Lambda {
    name: String,
    params: Vec<String>,
    body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
enum Stmt {
    Let(String, Expr),
    Expr(Expr),
    Throw(Expr),
    Return(Expr),
    Try {
        body: Vec<Stmt>,
        binding: Option<String>,
        handler: Vec<Stmt>,
    },
}

/// A parsed script
#[derive(Debug, Clone)]
pub struct Script {
    statements: Vec<Stmt>,
}

impl Script {
    pub fn parse(source: &str) -> Result<Self, TraceError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            last_line: 1,
        };
        let mut statements = Vec::new();
        while parser.peek().is_some() {
            statements.push(parser.statement()?);
        }
        Ok(Self { statements })
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Run against `realm`; the value of the last expression statement
    pub fn run(&self, realm: &Realm) -> Completion {
        let interpreter = Rc::new(Interpreter { realm: realm.clone() });
        let scope = Rc::new(Scope::new(None, Value::Undefined));
        match interpreter.exec_block(&self.statements, &scope)? {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, TraceError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut last_end = 0;
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        line += source[last_end..span.start].matches('\n').count();
        last_end = span.start;
        match result {
            Ok(token) => tokens.push((token, line)),
            Err(()) => {
                let unexpected = source[span.start..].chars().next().unwrap_or('\0');
                return Err(TraceError::Script {
                    line,
                    message: format!("unexpected character '{unexpected}'"),
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    last_line: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn advance(&mut self) -> Option<Token> {
        let (token, line) = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        self.last_line = line;
        Some(token)
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.last_line, |(_, line)| *line)
    }

    fn error(&self, message: impl Into<String>) -> TraceError {
        TraceError::Script {
            line: self.line(),
            message: message.into(),
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), TraceError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> TraceError {
        match self.peek() {
            Some(token) => self.error(format!("expected {what}, found {token:?}")),
            None => self.error(format!("expected {what}, found end of script")),
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, TraceError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn statement(&mut self) -> Result<Stmt, TraceError> {
        let statement = match self.peek() {
            Some(Token::Let) => {
                self.advance();
                let name = self.ident("a variable name")?;
                self.expect(&Token::Assign, "'='")?;
                let value = match self.expression()? {
                    Expr::Lambda(lambda) if lambda.name.is_empty() => Expr::Lambda(Rc::new(Lambda {
                        name: name.clone(),
                        params: lambda.params.clone(),
                        body: lambda.body.clone(),
                    })),
                    value => value,
                };
                Stmt::Let(name, value)
            }
            Some(Token::Throw) => {
                self.advance();
                Stmt::Throw(self.expression()?)
            }
            Some(Token::Return) => {
                self.advance();
                match self.peek() {
                    None | Some(Token::Semicolon) | Some(Token::RBrace) => Stmt::Return(Expr::Undefined),
                    _ => Stmt::Return(self.expression()?),
                }
            }
            Some(Token::Try) => {
                self.advance();
                let body = self.block()?;
                self.expect(&Token::Catch, "'catch'")?;
                let binding = if self.eat(&Token::LParen) {
                    let name = self.ident("a catch binding")?;
                    self.expect(&Token::RParen, "')'")?;
                    Some(name)
                } else {
                    None
                };
                let handler = self.block()?;
                Stmt::Try { body, binding, handler }
            }
            _ => Stmt::Expr(self.expression()?),
        };
        self.eat(&Token::Semicolon);
        Ok(statement)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, TraceError> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn expression(&mut self) -> Result<Expr, TraceError> {
        let target = self.equality()?;
        if !self.eat(&Token::Assign) {
            return Ok(target);
        }
        if !matches!(target, Expr::Ident(_) | Expr::Member(..) | Expr::Index(..)) {
            return Err(self.error("invalid assignment target"));
        }
        let value = self.expression()?;
        Ok(Expr::Assign(Box::new(target), Box::new(value)))
    }

    fn equality(&mut self) -> Result<Expr, TraceError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::StrictEq) => BinaryOp::StrictEq,
                Some(Token::StrictNe) => BinaryOp::StrictNe,
                Some(Token::LooseEq) => BinaryOp::LooseEq,
                Some(Token::LooseNe) => BinaryOp::LooseNe,
                _ => return Ok(left),
            };
            self.advance();
            left = Expr::Binary(op, Box::new(left), Box::new(self.additive()?));
        }
    }

    fn additive(&mut self) -> Result<Expr, TraceError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            left = Expr::Binary(op, Box::new(left), Box::new(self.multiplicative()?));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, TraceError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Expr, TraceError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Typeof) => UnaryOp::Typeof,
            _ => return self.postfix(),
        };
        self.advance();
        Ok(Expr::Unary(op, Box::new(self.unary()?)))
    }

    fn postfix(&mut self) -> Result<Expr, TraceError> {
        let mut expr = if self.eat(&Token::New) {
            let callee = self.member_chain()?;
            let args = if self.peek() == Some(&Token::LParen) {
                self.arguments()?
            } else {
                Vec::new()
            };
            Expr::New(Box::new(callee), args)
        } else {
            self.primary()?
        };
        loop {
            expr = match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    Expr::Member(Box::new(expr), self.property_name()?)
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    Expr::Index(Box::new(expr), Box::new(index))
                }
                Some(Token::LParen) => Expr::Call(Box::new(expr), self.arguments()?),
                _ => return Ok(expr),
            };
        }
    }

    /// Callee of `new`: member accesses only, so the argument list binds to `new`
    fn member_chain(&mut self) -> Result<Expr, TraceError> {
        let mut expr = self.primary()?;
        loop {
            expr = match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    Expr::Member(Box::new(expr), self.property_name()?)
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    Expr::Index(Box::new(expr), Box::new(index))
                }
                _ => return Ok(expr),
            };
        }
    }

    fn property_name(&mut self) -> Result<String, TraceError> {
        if let Some(keyword) = self.peek().and_then(Token::keyword) {
            self.advance();
            return Ok(keyword.to_string());
        }
        self.ident("a property name")
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, TraceError> {
        self.expect(&Token::LParen, "'('")?;
        self.list(&Token::RParen, "')'", Self::expression)
    }

    /// Comma-separated items up to `close`, trailing comma allowed
    fn list<T>(
        &mut self,
        close: &Token,
        what: &str,
        mut item: impl FnMut(&mut Self) -> Result<T, TraceError>,
    ) -> Result<Vec<T>, TraceError> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(item(self)?);
            if !self.eat(&Token::Comma) {
                self.expect(close, what)?;
                break;
            }
        }
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr, TraceError> {
        let Some(token) = self.advance() else {
            return Err(self.error("unexpected end of script"));
        };
        Ok(match token {
            Token::Number(n) => Expr::Number(n),
            Token::Str(s) => Expr::Str(s),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Null => Expr::Null,
            Token::Undefined => Expr::Undefined,
            Token::This => Expr::This,
            Token::Ident(name) => Expr::Ident(name),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                inner
            }
            Token::LBracket => Expr::Array(self.list(&Token::RBracket, "']'", Self::expression)?),
            Token::LBrace => Expr::Object(self.list(&Token::RBrace, "'}'", Self::object_entry)?),
            Token::Fn => self.lambda()?,
            other => {
                self.pos -= 1;
                return Err(self.error(format!("unexpected {other:?}")));
            }
        })
    }

    fn object_entry(&mut self) -> Result<(String, Expr), TraceError> {
        let key = match self.advance() {
            Some(Token::Ident(name)) | Some(Token::Str(name)) => name,
            Some(Token::Number(n)) => crate::value::number_to_string(n),
            Some(token) => match token.keyword() {
                Some(keyword) => keyword.to_string(),
                None => return Err(self.error(format!("expected a property key, found {token:?}"))),
            },
            None => return Err(self.error("expected a property key, found end of script")),
        };
        self.expect(&Token::Colon, "':'")?;
        Ok((key, self.expression()?))
    }

    fn lambda(&mut self) -> Result<Expr, TraceError> {
        self.expect(&Token::LParen, "'('")?;
        let params = self.list(&Token::RParen, "')'", |parser| parser.ident("a parameter name"))?;
        self.expect(&Token::Arrow, "'=>'")?;
        let body = if self.peek() == Some(&Token::LBrace) {
            self.block()?
        } else {
            vec![Stmt::Return(self.expression()?)]
        };
        Ok(Expr::Lambda(Rc::new(Lambda {
            name: String::new(),
            params,
            body,
        })))
    }
}

/// Lexical variables of one block or call
struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
    this: Value,
}

impl Scope {
    fn new(parent: Option<Rc<Scope>>, this: Value) -> Self {
        Self {
            vars: RefCell::new(HashMap::new()),
            parent,
            this,
        }
    }

    fn child(self: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self::new(Some(Rc::clone(self)), self.this.clone()))
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        match self.vars.borrow().get(name) {
            Some(value) => Some(value.clone()),
            None => self.parent.as_ref()?.lookup(name),
        }
    }

    fn assign(&self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = value;
            return true;
        }
        self.parent.as_ref().is_some_and(|parent| parent.assign(name, value))
    }

    fn declare(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }
}

enum Flow {
    Normal(Value),
    Return(Value),
}

struct Interpreter {
    realm: Realm,
}

impl Interpreter {
    fn exec_block(self: &Rc<Self>, statements: &[Stmt], scope: &Rc<Scope>) -> Result<Flow, Throw> {
        let mut last = Value::Undefined;
        for statement in statements {
            match statement {
                Stmt::Let(name, init) => {
                    let value = self.eval(init, scope)?;
                    scope.declare(name, value);
                    last = Value::Undefined;
                }
                Stmt::Expr(expr) => last = self.eval(expr, scope)?,
                Stmt::Throw(expr) => return Err(Throw(self.eval(expr, scope)?)),
                Stmt::Return(expr) => return Ok(Flow::Return(self.eval(expr, scope)?)),
                Stmt::Try { body, binding, handler } => {
                    let flow = match self.exec_block(body, &scope.child()) {
                        Ok(flow) => flow,
                        Err(thrown) => {
                            let handler_scope = scope.child();
                            if let Some(name) = binding {
                                handler_scope.declare(name, thrown.0);
                            }
                            self.exec_block(handler, &handler_scope)?
                        }
                    };
                    match flow {
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal(value) => last = value,
                    }
                }
            }
        }
        Ok(Flow::Normal(last))
    }

    fn eval(self: &Rc<Self>, expr: &Expr, scope: &Rc<Scope>) -> Completion {
        match expr {
            Expr::Number(n) => Ok(Value::from(*n)),
            Expr::Str(s) => Ok(Value::from(s.as_str())),
            Expr::Bool(b) => Ok(Value::from(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::This => Ok(scope.this.clone()),
            Expr::Ident(name) => self.lookup(name, scope),
            Expr::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::from(self.realm.new_array(items)))
            }
            Expr::Object(entries) => {
                let object = self.realm.new_object();
                for (key, value) in entries {
                    object.put(key, self.eval(value, scope)?);
                }
                Ok(Value::from(object))
            }
            Expr::Member(target, property) => {
                self.eval(target, scope)?.get(&PropertyKey::from(property.as_str()))
            }
            Expr::Index(target, index) => {
                let target = self.eval(target, scope)?;
                let key = self.eval(index, scope)?.to_display_string();
                target.get(&PropertyKey::from(key))
            }
            Expr::Call(callee, args) => {
                let (this, function) = match callee.as_ref() {
                    Expr::Member(target, property) => {
                        let this = self.eval(target, scope)?;
                        let function = this.get(&PropertyKey::from(property.as_str()))?;
                        (this, function)
                    }
                    Expr::Index(target, index) => {
                        let this = self.eval(target, scope)?;
                        let key = self.eval(index, scope)?.to_display_string();
                        let function = this.get(&PropertyKey::from(key))?;
                        (this, function)
                    }
                    other => (Value::Undefined, self.eval(other, scope)?),
                };
                let args = self.eval_all(args, scope)?;
                if !function.is_callable() {
                    return Err(self.type_error(&format!("{} is not a function", describe(callee))));
                }
                call(&function, this, args)
            }
            Expr::New(callee, args) => {
                let class = self.eval(callee, scope)?;
                let args = self.eval_all(args, scope)?;
                if !class.as_object().is_some_and(|c| c.is_constructor()) {
                    return Err(self.type_error(&format!("{} is not a constructor", describe(callee))));
                }
                construct(&class, args, None)
            }
            Expr::Lambda(lambda) => Ok(self.closure(lambda, scope)),
            Expr::Unary(op, operand) => {
                if let (UnaryOp::Typeof, Expr::Ident(name)) = (op, operand.as_ref()) {
                    let value = self.lookup(name, scope).unwrap_or_default();
                    return Ok(Value::from(value.type_name()));
                }
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Negate => Value::from(-value.to_number()),
                    UnaryOp::Not => Value::from(!value.is_truthy()),
                    UnaryOp::Typeof => Value::from(value.type_name()),
                })
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Assign(target, value) => {
                let value = self.eval(value, scope)?;
                self.assign(target, value.clone(), scope)?;
                Ok(value)
            }
        }
    }

    fn eval_all(self: &Rc<Self>, exprs: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>, Throw> {
        exprs.iter().map(|expr| self.eval(expr, scope)).collect()
    }

    fn lookup(&self, name: &str, scope: &Scope) -> Completion {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        let global = self.realm.global();
        let key = PropertyKey::from(name);
        if global.has_property(&key) {
            return global.get(&key, &Value::from(global.clone()));
        }
        Err(self.realm.throw(BuiltinKind::ReferenceError, &format!("{name} is not defined")))
    }

    fn assign(self: &Rc<Self>, target: &Expr, value: Value, scope: &Rc<Scope>) -> Result<(), Throw> {
        let (object, key) = match target {
            Expr::Ident(name) => {
                if !scope.assign(name, value.clone()) {
                    let global = self.realm.global();
                    global.set(&PropertyKey::from(name.as_str()), value, &Value::from(global.clone()))?;
                }
                return Ok(());
            }
            Expr::Member(object, property) => (self.eval(object, scope)?, PropertyKey::from(property.as_str())),
            Expr::Index(object, index) => {
                let object = self.eval(object, scope)?;
                (object, PropertyKey::from(self.eval(index, scope)?.to_display_string()))
            }
            _ => return Err(self.type_error("invalid assignment target")),
        };
        match &object {
            Value::Object(target) => {
                target.set(&key, value, &object)?;
                Ok(())
            }
            other => Err(self.type_error(&format!(
                "Cannot set properties of {} (setting '{key}')",
                other.to_display_string()
            ))),
        }
    }

    fn closure(self: &Rc<Self>, lambda: &Rc<Lambda>, scope: &Rc<Scope>) -> Value {
        let interpreter = Rc::clone(self);
        let lambda_ref = Rc::clone(lambda);
        let captured = Rc::clone(scope);
        let function = self.realm.new_function(&lambda.name, move |inv| {
            let frame = Rc::new(Scope::new(Some(Rc::clone(&captured)), inv.this.clone()));
            for (index, param) in lambda_ref.params.iter().enumerate() {
                frame.declare(param, inv.arg(index));
            }
            match interpreter.exec_block(&lambda_ref.body, &frame)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal(_) => Ok(Value::Undefined),
            }
        });
        Value::from(function)
    }

    fn type_error(&self, message: &str) -> Throw {
        self.realm.throw(BuiltinKind::TypeError, message)
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Value::from(a + b),
            (Value::Str(_), _) | (_, Value::Str(_)) | (Value::Object(_), _) | (_, Value::Object(_)) => {
                Value::from(format!("{}{}", left.to_display_string(), right.to_display_string()))
            }
            _ => Value::from(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Value::from(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::from(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::from(left.to_number() / right.to_number()),
        BinaryOp::StrictEq => Value::from(left.strict_equals(right)),
        BinaryOp::StrictNe => Value::from(!left.strict_equals(right)),
        BinaryOp::LooseEq => Value::from(left.loose_equals(right)),
        BinaryOp::LooseNe => Value::from(!left.loose_equals(right)),
    }
}

/// Source-like rendering of a callee for error messages
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member(target, property) => format!("{}.{property}", describe(target)),
        Expr::Index(target, _) => format!("{}[...]", describe(target)),
        Expr::Call(callee, _) => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}
