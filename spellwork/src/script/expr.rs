//! Sandbox lexer, AST, and parser.
//!
//! The language is a single Python-style expression or assignment.  Anything
//! outside the allow-list (attribute access, lambdas, imports, augmented
//! assignment, generator expressions, multiple statements, bitwise operators)
//! is rejected at parse time with [`SandboxError::SyntaxRejected`].
//!
//! Operator precedence (lowest → highest):
//!   conditional  →  or  →  and  →  not  →  comparison  →
//!   additive  →  multiplicative  →  unary  →  power  →  postfix  →  primary

use super::error::SandboxError;
use super::value::Value;

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw body of an `f"..."` literal; fields are parsed later.
    FStr(String),
    Ident(String),

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,

    // Comparison
    Eq, // ==
    Ne, // !=
    Lt,
    Le,
    Gt,
    Ge,

    // Assignment
    Assign,
    /// `+=`, `-=`, `:=` and friends; never allowed.
    AugAssign(String),

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Newline,
    /// Anything else (`&`, `|`, `@`, ...): reported as a diagnostic.
    Unknown(String),
    Eof,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer {
    src: Vec<char>,
    pos: usize,
    /// Bracket nesting; newlines inside brackets are plain whitespace.
    depth: usize,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Lexer {
            src: src.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => self.pos += 1,
                Some('\n') if self.depth > 0 => self.pos += 1,
                Some('\\') if self.peek2() == Some('\n') => self.pos += 2,
                Some('#') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn read_number(&mut self, first: char) -> Result<Token, SandboxError> {
        let mut s = String::new();
        s.push(first);
        let mut is_float = first == '.';

        if first == '0' && matches!(self.peek(), Some('x' | 'X')) {
            self.pos += 1;
            let mut hex = String::new();
            while let Some(c) = self.peek().filter(char::is_ascii_hexdigit) {
                hex.push(c);
                self.pos += 1;
            }
            return i64::from_str_radix(&hex, 16)
                .map(Token::Int)
                .map_err(|_| SandboxError::SyntaxRejected(format!("invalid hex literal 0x{hex}")));
        }

        let take_digits = |lx: &mut Lexer, s: &mut String| {
            while let Some(c) = lx.peek().filter(|c| c.is_ascii_digit() || *c == '_') {
                if c != '_' {
                    s.push(c);
                }
                lx.pos += 1;
            }
        };
        take_digits(self, &mut s);
        if !is_float && self.peek() == Some('.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            s.push('.');
            self.pos += 1;
            take_digits(self, &mut s);
        }
        if matches!(self.peek(), Some('e' | 'E'))
            && (self.peek2().is_some_and(|c| c.is_ascii_digit())
                || (matches!(self.peek2(), Some('+' | '-'))
                    && self.src.get(self.pos + 2).is_some_and(|c| c.is_ascii_digit())))
        {
            is_float = true;
            s.push('e');
            self.pos += 1;
            if let Some(sign) = self.peek().filter(|c| matches!(c, '+' | '-')) {
                s.push(sign);
                self.pos += 1;
            }
            take_digits(self, &mut s);
        }

        if is_float {
            s.parse()
                .map(Token::Float)
                .map_err(|_| SandboxError::SyntaxRejected(format!("invalid number {s}")))
        } else {
            s.parse()
                .map(Token::Int)
                .map_err(|_| SandboxError::ValueTooLarge(format!("integer literal {s}")))
        }
    }

    /// Read a quoted literal body.  Handles single, double and triple quotes.
    fn read_string(&mut self, quote: char, raw: bool) -> Result<String, SandboxError> {
        let triple = self.peek() == Some(quote) && self.peek2() == Some(quote);
        if triple {
            self.pos += 2;
        }
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(SandboxError::SyntaxRejected("unterminated string literal".into())),
                Some('\n') if !triple => {
                    return Err(SandboxError::SyntaxRejected("unterminated string literal".into()))
                }
                Some('\\') if raw => {
                    s.push('\\');
                    if let Some(c) = self.advance() {
                        s.push(c);
                    }
                }
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some('\n') => {}
                    Some(c @ ('\\' | '\'' | '"')) => s.push(c),
                    Some(c) => {
                        s.push('\\');
                        s.push(c);
                    }
                    None => {
                        return Err(SandboxError::SyntaxRejected("unterminated string literal".into()))
                    }
                },
                Some(c) if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek2() == Some(quote) {
                        self.pos += 2;
                        break;
                    }
                    s.push(c);
                }
                Some(c) => s.push(c),
            }
        }
        Ok(s)
    }

    fn read_ident(&mut self, first: char) -> String {
        let mut s = String::new();
        s.push(first);
        while let Some(c) = self.peek().filter(|c| c.is_alphanumeric() || *c == '_') {
            s.push(c);
            self.pos += 1;
        }
        s
    }

    fn next_token(&mut self) -> Result<Token, SandboxError> {
        self.skip_ws();
        let Some(ch) = self.advance() else {
            return Ok(Token::Eof);
        };

        let tok = match ch {
            '0'..='9' => self.read_number(ch)?,
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_number(ch)?,
            '"' | '\'' => Token::Str(self.read_string(ch, false)?),
            c if c.is_alphabetic() || c == '_' => {
                let ident = self.read_ident(c);
                let prefix = ident.to_ascii_lowercase();
                match self.peek() {
                    Some(q @ ('"' | '\'')) if matches!(prefix.as_str(), "f" | "r" | "rf" | "fr") => {
                        self.pos += 1;
                        let raw = prefix.contains('r');
                        let body = self.read_string(q, raw)?;
                        if prefix.contains('f') {
                            Token::FStr(body)
                        } else {
                            Token::Str(body)
                        }
                    }
                    Some('"' | '\'') if matches!(prefix.as_str(), "b" | "u" | "br" | "rb") => {
                        return Err(SandboxError::SyntaxRejected(format!(
                            "string prefix `{ident}` is not supported"
                        )))
                    }
                    _ => Token::Ident(ident),
                }
            }
            '+' => {
                if self.eat('=') { Token::AugAssign("+=".into()) } else { Token::Plus }
            }
            '-' => {
                if self.eat('=') { Token::AugAssign("-=".into()) } else { Token::Minus }
            }
            '*' => {
                if self.eat('*') {
                    if self.eat('=') { Token::AugAssign("**=".into()) } else { Token::DoubleStar }
                } else if self.eat('=') {
                    Token::AugAssign("*=".into())
                } else {
                    Token::Star
                }
            }
            '/' => {
                if self.eat('/') {
                    if self.eat('=') { Token::AugAssign("//=".into()) } else { Token::DoubleSlash }
                } else if self.eat('=') {
                    Token::AugAssign("/=".into())
                } else {
                    Token::Slash
                }
            }
            '%' => {
                if self.eat('=') { Token::AugAssign("%=".into()) } else { Token::Percent }
            }
            '=' => {
                if self.eat('=') { Token::Eq } else { Token::Assign }
            }
            '!' => {
                if self.eat('=') { Token::Ne } else { Token::Unknown("!".into()) }
            }
            '<' => {
                if self.eat('=') {
                    Token::Le
                } else if self.eat('<') {
                    Token::Unknown("<<".into())
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::Ge
                } else if self.eat('>') {
                    Token::Unknown(">>".into())
                } else {
                    Token::Gt
                }
            }
            ':' => {
                if self.eat('=') { Token::AugAssign(":=".into()) } else { Token::Colon }
            }
            '(' => {
                self.depth += 1;
                Token::LParen
            }
            '[' => {
                self.depth += 1;
                Token::LBracket
            }
            '{' => {
                self.depth += 1;
                Token::LBrace
            }
            ')' => {
                self.depth = self.depth.saturating_sub(1);
                Token::RParen
            }
            ']' => {
                self.depth = self.depth.saturating_sub(1);
                Token::RBracket
            }
            '}' => {
                self.depth = self.depth.saturating_sub(1);
                Token::RBrace
            }
            ',' => Token::Comma,
            '.' => Token::Dot,
            ';' => Token::Semicolon,
            '\n' => Token::Newline,
            c => Token::Unknown(c.to_string()),
        };
        Ok(tok)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, SandboxError> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token()?;
            let done = matches!(t, Token::Eof);
            tokens.push(t);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

/// The bracketed part of a subscript.
#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Item(Expr),
    Slice {
        lower: Option<Expr>,
        upper: Option<Expr>,
        step: Option<Expr>,
    },
}

/// One `for target in iter if cond...` clause of a comprehension.
#[derive(Debug, Clone, PartialEq)]
pub struct Generator {
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompKind {
    List(Box<Expr>),
    Set(Box<Expr>),
    Dict(Box<Expr>, Box<Expr>),
}

/// A piece of an f-string.
#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
    Text(String),
    Field {
        expr: Box<Expr>,
        conversion: Option<char>,
        spec: Option<Vec<FPart>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Bool(BoolOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    Call {
        func: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Subscript(Box<Expr>, Box<Index>),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Comprehension(CompKind, Vec<Generator>),
    FString(Vec<FPart>),
}

/// Left-hand side of an assignment or comprehension clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Unpack(Vec<String>),
    Subscript(Box<Target>, Box<Expr>),
}

/// A parsed snippet: exactly one expression or one assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign(Target, Expr),
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Literal(_) => "literal",
        Expr::Name(_) => "name",
        Expr::Unary(..) => "unary operation",
        Expr::Binary(..) => "binary operation",
        Expr::Bool(..) => "boolean operation",
        Expr::Compare(..) => "comparison",
        Expr::Call { .. } => "function call",
        Expr::Subscript(..) => "subscript",
        Expr::IfElse { .. } => "conditional expression",
        Expr::List(_) => "list",
        Expr::Tuple(_) => "tuple",
        Expr::Set(_) => "set",
        Expr::Dict(_) => "dict",
        Expr::Comprehension(..) => "comprehension",
        Expr::FString(_) => "f-string",
    }
}

/// Convert a parsed left-hand side into an assignment target.
fn to_target(expr: Expr) -> Result<Target, SandboxError> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Tuple(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Expr::Name(n) => names.push(n),
                    other => {
                        return Err(SandboxError::UnknownAssignmentTarget(format!(
                            "{} inside an unpacking tuple",
                            describe(&other)
                        )))
                    }
                }
            }
            Ok(Target::Unpack(names))
        }
        Expr::Subscript(container, index) => match *index {
            Index::Item(key) => Ok(Target::Subscript(Box::new(to_target(*container)?), Box::new(key))),
            Index::Slice { .. } => Err(SandboxError::UnknownAssignmentTarget("slice".into())),
        },
        other => Err(SandboxError::UnknownAssignmentTarget(describe(&other).into())),
    }
}

const REJECTED_KEYWORDS: &[&str] = &[
    "lambda", "import", "from", "def", "class", "del", "global", "nonlocal", "yield", "await",
    "async", "return", "while", "with", "try", "raise", "assert", "pass", "break", "continue",
];

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn reject(msg: impl Into<String>) -> SandboxError {
    SandboxError::SyntaxRejected(msg.into())
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), SandboxError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(reject(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// True when the next token can start an expression.
    fn at_expr_start(&self) -> bool {
        match self.peek() {
            Token::Ident(s) => !matches!(s.as_str(), "for" | "if" | "else" | "in" | "and" | "or"),
            Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::FStr(_)
            | Token::Minus
            | Token::Plus
            | Token::LParen
            | Token::LBracket
            | Token::LBrace => true,
            _ => false,
        }
    }

    // ── Statements ────────────────────────────────────────────────────────────

    fn parse_stmt(&mut self) -> Result<Stmt, SandboxError> {
        let lhs = self.parse_exprlist()?;
        let stmt = match self.peek() {
            Token::Assign => {
                self.pos += 1;
                let target = to_target(lhs)?;
                let rhs = self.parse_exprlist()?;
                if self.peek() == &Token::Assign {
                    return Err(reject("chained assignment"));
                }
                Stmt::Assign(target, rhs)
            }
            Token::AugAssign(op) => return Err(reject(format!("augmented assignment `{op}`"))),
            _ => Stmt::Expr(lhs),
        };
        while self.eat(&Token::Newline) {}
        match self.peek() {
            Token::Eof => Ok(stmt),
            Token::Newline | Token::Semicolon => Err(reject("only one statement is allowed")),
            Token::Dot => Err(reject("attribute access")),
            other => Err(reject(format!("unexpected token {other:?}"))),
        }
    }

    /// `expr (, expr)* [,]`, producing a tuple when a comma is present.
    fn parse_exprlist(&mut self) -> Result<Expr, SandboxError> {
        let first = self.parse_test()?;
        if self.peek() != &Token::Comma {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if !self.at_expr_start() {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    fn parse_test(&mut self) -> Result<Expr, SandboxError> {
        if self.is_keyword("lambda") {
            return Err(reject("lambda"));
        }
        let body = self.parse_or()?;
        if self.eat_keyword("if") {
            let cond = self.parse_or()?;
            if !self.eat_keyword("else") {
                return Err(reject("expected `else` in conditional expression"));
            }
            let otherwise = self.parse_test()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(body),
                otherwise: Box::new(otherwise),
            });
        }
        if matches!(self.peek(), Token::AugAssign(op) if op == ":=") {
            return Err(reject("assignment expression"));
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Bool(BoolOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::Bool(BoolOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SandboxError> {
        let lhs = self.parse_additive()?;
        let mut chain = Vec::new();
        loop {
            let op = match self.peek() {
                Token::Eq => CmpOp::Eq,
                Token::Ne => CmpOp::Ne,
                Token::Lt => CmpOp::Lt,
                Token::Le => CmpOp::Le,
                Token::Gt => CmpOp::Gt,
                Token::Ge => CmpOp::Ge,
                Token::Ident(kw) if kw == "in" => CmpOp::In,
                Token::Ident(kw) if kw == "not" && matches!(self.peek_at(1), Token::Ident(n) if n == "in") => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Token::Ident(kw) if kw == "is" => {
                    if matches!(self.peek_at(1), Token::Ident(n) if n == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            chain.push((op, self.parse_additive()?));
        }
        if chain.is_empty() {
            Ok(lhs)
        } else {
            Ok(Expr::Compare(Box::new(lhs), chain))
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::DoubleSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Mod,
                Token::Unknown(op) => return Err(reject(format!("operator `{op}`"))),
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, SandboxError> {
        match self.peek() {
            Token::Minus => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            Token::Plus => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.parse_unary()?)))
            }
            Token::Unknown(op) if op == "~" => Err(reject("operator `~`")),
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, SandboxError> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::DoubleStar) {
            let exp = self.parse_unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::LBracket => {
                    self.pos += 1;
                    let index = self.parse_index()?;
                    self.expect(&Token::RBracket, "`]`")?;
                    expr = Expr::Subscript(Box::new(expr), Box::new(index));
                }
                Token::LParen => {
                    let func = match expr {
                        Expr::Name(func) => func,
                        other => return Err(reject(format!("calling a {}", describe(&other)))),
                    };
                    self.pos += 1;
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = Expr::Call { func, args, kwargs };
                }
                Token::Dot => return Err(reject("attribute access")),
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_index(&mut self) -> Result<Index, SandboxError> {
        let lower = if matches!(self.peek(), Token::Colon) {
            None
        } else {
            let first = self.parse_test()?;
            if !matches!(self.peek(), Token::Colon) {
                return Ok(Index::Item(first));
            }
            Some(first)
        };
        self.expect(&Token::Colon, "`:`")?;
        let upper = if matches!(self.peek(), Token::Colon | Token::RBracket) {
            None
        } else {
            Some(self.parse_test()?)
        };
        let step = if self.eat(&Token::Colon) && !matches!(self.peek(), Token::RBracket) {
            Some(self.parse_test()?)
        } else {
            None
        };
        Ok(Index::Slice { lower, upper, step })
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SandboxError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while self.peek() != &Token::RParen {
            if matches!(self.peek(), Token::Star | Token::DoubleStar) {
                return Err(reject("argument unpacking"));
            }
            let keyword = match (self.peek(), self.peek_at(1)) {
                (Token::Ident(name), Token::Assign) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.pos += 2;
                kwargs.push((name, self.parse_test()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(reject("positional argument follows keyword argument"));
                }
                let arg = self.parse_test()?;
                if self.is_keyword("for") {
                    return Err(reject("generator expression"));
                }
                args.push(arg);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "`)` after arguments")?;
        Ok((args, kwargs))
    }

    fn parse_primary(&mut self) -> Result<Expr, SandboxError> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(x) => Ok(Expr::Literal(Value::Float(x))),
            Token::Str(s) => self.parse_string_concat(vec![FPart::Text(s)]),
            Token::FStr(body) => self.parse_string_concat(parse_fstring(&body)?),
            Token::Ident(name) => match name.as_str() {
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::None)),
                kw if REJECTED_KEYWORDS.contains(&kw) => Err(reject(format!("`{kw}`"))),
                _ => Ok(Expr::Name(name)),
            },
            Token::LParen => self.parse_paren(),
            Token::LBracket => self.parse_list(),
            Token::LBrace => self.parse_brace(),
            Token::Star => Err(reject("starred expression")),
            Token::Unknown(op) => Err(reject(format!("operator `{op}`"))),
            Token::Eof => Err(reject("unexpected end of expression")),
            other => Err(reject(format!("unexpected token {other:?}"))),
        }
    }

    /// Adjacent string literals concatenate, f-strings included.
    fn parse_string_concat(&mut self, mut parts: Vec<FPart>) -> Result<Expr, SandboxError> {
        loop {
            match self.peek().clone() {
                Token::Str(s) => {
                    self.pos += 1;
                    parts.push(FPart::Text(s));
                }
                Token::FStr(body) => {
                    self.pos += 1;
                    parts.extend(parse_fstring(&body)?);
                }
                _ => break,
            }
        }
        if parts.iter().all(|p| matches!(p, FPart::Text(_))) {
            let text: String = parts
                .into_iter()
                .map(|p| match p {
                    FPart::Text(t) => t,
                    FPart::Field { .. } => String::new(),
                })
                .collect();
            Ok(Expr::Literal(Value::Str(text)))
        } else {
            Ok(Expr::FString(parts))
        }
    }

    fn parse_paren(&mut self) -> Result<Expr, SandboxError> {
        if self.eat(&Token::RParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.parse_test()?;
        if self.is_keyword("for") {
            return Err(reject("generator expression"));
        }
        let expr = if self.peek() == &Token::Comma {
            let mut items = vec![first];
            while self.eat(&Token::Comma) {
                if self.peek() == &Token::RParen {
                    break;
                }
                items.push(self.parse_test()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        self.expect(&Token::RParen, "`)`")?;
        Ok(expr)
    }

    fn parse_list(&mut self) -> Result<Expr, SandboxError> {
        if self.eat(&Token::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_test()?;
        if self.is_keyword("for") {
            let generators = self.parse_generators()?;
            self.expect(&Token::RBracket, "`]`")?;
            return Ok(Expr::Comprehension(CompKind::List(Box::new(first)), generators));
        }
        let items = self.parse_items_after(first, &Token::RBracket)?;
        self.expect(&Token::RBracket, "`]`")?;
        Ok(Expr::List(items))
    }

    fn parse_brace(&mut self) -> Result<Expr, SandboxError> {
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Dict(Vec::new()));
        }
        if self.peek() == &Token::DoubleStar {
            return Err(reject("dict unpacking"));
        }
        let first = self.parse_test()?;
        if self.eat(&Token::Colon) {
            let value = self.parse_test()?;
            if self.is_keyword("for") {
                let generators = self.parse_generators()?;
                self.expect(&Token::RBrace, "`}`")?;
                return Ok(Expr::Comprehension(
                    CompKind::Dict(Box::new(first), Box::new(value)),
                    generators,
                ));
            }
            let mut pairs = vec![(first, value)];
            while self.eat(&Token::Comma) {
                if self.peek() == &Token::RBrace {
                    break;
                }
                let k = self.parse_test()?;
                self.expect(&Token::Colon, "`:` in dict literal")?;
                pairs.push((k, self.parse_test()?));
            }
            self.expect(&Token::RBrace, "`}`")?;
            return Ok(Expr::Dict(pairs));
        }
        if self.is_keyword("for") {
            let generators = self.parse_generators()?;
            self.expect(&Token::RBrace, "`}`")?;
            return Ok(Expr::Comprehension(CompKind::Set(Box::new(first)), generators));
        }
        let items = self.parse_items_after(first, &Token::RBrace)?;
        self.expect(&Token::RBrace, "`}`")?;
        Ok(Expr::Set(items))
    }

    fn parse_items_after(&mut self, first: Expr, close: &Token) -> Result<Vec<Expr>, SandboxError> {
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.peek() == close {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(items)
    }

    fn parse_generators(&mut self) -> Result<Vec<Generator>, SandboxError> {
        let mut generators = Vec::new();
        while self.eat_keyword("for") {
            let target = self.parse_for_target()?;
            if !self.eat_keyword("in") {
                return Err(reject("expected `in` in comprehension"));
            }
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.eat_keyword("if") {
                ifs.push(self.parse_or()?);
            }
            generators.push(Generator { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_for_target(&mut self) -> Result<Target, SandboxError> {
        let parenthesized = self.eat(&Token::LParen);
        let mut names = Vec::new();
        loop {
            match self.advance() {
                Token::Ident(n) if !REJECTED_KEYWORDS.contains(&n.as_str()) => names.push(n),
                other => {
                    return Err(SandboxError::UnknownAssignmentTarget(format!(
                        "{other:?} in comprehension"
                    )))
                }
            }
            if !self.eat(&Token::Comma) || self.is_keyword("in") {
                break;
            }
        }
        if parenthesized {
            self.expect(&Token::RParen, "`)`")?;
        }
        if names.len() == 1 && !parenthesized {
            Ok(Target::Name(names.remove(0)))
        } else {
            Ok(Target::Unpack(names))
        }
    }
}

// ── f-strings ─────────────────────────────────────────────────────────────────

/// Split an f-string body into literal text and `{expr!c:spec}` fields.
fn parse_fstring(body: &str) -> Result<Vec<FPart>, SandboxError> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                text.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                text.push('}');
                i += 2;
            }
            '}' => return Err(reject("single `}` in f-string")),
            '{' => {
                if !text.is_empty() {
                    parts.push(FPart::Text(std::mem::take(&mut text)));
                }
                let (field, next) = parse_field(&chars, i + 1)?;
                parts.push(field);
                i = next;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !text.is_empty() {
        parts.push(FPart::Text(text));
    }
    Ok(parts)
}

/// Parse one replacement field starting just after its `{`.  Returns the
/// field and the index just past its closing `}`.
fn parse_field(chars: &[char], start: usize) -> Result<(FPart, usize), SandboxError> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    let mut expr_end = None;
    let mut conversion = None;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                expr_end.get_or_insert(i);
                conversion = chars.get(i + 1).copied();
                if !matches!(conversion, Some('r' | 's' | 'a')) {
                    return Err(reject("invalid f-string conversion"));
                }
                i += 2;
                continue;
            }
            ':' | '}' if depth == 0 => break,
            _ => {}
        }
        i += 1;
    }
    if i >= chars.len() {
        return Err(reject("unterminated f-string field"));
    }
    let expr_src: String = chars[start..expr_end.unwrap_or(i)].iter().collect();
    if expr_src.trim().is_empty() {
        return Err(reject("empty expression in f-string"));
    }
    let expr = parse_expr(&expr_src)?;

    let mut spec = None;
    if chars[i] == ':' {
        let spec_start = i + 1;
        let mut nested = 0usize;
        i = spec_start;
        while i < chars.len() {
            match chars[i] {
                '{' => nested += 1,
                '}' if nested > 0 => nested -= 1,
                '}' => break,
                _ => {}
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(reject("unterminated f-string format spec"));
        }
        let spec_src: String = chars[spec_start..i].iter().collect();
        spec = Some(parse_fstring(&spec_src)?);
    }
    Ok((
        FPart::Field {
            expr: Box::new(expr),
            conversion,
            spec,
        },
        i + 1,
    ))
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Parse a snippet into a single statement.
pub fn parse_stmt(src: &str) -> Result<Stmt, SandboxError> {
    let tokens = Lexer::new(src.trim()).tokenize()?;
    Parser::new(tokens).parse_stmt()
}

/// Parse a snippet that must be a bare expression (no assignment).
pub fn parse_expr(src: &str) -> Result<Expr, SandboxError> {
    match parse_stmt(src)? {
        Stmt::Expr(e) => Ok(e),
        Stmt::Assign(..) => Err(reject("assignment is not allowed here")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
