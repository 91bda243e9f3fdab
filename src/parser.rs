use std::{collections::HashMap, mem};

use log::debug;

use crate::ast::{ASTNode, BinOp, Expression, Function, Prototype};
use crate::lexer::{Lexer, Position, Token};

/// Grammar violations. Nothing semantic (duplicate parameters, unknown
/// names, argument counts) is checked here; that is left to the backend.
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("unknown token when expecting an expression, found {0}")]
    ExpectedExpression(Token),
    #[error("expected `)`, found {0}")]
    ExpectedCloseParen(Token),
    #[error("expected `)` or `,` in argument list, found {0}")]
    ExpectedArgumentSeparator(Token),
    #[error("expected function name in prototype, found {0}")]
    ExpectedFunctionName(Token),
    #[error("expected `(` in prototype, found {0}")]
    ExpectedPrototypeOpenParen(Token),
    #[error("expected parameter name or `)` in prototype, found {0}")]
    ExpectedPrototypeCloseParen(Token),
    #[error("unknown binary operator `{0}`")]
    UnknownOperator(char),
    #[error("expression nested more than {0} levels deep")]
    TooDeeplyNested(usize),
}

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
#[error("{position}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub position: Position,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// deepest run of parentheses and call arguments accepted inside one expression
pub const MAX_NESTING: usize = 256;

/// Binding strength of binary operator characters; higher binds tighter.
///
/// Only positive precedences take part in climbing.
#[derive(Debug, Clone)]
pub struct PrecedenceTable {
    levels: HashMap<char, i32>,
}

impl std::default::Default for PrecedenceTable {
    fn default() -> Self {
        let mut levels = HashMap::new();
        levels.insert('<', 10);
        levels.insert('>', 10);
        levels.insert('+', 20);
        levels.insert('-', 20);
        levels.insert('*', 40);
        levels.insert('/', 40);
        Self { levels }
    }
}

impl PrecedenceTable {
    pub fn insert(&mut self, op: char, precedence: i32) -> Option<i32> {
        self.levels.insert(op, precedence)
    }

    pub fn remove(&mut self, op: char) -> Option<i32> {
        self.levels.remove(&op)
    }

    /// precedence of `token` as a binary operator, -1 when it is not one
    pub fn precedence(&self, token: &Token) -> i32 {
        match token {
            Token::Char(c) => self.levels.get(c).copied().unwrap_or(-1),
            _ => -1,
        }
    }
}

/// Recursive-descent parser with a single token of lookahead.
pub struct Parser<I: Iterator<Item = char>> {
    lexer: Lexer<I>,
    current: Token,
    position: Position,
    precedence: PrecedenceTable,
    depth: usize,
}

impl<'a> Parser<std::str::Chars<'a>> {
    pub fn from_source(source: &'a str) -> Self {
        Parser::new(source.chars())
    }
}

impl<I: Iterator<Item = char>> Parser<I> {
    pub fn new(chars: I) -> Self {
        Parser::with_precedence(chars, PrecedenceTable::default())
    }

    /// Note that this pulls the first token from `chars` immediately.
    pub fn with_precedence(chars: I, precedence: PrecedenceTable) -> Self {
        let mut lexer = Lexer::new(chars);
        let current = lexer.next_token();
        let position = lexer.token_position();
        Parser {
            lexer,
            current,
            position,
            precedence,
            depth: 0,
        }
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    /// move to the next token, returning the one just consumed
    fn advance(&mut self) -> Token {
        let next = self.lexer.next_token();
        self.position = self.lexer.token_position();
        mem::replace(&mut self.current, next)
    }

    /// discard the current token; the recovery step after a failed item
    pub fn skip_token(&mut self) {
        let skipped = self.advance();
        debug!("skipped {} for error recovery", skipped);
    }

    fn error<T>(&self, kind: ParseErrorKind) -> ParseResult<T> {
        Err(ParseError {
            kind,
            position: self.position,
        })
    }

    fn expect_char(&self, c: char) -> bool {
        self.current == Token::Char(c)
    }

    /// binary operator under the cursor along with its precedence
    fn current_operator(&self) -> Option<(char, i32)> {
        match self.current {
            Token::Char(op) => Some((op, self.precedence.precedence(&self.current))),
            _ => None,
        }
    }

    /// run `parse` one nesting level deeper, failing past `MAX_NESTING`
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING {
            return self.error(ParseErrorKind::TooDeeplyNested(MAX_NESTING));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_paren_expr(&mut self) -> ParseResult<Expression> {
        self.advance(); // eat (
        let expr = self.nested(Self::parse_expression)?;
        if !self.expect_char(')') {
            return self.error(ParseErrorKind::ExpectedCloseParen(self.current.clone()));
        }
        self.advance();
        Ok(expr)
    }

    fn parse_identifier_expr(&mut self, name: String) -> ParseResult<Expression> {
        if !self.expect_char('(') {
            return Ok(Expression::Variable(name));
        }
        self.advance();

        let mut args = Vec::new();
        if !self.expect_char(')') {
            loop {
                args.push(self.nested(Self::parse_expression)?);
                match self.current {
                    Token::Char(')') => break,
                    Token::Char(',') => {
                        self.advance();
                    }
                    _ => {
                        return self
                            .error(ParseErrorKind::ExpectedArgumentSeparator(self.current.clone()))
                    }
                }
            }
        }
        self.advance(); // eat )

        Ok(Expression::Call(name, args))
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        match &self.current {
            Token::Number(value) => {
                let value = *value;
                self.advance();
                Ok(Expression::Literal(value))
            }
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                self.parse_identifier_expr(name)
            }
            Token::Char('(') => self.parse_paren_expr(),
            other => self.error(ParseErrorKind::ExpectedExpression(other.clone())),
        }
    }

    fn parse_rhs(&mut self, expr_precedence: i32, lhs: Expression) -> ParseResult<Expression> {
        let mut result = lhs;

        loop {
            let (operator, precedence) = match self.current_operator() {
                Some((op, pr)) if pr > 0 && pr >= expr_precedence => (op, pr),
                _ => return Ok(result),
            };
            let op_position = self.position;
            self.advance();

            let mut rhs = self.parse_primary()?;

            if let Some((_, next_precedence)) = self.current_operator() {
                if precedence < next_precedence {
                    rhs = self.parse_rhs(precedence + 1, rhs)?;
                }
            }

            let op = match BinOp::from_char(operator) {
                Some(op) => op,
                None => {
                    return Err(ParseError {
                        kind: ParseErrorKind::UnknownOperator(operator),
                        position: op_position,
                    })
                }
            };
            result = Expression::binary(op, result, rhs);
        }
    }

    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        let lhs = self.parse_primary()?;
        self.parse_rhs(0, lhs)
    }

    pub fn parse_prototype(&mut self) -> ParseResult<Prototype> {
        let name = match &self.current {
            Token::Ident(name) => name.clone(),
            other => return self.error(ParseErrorKind::ExpectedFunctionName(other.clone())),
        };
        self.advance();

        if !self.expect_char('(') {
            return self.error(ParseErrorKind::ExpectedPrototypeOpenParen(
                self.current.clone(),
            ));
        }
        self.advance();

        let mut params = Vec::new();
        while let Token::Ident(param) = &self.current {
            params.push(param.clone());
            self.advance();
        }

        if !self.expect_char(')') {
            return self.error(ParseErrorKind::ExpectedPrototypeCloseParen(
                self.current.clone(),
            ));
        }
        self.advance();

        Ok(Prototype::new(name, params))
    }

    pub fn parse_definition(&mut self) -> ParseResult<Function> {
        self.advance(); // eat def
        let prototype = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Function { prototype, body })
    }

    pub fn parse_extern(&mut self) -> ParseResult<Prototype> {
        self.advance(); // eat extern
        self.parse_prototype()
    }

    pub fn parse_top_level_expr(&mut self) -> ParseResult<Function> {
        let body = self.parse_expression()?;
        Ok(Function::anonymous(body))
    }

    /// Parse the next top-level construct, `None` once input is exhausted.
    ///
    /// Stray `;` separators are skipped. After an error the caller should
    /// [`skip_token`](Parser::skip_token) before trying again.
    pub fn parse_item(&mut self) -> ParseResult<Option<ASTNode>> {
        loop {
            let node = match self.current {
                Token::Eof => return Ok(None),
                Token::Char(';') => {
                    self.advance();
                    continue;
                }
                Token::Def => ASTNode::Function(self.parse_definition()?),
                Token::Extern => ASTNode::Extern(self.parse_extern()?),
                _ => ASTNode::Function(self.parse_top_level_expr()?),
            };
            debug!("parsed {}", node);
            return Ok(Some(node));
        }
    }

    /// every remaining item, recovering past each failure
    pub fn items(&mut self) -> Items<'_, I> {
        Items { parser: self }
    }
}

pub struct Items<'p, I: Iterator<Item = char>> {
    parser: &'p mut Parser<I>,
}

impl<'p, I: Iterator<Item = char>> Iterator for Items<'p, I> {
    type Item = ParseResult<ASTNode>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.parser.parse_item() {
            Ok(node) => node.map(Ok),
            Err(err) => {
                self.parser.skip_token();
                Some(Err(err))
            }
        }
    }
}

/// parse a whole source, collecting the items and the diagnostics separately
pub fn parse_all(source: &str) -> (Vec<ASTNode>, Vec<ParseError>) {
    let mut parser = Parser::from_source(source);
    let mut nodes = Vec::new();
    let mut errors = Vec::new();
    for item in parser.items() {
        match item {
            Ok(node) => nodes.push(node),
            Err(err) => errors.push(err),
        }
    }
    (nodes, errors)
}
