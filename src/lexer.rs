use std::{fmt, iter::Fuse};

use lazy_static::lazy_static;
use log::{trace, warn};
use regex::Regex;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    Ident(String),
    Number(f64),
    /// any other single character, operators and punctuation alike
    Char(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Def => write!(f, "`def`"),
            Token::Extern => write!(f, "`extern`"),
            Token::Ident(name) => write!(f, "identifier `{}`", name),
            Token::Number(value) => write!(f, "number `{}`", value),
            Token::Char(c) => write!(f, "`{}`", c),
        }
    }
}

/// 1-based line and column of a character in the input
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

lazy_static! {
    static ref NUMBER_PREFIX_RE: Regex = Regex::new(r"^(?:\d+\.?\d*|\.\d+)").unwrap();
}

/// convert a scanned run of digits and dots, keeping only its longest valid
/// decimal prefix (`3.1.4` reads as `3.1`, a lone `.` as `0`)
fn parse_number(text: &str) -> f64 {
    match NUMBER_PREFIX_RE.find(text) {
        Some(m) => {
            if m.end() < text.len() {
                warn!("numeric literal `{}` truncated to `{}`", text, m.as_str());
            }
            m.as_str().parse().unwrap_or(0.0)
        }
        None => {
            warn!("numeric literal `{}` has no digits, reading it as 0", text);
            0.0
        }
    }
}

/// Pull-based tokenizer over a stream of characters.
///
/// Holds exactly one character of lookahead; nothing before it is kept.
pub struct Lexer<I: Iterator<Item = char>> {
    chars: Fuse<I>,
    last: Option<char>,
    position: Position,
    token_start: Position,
}

impl<I: Iterator<Item = char>> Lexer<I> {
    pub fn new(chars: I) -> Self {
        // the lookahead starts out as a blank so the first pull reads input
        Lexer {
            chars: chars.fuse(),
            last: Some(' '),
            position: Position { line: 1, column: 0 },
            token_start: Position { line: 1, column: 0 },
        }
    }

    /// position of the first character of the token most recently returned
    pub fn token_position(&self) -> Position {
        self.token_start
    }

    fn bump(&mut self) {
        if self.last == Some('\n') {
            self.position.line += 1;
            self.position.column = 0;
        }
        self.last = self.chars.next();
        if self.last.is_some() {
            self.position.column += 1;
        }
    }

    fn scan_while(&mut self, text: &mut String, pred: impl Fn(char) -> bool) {
        loop {
            self.bump();
            match self.last {
                Some(c) if pred(c) => text.push(c),
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        let token = self.scan();
        trace!("{} at {}", token, self.token_start);
        token
    }

    fn scan(&mut self) -> Token {
        loop {
            while matches!(self.last, Some(c) if c.is_whitespace()) {
                self.bump();
            }
            self.token_start = self.position;

            let c = match self.last {
                Some(c) => c,
                None => return Token::Eof,
            };

            if c.is_ascii_alphabetic() {
                let mut ident = c.to_string();
                self.scan_while(&mut ident, |c| c.is_ascii_alphanumeric());
                return match ident.as_str() {
                    "def" => Token::Def,
                    "extern" => Token::Extern,
                    _ => Token::Ident(ident),
                };
            }

            if c.is_ascii_digit() || c == '.' {
                let mut text = c.to_string();
                self.scan_while(&mut text, |c| c.is_ascii_digit() || c == '.');
                return Token::Number(parse_number(&text));
            }

            if c == '#' {
                while !matches!(self.last, None | Some('\n') | Some('\r')) {
                    self.bump();
                }
                continue;
            }

            self.bump();
            return Token::Char(c);
        }
    }
}

impl<I: Iterator<Item = char>> Iterator for Lexer<I> {
    type Item = Token;

    /// yields tokens up to, but not including, the end of input
    fn next(&mut self) -> Option<Token> {
        match self.next_token() {
            Token::Eof => None,
            token => Some(token),
        }
    }
}

/// lex a whole string at once
pub fn lex(input: &str) -> Vec<Token> {
    Lexer::new(input.chars()).collect()
}
