//! Front end for my-lang: a lexer, a precedence-climbing parser and the AST
//! they produce, plus the boundary a code generator plugs into.

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod source;
