use std::{
    fs,
    io::{self, IsTerminal},
};

use anyhow::Context;
use clap::{crate_version, App, Arg};
use log::info;

use mylang::{
    ast::ASTNode,
    codegen::{compile, IrEmitter},
    lexer::{Lexer, Token},
    parser::Parser,
    source::{LineChars, LossyLines, Prompted},
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Emit {
    Tokens,
    Ast,
    Ir,
}

fn dump_tokens<I: Iterator<Item = char>>(chars: I) {
    let mut lexer = Lexer::new(chars);
    loop {
        let token = lexer.next_token();
        println!("{} {}", lexer.token_position(), token);
        if token == Token::Eof {
            break;
        }
    }
}

fn describe(node: &ASTNode) -> &'static str {
    match node {
        ASTNode::Extern(_) => "Read extern:",
        ASTNode::Function(func) if func.prototype.is_anonymous() => "Read top-level expression:",
        ASTNode::Function(_) => "Read function definition:",
    }
}

fn run<I: Iterator<Item = char>>(chars: I, emit: Emit) -> anyhow::Result<()> {
    if emit == Emit::Tokens {
        dump_tokens(chars);
        return Ok(());
    }

    let mut parser = Parser::new(chars);
    let mut codegen = IrEmitter::default();

    loop {
        let node = match parser.parse_item() {
            Ok(Some(node)) => node,
            Ok(None) => break,
            Err(err) => {
                eprintln!("Error: {}", err);
                parser.skip_token();
                continue;
            }
        };

        match emit {
            Emit::Ast => println!("{}", node),
            _ => match compile(&mut codegen, &node) {
                Ok(handle) => {
                    eprintln!("{}", describe(&node));
                    if let Some(ir) = codegen.function_ir(&handle) {
                        println!("{}", ir);
                    }
                }
                Err(err) => eprintln!("Error: {}", err),
            },
        }
    }

    if emit == Emit::Ir {
        print!("{}", codegen);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = App::new("mylang")
        .version(crate_version!())
        .about("front end for the my-lang expression language")
        .arg(
            Arg::with_name("INPUT")
                .help("source file to read, standard input when omitted")
                .index(1),
        )
        .arg(
            Arg::with_name("emit")
                .long("emit")
                .takes_value(true)
                .possible_values(&["tokens", "ast", "ir"])
                .default_value("ir")
                .help("what to print for each top-level item"),
        )
        .arg(
            Arg::with_name("quiet")
                .short("q")
                .long("quiet")
                .help("read standard input without the ready> prompt or line editing"),
        )
        .get_matches();

    let emit = match matches.value_of("emit") {
        Some("tokens") => Emit::Tokens,
        Some("ast") => Emit::Ast,
        _ => Emit::Ir,
    };

    match matches.value_of("INPUT") {
        Some(path) => {
            info!("reading {}", path);
            let source =
                fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
            run(source.chars(), emit)
        }
        None if io::stdin().is_terminal() && !matches.is_present("quiet") => {
            let editor = Prompted::new("ready> ").context("failed to initialize line editor")?;
            run(LineChars::new(editor), emit)
        }
        None => {
            let stdin = io::stdin();
            run(LineChars::new(LossyLines::new(stdin.lock())), emit)
        }
    }
}
