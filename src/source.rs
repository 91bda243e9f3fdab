use std::{io::BufRead, vec};

use log::error;
use rustyline::{error::ReadlineError, DefaultEditor};

/// Something that hands out input a line at a time, `None` once exhausted.
pub trait LineReader {
    fn read_line(&mut self) -> Option<String>;
}

/// Interactive terminal input, prompting before every line it reads.
pub struct Prompted {
    editor: DefaultEditor,
    prompt: String,
}

impl Prompted {
    pub fn new(prompt: impl Into<String>) -> Result<Self, ReadlineError> {
        Ok(Prompted {
            editor: DefaultEditor::new()?,
            prompt: prompt.into(),
        })
    }
}

impl LineReader for Prompted {
    fn read_line(&mut self) -> Option<String> {
        loop {
            match self.editor.readline(&self.prompt) {
                Ok(mut line) => {
                    let _ = self.editor.add_history_entry(line.as_str());
                    line.push('\n');
                    return Some(line);
                }
                // Ctrl-C drops the line being typed
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => return None,
                Err(err) => {
                    error!("failed to read input: {}", err);
                    return None;
                }
            }
        }
    }
}

/// Non-interactive input; bytes that are not UTF-8 decode to U+FFFD.
pub struct LossyLines<R: BufRead> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LossyLines<R> {
    pub fn new(reader: R) -> Self {
        LossyLines {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> LineReader for LossyLines<R> {
    fn read_line(&mut self) -> Option<String> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => Some(String::from_utf8_lossy(&self.buf).into_owned()),
            Err(err) => {
                error!("failed to read input: {}", err);
                None
            }
        }
    }
}

/// Characters of a line-based source, reading the next line only once the
/// current one is used up.
pub struct LineChars<L: LineReader> {
    lines: L,
    pending: vec::IntoIter<char>,
    done: bool,
}

impl<L: LineReader> LineChars<L> {
    pub fn new(lines: L) -> Self {
        LineChars {
            lines,
            pending: Vec::new().into_iter(),
            done: false,
        }
    }
}

impl<L: LineReader> Iterator for LineChars<L> {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        loop {
            if let Some(c) = self.pending.next() {
                return Some(c);
            }
            if self.done {
                return None;
            }
            match self.lines.read_line() {
                Some(line) => self.pending = line.chars().collect::<Vec<_>>().into_iter(),
                None => self.done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{lex, Token};
    use pretty_assertions::assert_eq;

    fn lossy(input: &[u8]) -> LineChars<LossyLines<&[u8]>> {
        LineChars::new(LossyLines::new(input))
    }

    struct Scripted(Vec<&'static str>);

    impl LineReader for Scripted {
        fn read_line(&mut self) -> Option<String> {
            if self.0.is_empty() {
                None
            } else {
                Some(self.0.remove(0).to_string())
            }
        }
    }

    #[test]
    fn decodes_multibyte() {
        let chars: String = lossy("a é\n🜙".as_bytes()).collect();
        assert_eq!(chars, "a é\n🜙");
    }

    #[test]
    fn truncated_sequence_keeps_following_bytes() {
        let chars: String = lossy(&[0xc3, b')', b'x']).collect();
        assert_eq!(chars, "\u{FFFD})x");

        let source: String = lossy(b"def f(x) (x + 1\xe2)\n").collect();
        assert_eq!(
            lex(&source)[9..].to_vec(),
            vec![Token::Char('\u{FFFD}'), Token::Char(')')]
        );
    }

    #[test]
    fn lines_are_pulled_on_demand() {
        let mut chars = LineChars::new(Scripted(vec!["ab\n", "", "c\n"]));
        assert_eq!(chars.next(), Some('a'));
        assert_eq!(chars.lines.0.len(), 2);
        assert_eq!(chars.by_ref().collect::<String>(), "b\nc\n");
        assert_eq!(chars.next(), None);
    }

    #[test]
    fn stays_finished() {
        let mut chars = lossy(b"z");
        assert_eq!(chars.next(), Some('z'));
        assert_eq!(chars.next(), None);
        assert_eq!(chars.next(), None);
    }
}
