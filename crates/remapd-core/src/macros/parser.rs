// Remapd Macro Parser
// Recursive descent over the k/r/w/m/h call grammar

use crate::key::KeyNameTable;
use crate::macros::{MacroKey, MacroNode, Program};

/// A macro parse failure, reported against the sanitized program text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("macro syntax error at offset {offset}: expected {expected}, found {found}")]
pub struct SyntaxError {
    pub offset: usize,
    pub expected: &'static str,
    pub found: String,
}

/// Parse a macro program.
///
/// Whitespace never carries meaning and is stripped first; quotation marks
/// are tolerated and stripped as well, as the original configurations
/// sometimes quote key names.
pub fn parse(code: &str, keys: &KeyNameTable) -> Result<Program, SyntaxError> {
    if code.contains('"') || code.contains('\'') {
        log::info!("quotation marks in macros are not needed: {}", code);
    }
    let sanitized: String = code
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '"' && *c != '\'')
        .collect();

    let mut parser = Parser {
        chars: sanitized.chars().collect(),
        pos: 0,
        keys,
    };
    let root = parser.parse_program()?;
    if parser.peek().is_some() {
        return Err(parser.error("end of input"));
    }
    Ok(Program::new(sanitized, root))
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    keys: &'a KeyNameTable,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn error(&self, expected: &'static str) -> SyntaxError {
        self.error_at(self.pos, expected)
    }

    fn error_at(&self, offset: usize, expected: &'static str) -> SyntaxError {
        let found = match self.chars.get(offset) {
            Some(c) => format!("'{}'", c),
            None => "end of input".to_string(),
        };
        SyntaxError {
            offset,
            expected,
            found,
        }
    }

    fn expect(&mut self, c: char, expected: &'static str) -> Result<(), SyntaxError> {
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    /// `program := term ('.' term)*`
    fn parse_program(&mut self) -> Result<MacroNode, SyntaxError> {
        let mut terms = vec![self.parse_term()?];
        while self.peek() == Some('.') {
            self.bump();
            terms.push(self.parse_term()?);
        }
        // a lone term stays unwrapped so programs re-serialize exactly
        if terms.len() == 1 {
            Ok(terms.remove(0))
        } else {
            Ok(MacroNode::Sequence(terms))
        }
    }

    fn parse_term(&mut self) -> Result<MacroNode, SyntaxError> {
        let start = self.pos;
        let name = self.take_word();
        let function = match name.as_str() {
            "k" | "r" | "w" | "m" | "h" => name,
            _ => return Err(self.error_at(start, "a macro function (k, r, w, m or h)")),
        };
        self.expect('(', "'('")?;

        let node = match function.as_str() {
            "k" => MacroNode::Keystroke(self.parse_key_name()?),
            "w" => MacroNode::Wait(self.parse_integer()?),
            "r" => {
                let int_start = self.pos;
                let count = u32::try_from(self.parse_integer()?)
                    .map_err(|_| self.error_at(int_start, "a repeat count that fits in 32 bits"))?;
                self.expect(',', "','")?;
                let child = self.parse_program()?;
                MacroNode::Repeat(count, Box::new(child))
            }
            "m" => {
                let key = self.parse_key_name()?;
                self.expect(',', "','")?;
                let child = self.parse_program()?;
                MacroNode::Modifier(key, Box::new(child))
            }
            "h" => MacroNode::Hold(Box::new(self.parse_program()?)),
            _ => unreachable!(),
        };

        self.expect(')', "')'")?;
        Ok(node)
    }

    fn take_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn parse_key_name(&mut self) -> Result<MacroKey, SyntaxError> {
        let start = self.pos;
        let word = self.take_word();
        if word.is_empty() {
            return Err(self.error_at(start, "a key name"));
        }

        let name = word.to_lowercase();
        match self.keys.resolve(&name) {
            Ok(key) => Ok(MacroKey { name, key }),
            Err(_) => Err(self.error_at(start, "a known key name")),
        }
    }

    fn parse_integer(&mut self) -> Result<u64, SyntaxError> {
        let start = self.pos;
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return Err(self.error_at(start, "a non-negative integer"));
        }
        digits
            .parse::<u64>()
            .map_err(|_| self.error_at(start, "a non-negative integer"))
    }
}
