// Remapd Macro Programs
// AST for the compact timed-macro language
//
// Examples
//   r(3, k(a).w(10))            a <10ms> a <10ms> a
//   r(2, k(a).k(minus)).k(b)    a - a - b
//   m(shift_l, r(2, k(a)))      A A
//   h(k(2))                     2 2 2 ... until the trigger key releases

pub mod exec;
pub mod parser;

use std::fmt;

use crate::key::KeyIdentifier;

/// Decide whether a mapping value is a macro program rather than a plain
/// key name.
pub fn is_macro(output: &str) -> bool {
    output.contains('(') && output.contains(')') && output.len() >= 4
}

/// A key reference inside a macro, keeping the name as the user wrote it
/// (lowercased) so programs re-serialize to their source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroKey {
    pub name: String,
    pub key: KeyIdentifier,
}

impl fmt::Display for MacroKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One node of a parsed macro program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroNode {
    /// `k(x)`: one down+up pair.
    Keystroke(MacroKey),
    /// Terms chained with `.`, executed strictly in order.
    Sequence(Vec<MacroNode>),
    /// `r(n, child)`: child n times; zero is a no-op.
    Repeat(u32, Box<MacroNode>),
    /// `w(ms)`: suspend without emitting.
    Wait(u64),
    /// `m(key, child)`: hold key down around child; release is guaranteed
    /// on every exit path.
    Modifier(MacroKey, Box<MacroNode>),
    /// `h(child)`: repeat child while the triggering keys stay held.
    Hold(Box<MacroNode>),
}

impl fmt::Display for MacroNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroNode::Keystroke(key) => write!(f, "k({})", key),
            MacroNode::Sequence(children) => {
                let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "{}", parts.join("."))
            }
            MacroNode::Repeat(count, child) => write!(f, "r({},{})", count, child),
            MacroNode::Wait(ms) => write!(f, "w({})", ms),
            MacroNode::Modifier(key, child) => write!(f, "m({},{})", key, child),
            MacroNode::Hold(child) => write!(f, "h({})", child),
        }
    }
}

/// A parsed macro program together with its sanitized source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    code: String,
    root: MacroNode,
}

impl Program {
    pub(crate) fn new(code: String, root: MacroNode) -> Self {
        Self { code, root }
    }

    /// The whitespace-stripped source the program was parsed from.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn root(&self) -> &MacroNode {
        &self.root
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}
