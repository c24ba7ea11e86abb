//! Instructions and instruction sets
//!
//! An [`InstructionSet`] is a labelled, ordered run of [`Instruction`]s and is
//! the unit the VM dispatches on. Sets are built by the loader and become
//! immutable once loading finishes; they are shared as `Arc<InstructionSet>`
//! between the load result, the host's label table and VM call frames.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use smallvec::SmallVec;

use super::registry::{ActionDescriptor, ParamShape};

/// Parameter list attached to a single instruction.
///
/// Almost every opcode takes at most two parameters (`send name argc`,
/// `getlocal idx depth`), so they stay inline.
pub type Params = SmallVec<[Param; 2]>;

/// A decoded instruction parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Param {
    /// A token that decoded as a base-prefixed or decimal integer
    Integer(i64),
    /// Anything else, including `putstring` literals
    Symbol(String),
}

impl Param {
    /// Classify a raw token: `Integer` iff [`parse_integer`] accepts it.
    pub fn parse(token: &str) -> Self {
        match parse_integer(token) {
            Some(n) => Param::Integer(n),
            None => Param::Symbol(token.to_string()),
        }
    }

    /// Get the integer value, if this is an integer
    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Param::Integer(n) => Some(*n),
            Param::Symbol(_) => None,
        }
    }

    /// Get the symbol text, if this is a symbol
    #[inline]
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Param::Symbol(s) => Some(s),
            Param::Integer(_) => None,
        }
    }

    /// Short type name used in runtime error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Param::Integer(_) => "Integer",
            Param::Symbol(_) => "Symbol",
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Integer(n) => write!(f, "{}", n),
            Param::Symbol(s) => f.write_str(s),
        }
    }
}

/// Decode an integer token with C-style base detection.
///
/// Accepts an optional sign, then `0x`/`0X` (hex), `0b`/`0B` (binary),
/// `0o`/`0O` or a bare leading `0` (octal), or plain decimal digits.
/// Returns `None` for anything else, including values outside `i64`.
pub fn parse_integer(token: &str) -> Option<i64> {
    let (negative, digits) = match token.as_bytes().first()? {
        b'-' => (true, &token[1..]),
        b'+' => (false, &token[1..]),
        _ => (false, token),
    };

    let (radix, body) = if let Some(rest) = strip_radix_prefix(digits, 'x') {
        (16, rest)
    } else if let Some(rest) = strip_radix_prefix(digits, 'b') {
        (2, rest)
    } else if let Some(rest) = strip_radix_prefix(digits, 'o') {
        (8, rest)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    // from_str_radix tolerates a second sign; the token must not.
    if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    let magnitude = u64::from_str_radix(body, radix).ok()?;
    if negative {
        if magnitude == i64::MIN.unsigned_abs() {
            Some(i64::MIN)
        } else {
            i64::try_from(magnitude).ok().map(|m| -m)
        }
    } else {
        i64::try_from(magnitude).ok()
    }
}

fn strip_radix_prefix(digits: &str, marker: char) -> Option<&str> {
    let mut chars = digits.chars();
    match (chars.next(), chars.next()) {
        (Some('0'), Some(c)) if c.to_ascii_lowercase() == marker => Some(&digits[2..]),
        _ => None,
    }
}

/// What a label introduces, derived from its text.
///
/// The code generator names sections `ProgramStart`, `Def:<method>`,
/// `DefClass:<kind>:<name>` and `Block:<n>`; any other label is `Plain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    /// The top-level program body
    Program,
    /// A method body
    Def,
    /// A class or module body
    DefClass,
    /// A block body
    Block,
    /// A label with no recognised prefix
    Plain,
}

impl LabelKind {
    /// Lower-case name used in disassembly
    pub fn as_str(self) -> &'static str {
        match self {
            LabelKind::Program => "program",
            LabelKind::Def => "def",
            LabelKind::DefClass => "defclass",
            LabelKind::Block => "block",
            LabelKind::Plain => "plain",
        }
    }
}

/// Label of an instruction set, with its angle brackets already stripped
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    name: String,
    kind: LabelKind,
}

/// Label of the top-level program section
pub const PROGRAM_LABEL: &str = "ProgramStart";

impl Label {
    /// Create a label, classifying it by prefix
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = if name == PROGRAM_LABEL {
            LabelKind::Program
        } else {
            match name.split_once(':') {
                Some(("Def", _)) => LabelKind::Def,
                Some(("DefClass", _)) => LabelKind::DefClass,
                Some(("Block", _)) => LabelKind::Block,
                _ => LabelKind::Plain,
            }
        };
        Self { name, kind }
    }

    /// Full label text, unique across a load
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> LabelKind {
        self.kind
    }

    /// The part after the kind prefix (`Def:greet` -> `greet`).
    ///
    /// Program and plain labels return the full name.
    pub fn target(&self) -> &str {
        match self.kind {
            LabelKind::Program | LabelKind::Plain => &self.name,
            _ => self
                .name
                .split_once(':')
                .map(|(_, rest)| rest)
                .unwrap_or(&self.name),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A single instruction: line number, resolved action and parameters
#[derive(Clone)]
pub struct Instruction {
    line: i32,
    action: Arc<ActionDescriptor>,
    params: Params,
}

impl Instruction {
    pub fn new(line: i32, action: Arc<ActionDescriptor>, params: Params) -> Self {
        Self {
            line,
            action,
            params,
        }
    }

    /// Line number; the program-counter key inside the owning set
    #[inline]
    pub fn line(&self) -> i32 {
        self.line
    }

    /// The registry entry this instruction dispatches to
    #[inline]
    pub fn action(&self) -> &Arc<ActionDescriptor> {
        &self.action
    }

    /// Opcode name (shorthand for `action().name()`)
    #[inline]
    pub fn opcode(&self) -> &str {
        self.action.name()
    }

    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Write the instruction in loader syntax
    fn write_bytecode(&self, out: &mut impl fmt::Write) -> fmt::Result {
        write!(out, "{} {}", self.line, self.opcode())?;
        match self.action.param_shape() {
            ParamShape::StringLiteral => {
                for param in &self.params {
                    write!(out, " \"{}\"", param)?;
                }
            }
            ParamShape::None | ParamShape::ValueList => {
                for param in &self.params {
                    write!(out, " {}", param)?;
                }
            }
        }
        Ok(())
    }
}

/// Structural equality: same line, same opcode name, same parameters.
impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line
            && self.action.name() == other.action.name()
            && self.params == other.params
    }
}

impl Eq for Instruction {}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("line", &self.line)
            .field("opcode", &self.opcode())
            .field("params", &self.params)
            .finish()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_bytecode(f)
    }
}

/// A labelled, ordered sequence of instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionSet {
    label: Label,
    instructions: Vec<Instruction>,
}

impl InstructionSet {
    /// Create an empty set for `label`
    pub fn new(label: Label) -> Self {
        Self {
            label,
            instructions: Vec::new(),
        }
    }

    /// Append an instruction, preserving order.
    ///
    /// No validation happens here: duplicate or decreasing line numbers are
    /// accepted. The loader is what keeps line numbers strictly increasing.
    pub fn append(&mut self, line: i32, action: Arc<ActionDescriptor>, params: Params) {
        self.instructions.push(Instruction::new(line, action, params));
    }

    #[inline]
    pub fn label(&self) -> &Label {
        &self.label
    }

    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Line number of the last instruction
    pub fn last_line(&self) -> Option<i32> {
        self.instructions.last().map(Instruction::line)
    }

    /// Index of the first instruction carrying `line`
    pub fn position_of_line(&self, line: i32) -> Option<usize> {
        self.instructions.iter().position(|i| i.line == line)
    }

    /// Disassemble the set to a human-readable listing
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "=== {} ({}) ===\n",
            self.label.name(),
            self.label.kind().as_str()
        ));
        for instr in &self.instructions {
            let params = instr.params.iter().map(|p| match p {
                Param::Integer(n) => n.to_string(),
                Param::Symbol(s) => format!("{:?}", s),
            });
            output.push_str(&format!(
                "{:>6}: {:<16} {}\n",
                instr.line,
                instr.opcode(),
                params.format(", ")
            ));
        }
        output
    }
}

/// Canonical bytecode text: the label line, then one line per instruction.
impl fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<{}>", self.label.name())?;
        for instr in &self.instructions {
            instr.write_bytecode(f)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Serialise loaded sets back to bytecode text that re-parses to the same sets.
pub fn serialize(sets: &[Arc<InstructionSet>]) -> String {
    sets.iter().map(|set| set.to_string()).join("")
}
