//! Bytecode Loader
//!
//! Parses textual bytecode into labelled [`InstructionSet`]s.
//!
//! # Format
//!
//! ```text
//! <ProgramStart>
//! 0 putself
//! 1 putstring "hello"
//! 2 send puts 1
//! <Def:greet>
//! 0 putobject 0x10
//! 1 leave
//! ```
//!
//! A `<label>` line opens a section; every following line up to the next
//! label is `<line> <opcode> [params...]`. Blank lines are ignored and each
//! line is trimmed. Tokens are split on single spaces. The opcode's
//! [`ParamShape`] decides how the rest of the line is read: `StringLiteral`
//! opcodes (`putstring`) take the bytes between the first two `"` verbatim,
//! with no escape processing; `ValueList` opcodes classify each token as an
//! integer or a symbol.
//!
//! # Host contract
//!
//! The loader only talks to its host through [`LoaderHost`]: it claims each
//! label as the section opens, resolves every opcode by name, and hands each
//! finished set back with [`LoaderHost::install`]. Loading stops at the first
//! error; labels claimed before the failure stay claimed. [`Host::load`]
//! rolls them back.
//!
//! [`Host::load`]: super::host::Host::load

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, trace};

use super::instruction::{parse_integer, InstructionSet, Label, Param, Params};
use super::registry::{ActionDescriptor, ParamShape};

/// Result type for loading
pub type LoadResult<T> = Result<T, LoadError>;

/// A physical input line, for error reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based line number in the input text
    pub number: usize,
    /// The line with surrounding whitespace trimmed
    pub text: String,
}

impl fmt::Display for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: `{}`", self.number, self.text)
    }
}

/// Errors that abort a load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// First non-blank line is not a label
    MalformedInput { at: SourceLine },
    /// Label line without a name or closing `>`
    MalformedLabel { at: SourceLine },
    /// Label already registered with the host
    DuplicateLabel { label: String, at: SourceLine },
    /// Section with no instructions under [`EmptySectionPolicy::Reject`]
    EmptySection { label: String, at: SourceLine },
    /// Missing or non-numeric line number, missing opcode, or stray parameters
    MalformedInstruction { reason: String, at: SourceLine },
    /// Opcode not present in the registry
    UnknownOpcode {
        opcode: String,
        line: i32,
        at: SourceLine,
    },
    /// String-literal opcode without two `"` characters
    MalformedStringLiteral { line: i32, at: SourceLine },
    /// Line number equal to the previous one in the same set
    DuplicateLineNumber { line: i32, at: SourceLine },
    /// Line number lower than the previous one in the same set
    LineNumberOutOfOrder {
        line: i32,
        previous: i32,
        at: SourceLine,
    },
}

impl LoadError {
    /// The input line the error points at
    pub fn location(&self) -> &SourceLine {
        match self {
            Self::MalformedInput { at }
            | Self::MalformedLabel { at }
            | Self::DuplicateLabel { at, .. }
            | Self::EmptySection { at, .. }
            | Self::MalformedInstruction { at, .. }
            | Self::UnknownOpcode { at, .. }
            | Self::MalformedStringLiteral { at, .. }
            | Self::DuplicateLineNumber { at, .. }
            | Self::LineNumberOutOfOrder { at, .. } => at,
        }
    }

    /// Decoded instruction line number, where the error has one
    pub fn instruction_line(&self) -> Option<i32> {
        match self {
            Self::UnknownOpcode { line, .. }
            | Self::MalformedStringLiteral { line, .. }
            | Self::DuplicateLineNumber { line, .. }
            | Self::LineNumberOutOfOrder { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedInput { at } => {
                write!(f, "Malformed input: expected a <label> ({})", at)
            }
            Self::MalformedLabel { at } => write!(f, "Malformed label ({})", at),
            Self::DuplicateLabel { label, at } => {
                write!(f, "Duplicate label <{}> ({})", label, at)
            }
            Self::EmptySection { label, at } => {
                write!(f, "Empty section <{}> ({})", label, at)
            }
            Self::MalformedInstruction { reason, at } => {
                write!(f, "Malformed instruction: {} ({})", reason, at)
            }
            Self::UnknownOpcode { opcode, line, at } => {
                write!(f, "Unknown command: {}. Line: {} ({})", opcode, line, at)
            }
            Self::MalformedStringLiteral { line, at } => {
                write!(f, "Malformed string literal on line {} ({})", line, at)
            }
            Self::DuplicateLineNumber { line, at } => {
                write!(f, "Duplicate line number {} ({})", line, at)
            }
            Self::LineNumberOutOfOrder { line, previous, at } => write!(
                f,
                "Line number {} follows {} ({})",
                line, previous, at
            ),
        }
    }
}

impl std::error::Error for LoadError {}

/// Returned by a host when a label is already taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateLabel(pub String);

impl fmt::Display for DuplicateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label <{}> is already registered", self.0)
    }
}

impl std::error::Error for DuplicateLabel {}

/// What the loader needs from the runtime it loads into
pub trait LoaderHost {
    /// Claim `label` for a freshly started instruction set
    fn register_label(&mut self, label: &Label) -> Result<(), DuplicateLabel>;

    /// Resolve an opcode name
    fn lookup_action(&self, name: &str) -> Option<Arc<ActionDescriptor>>;

    /// Receive a finished set. Called once per set, in label order.
    fn install(&mut self, _set: Arc<InstructionSet>) {}
}

/// How to treat a label with no instructions under it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptySectionPolicy {
    /// Emit an empty set
    #[default]
    Allow,
    /// Fail with [`LoadError::EmptySection`]
    Reject,
}

/// Loader options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub empty_sections: EmptySectionPolicy,
}

/// Section being filled
struct OpenSection {
    set: InstructionSet,
    opened_at: SourceLine,
}

/// Loader for textual bytecode
pub struct BytecodeLoader<'h, H: LoaderHost + ?Sized> {
    host: &'h mut H,
    options: LoadOptions,
}

impl<'h, H: LoaderHost + ?Sized> BytecodeLoader<'h, H> {
    pub fn new(host: &'h mut H) -> Self {
        Self {
            host,
            options: LoadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse `text` into instruction sets, in order of label appearance.
    ///
    /// Empty or all-blank input yields no sets.
    pub fn parse(&mut self, text: &str) -> LoadResult<Vec<Arc<InstructionSet>>> {
        let mut sets = Vec::new();
        let mut open: Option<OpenSection> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let at = SourceLine {
                number: index + 1,
                text: line.to_string(),
            };

            if line.starts_with('<') {
                if let Some(section) = open.take() {
                    sets.push(self.finish(section)?);
                }
                open = Some(self.open_section(at)?);
                continue;
            }

            match open.as_mut() {
                Some(section) => self.parse_instruction(&mut section.set, at)?,
                None => return Err(LoadError::MalformedInput { at }),
            }
        }

        if let Some(section) = open.take() {
            sets.push(self.finish(section)?);
        }

        debug!(target: "roobyvm::loader", sections = sets.len(), "Loaded bytecode");
        Ok(sets)
    }

    fn open_section(&mut self, at: SourceLine) -> LoadResult<OpenSection> {
        let name = at
            .text
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .filter(|name| !name.is_empty());
        let Some(name) = name else {
            return Err(LoadError::MalformedLabel { at });
        };

        let label = Label::new(name);
        if let Err(DuplicateLabel(label)) = self.host.register_label(&label) {
            return Err(LoadError::DuplicateLabel { label, at });
        }

        trace!(target: "roobyvm::loader", label = label.name(), line = at.number, "Opened section");
        Ok(OpenSection {
            set: InstructionSet::new(label),
            opened_at: at,
        })
    }

    fn finish(&mut self, section: OpenSection) -> LoadResult<Arc<InstructionSet>> {
        let OpenSection { set, opened_at } = section;
        if set.is_empty() && self.options.empty_sections == EmptySectionPolicy::Reject {
            return Err(LoadError::EmptySection {
                label: set.label().name().to_string(),
                at: opened_at,
            });
        }

        trace!(
            target: "roobyvm::loader",
            label = set.label().name(),
            instructions = set.len(),
            "Finished section"
        );
        let set = Arc::new(set);
        self.host.install(Arc::clone(&set));
        Ok(set)
    }

    fn parse_instruction(&mut self, set: &mut InstructionSet, at: SourceLine) -> LoadResult<()> {
        let mut tokens = at.text.split(' ');

        let line_token = tokens.next().unwrap_or_default();
        let Some(line) = parse_integer(line_token) else {
            return Err(LoadError::MalformedInstruction {
                reason: format!("line number `{}` is not an integer", line_token),
                at,
            });
        };
        let Ok(line) = i32::try_from(line) else {
            return Err(LoadError::MalformedInstruction {
                reason: format!("line number {} is out of range", line),
                at,
            });
        };

        let opcode = match tokens.next() {
            Some(op) if !op.is_empty() => op,
            _ => {
                return Err(LoadError::MalformedInstruction {
                    reason: "missing opcode".to_string(),
                    at,
                })
            }
        };

        let Some(action) = self.host.lookup_action(opcode) else {
            return Err(LoadError::UnknownOpcode {
                opcode: opcode.to_string(),
                line,
                at,
            });
        };

        let params = match action.param_shape() {
            ParamShape::StringLiteral => {
                let mut quoted = at.text.split('"');
                match (quoted.next(), quoted.next(), quoted.next()) {
                    (Some(_), Some(literal), Some(_)) => {
                        let mut params = Params::new();
                        params.push(Param::Symbol(literal.to_string()));
                        params
                    }
                    _ => return Err(LoadError::MalformedStringLiteral { line, at }),
                }
            }
            ParamShape::ValueList => tokens.map(Param::parse).collect(),
            ParamShape::None => {
                if tokens.next().is_some() {
                    return Err(LoadError::MalformedInstruction {
                        reason: format!("`{}` takes no parameters", opcode),
                        at,
                    });
                }
                Params::new()
            }
        };

        if let Some(previous) = set.last_line() {
            if line == previous {
                return Err(LoadError::DuplicateLineNumber { line, at });
            }
            if line < previous {
                return Err(LoadError::LineNumberOutOfOrder { line, previous, at });
            }
        }

        set.append(line, action, params);
        Ok(())
    }
}
