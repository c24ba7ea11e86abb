//! Standard opcodes for the Rooby VM
//!
//! The opcode surface is open: hosts may register anything in their own
//! registry. This module defines the standard table the code generator emits,
//! grouped by category, and binds each entry to its effect in
//! [`actions`](super::actions).

use std::fmt;

use super::actions;
use super::registry::{ActionDescriptor, ParamShape};

/// Name of the one opcode with bespoke parameter parsing
pub const PUT_STRING: &str = "putstring";

/// Opcode category, used for grouping in listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeCategory {
    Stack,
    Values,
    Variables,
    Arithmetic,
    ControlFlow,
    Calls,
}

/// The standard opcode table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardOpcode {
    // === Stack ===
    /// No operation
    Nop,
    /// Discard top of stack
    Pop,

    // === Values ===
    /// Push each parameter as a value
    Push,
    /// Push one parameter as a value (`true`/`false`/`nil` decoded)
    PutObject,
    /// Push the quoted literal as a string
    PutString,
    /// Push the frame's self object
    PutSelf,
    /// Push nil
    PutNil,
    /// Pop N values into an array, preserving order
    NewArray,

    // === Variables ===
    /// Push local slot N
    GetLocal,
    /// Pop into local slot N
    SetLocal,
    /// Push a named constant
    GetConstant,
    /// Pop into a named constant
    SetConstant,

    // === Arithmetic and comparison ===
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Eq,

    // === Control flow ===
    /// Pop; jump to line if falsy
    BranchUnless,
    /// Pop; jump to line if truthy
    BranchIf,
    /// Jump to a line in this set, or transfer to a labelled set
    Jump,
    /// End the current frame
    Leave,

    // === Calls ===
    /// Invoke the `Def:<name>` set with a receiver and N arguments
    Send,
}

impl StandardOpcode {
    /// Every standard opcode, in table order
    pub const ALL: [StandardOpcode; 24] = [
        Self::Nop,
        Self::Pop,
        Self::Push,
        Self::PutObject,
        Self::PutString,
        Self::PutSelf,
        Self::PutNil,
        Self::NewArray,
        Self::GetLocal,
        Self::SetLocal,
        Self::GetConstant,
        Self::SetConstant,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Lt,
        Self::Gt,
        Self::Eq,
        Self::BranchUnless,
        Self::BranchIf,
        Self::Jump,
        Self::Leave,
        Self::Send,
    ];

    /// Opcode name as it appears in bytecode text
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Pop => "pop",
            Self::Push => "push",
            Self::PutObject => "putobject",
            Self::PutString => PUT_STRING,
            Self::PutSelf => "putself",
            Self::PutNil => "putnil",
            Self::NewArray => "newarray",
            Self::GetLocal => "getlocal",
            Self::SetLocal => "setlocal",
            Self::GetConstant => "getconstant",
            Self::SetConstant => "setconstant",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Eq => "eq",
            Self::BranchUnless => "branchunless",
            Self::BranchIf => "branchif",
            Self::Jump => "jump",
            Self::Leave => "leave",
            Self::Send => "send",
        }
    }

    /// Look up a standard opcode by mnemonic
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.mnemonic() == name)
    }

    pub fn param_shape(self) -> ParamShape {
        match self {
            Self::PutString => ParamShape::StringLiteral,
            Self::Nop
            | Self::Pop
            | Self::PutSelf
            | Self::PutNil
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Lt
            | Self::Gt
            | Self::Eq
            | Self::Leave => ParamShape::None,
            Self::Push
            | Self::PutObject
            | Self::NewArray
            | Self::GetLocal
            | Self::SetLocal
            | Self::GetConstant
            | Self::SetConstant
            | Self::BranchUnless
            | Self::BranchIf
            | Self::Jump
            | Self::Send => ParamShape::ValueList,
        }
    }

    pub fn category(self) -> OpcodeCategory {
        match self {
            Self::Nop | Self::Pop => OpcodeCategory::Stack,
            Self::Push
            | Self::PutObject
            | Self::PutString
            | Self::PutSelf
            | Self::PutNil
            | Self::NewArray => OpcodeCategory::Values,
            Self::GetLocal | Self::SetLocal | Self::GetConstant | Self::SetConstant => {
                OpcodeCategory::Variables
            }
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Lt | Self::Gt | Self::Eq => {
                OpcodeCategory::Arithmetic
            }
            Self::BranchUnless | Self::BranchIf | Self::Jump | Self::Leave => {
                OpcodeCategory::ControlFlow
            }
            Self::Send => OpcodeCategory::Calls,
        }
    }

    /// Build the registry entry for this opcode
    pub fn descriptor(self) -> ActionDescriptor {
        let name = self.mnemonic();
        let shape = self.param_shape();
        match self {
            Self::Nop => ActionDescriptor::new(name, shape, |_vm, _params| Ok(())),
            Self::Pop => ActionDescriptor::new(name, shape, actions::pop),
            Self::Push => ActionDescriptor::new(name, shape, actions::push),
            Self::PutObject => ActionDescriptor::new(name, shape, actions::put_object),
            Self::PutString => ActionDescriptor::new(name, shape, actions::put_string),
            Self::PutSelf => ActionDescriptor::new(name, shape, actions::put_self),
            Self::PutNil => ActionDescriptor::new(name, shape, actions::put_nil),
            Self::NewArray => ActionDescriptor::new(name, shape, actions::new_array),
            Self::GetLocal => ActionDescriptor::new(name, shape, actions::get_local),
            Self::SetLocal => ActionDescriptor::new(name, shape, actions::set_local),
            Self::GetConstant => ActionDescriptor::new(name, shape, actions::get_constant),
            Self::SetConstant => ActionDescriptor::new(name, shape, actions::set_constant),
            Self::Add => ActionDescriptor::new(name, shape, actions::add),
            Self::Sub => ActionDescriptor::new(name, shape, actions::sub),
            Self::Mul => ActionDescriptor::new(name, shape, actions::mul),
            Self::Div => ActionDescriptor::new(name, shape, actions::div),
            Self::Lt => ActionDescriptor::new(name, shape, actions::lt),
            Self::Gt => ActionDescriptor::new(name, shape, actions::gt),
            Self::Eq => ActionDescriptor::new(name, shape, actions::eq),
            Self::BranchUnless => ActionDescriptor::new(name, shape, actions::branch_unless),
            Self::BranchIf => ActionDescriptor::new(name, shape, actions::branch_if),
            Self::Jump => ActionDescriptor::new(name, shape, actions::jump),
            Self::Leave => ActionDescriptor::new(name, shape, actions::leave),
            Self::Send => ActionDescriptor::new(name, shape, actions::send),
        }
    }
}

impl fmt::Display for StandardOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}
