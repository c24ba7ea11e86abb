//! Bytecode Module
//!
//! Loads the textual bytecode emitted by the Rooby code generator and runs it
//! on a small stack VM.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Bytecode text                                 │
//! │        <ProgramStart> / <Def:m> / <DefClass:class:C> / ...        │
//! └───────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    BytecodeLoader                                 │
//! │        text → Vec<Arc<InstructionSet>>                            │
//! │                                                                   │
//! │   register_label ─┐    lookup_action ─┐    install ─┐             │
//! └───────────────────┼───────────────────┼─────────────┼─────────────┘
//!                     ▼                   ▼             ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Host (LoaderHost)                              │
//! │                                                                   │
//! │  ┌─────────────┐  ┌──────────────────────────────────────────┐    │
//! │  │ LabelTable  │  │         OpcodeRegistry                   │    │
//! │  │             │  │  name → ActionDescriptor (shape, effect) │    │
//! │  └─────────────┘  └──────────────────────────────────────────┘    │
//! └───────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Vm                                             │
//! │      Value Stack · Call Stack · Constants                         │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`]: opcode name to action descriptor
//! - [`opcodes`]: the standard opcode table
//! - [`instruction`]: instructions, instruction sets, labels, parameters
//! - [`loader`]: text parser and the host contract
//! - [`host`]: label table and transactional loads
//! - [`vm`]: execution engine
//!
//! # Example
//!
//! ```ignore
//! use roobyvm::bytecode::{Host, Value, Vm};
//!
//! let mut vm = Vm::new(Host::with_standard_registry());
//! vm.load("<ProgramStart>\n0 putobject 40\n1 putobject 2\n2 add\n")?;
//! assert_eq!(vm.run()?, Value::Integer(42));
//! ```

use std::sync::{Arc, LazyLock};

pub mod host;
pub mod instruction;
pub mod loader;
pub mod opcodes;
pub mod registry;
pub mod vm;

mod actions;

pub use host::{Host, LabelTable, SharedHost};
pub use instruction::{
    parse_integer, serialize, Instruction, InstructionSet, Label, LabelKind, Param, Params,
    PROGRAM_LABEL,
};
pub use loader::{
    BytecodeLoader, DuplicateLabel, EmptySectionPolicy, LoadError, LoadOptions, LoadResult,
    LoaderHost, SourceLine,
};
pub use opcodes::{OpcodeCategory, StandardOpcode, PUT_STRING};
pub use registry::{
    ActionDescriptor, ActionFn, OpcodeRegistry, ParamShape, RegistryBuilder, RegistryError,
};
pub use vm::{CallFrame, Value, Vm, VmConfig, VmError, VmResult};

/// Process-wide registry holding the standard opcode table
static STANDARD_REGISTRY: LazyLock<Arc<OpcodeRegistry>> =
    LazyLock::new(|| Arc::new(OpcodeRegistry::standard()));

/// Get the process-wide standard registry
pub fn standard_registry() -> &'static Arc<OpcodeRegistry> {
    &STANDARD_REGISTRY
}
