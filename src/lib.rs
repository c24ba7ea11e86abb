/// roobyvm - Rooby Bytecode Loader and VM
///
/// This library loads the textual bytecode produced by the Rooby code
/// generator into labelled instruction sets and executes them on a stack
/// virtual machine.
///
/// # Architecture
///
/// 1. **Opcode Registry** (`bytecode::registry`)
///    - Maps opcode names to action descriptors
///    - Each descriptor carries a parameter shape and a runtime effect
///    - Built once, then read-only and shareable across threads
///
/// 2. **Bytecode Loader** (`bytecode::loader`)
///    - Splits the input into `<label>` sections
///    - Decodes `<line> <opcode> [params...]` instructions
///    - Resolves opcodes through its host, and reports the first error with
///      its source line
///
/// 3. **Host and VM** (`bytecode::host`, `bytecode::vm`)
///    - The host owns the label table, and loads are all-or-nothing
///    - The VM runs the `ProgramStart` set, with `send` dispatching to
///      `Def:<method>` sets
///
/// # Example
///
/// ```rust
/// use roobyvm::bytecode::{Host, Value, Vm};
///
/// let mut vm = Vm::new(Host::with_standard_registry());
/// vm.load("<ProgramStart>\n0 push 40 2\n1 add\n").unwrap();
///
/// assert_eq!(vm.run().unwrap(), Value::Integer(42));
/// ```
///
/// # Bytecode Format
///
/// - **Labels**: `<ProgramStart>`, `<Def:name>`, `<DefClass:class:Name>`, `<Block:n>`
/// - **Instructions**: `<line> <opcode> [params...]`, line numbers strictly
///   increasing within a section
/// - **Parameters**: integers (`42`, `-7`, `0x2a`, `0b101`, `052`) or symbols
/// - **String literals**: `putstring "text"`, taken verbatim between the first two quotes

pub mod bytecode;
pub mod config;

pub use bytecode::{
    serialize, standard_registry, BytecodeLoader, Host, Instruction, InstructionSet, Label,
    LoadError, LoadOptions, LoaderHost, OpcodeRegistry, Param, ParamShape, SharedHost, Value, Vm,
    VmConfig, VmError,
};
pub use config::{ConfigError, RuntimeConfig};
