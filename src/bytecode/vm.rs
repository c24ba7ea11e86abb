//! Bytecode Virtual Machine
//!
//! The VM executes loaded instruction sets on a value stack. Each call frame
//! walks one [`InstructionSet`] by index; every instruction is dispatched by
//! invoking its [`ActionDescriptor`](super::registry::ActionDescriptor)
//! effect with the VM and the instruction's parameters.
//!
//! Branch targets are instruction line numbers within the current set. A
//! `send` pushes a new frame for the `Def:<method>` set; the frame's top value
//! replaces the receiver when it returns.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, trace};

use super::host::Host;
use super::instruction::{InstructionSet, Param};
use super::loader::LoadResult;

/// Result of VM execution
pub type VmResult<T> = Result<T, VmError>;

/// Errors that can occur during VM execution
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// Pop from an empty stack
    StackUnderflow,
    /// Type error in operation
    TypeError {
        expected: &'static str,
        got: &'static str,
    },
    /// Division by zero
    DivisionByZero,
    /// No set registered under this label
    UndefinedLabel(String),
    /// Constant read before it was set
    UndefinedConstant(String),
    /// `send` to a method with no `Def:` set
    UndefinedMethod(String),
    /// Local slot out of range
    InvalidLocal(i64),
    /// Branch to a line that does not exist in the set
    InvalidJumpTarget { label: String, line: i64 },
    /// An opcode was executed without a parameter it needs
    MissingParam { opcode: &'static str, index: usize },
    /// Call stack overflow
    CallStackOverflow,
    /// Value stack overflow
    ValueStackOverflow,
    /// Nothing has been loaded to run
    NoEntryPoint,
    /// Runtime error with message
    Runtime(String),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackUnderflow => write!(f, "Stack underflow"),
            Self::TypeError { expected, got } => {
                write!(f, "Type error: expected {}, got {}", expected, got)
            }
            Self::DivisionByZero => write!(f, "Division by zero"),
            Self::UndefinedLabel(label) => write!(f, "Undefined label: {}", label),
            Self::UndefinedConstant(name) => write!(f, "Can't find constant: {}", name),
            Self::UndefinedMethod(name) => write!(f, "Undefined method: {}", name),
            Self::InvalidLocal(index) => write!(f, "Invalid local variable index: {}", index),
            Self::InvalidJumpTarget { label, line } => {
                write!(f, "Invalid jump target: line {} in <{}>", line, label)
            }
            Self::MissingParam { opcode, index } => {
                write!(f, "Missing parameter {} for {}", index, opcode)
            }
            Self::CallStackOverflow => write!(f, "Call stack overflow"),
            Self::ValueStackOverflow => write!(f, "Value stack overflow"),
            Self::NoEntryPoint => write!(f, "No instruction set to run"),
            Self::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl std::error::Error for VmError {}

/// Runtime value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i64),
    String(String),
    Array(Vec<Value>),
    /// An opaque object, identified by its class name
    Object(String),
}

impl Value {
    /// Decode an instruction parameter the way `putobject` does
    pub fn from_param(param: &Param) -> Self {
        match param {
            Param::Integer(n) => Value::Integer(*n),
            Param::Symbol(s) => match s.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "nil" => Value::Nil,
                other => Value::String(other.to_string()),
            },
        }
    }

    /// Everything except `nil` and `false` is truthy
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Null",
            Value::Bool(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Array(items) => write!(f, "[{}]", items.iter().format(", ")),
            Value::Object(class) => write!(f, "#<{}>", class),
        }
    }
}

/// Configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum value stack size
    pub max_value_stack: usize,
    /// Maximum call stack size
    pub max_call_stack: usize,
    /// Emit a trace event per executed instruction
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_value_stack: 65536,
            max_call_stack: 1024,
            trace: false,
        }
    }
}

/// Call frame on the call stack
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Set being executed
    pub set: Arc<InstructionSet>,
    /// Index of the next instruction
    pub pc: usize,
    /// Local variable slots
    pub locals: Vec<Value>,
    /// Receiver for `putself`
    pub self_value: Value,
    /// Stack height when the frame started
    pub stack_base: usize,
    /// Whether the frame's result replaces a `send` receiver on return
    pub returns_value: bool,
}

impl CallFrame {
    fn new(set: Arc<InstructionSet>, self_value: Value, stack_base: usize) -> Self {
        Self {
            set,
            pc: 0,
            locals: Vec::new(),
            self_value,
            stack_base,
            returns_value: false,
        }
    }
}

/// The Rooby virtual machine
#[derive(Debug)]
pub struct Vm {
    /// Loaded program and opcode registry
    host: Host,

    config: VmConfig,

    /// Value stack for operands and results
    stack: Vec<Value>,

    /// Call stack
    frames: Vec<CallFrame>,

    /// Named constants (`setconstant` / `getconstant`)
    constants: HashMap<String, Value>,

    /// Top-level self
    main: Value,
}

impl Vm {
    /// Create a VM over a host with default configuration
    pub fn new(host: Host) -> Self {
        Self::with_config(host, VmConfig::default())
    }

    pub fn with_config(host: Host, config: VmConfig) -> Self {
        Self {
            host,
            config,
            stack: Vec::new(),
            frames: Vec::new(),
            constants: HashMap::new(),
            main: Value::Object("main".to_string()),
        }
    }

    #[inline]
    pub fn host(&self) -> &Host {
        &self.host
    }

    #[inline]
    pub fn host_mut(&mut self) -> &mut Host {
        &mut self.host
    }

    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Load bytecode text into the host
    pub fn load(&mut self, text: &str) -> LoadResult<Vec<Arc<InstructionSet>>> {
        self.host.load(text)
    }

    /// Run the host's entry set
    pub fn run(&mut self) -> VmResult<Value> {
        let entry = self.host.entry().ok_or(VmError::NoEntryPoint)?;
        self.run_set(entry)
    }

    /// Run the set registered under `label`
    pub fn run_label(&mut self, label: &str) -> VmResult<Value> {
        let set = self.resolve_label(label)?;
        self.run_set(set)
    }

    /// Run `set` to completion, returning its top-of-stack value (or nil).
    ///
    /// The stack and call stack are restored to their previous heights
    /// afterwards, whether or not execution succeeded.
    pub fn run_set(&mut self, set: Arc<InstructionSet>) -> VmResult<Value> {
        let stack_height = self.stack.len();
        let depth = self.frames.len();

        debug!(target: "roobyvm::vm", label = set.label().name(), "Running instruction set");
        self.push_frame(CallFrame::new(set, self.main.clone(), stack_height))?;

        let outcome = self.execute(depth);
        let result = match outcome {
            Ok(()) if self.stack.len() > stack_height => self.stack.last().cloned(),
            Ok(()) => Some(Value::Nil),
            Err(_) => None,
        };

        self.frames.truncate(depth);
        self.stack.truncate(stack_height);

        match outcome {
            Ok(()) => Ok(result.unwrap_or(Value::Nil)),
            Err(e) => {
                debug!(target: "roobyvm::vm", error = %e, "Execution failed");
                Err(e)
            }
        }
    }

    /// Dispatch loop: runs until the call stack drops back to `depth`
    fn execute(&mut self, depth: usize) -> VmResult<()> {
        while self.frames.len() > depth {
            let Some(frame) = self.frames.last_mut() else {
                break;
            };
            let set = Arc::clone(&frame.set);
            let Some(instr) = set.get(frame.pc) else {
                self.finish_frame();
                continue;
            };
            frame.pc += 1;

            if self.config.trace {
                trace!(
                    target: "roobyvm::vm",
                    label = set.label().name(),
                    line = instr.line(),
                    opcode = instr.opcode(),
                    params = ?instr.params(),
                    sp = self.stack.len(),
                    "Executing"
                );
            }

            instr.action().apply(self, instr.params())?;
        }
        Ok(())
    }

    /// Pop the current frame, handing its result to the caller if needed
    fn finish_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if frame.returns_value {
            let result = if self.stack.len() > frame.stack_base {
                self.stack.pop().unwrap_or(Value::Nil)
            } else {
                Value::Nil
            };
            self.stack.truncate(frame.stack_base);
            self.stack.push(result);
        }
    }

    fn push_frame(&mut self, frame: CallFrame) -> VmResult<()> {
        if self.frames.len() >= self.config.max_call_stack {
            return Err(VmError::CallStackOverflow);
        }
        self.frames.push(frame);
        Ok(())
    }

    fn current_frame(&self) -> VmResult<&CallFrame> {
        self.frames
            .last()
            .ok_or_else(|| VmError::Runtime("no active call frame".to_string()))
    }

    fn current_frame_mut(&mut self) -> VmResult<&mut CallFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::Runtime("no active call frame".to_string()))
    }

    fn resolve_label(&self, label: &str) -> VmResult<Arc<InstructionSet>> {
        self.host
            .labels()
            .get(label)
            .cloned()
            .ok_or_else(|| VmError::UndefinedLabel(label.to_string()))
    }

    // === Stack ===

    /// Push a value
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= self.config.max_value_stack {
            return Err(VmError::ValueStackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop a value
    pub fn pop(&mut self) -> VmResult<Value> {
        let floor = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() <= floor {
            return Err(VmError::StackUnderflow);
        }
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop a value that must be an integer
    pub fn pop_integer(&mut self) -> VmResult<i64> {
        match self.pop()? {
            Value::Integer(n) => Ok(n),
            other => Err(VmError::TypeError {
                expected: "Integer",
                got: other.type_name(),
            }),
        }
    }

    /// Pop `count` values, oldest first
    pub fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        let floor = self.frames.last().map_or(0, |f| f.stack_base);
        if self.stack.len() < floor + count {
            return Err(VmError::StackUnderflow);
        }
        let at = self.stack.len() - count;
        Ok(self.stack.split_off(at))
    }

    #[inline]
    pub fn peek(&self) -> Option<&Value> {
        self.stack.last()
    }

    #[inline]
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    // === Frame state ===

    /// Self value of the current frame
    pub fn current_self(&self) -> VmResult<Value> {
        Ok(self.current_frame()?.self_value.clone())
    }

    pub fn local(&self, index: i64) -> VmResult<Value> {
        let frame = self.current_frame()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| frame.locals.get(i))
            .cloned()
            .ok_or(VmError::InvalidLocal(index))
    }

    /// Store a local, growing the slot table with nils as needed
    pub fn set_local(&mut self, index: i64, value: Value) -> VmResult<()> {
        let slot = usize::try_from(index).map_err(|_| VmError::InvalidLocal(index))?;
        if slot >= self.config.max_value_stack {
            return Err(VmError::InvalidLocal(index));
        }
        let frame = self.current_frame_mut()?;
        if frame.locals.len() <= slot {
            frame.locals.resize(slot + 1, Value::Nil);
        }
        frame.locals[slot] = value;
        Ok(())
    }

    pub fn constant(&self, name: &str) -> VmResult<Value> {
        self.constants
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::UndefinedConstant(name.to_string()))
    }

    pub fn set_constant(&mut self, name: &str, value: Value) {
        self.constants.insert(name.to_string(), value);
    }

    // === Control flow ===

    /// Continue at the instruction carrying `line` in the current set.
    ///
    /// A line past the last instruction ends the frame.
    pub fn jump_to_line(&mut self, line: i64) -> VmResult<()> {
        let frame = self.current_frame_mut()?;
        let target = i32::try_from(line)
            .ok()
            .and_then(|l| frame.set.position_of_line(l));
        match target {
            Some(index) => frame.pc = index,
            None if frame.set.last_line().map_or(true, |last| line > i64::from(last)) => {
                frame.pc = frame.set.len();
            }
            None => {
                return Err(VmError::InvalidJumpTarget {
                    label: frame.set.label().name().to_string(),
                    line,
                })
            }
        }
        Ok(())
    }

    /// Replace the current frame's set with the one labelled `label`
    pub fn transfer_to(&mut self, label: &str) -> VmResult<()> {
        let set = self.resolve_label(label)?;
        let frame = self.current_frame_mut()?;
        frame.set = set;
        frame.pc = 0;
        Ok(())
    }

    /// End the current frame
    pub fn leave_frame(&mut self) -> VmResult<()> {
        let frame = self.current_frame_mut()?;
        frame.pc = frame.set.len();
        Ok(())
    }

    /// Call method `name` with the receiver and `argc` arguments on the stack
    pub fn send(&mut self, name: &str, argc: usize) -> VmResult<()> {
        let set = self
            .host
            .labels()
            .get(&format!("Def:{}", name))
            .cloned()
            .ok_or_else(|| VmError::UndefinedMethod(name.to_string()))?;

        let args = self.pop_n(argc)?;
        let receiver = self.pop()?;
        let base = self.stack.len();

        let mut frame = CallFrame::new(set, receiver, base);
        frame.locals = args;
        frame.returns_value = true;
        self.push_frame(frame)
    }
}
