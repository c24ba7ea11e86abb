//! Opcode Registry
//!
//! Maps opcode names to [`ActionDescriptor`]s: the parameter shape the loader
//! parses for that opcode and the runtime effect the VM invokes.
//!
//! # Design
//!
//! Bytecode is late-bound: instructions name their opcode as text, and the
//! loader resolves each name through the registry. A registry is assembled
//! with a [`RegistryBuilder`] and frozen by [`RegistryBuilder::build`]; the
//! resulting [`OpcodeRegistry`] has no remove or update operation and can be
//! shared across threads behind an `Arc`.
//!
//! # Example
//!
//! ```ignore
//! let mut builder = OpcodeRegistry::builder();
//! builder.register("double", ParamShape::None, |vm, _params| {
//!     let n = vm.pop_integer()?;
//!     vm.push(Value::Integer(n * 2))
//! })?;
//! let registry = builder.with_standard_actions()?.build();
//!
//! let action = registry.lookup("double").expect("registered");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::instruction::Param;
use super::opcodes::{StandardOpcode, PUT_STRING};
use super::vm::{Vm, VmResult};

/// Type alias for an action's runtime effect
pub type ActionFn = Arc<dyn Fn(&mut Vm, &[Param]) -> VmResult<()> + Send + Sync>;

/// How the loader parses the tokens after an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamShape {
    /// No parameters allowed
    None,
    /// One symbol: the text between the first two `"` on the line
    StringLiteral,
    /// Any number of space-separated integer or symbol tokens
    ValueList,
}

impl fmt::Display for ParamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamShape::None => write!(f, "none"),
            ParamShape::StringLiteral => write!(f, "string literal"),
            ParamShape::ValueList => write!(f, "value list"),
        }
    }
}

/// Registry entry binding an opcode name to its runtime effect
pub struct ActionDescriptor {
    name: String,
    shape: ParamShape,
    effect: ActionFn,
}

impl ActionDescriptor {
    pub fn new<F>(name: impl Into<String>, shape: ParamShape, effect: F) -> Self
    where
        F: Fn(&mut Vm, &[Param]) -> VmResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            shape,
            effect: Arc::new(effect),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn param_shape(&self) -> ParamShape {
        self.shape
    }

    /// Run the effect against `vm`
    #[inline]
    pub fn apply(&self, vm: &mut Vm, params: &[Param]) -> VmResult<()> {
        (self.effect)(vm, params)
    }
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Error type for registry construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Name already registered
    DuplicateOpcode(String),
    /// A reserved opcode was registered with the wrong parameter shape
    ReservedOpcodeShape {
        name: String,
        expected: ParamShape,
        got: ParamShape,
    },
    /// Name is empty or contains characters the loader cannot tokenize
    InvalidOpcodeName(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateOpcode(name) => write!(f, "opcode '{}' is already registered", name),
            Self::ReservedOpcodeShape {
                name,
                expected,
                got,
            } => write!(
                f,
                "opcode '{}' is reserved with {} parameters, got {}",
                name, expected, got
            ),
            Self::InvalidOpcodeName(name) => write!(f, "invalid opcode name '{}'", name),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Builder for an [`OpcodeRegistry`]
#[derive(Default)]
pub struct RegistryBuilder {
    actions: HashMap<String, Arc<ActionDescriptor>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an opcode.
    ///
    /// Names must be unique, non-empty, and free of whitespace, `<` and `"`.
    /// `putstring` must use [`ParamShape::StringLiteral`].
    pub fn register<F>(
        &mut self,
        name: &str,
        shape: ParamShape,
        effect: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&mut Vm, &[Param]) -> VmResult<()> + Send + Sync + 'static,
    {
        self.insert(ActionDescriptor::new(name, shape, effect))
    }

    /// Register a ready-made descriptor
    pub fn insert(&mut self, action: ActionDescriptor) -> Result<&mut Self, RegistryError> {
        let name = action.name();
        if name.is_empty()
            || name
                .chars()
                .any(|c| c.is_whitespace() || c == '<' || c == '"')
        {
            return Err(RegistryError::InvalidOpcodeName(name.to_string()));
        }
        if name == PUT_STRING && action.param_shape() != ParamShape::StringLiteral {
            return Err(RegistryError::ReservedOpcodeShape {
                name: name.to_string(),
                expected: ParamShape::StringLiteral,
                got: action.param_shape(),
            });
        }
        if self.actions.contains_key(name) {
            return Err(RegistryError::DuplicateOpcode(name.to_string()));
        }

        self.actions.insert(name.to_string(), Arc::new(action));
        Ok(self)
    }

    /// Register every standard opcode
    pub fn with_standard_actions(&mut self) -> Result<&mut Self, RegistryError> {
        for opcode in StandardOpcode::ALL {
            self.insert(opcode.descriptor())?;
        }
        Ok(self)
    }

    /// Freeze into a read-only registry
    pub fn build(&mut self) -> OpcodeRegistry {
        OpcodeRegistry {
            actions: std::mem::take(&mut self.actions),
        }
    }
}

/// Read-only mapping from opcode name to [`ActionDescriptor`]
pub struct OpcodeRegistry {
    actions: HashMap<String, Arc<ActionDescriptor>>,
}

impl fmt::Debug for OpcodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcodeRegistry")
            .field("opcode_count", &self.actions.len())
            .field("names", &self.names())
            .finish()
    }
}

impl OpcodeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registry holding exactly the standard opcode table
    pub fn standard() -> Self {
        let mut builder = RegistryBuilder::new();
        for opcode in StandardOpcode::ALL {
            let action = opcode.descriptor();
            builder
                .actions
                .insert(action.name().to_string(), Arc::new(action));
        }
        builder.build()
    }

    /// Look up an opcode by name
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<&Arc<ActionDescriptor>> {
        self.actions.get(name)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Registered opcode names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
