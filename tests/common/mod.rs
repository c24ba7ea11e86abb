/// Test utilities for roobyvm integration tests
///
/// Shared helpers for loading bytecode into a fresh host and running it.
#[allow(dead_code)]
pub mod helpers {
    use std::sync::Arc;

    use roobyvm::bytecode::{Host, InstructionSet, LoadResult, Param, Value, Vm, VmResult};

    /// Load `text` into a fresh host over the standard registry
    pub fn load(text: &str) -> LoadResult<Vec<Arc<InstructionSet>>> {
        Host::with_standard_registry().load(text)
    }

    /// Load and run `text`, panicking if it does not load
    pub fn run(text: &str) -> VmResult<Value> {
        let mut vm = Vm::new(Host::with_standard_registry());
        vm.load(text).expect("bytecode should load");
        vm.run()
    }

    /// `(line, opcode, params)` for every instruction in `set`
    pub fn listing(set: &InstructionSet) -> Vec<(i32, String, Vec<Param>)> {
        set.instructions()
            .iter()
            .map(|i| (i.line(), i.opcode().to_string(), i.params().to_vec()))
            .collect()
    }

    pub fn int(n: i64) -> Param {
        Param::Integer(n)
    }

    pub fn sym(s: &str) -> Param {
        Param::Symbol(s.to_string())
    }
}

pub use helpers::*;
