//! Loader host
//!
//! [`Host`] is the runtime side of the loader contract: it owns the opcode
//! registry and the label table that loaded sets are reachable through.
//! Each host has its own table, so independent programs can be loaded into
//! independent hosts.
//!
//! Loads through [`Host::load`] are transactional. A failed load leaves the
//! table exactly as it was before the call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::instruction::{InstructionSet, Label, PROGRAM_LABEL};
use super::loader::{BytecodeLoader, DuplicateLabel, LoadOptions, LoadResult, LoaderHost};
use super::registry::{ActionDescriptor, OpcodeRegistry};

/// Label name to instruction set, in registration order.
///
/// A label is claimed as soon as its section opens and gets its set once the
/// section is finished.
#[derive(Debug, Default, Clone)]
pub struct LabelTable {
    order: Vec<String>,
    sets: HashMap<String, Option<Arc<InstructionSet>>>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished set registered under `name`
    pub fn get(&self, name: &str) -> Option<&Arc<InstructionSet>> {
        self.sets.get(name).and_then(Option::as_ref)
    }

    /// Whether `name` is claimed, finished or not
    pub fn contains(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Label names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Finished sets in registration order
    pub fn sets(&self) -> impl Iterator<Item = &Arc<InstructionSet>> {
        self.order.iter().filter_map(|name| self.get(name))
    }

    fn claim(&mut self, name: &str) -> Result<(), DuplicateLabel> {
        if self.sets.contains_key(name) {
            return Err(DuplicateLabel(name.to_string()));
        }
        self.order.push(name.to_string());
        self.sets.insert(name.to_string(), None);
        Ok(())
    }

    fn fill(&mut self, set: Arc<InstructionSet>) {
        let name = set.label().name().to_string();
        if !self.sets.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.sets.insert(name, Some(set));
    }

    fn checkpoint(&self) -> usize {
        self.order.len()
    }

    /// Drop every label claimed after `checkpoint`, returning how many
    fn rollback(&mut self, checkpoint: usize) -> usize {
        let dropped = self.order.split_off(checkpoint.min(self.order.len()));
        for name in &dropped {
            self.sets.remove(name);
        }
        dropped.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.sets.clear();
    }
}

/// Runtime host for loaded bytecode
#[derive(Debug, Clone)]
pub struct Host {
    registry: Arc<OpcodeRegistry>,
    labels: LabelTable,
    options: LoadOptions,
}

impl Host {
    pub fn new(registry: Arc<OpcodeRegistry>) -> Self {
        Self {
            registry,
            labels: LabelTable::new(),
            options: LoadOptions::default(),
        }
    }

    /// Host over the process-wide standard registry
    pub fn with_standard_registry() -> Self {
        Self::new(Arc::clone(super::standard_registry()))
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_options(&mut self, options: LoadOptions) {
        self.options = options;
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    pub fn registry(&self) -> &Arc<OpcodeRegistry> {
        &self.registry
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// Load bytecode text, all or nothing.
    ///
    /// On error, every label this call claimed is released again.
    pub fn load(&mut self, text: &str) -> LoadResult<Vec<Arc<InstructionSet>>> {
        let checkpoint = self.labels.checkpoint();
        let options = self.options;
        let result = BytecodeLoader::new(&mut *self)
            .with_options(options)
            .parse(text);

        match result {
            Ok(sets) => {
                debug!(
                    target: "roobyvm::host",
                    sets = sets.len(),
                    labels = self.labels.len(),
                    "Installed bytecode"
                );
                Ok(sets)
            }
            Err(err) => {
                let released = self.labels.rollback(checkpoint);
                warn!(
                    target: "roobyvm::host",
                    error = %err,
                    released,
                    "Load failed, labels rolled back"
                );
                Err(err)
            }
        }
    }

    /// Forget every loaded label
    pub fn reset(&mut self) {
        self.labels.clear();
    }

    /// The `ProgramStart` set if loaded, else the first loaded set
    pub fn entry(&self) -> Option<Arc<InstructionSet>> {
        self.labels
            .get(PROGRAM_LABEL)
            .or_else(|| self.labels.sets().next())
            .cloned()
    }
}

impl LoaderHost for Host {
    fn register_label(&mut self, label: &Label) -> Result<(), DuplicateLabel> {
        self.labels.claim(label.name())
    }

    fn lookup_action(&self, name: &str) -> Option<Arc<ActionDescriptor>> {
        self.registry.lookup(name).cloned()
    }

    fn install(&mut self, set: Arc<InstructionSet>) {
        self.labels.fill(set);
    }
}

/// A [`Host`] shared between threads.
///
/// The lock is held for the whole of a load, so concurrent loads are
/// serialised and each one sees a consistent label table.
#[derive(Debug, Clone)]
pub struct SharedHost {
    inner: Arc<Mutex<Host>>,
}

impl SharedHost {
    pub fn new(host: Host) -> Self {
        Self {
            inner: Arc::new(Mutex::new(host)),
        }
    }

    pub fn load(&self, text: &str) -> LoadResult<Vec<Arc<InstructionSet>>> {
        self.inner.lock().load(text)
    }

    /// Finished set for `label`
    pub fn get(&self, label: &str) -> Option<Arc<InstructionSet>> {
        self.inner.lock().labels().get(label).cloned()
    }

    pub fn lock(&self) -> MutexGuard<'_, Host> {
        self.inner.lock()
    }

    /// Copy of the current host state, e.g. to hand to a [`Vm`](super::vm::Vm)
    pub fn snapshot(&self) -> Host {
        self.inner.lock().clone()
    }
}

impl From<Host> for SharedHost {
    fn from(host: Host) -> Self {
        Self::new(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::loader::{EmptySectionPolicy, LoadError};
    use std::thread;

    #[test]
    fn test_load_registers_labels() {
        let mut host = Host::with_standard_registry();
        host.load("<ProgramStart>\n0 nop\n<Def:foo>\n0 leave\n")
            .expect("should load");

        let names: Vec<_> = host.labels().names().collect();
        assert_eq!(names, vec!["ProgramStart", "Def:foo"]);
        assert_eq!(host.labels().get("Def:foo").map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_failed_load_rolls_back() {
        let mut host = Host::with_standard_registry();
        host.load("<Keep>\n0 nop\n").expect("first load");

        let err = host
            .load("<A>\n0 nop\n<B>\n0 frobnicate\n")
            .unwrap_err();
        assert!(matches!(err, LoadError::UnknownOpcode { .. }));

        let names: Vec<_> = host.labels().names().collect();
        assert_eq!(names, vec!["Keep"]);
        assert!(!host.labels().contains("A"));
        assert!(!host.labels().contains("B"));

        // The released labels can be loaded again
        host.load("<A>\n0 nop\n").expect("retry");
        assert!(host.labels().get("A").is_some());
    }

    #[test]
    fn test_duplicate_label_across_loads() {
        let mut host = Host::with_standard_registry();
        host.load("<Main>\n0 nop\n").expect("first load");

        let err = host.load("<Other>\n0 nop\n<Main>\n0 nop\n").unwrap_err();
        assert!(matches!(err, LoadError::DuplicateLabel { ref label, .. } if label == "Main"));
        assert!(!host.labels().contains("Other"));
        assert_eq!(host.labels().len(), 1);
    }

    #[test]
    fn test_reset() {
        let mut host = Host::with_standard_registry();
        host.load("<Main>\n0 nop\n").expect("load");
        host.reset();
        assert!(host.labels().is_empty());
        host.load("<Main>\n0 nop\n").expect("reload after reset");
    }

    #[test]
    fn test_entry() {
        let mut host = Host::with_standard_registry();
        assert!(host.entry().is_none());

        host.load("<Def:f>\n0 nop\n").expect("load");
        assert_eq!(host.entry().map(|s| s.label().name().to_string()), Some("Def:f".into()));

        host.load("<ProgramStart>\n0 nop\n").expect("load");
        assert_eq!(
            host.entry().map(|s| s.label().name().to_string()),
            Some(PROGRAM_LABEL.into())
        );
    }

    #[test]
    fn test_host_options() {
        let mut host = Host::with_standard_registry().with_options(LoadOptions {
            empty_sections: EmptySectionPolicy::Reject,
        });
        assert!(matches!(
            host.load("<Empty>\n"),
            Err(LoadError::EmptySection { .. })
        ));
        assert!(host.labels().is_empty());

        host.set_options(LoadOptions::default());
        host.load("<Empty>\n").expect("allowed now");
        assert_eq!(host.labels().get("Empty").map(|s| s.is_empty()), Some(true));
    }

    #[test]
    fn test_hosts_are_independent() {
        let mut a = Host::with_standard_registry();
        let mut b = Host::with_standard_registry();
        a.load("<Main>\n0 nop\n").expect("load a");
        b.load("<Main>\n0 nop\n").expect("load b");
    }

    #[test]
    fn test_shared_host_concurrent_loads() {
        let shared = SharedHost::new(Host::with_standard_registry());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shared = shared.clone();
                thread::spawn(move || {
                    // Every thread also races for the same "Common" label
                    let own = shared.load(&format!("<T{}>\n0 nop\n", i)).is_ok();
                    let common = shared.load("<Common>\n0 nop\n").is_ok();
                    (own, common)
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        assert!(results.iter().all(|(own, _)| *own));
        assert_eq!(results.iter().filter(|(_, common)| *common).count(), 1);
        assert_eq!(shared.lock().labels().len(), 9);
        assert!(shared.get("Common").is_some());
    }
}
