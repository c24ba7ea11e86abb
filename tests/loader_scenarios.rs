//! End-to-end loader tests
//!
//! Loads complete bytecode programs through a host and checks the resulting
//! instruction sets, error kinds, and label-table state.

mod common;

use std::sync::Arc;

use common::{int, listing, load, sym};
use roobyvm::bytecode::{
    serialize, ActionDescriptor, BytecodeLoader, DuplicateLabel, Host, InstructionSet, Label,
    LabelKind, LoadError, LoaderHost, OpcodeRegistry, ParamShape, Value,
};

#[test]
fn test_single_section_with_string_literal() {
    let sets = load("<Main>\n0 putstring \"hello\"\n1 pop\n").expect("should load");

    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].label().name(), "Main");
    assert_eq!(
        listing(&sets[0]),
        vec![
            (0, "putstring".to_string(), vec![sym("hello")]),
            (1, "pop".to_string(), vec![]),
        ]
    );
}

#[test]
fn test_two_sections_with_integer_and_symbol_params() {
    let text = "<A>\n0 push 42\n1 jump B\n<B>\n0 push 0x10\n1 getlocal x\n";
    let sets = load(text).expect("should load");

    let labels: Vec<_> = sets.iter().map(|s| s.label().name()).collect();
    assert_eq!(labels, vec!["A", "B"]);

    let a = sets[0].instructions();
    let b = sets[1].instructions();
    assert_eq!(a[0].params(), &[int(42)]);
    assert_eq!(a[1].params(), &[sym("B")]);
    assert_eq!(b[0].params(), &[int(16)]);
    assert_eq!(b[1].params(), &[sym("x")]);
}

#[test]
fn test_unknown_opcode() {
    let err = load("<Main>\n0 wiggle 1 2\n").unwrap_err();

    match &err {
        LoadError::UnknownOpcode { opcode, line, at } => {
            assert_eq!(opcode, "wiggle");
            assert_eq!(*line, 0);
            assert_eq!(at.number, 2);
            assert_eq!(at.text, "0 wiggle 1 2");
        }
        other => panic!("expected UnknownOpcode, got {:?}", other),
    }
    assert!(err.to_string().contains("wiggle"));
}

#[test]
fn test_duplicate_label() {
    let err = load("<A>\n0 nop\n<A>\n0 nop\n").unwrap_err();
    assert!(matches!(err, LoadError::DuplicateLabel { ref label, .. } if label == "A"));
    assert_eq!(err.location().number, 3);
}

#[test]
fn test_blank_line_resilience() {
    let sets = load("<Main>\n\n\n0 putstring \"x\"\n\n1 nop\n").expect("should load");
    assert_eq!(sets.len(), 1);
    assert_eq!(
        listing(&sets[0]),
        vec![
            (0, "putstring".to_string(), vec![sym("x")]),
            (1, "nop".to_string(), vec![]),
        ]
    );
}

#[test]
fn test_blank_lines_between_and_around_sections() {
    let sets = load("\n\n  <A>\n0 nop\n\n\n\n<B>\n0 nop\n   \n\n").expect("should load");
    assert_eq!(sets.len(), 2);
}

#[test]
fn test_label_only_section_is_empty_set() {
    let sets = load("<A>\n<B>\n0 nop\n<C>\n").expect("should load");
    assert_eq!(sets.len(), 3);
    assert!(sets[0].is_empty());
    assert!(sets[2].is_empty());
}

#[test]
fn test_empty_string_literal() {
    let sets = load("<Main>\n0 putstring \"\"\n").expect("should load");
    assert_eq!(sets[0].instructions()[0].params(), &[sym("")]);
}

#[test]
fn test_missing_closing_quote() {
    let err = load("<Main>\n0 nop\n1 putstring \"unterminated\n").unwrap_err();
    assert!(matches!(err, LoadError::MalformedStringLiteral { line: 1, .. }));
}

#[test]
fn test_instruction_before_any_label() {
    let err = load("0 nop\n<Main>\n").unwrap_err();
    assert!(matches!(err, LoadError::MalformedInput { .. }));
}

#[test]
fn test_label_kinds_from_code_generator_names() {
    let text = "<ProgramStart>\n0 nop\n<Def:greet>\n0 leave\n<DefClass:class:Foo>\n0 nop\n<Block:0>\n0 nop\n<helper>\n0 nop\n";
    let sets = load(text).expect("should load");

    let kinds: Vec<_> = sets.iter().map(|s| s.label().kind()).collect();
    assert_eq!(
        kinds,
        vec![
            LabelKind::Program,
            LabelKind::Def,
            LabelKind::DefClass,
            LabelKind::Block,
            LabelKind::Plain
        ]
    );
    assert_eq!(sets[1].label().target(), "greet");
    assert_eq!(sets[2].label().target(), "class:Foo");
}

#[test]
fn test_actions_resolve_through_registry() {
    let host = Host::with_standard_registry();
    let sets = load("<Main>\n0 push 1\n1 pop\n2 putstring \"s\"\n").expect("should load");

    for instr in sets[0].instructions() {
        let registered = host
            .registry()
            .lookup(instr.opcode())
            .expect("opcode should be registered");
        assert!(Arc::ptr_eq(registered, instr.action()));
    }
}

#[test]
fn test_serialize_reparses_to_same_program() {
    let text = "<Main>\n0 putstring \"hi there\"\n2 push 0x10 -3 foo\n5 send puts 1\n<Def:puts>\n0 leave\n";
    let first = load(text).expect("should load");
    let again = load(&serialize(&first)).expect("serialised form should load");

    assert_eq!(first, again);
    assert_eq!(
        serialize(&first),
        "<Main>\n0 putstring \"hi there\"\n2 push 16 -3 foo\n5 send puts 1\n<Def:puts>\n0 leave\n"
    );
}

#[test]
fn test_custom_registry_opcodes() {
    let mut builder = OpcodeRegistry::builder();
    builder
        .with_standard_actions()
        .expect("standard actions")
        .register("answer", ParamShape::None, |vm, _params| {
            vm.push(Value::Integer(42))
        })
        .expect("custom opcode");
    let mut host = Host::new(Arc::new(builder.build()));

    let sets = host.load("<Main>\n0 answer\n").expect("should load");
    assert_eq!(sets[0].instructions()[0].opcode(), "answer");

    // A fresh standard host does not know it
    assert!(matches!(
        load("<Main>\n0 answer\n"),
        Err(LoadError::UnknownOpcode { .. })
    ));
}

/// Host that records calls without owning a table of sets
#[derive(Default)]
struct ProbeHost {
    claimed: Vec<String>,
    installed: usize,
}

impl LoaderHost for ProbeHost {
    fn register_label(&mut self, label: &Label) -> Result<(), DuplicateLabel> {
        if self.claimed.iter().any(|l| l == label.name()) {
            return Err(DuplicateLabel(label.name().to_string()));
        }
        self.claimed.push(label.name().to_string());
        Ok(())
    }

    fn lookup_action(&self, name: &str) -> Option<Arc<ActionDescriptor>> {
        roobyvm::standard_registry().lookup(name).cloned()
    }

    fn install(&mut self, _set: Arc<InstructionSet>) {
        self.installed += 1;
    }
}

#[test]
fn test_bare_loader_is_not_transactional() {
    let mut host = ProbeHost::default();
    let result = BytecodeLoader::new(&mut host).parse("<A>\n0 nop\n<B>\n0 wiggle\n");

    assert!(result.is_err());
    // Labels claimed before the failure stay claimed
    assert_eq!(host.claimed, vec!["A", "B"]);
    assert_eq!(host.installed, 1);
}

#[test]
fn test_host_load_is_transactional() {
    let mut host = Host::with_standard_registry();
    assert!(host.load("<A>\n0 nop\n<B>\n0 wiggle\n").is_err());
    assert!(host.labels().is_empty());

    let sets = host.load("<A>\n0 nop\n<B>\n0 nop\n").expect("retry should load");
    assert_eq!(sets.len(), 2);
}
