//! Property-based tests for the bytecode loader.
//!
//! Tests the following properties:
//! - one instruction set per label, in order of appearance
//! - every instruction's action is the registry's descriptor for its opcode
//! - serialising and re-loading a program gives the same program
//! - parameter order is preserved
//! - a token is an integer parameter iff it decodes as an integer

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::load;
use proptest::prelude::*;
use roobyvm::bytecode::{parse_integer, serialize, standard_registry, Param};

// =============================================================================
// Strategies for generating bytecode
// =============================================================================

/// Tokens that never decode as integers
fn arb_symbol() -> impl Strategy<Value = String> {
    "[a-z_][a-zA-Z0-9_]{0,6}"
}

/// Integer tokens in the bases the loader accepts
fn arb_integer_token() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<i64>().prop_map(|n| n.to_string()),
        (0u32..=0xffff).prop_map(|n| format!("0x{:x}", n)),
        (0u32..=0o777).prop_map(|n| format!("0{:o}", n)),
        (0u32..=0xff).prop_map(|n| format!("0b{:b}", n)),
        (-1000i64..1000).prop_map(|n| format!("{:+}", n)),
    ]
}

fn arb_param_token() -> impl Strategy<Value = String> {
    prop_oneof![arb_symbol(), arb_integer_token()]
}

/// One instruction body (opcode and params), without its line number
fn arb_instruction() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("nop".to_string()),
        Just("pop".to_string()),
        Just("add".to_string()),
        "[a-zA-Z0-9 .,!]{0,12}".prop_map(|s| format!("putstring \"{}\"", s)),
        prop::collection::vec(arb_param_token(), 0..4)
            .prop_map(|params| format!("push {}", params.join(" ")).trim_end().to_string()),
        (arb_symbol(), 0u8..4).prop_map(|(m, argc)| format!("send {} {}", m, argc)),
        arb_param_token().prop_map(|t| format!("jump {}", t)),
    ]
}

/// A section body with strictly increasing line numbers
fn arb_section_body() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec((1i32..5, arb_instruction()), 0..8).prop_map(|instrs| {
        let mut line = -1;
        instrs
            .into_iter()
            .map(|(gap, body)| {
                line += gap;
                format!("{} {}", line, body)
            })
            .collect()
    })
}

/// Unique labels in a stable, shuffled-looking order
fn arb_labels() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[A-Z][a-zA-Z0-9:]{0,8}", 1..6)
        .prop_map(|set: BTreeSet<String>| set.into_iter().rev().collect())
}

/// A whole program: labels plus the text to load
fn arb_program() -> impl Strategy<Value = (Vec<String>, String)> {
    arb_labels().prop_flat_map(|labels| {
        let n = labels.len();
        (
            Just(labels),
            prop::collection::vec(arb_section_body(), n),
            prop::collection::vec(0usize..3, n),
        )
            .prop_map(|(labels, bodies, blanks)| {
                let mut text = String::new();
                for ((label, body), blank) in labels.iter().zip(&bodies).zip(&blanks) {
                    text.push_str(&format!("<{}>\n", label));
                    for line in body {
                        text.push_str(line);
                        text.push('\n');
                        text.push_str(&"\n".repeat(*blank));
                    }
                }
                (labels, text)
            })
    })
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// One set per label line, in first-appearance order
    #[test]
    fn sets_follow_label_order((labels, text) in arb_program()) {
        let sets = load(&text).unwrap();
        let loaded: Vec<&str> = sets.iter().map(|s| s.label().name()).collect();
        prop_assert_eq!(loaded, labels.iter().map(String::as_str).collect::<Vec<_>>());
    }

    /// Every instruction carries the registry's descriptor for its opcode
    #[test]
    fn actions_come_from_registry((_labels, text) in arb_program()) {
        let sets = load(&text).unwrap();
        for set in &sets {
            for instr in set.instructions() {
                let registered = standard_registry().lookup(instr.opcode());
                prop_assert!(registered.is_some());
                prop_assert!(registered.is_some_and(|a| Arc::ptr_eq(a, instr.action())));
            }
        }
    }

    /// parse(serialize(parse(x))) == parse(x)
    #[test]
    fn serialize_then_reload_is_identity((_labels, text) in arb_program()) {
        let first = load(&text).unwrap();
        let canonical = serialize(&first);
        let second = load(&canonical).unwrap();
        prop_assert_eq!(&first, &second);
        // Canonical text is a fixed point
        prop_assert_eq!(serialize(&second), canonical);
    }

    /// Reordering tokens reorders params identically
    #[test]
    fn param_order_is_preserved(tokens in prop::collection::vec(arb_param_token(), 1..6)) {
        let forward = load(&format!("<M>\n0 push {}\n", tokens.join(" "))).unwrap();
        let mut reversed_tokens = tokens.clone();
        reversed_tokens.reverse();
        let backward = load(&format!("<M>\n0 push {}\n", reversed_tokens.join(" "))).unwrap();

        let mut expected = forward[0].instructions()[0].params().to_vec();
        expected.reverse();
        prop_assert_eq!(backward[0].instructions()[0].params(), expected.as_slice());
    }

    /// A param is Integer(n) iff the exact token decodes to n
    #[test]
    fn integer_classification_is_stable(token in "[-+]?[0-9a-fA-FxXoObB_]{1,8}") {
        let sets = load(&format!("<M>\n0 push {}\n", token)).unwrap();
        let param = &sets[0].instructions()[0].params()[0];
        match parse_integer(&token) {
            Some(n) => prop_assert_eq!(param, &Param::Integer(n)),
            None => prop_assert_eq!(param, &Param::Symbol(token.clone())),
        }
    }

    /// Plain decimal tokens decode like `str::parse`
    #[test]
    fn decimal_tokens_match_std(n in any::<i64>()) {
        prop_assert_eq!(parse_integer(&n.to_string()), Some(n));
    }
}
