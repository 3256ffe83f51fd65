//! Randomized checks of lookup, category attachment and selector interning.

mod common;

use std::sync::Arc;

use common::{call_marker, marker, realize, runtime};
use objrt::{CategoryDescriptor, Class, ClassDescriptor, Runtime, Selector};
use proptest::prelude::*;

const SELECTORS: usize = 8;

fn selector(i: usize) -> Selector {
    Selector::intern(&format!("prop{i}"))
}

fn marker_of(rt: &Runtime, class: Class, sel: Selector) -> Option<u8> {
    let imp = rt.lookup(class, sel);
    (!imp.is_forward()).then(|| call_marker(imp, sel))
}

/// Per class, nearest-to-root first, the selectors it defines.
fn arb_chain() -> impl Strategy<Value = Vec<Vec<bool>>> {
    prop::collection::vec(prop::collection::vec(any::<bool>(), SELECTORS), 1..8)
}

/// For each selector, the category that defines it, if any.
fn arb_owners() -> impl Strategy<Value = Vec<Option<usize>>> {
    prop::collection::vec(prop::option::of(0..4usize), SELECTORS)
}

fn categories(owners: &[Option<usize>]) -> Vec<Arc<CategoryDescriptor>> {
    (0..4)
        .map(|c| {
            let desc = owners
                .iter()
                .enumerate()
                .filter(|(_, owner)| **owner == Some(c))
                .fold(CategoryDescriptor::new(format!("Prop{c}"), "PropHost"), |d, (i, _)| {
                    d.method(selector(i).name(), "v@:", marker(c as u8 + 3))
                });
            Arc::new(desc)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every class answers with its nearest definer, before and after
    /// the answer is cached.
    #[test]
    fn prop_lookup_finds_nearest_definer(chain in arb_chain()) {
        let rt = runtime();
        let mut classes = Vec::new();
        for (depth, defines) in chain.iter().enumerate() {
            let name = format!("Level{depth}");
            let desc = match depth {
                0 => ClassDescriptor::root(&name),
                _ => ClassDescriptor::new(&name, format!("Level{}", depth - 1)),
            };
            let desc = defines
                .iter()
                .enumerate()
                .filter(|(_, defined)| **defined)
                .fold(desc, |d, (i, _)| d.method(selector(i).name(), "v@:", marker(depth as u8)));
            classes.push(realize(rt, desc));
        }

        for _ in 0..2 {
            for (depth, class) in classes.iter().enumerate() {
                for i in 0..SELECTORS {
                    let expected = (0..=depth).rev().find(|d| chain[*d][i]).map(|d| d as u8);
                    prop_assert_eq!(marker_of(rt, *class, selector(i)), expected);
                }
            }
        }
    }

    /// Categories defining disjoint selectors give the same result in any
    /// order.
    #[test]
    fn prop_disjoint_categories_commute(
        owners in arb_owners(),
        order in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let cats = categories(&owners);
        let shuffled: Vec<_> = order.iter().map(|i| Arc::clone(&cats[*i])).collect();

        let left = runtime();
        let right = runtime();
        let a = realize(left, ClassDescriptor::root("PropHost"));
        let b = realize(right, ClassDescriptor::root("PropHost"));
        prop_assert!(left.apply_categories(a, &cats).is_empty());
        prop_assert!(right.apply_categories(b, &shuffled).is_empty());

        for (i, owner) in owners.iter().enumerate() {
            let sel = selector(i);
            let got = marker_of(left, a, sel);
            prop_assert_eq!(got, owner.map(|c| c as u8 + 3));
            prop_assert_eq!(got, marker_of(right, b, sel));
        }
    }

    /// Interning is idempotent and keeps the name.
    #[test]
    fn prop_intern_is_idempotent(name in "[A-Za-z_][A-Za-z0-9_:]{0,31}") {
        let first = Selector::intern(&name);
        let second = Selector::intern(&name);

        prop_assert_eq!(first, second);
        prop_assert_eq!(first.name(), name.as_str());
        prop_assert_eq!(Selector::lookup(&name), Some(first));
        prop_assert_eq!(first.hash_code(), second.hash_code());
    }
}
