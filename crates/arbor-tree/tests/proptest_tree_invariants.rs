//! Property-based structural invariants for the element tree:
//!
//! 1. Parent/child links stay symmetric under arbitrary append/detach/
//!    remove sequences.
//! 2. An element is connected iff its parent chain reaches the root.
//! 3. Removed handles go stale and stay stale after slot reuse.
//! 4. No operation panics; structural misuse returns an error instead.

use arbor_tree::{ElementId, Tree, TreeError};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Create,
    Append { parent: usize, child: usize },
    Detach { child: usize },
    Remove { target: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Create),
        4 => (0usize..16, 0usize..16).prop_map(|(parent, child)| Op::Append { parent, child }),
        2 => (0usize..16).prop_map(|child| Op::Detach { child }),
        1 => (0usize..16).prop_map(|target| Op::Remove { target }),
    ]
}

fn chain_reaches_root(tree: &Tree, id: ElementId) -> bool {
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        if current == tree.root() {
            return true;
        }
        cursor = match tree.parent(current) {
            Ok(parent) => parent,
            Err(_) => return false,
        };
    }
    false
}

proptest! {
    #[test]
    fn structure_stays_consistent(ops in proptest::collection::vec(op_strategy(), 0..60)) {
        let tree = Tree::new();
        let mut handles: Vec<ElementId> = vec![tree.root()];

        for op in ops {
            match op {
                Op::Create => handles.push(tree.create_element()),
                Op::Append { parent, child } => {
                    let parent = handles[parent % handles.len()];
                    let child = handles[child % handles.len()];
                    match tree.append(parent, child) {
                        Ok(()) => {}
                        Err(
                            TreeError::Dangling(_)
                            | TreeError::WouldCycle { .. }
                            | TreeError::RootImmovable,
                        ) => {}
                        Err(other) => prop_assert!(false, "unexpected error: {other}"),
                    }
                }
                Op::Detach { child } => {
                    let child = handles[child % handles.len()];
                    match tree.detach(child) {
                        Ok(()) | Err(TreeError::Dangling(_) | TreeError::RootImmovable) => {}
                        Err(other) => prop_assert!(false, "unexpected error: {other}"),
                    }
                }
                Op::Remove { target } => {
                    let target = handles[target % handles.len()];
                    match tree.remove(target) {
                        Ok(()) | Err(TreeError::Dangling(_) | TreeError::RootImmovable) => {}
                        Err(other) => prop_assert!(false, "unexpected error: {other}"),
                    }
                }
            }
        }

        for &id in &handles {
            if !tree.contains(id) {
                // Stale handles answer uniformly.
                prop_assert!(!tree.is_connected(id));
                prop_assert_eq!(tree.parent(id), Err(TreeError::Dangling(id)));
                continue;
            }

            // Link symmetry.
            if let Some(parent) = tree.parent(id).unwrap() {
                prop_assert!(tree.children(parent).unwrap().contains(&id));
            }
            for child in tree.children(id).unwrap() {
                prop_assert_eq!(tree.parent(child).unwrap(), Some(id));
            }

            // Connectivity is exactly root-reachability.
            prop_assert_eq!(tree.is_connected(id), chain_reaches_root(&tree, id));
        }
    }

    #[test]
    fn removed_handles_stay_stale_after_reuse(extra in 1usize..8) {
        let tree = Tree::new();
        let doomed = tree.create_element();
        tree.remove(doomed).unwrap();

        // Reusing slots must never resurrect the old handle.
        for _ in 0..extra {
            let fresh = tree.create_element();
            prop_assert!(tree.contains(fresh));
            prop_assert!(!tree.contains(doomed));
        }
    }
}
