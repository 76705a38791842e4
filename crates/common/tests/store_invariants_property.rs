use std::collections::BTreeSet;

use mathnote_common::change::{ChangeRequest, NotebookChange};
use mathnote_common::model::{RelationshipRole, StyleData, StyleProps, StyleRole, StyleSource};
use mathnote_common::store::{EntityStore, RelationshipPattern, StylePattern};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    InsertThought,
    InsertStyle { parent: usize },
    InsertRelationship { from: usize, to: usize },
    DeleteThought { pick: usize },
    DeleteStyle { pick: usize },
    DeleteRelationship { pick: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::InsertThought),
        4 => any::<usize>().prop_map(|parent| Op::InsertStyle { parent }),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(from, to)| Op::InsertRelationship { from, to }),
        1 => any::<usize>().prop_map(|pick| Op::DeleteThought { pick }),
        2 => any::<usize>().prop_map(|pick| Op::DeleteStyle { pick }),
        1 => any::<usize>().prop_map(|pick| Op::DeleteRelationship { pick }),
    ]
}

fn stylable_ids(store: &EntityStore) -> Vec<u64> {
    let mut ids: Vec<u64> = store.thoughts().map(|thought| thought.id).collect();
    ids.extend(store.find_styles(&StylePattern::default().recursive(), None).iter().map(|s| s.id));
    ids
}

fn pick(ids: &[u64], index: usize) -> Option<u64> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[index % ids.len()])
    }
}

/// Turns an abstract op into a request against the current store, so most
/// generated requests are valid.
fn to_request(store: &EntityStore, op: &Op) -> Option<ChangeRequest> {
    let stylables = stylable_ids(store);
    match op {
        Op::InsertThought => Some(ChangeRequest::InsertThought { position: None }),
        Op::InsertStyle { parent } => pick(&stylables, *parent).map(|stylable_id| {
            ChangeRequest::insert_style(StyleProps::new(
                stylable_id,
                StyleRole::Formula,
                StyleSource::Test,
                StyleData::Latex(format!("x_{stylable_id}")),
            ))
        }),
        Op::InsertRelationship { from, to } => {
            let from_id = pick(&stylables, *from)?;
            let to_id = pick(&stylables, *to)?;
            Some(ChangeRequest::InsertRelationship { from_id, to_id, role: RelationshipRole::Equivalence })
        }
        Op::DeleteThought { pick: index } => {
            let thoughts: Vec<u64> = store.thoughts().map(|thought| thought.id).collect();
            pick(&thoughts, *index).map(|thought_id| ChangeRequest::DeleteThought { thought_id })
        }
        Op::DeleteStyle { pick: index } => {
            let styles: Vec<u64> =
                store.find_styles(&StylePattern::default().recursive(), None).iter().map(|s| s.id).collect();
            pick(&styles, *index).map(|style_id| ChangeRequest::DeleteStyle { style_id })
        }
        Op::DeleteRelationship { pick: index } => {
            let relationships: Vec<u64> = store.relationships().map(|r| r.id).collect();
            pick(&relationships, *index).map(|relationship_id| ChangeRequest::DeleteRelationship { relationship_id })
        }
    }
}

fn subtree_ids(store: &EntityStore, root: u64) -> BTreeSet<u64> {
    let mut ids = BTreeSet::from([root]);
    ids.extend(
        store
            .find_styles(&StylePattern::default().recursive(), Some(root))
            .iter()
            .map(|style| style.id),
    );
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mirror_never_sees_a_dangling_reference(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut server = EntityStore::new();
        let mut mirror = EntityStore::new();

        for op in &ops {
            let Some(request) = to_request(&server, op) else { continue };
            let records = server.apply_request(&request).expect("generated requests target live ids");
            for record in &records {
                mirror.apply_change(record).expect("records apply in server order");
                prop_assert!(mirror.check_invariants().is_ok(), "invariant broken after {record:?}");
            }
            prop_assert!(server.check_invariants().is_ok());
        }

        prop_assert_eq!(mirror.snapshot(), server.snapshot());
    }

    #[test]
    fn style_deletion_removes_exactly_its_subtree_and_incident_edges(
        ops in prop::collection::vec(op_strategy(), 1..60),
        victim in any::<usize>(),
    ) {
        let mut store = EntityStore::new();
        for op in &ops {
            if let Some(request) = to_request(&store, op) {
                store.apply_request(&request).expect("generated requests target live ids");
            }
        }

        let styles: Vec<u64> =
            store.find_styles(&StylePattern::default().recursive(), None).iter().map(|s| s.id).collect();
        let Some(victim) = pick(&styles, victim) else { return Ok(()) };

        let doomed = subtree_ids(&store, victim);
        let all_styles: BTreeSet<u64> = styles.iter().copied().collect();
        let doomed_edges: BTreeSet<u64> = store
            .relationships()
            .filter(|r| doomed.contains(&r.from_id) || doomed.contains(&r.to_id))
            .map(|r| r.id)
            .collect();
        let all_edges: BTreeSet<u64> = store.relationships().map(|r| r.id).collect();

        let changes = store.delete_style(victim).expect("victim exists");

        let deleted: BTreeSet<u64> = changes.iter().map(NotebookChange::entity_id).collect();
        let expected: BTreeSet<u64> = doomed.union(&doomed_edges).copied().collect();
        prop_assert_eq!(deleted, expected);
        prop_assert_eq!(changes.last(), Some(&NotebookChange::StyleDeleted { style_id: victim }));

        for id in all_styles.difference(&doomed) {
            prop_assert!(store.style(*id).is_some());
        }
        for id in all_edges.difference(&doomed_edges) {
            prop_assert!(store.relationship(*id).is_some());
        }
        for id in &doomed {
            let touching = RelationshipPattern { from_id: Some(*id), ..Default::default() };
            prop_assert!(store.find_relationships(&touching).is_empty());
        }
        prop_assert!(store.check_invariants().is_ok());
    }
}
