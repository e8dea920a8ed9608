//! Property tests for ordered index sets, cursors and search.

use proptest::prelude::*;
use rtmodel::index::IndexManager;
use rtmodel::{
    AttrKind, EntityId, EntitySchema, InMemoryStore, KeyValueStore, ModelEngine, Value,
};
use std::collections::BTreeSet;
use std::sync::Arc;

const SET: &str = "car:race_id_index:1";

fn order(store: &InMemoryStore) -> Vec<u64> {
    store
        .zrange(SET, 0, -1)
        .unwrap()
        .into_iter()
        .map(|m| m.parse().unwrap())
        .collect()
}

fn engine() -> ModelEngine {
    let engine = ModelEngine::new(Arc::new(InMemoryStore::new()));
    engine
        .register(
            EntitySchema::builder("Car")
                .indexed("team", AttrKind::String)
                .indexed("laps", AttrKind::Integer)
                .build(),
        )
        .unwrap();
    engine
        .register(EntitySchema::builder("Race").has_many("cars", "Car").build())
        .unwrap();
    engine
}

proptest! {
    /// Inserting at `p` lands at rank `p` and shifts the followers by one.
    ///
    /// Descending ids make member string order disagree with insertion
    /// order, so any rank tie shows up as a misplaced id.
    #[test]
    fn positional_insert_matches_vec_insert(
        slots in prop::collection::vec(any::<prop::sample::Index>(), 1..80),
        descending in any::<bool>(),
    ) {
        let store = Arc::new(InMemoryStore::new());
        let index = IndexManager::new(store.clone());
        let mut expected: Vec<u64> = Vec::new();

        for (n, slot) in slots.iter().enumerate() {
            let id = if descending { 1_000_000 - n as u64 } else { n as u64 };
            let position = slot.index(expected.len() + 1);
            index.insert(SET, EntityId::new(id), Some(position)).unwrap();
            expected.insert(position, id);
            prop_assert_eq!(order(&store), expected.clone());
        }
    }

    /// Front-inserting `n` times yields the exact reverse insertion order.
    #[test]
    fn front_inserts_reverse(n in 1usize..120) {
        let store = Arc::new(InMemoryStore::new());
        let index = IndexManager::new(store.clone());
        for id in 0..n as u64 {
            index.insert(SET, EntityId::new(id), Some(0)).unwrap();
        }
        let expected: Vec<u64> = (0..n as u64).rev().collect();
        prop_assert_eq!(order(&store), expected);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Buffered paging and a single read agree on a static set.
    #[test]
    fn buffered_matches_unbuffered(n in 0usize..40, min in 1usize..6, extra in 0usize..10) {
        let engine = engine();
        let race = engine.create("Race", &[]).unwrap();
        let cars = race.collection("cars").unwrap();
        for _ in 0..n {
            cars.add(&engine.create("Car", &[]).unwrap()).unwrap();
        }

        let cursor = cars.cursor().unwrap();
        let buffered: Vec<EntityId> = cursor
            .clone()
            .buffered(true)
            .with_buffer_sizes(min, min + extra)
            .iter()
            .map(|m| m.unwrap().id())
            .collect();
        let unbuffered: Vec<EntityId> = cursor
            .buffered(false)
            .iter()
            .map(|m| m.unwrap().id())
            .collect();
        prop_assert_eq!(buffered.len(), n);
        prop_assert_eq!(buffered, unbuffered);
    }

    /// Two-predicate search returns exactly the intersection.
    #[test]
    fn search_returns_intersection(rows in prop::collection::vec((0u8..3, 0i64..3), 1..30), team in 0u8..3, laps in 0i64..3) {
        let engine = engine();
        let mut expected = BTreeSet::new();
        for (row_team, row_laps) in &rows {
            let car = engine
                .create("Car", &[
                    ("team", Value::from(format!("t{row_team}"))),
                    ("laps", Value::from(*row_laps)),
                ])
                .unwrap();
            if *row_team == team && *row_laps == laps {
                expected.insert(car.id());
            }
        }

        let found: BTreeSet<EntityId> = engine
            .find_all("Car", &[
                ("team", Value::from(format!("t{team}"))),
                ("laps", Value::from(laps)),
            ])
            .unwrap()
            .ids()
            .unwrap()
            .into_iter()
            .collect();
        prop_assert_eq!(found, expected);
    }
}
