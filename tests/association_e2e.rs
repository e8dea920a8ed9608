use rtmodel::{AttrKind, EntityId, EntitySchema, InMemoryStore, Model, ModelEngine, Value};
use std::sync::Arc;

fn engine() -> ModelEngine {
    let engine = ModelEngine::new(Arc::new(InMemoryStore::new()));
    engine
        .register(
            EntitySchema::builder("Driver")
                .indexed("last_name", AttrKind::String)
                .build(),
        )
        .unwrap();
    engine
        .register(
            EntitySchema::builder("Car")
                .indexed("team", AttrKind::String)
                .attribute("speed", AttrKind::Float)
                .has_one("driver", "Driver")
                .build(),
        )
        .unwrap();
    engine
        .register(
            EntitySchema::builder("Race")
                .attribute("name", AttrKind::String)
                .has_many("cars", "Car")
                .build(),
        )
        .unwrap();
    engine
        .register(
            EntitySchema::builder("Season")
                .attribute("year", AttrKind::Integer)
                .has_many("races", "Race")
                .build(),
        )
        .unwrap();
    engine
}

fn cars(engine: &ModelEngine, n: usize) -> Vec<Model> {
    (0..n).map(|_| engine.create("Car", &[]).unwrap()).collect()
}

fn ids(models: &[&Model]) -> Vec<EntityId> {
    models.iter().map(|m| m.id()).collect()
}

#[test]
fn positional_inserts_keep_relative_order() {
    let engine = engine();
    let race = engine.create("Race", &[]).unwrap();
    let list = race.collection("cars").unwrap();
    let c = cars(&engine, 5);

    list.add(&c[0]).unwrap();
    list.add(&c[1]).unwrap();
    list.insert(1, &c[2]).unwrap();
    list.insert(0, &c[3]).unwrap();
    list.insert(4, &c[4]).unwrap();

    assert_eq!(
        list.ids().unwrap(),
        ids(&[&c[3], &c[0], &c[2], &c[1], &c[4]])
    );
}

#[test]
fn insert_between_split_neighbours_keeps_position() {
    let engine = engine();
    let race = engine.create("Race", &[]).unwrap();
    let list = race.collection("cars").unwrap();
    let c = cars(&engine, 10);
    let (first, fifth, tenth) = (&c[0], &c[4], &c[9]);

    list.add(first).unwrap();
    list.insert(0, fifth).unwrap();
    list.insert(1, tenth).unwrap();

    assert_eq!(list.ids().unwrap(), ids(&[fifth, tenth, first]));
    assert_eq!(list.get(1).unwrap(), Some(tenth.clone()));
}

#[test]
fn scoped_remove_at_matches_scoped_get() {
    let engine = engine();
    let race = engine.create("Race", &[]).unwrap();
    let list = race.collection("cars").unwrap();
    let lotus = engine.create("Car", &[("team", Value::from("Lotus"))]).unwrap();
    let ferrari = engine.create("Car", &[("team", Value::from("Ferrari"))]).unwrap();
    list.add(&lotus).unwrap();
    list.add(&ferrari).unwrap();

    let ferraris = list.clone().with_scope(&[("team", Value::from("Ferrari"))]);
    let target = ferraris.get(0).unwrap().unwrap();
    assert_eq!(target, ferrari);
    assert!(ferraris.remove_at(0).unwrap());
    assert_eq!(list.ids().unwrap(), vec![lotus.id()]);
}

#[test]
fn move_to_repositions_member() {
    let engine = engine();
    let race = engine.create("Race", &[]).unwrap();
    let list = race.collection("cars").unwrap();
    let c = cars(&engine, 4);
    for car in &c {
        list.add(car).unwrap();
    }

    list.move_to(0, &c[3]).unwrap();
    assert_eq!(list.ids().unwrap(), ids(&[&c[3], &c[0], &c[1], &c[2]]));
    list.move_to(2, &c[3]).unwrap();
    assert_eq!(list.ids().unwrap(), ids(&[&c[0], &c[1], &c[3], &c[2]]));
    assert_eq!(list.len().unwrap(), 4);
}

#[test]
fn member_mutations_bump_owner_once_each() {
    let engine = engine();
    let race = engine.create("Race", &[]).unwrap();
    let list = race.collection("cars").unwrap();
    let car = engine.create("Car", &[]).unwrap();
    list.add(&car).unwrap();

    let start = race.version().unwrap();
    car.set("team", "Ferrari").unwrap();
    car.set("speed", 310.0).unwrap();
    car.set("speed", 310.0).unwrap();
    car.update_attributes(&[("team", Some(Value::from("Sauber"))), ("speed", None)])
        .unwrap();
    assert_eq!(race.version().unwrap(), start + 3);
}

#[test]
fn removed_member_is_gone_from_owner() {
    let engine = engine();
    let race = engine.create("Race", &[]).unwrap();
    let list = race.collection("cars").unwrap();
    let c = cars(&engine, 3);
    for car in &c {
        list.add(car).unwrap();
    }

    list.remove(&c[1]).unwrap();
    assert_eq!(list.ids().unwrap(), ids(&[&c[0], &c[2]]));
    assert!(list.iter().unwrap().all(|m| m.unwrap().id() != c[1].id()));
    assert_eq!(c[1].get("race_id").unwrap(), None);
    assert!(engine.find("Car", c[1].id()).unwrap().is_some());
}

#[test]
fn member_moves_between_owners() {
    let engine = engine();
    let monza = engine.create("Race", &[]).unwrap();
    let spa = engine.create("Race", &[]).unwrap();
    let car = engine.create("Car", &[]).unwrap();

    monza.collection("cars").unwrap().add(&car).unwrap();
    spa.collection("cars").unwrap().add(&car).unwrap();

    assert!(monza.collection("cars").unwrap().is_empty().unwrap());
    assert_eq!(spa.collection("cars").unwrap().ids().unwrap(), vec![car.id()]);
    assert_eq!(car.lock_token().unwrap(), spa.lock_token().unwrap());

    let spa_version = spa.version().unwrap();
    let monza_version = monza.version().unwrap();
    car.set("team", "Alpine").unwrap();
    assert_eq!(spa.version().unwrap(), spa_version + 1);
    assert_eq!(monza.version().unwrap(), monza_version);
}

#[test]
fn buffered_and_unbuffered_collections_agree() {
    let engine = engine();
    let race = engine.create("Race", &[]).unwrap();
    let mut list = race.collection("cars").unwrap();
    for car in cars(&engine, 25) {
        list.add(&car).unwrap();
    }

    let buffered: Vec<EntityId> = list.iter().unwrap().map(|m| m.unwrap().id()).collect();
    list.set_buffered(false);
    assert!(!list.is_buffered());
    let unbuffered: Vec<EntityId> = list.iter().unwrap().map(|m| m.unwrap().id()).collect();
    assert_eq!(buffered, unbuffered);
    assert_eq!(buffered, list.ids().unwrap());
}

#[test]
fn range_and_scope() {
    let engine = engine();
    let race = engine.create("Race", &[]).unwrap();
    let list = race.collection("cars").unwrap();
    let mut all = Vec::new();
    for team in ["Red", "Blue", "Red", "Blue", "Red"] {
        let car = engine.create("Car", &[("team", Value::from(team))]).unwrap();
        list.add(&car).unwrap();
        all.push(car);
    }

    let page: Vec<EntityId> = list.range(1, 2).unwrap().iter().map(Model::id).collect();
    assert_eq!(page, ids(&[&all[1], &all[2]]));

    let reds = list.clone().with_scope(&[("team", Value::from("Red"))]);
    assert_eq!(reds.len().unwrap(), 3);
    let mut red_ids = reds.ids().unwrap();
    red_ids.sort();
    assert_eq!(red_ids, ids(&[&all[0], &all[2], &all[4]]));
}

#[test]
fn deleting_owner_cascades() {
    let engine = engine();
    let season = engine.create("Season", &[("year", Value::from(2024))]).unwrap();
    let race = engine.create("Race", &[]).unwrap();
    season.collection("races").unwrap().add(&race).unwrap();
    let c = cars(&engine, 2);
    for car in &c {
        race.collection("cars").unwrap().add(car).unwrap();
    }

    season.delete().unwrap();
    assert!(engine.find("Season", season.id()).unwrap().is_none());
    assert!(engine.find("Race", race.id()).unwrap().is_none());
    for car in &c {
        assert!(engine.find("Car", car.id()).unwrap().is_none());
    }
}

#[test]
fn has_one_round_trip() {
    let engine = engine();
    let car = engine.create("Car", &[]).unwrap();
    let driver = engine
        .create("Driver", &[("last_name", Value::from("Hamilton"))])
        .unwrap();

    assert!(car.associated("driver").unwrap().is_none());
    car.set_associated("driver", Some(&driver)).unwrap();
    assert_eq!(car.associated("driver").unwrap(), Some(driver.clone()));
    assert_eq!(car.get("driver_id").unwrap(), Some(Value::from(driver.id())));

    // A fresh handle resolves through the store, not the cache.
    let reloaded = engine.find("Car", car.id()).unwrap().unwrap();
    let resolved = reloaded.associated("driver").unwrap().unwrap();
    assert_eq!(resolved.get("last_name").unwrap(), Some(Value::from("Hamilton")));

    car.set_associated("driver", None).unwrap();
    assert!(reloaded.associated("driver").unwrap().is_none());
}

#[test]
fn has_one_to_deleted_target_reads_absent() {
    let engine = engine();
    let car = engine.create("Car", &[]).unwrap();
    let driver = engine.create("Driver", &[]).unwrap();
    car.set_associated("driver", Some(&driver)).unwrap();
    driver.delete().unwrap();

    let fresh = engine.find("Car", car.id()).unwrap().unwrap();
    assert!(fresh.associated("driver").unwrap().is_none());
}

#[test]
fn association_misuse_is_a_schema_error() {
    let engine = engine();
    let car = engine.create("Car", &[]).unwrap();
    let race = engine.create("Race", &[]).unwrap();

    assert!(car.collection("wheels").unwrap_err().is_schema());
    assert!(car.associated("owner").unwrap_err().is_schema());
    assert!(car.set_associated("driver", Some(&race)).unwrap_err().is_schema());
    assert!(race.collection("cars").unwrap().add(&race).unwrap_err().is_schema());
}
