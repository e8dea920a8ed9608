use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use rtmodel::index::IndexManager;
use rtmodel::{AttrKind, EntityId, EntitySchema, InMemoryStore, Model, ModelEngine, Value};

fn engine_with_race(members: usize) -> (ModelEngine, Model) {
    let engine = ModelEngine::new(Arc::new(InMemoryStore::new()));
    engine
        .register(
            EntitySchema::builder("Car")
                .indexed("team", AttrKind::String)
                .build(),
        )
        .unwrap();
    engine
        .register(EntitySchema::builder("Race").has_many("cars", "Car").build())
        .unwrap();

    let race = engine.create("Race", &[]).unwrap();
    let cars = race.collection("cars").unwrap();
    for _ in 0..members {
        cars.add(&engine.create("Car", &[]).unwrap()).unwrap();
    }
    (engine, race)
}

fn bench_positional_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordering");
    group.throughput(Throughput::Elements(1));

    group.bench_function("front_insert", |b| {
        b.iter_custom(|iters| {
            // Fresh set per sample so shifts do not accumulate across samples.
            let index = IndexManager::new(Arc::new(InMemoryStore::new()));
            let start = Instant::now();
            for id in 0..iters {
                index
                    .insert("bench:ids", EntityId::new(id), Some(0))
                    .unwrap();
            }
            start.elapsed()
        })
    });

    group.bench_function("append", |b| {
        b.iter_custom(|iters| {
            let index = IndexManager::new(Arc::new(InMemoryStore::new()));
            let start = Instant::now();
            for id in 0..iters {
                index.insert("bench:ids", EntityId::new(id), None).unwrap();
            }
            start.elapsed()
        })
    });

    group.bench_function("collection_insert_middle", |b| {
        b.iter_custom(|iters| {
            let (engine, race) = engine_with_race(64);
            let cars = race.collection("cars").unwrap();
            let start = Instant::now();
            for _ in 0..iters {
                let car = engine.create("Car", &[]).unwrap();
                cars.insert(32, &car).unwrap();
            }
            start.elapsed()
        })
    });

    group.finish();
}

fn bench_cursor_streaming(c: &mut Criterion) {
    let (engine, race) = engine_with_race(1024);
    let cars = race.collection("cars").unwrap();
    for (i, car) in cars.iter().unwrap().enumerate() {
        car.unwrap()
            .set("team", if i % 2 == 0 { "even" } else { "odd" })
            .unwrap();
    }

    let mut group = c.benchmark_group("cursor");
    group.throughput(Throughput::Elements(1024));

    group.bench_function("buffered", |b| {
        b.iter(|| cars.iter().unwrap().count());
    });

    let mut unbuffered = cars.clone();
    unbuffered.set_buffered(false);
    group.bench_function("unbuffered", |b| {
        b.iter(|| unbuffered.iter().unwrap().count());
    });

    group.bench_function("search_intersection", |b| {
        b.iter(|| {
            engine
                .find_all(
                    "Car",
                    &[
                        ("race_id", Value::from(race.id())),
                        ("team", Value::from("even")),
                    ],
                )
                .unwrap()
                .len()
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(ordering, bench_positional_insert, bench_cursor_streaming);
criterion_main!(ordering);
