//! Envelope codec and dispatch benchmarks.

#![allow(missing_docs)]

use colony_sync::core::ids::{Cell, NetId};
use colony_sync::network::protocol::{ConfigEnvelope, Envelope};
use colony_sync::replication::{standard_table, FieldId, FieldValue, IdentityRegistry};
use colony_sync::sim::{ColonyWorld, ObjectKind, Simulation};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn config(field: FieldId, value: FieldValue) -> Envelope {
    let mut env = ConfigEnvelope::new(
        NetId(1_000_000_512),
        Cell(512),
        field.config_hash(),
        field.expected_type(),
    );
    value.write_payload(&mut env, NetId::UNASSIGNED);
    Envelope::Config(env)
}

fn samples() -> Vec<(&'static str, Envelope)> {
    vec![
        ("float", config(FieldId::Threshold, FieldValue::Number(35.0))),
        ("tag", config(FieldId::FilterTag, FieldValue::Tag("RefinedMetal".to_string()))),
        (
            "recipe",
            config(
                FieldId::RecipeQueue,
                FieldValue::Recipe { recipe: "Steel".to_string(), count: 3 },
            ),
        ),
    ]
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for (name, envelope) in samples() {
        let bytes = envelope.encode().unwrap();

        group.bench_with_input(BenchmarkId::new("encode", name), &envelope, |b, envelope| {
            b.iter(|| black_box(envelope).encode());
        });
        group.bench_with_input(BenchmarkId::new("decode", name), &bytes, |b, bytes| {
            b.iter(|| Envelope::decode(black_box(bytes)));
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let table = standard_table::<ColonyWorld>().unwrap();
    let registry = IdentityRegistry::new(true);
    let mut world = ColonyWorld::new();
    let sensor = world.spawn_building(ObjectKind::ThresholdSensor, Cell(512)).unwrap();
    let Envelope::Config(env) = config(FieldId::Threshold, FieldValue::Number(35.0)) else {
        return;
    };

    c.bench_function("dispatch/threshold", |b| {
        b.iter(|| {
            let result = table.apply(&mut world, &registry, sensor, black_box(&env));
            world.drain_changes();
            result
        });
    });
}

criterion_group!(benches, bench_codec, bench_dispatch);
criterion_main!(benches);
