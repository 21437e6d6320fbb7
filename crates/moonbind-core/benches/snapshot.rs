use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use moonbind_core::{ProtoBuilder, Serializer, TableRef, Value, Vm};
use std::rc::Rc;

/// Array-like table of `size` records, every record pointing at one shared table
fn build_records(vm: &Vm, size: i64) -> TableRef {
    let shared = vm.create_table();
    shared.set_field("kind", "record");
    let root = vm.create_table();
    for i in 1..=size {
        let record = vm.create_table();
        record.set_field("id", i);
        record.set_field("score", i as f64 * 0.5);
        record.set_field("name", format!("record-{}", i));
        record.set_field("meta", shared.clone());
        root.raw_set(Value::Integer(i), Value::Table(record)).unwrap();
    }
    root
}

fn bench_serialize_tables(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize_tables");

    for size in [10i64, 100, 1000] {
        let mut vm = Vm::new();
        let root = Value::Table(build_records(&vm, size));
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("records", size), &root, |b, root| {
            b.iter(|| {
                let mut bytes = Vec::new();
                Serializer::new(&mut vm)
                    .serialize_variable(&mut bytes, black_box(root))
                    .unwrap();
                bytes
            });
        });
    }

    group.finish();
}

fn bench_deserialize_tables(c: &mut Criterion) {
    let mut group = c.benchmark_group("deserialize_tables");

    for size in [10i64, 100, 1000] {
        let mut vm = Vm::new();
        let root = Value::Table(build_records(&vm, size));
        let mut bytes = Vec::new();
        Serializer::new(&mut vm)
            .serialize_variable(&mut bytes, &root)
            .unwrap();

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("records", size), &bytes, |b, bytes| {
            b.iter(|| {
                Serializer::new(&mut vm)
                    .deserialize_variable(black_box(&bytes[..]))
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_closures(c: &mut Criterion) {
    let mut vm = Vm::new();
    let cell = vm.create_upvalue(0i64);
    let proto = Rc::new(
        ProtoBuilder::new("counter")
            .upvalues(1)
            .get_upvalue(0)
            .load_int(1)
            .add()
            .dup()
            .set_upvalue(0)
            .ret(1)
            .build()
            .unwrap(),
    );
    let root = vm.create_table();
    for i in 1..=50i64 {
        let f = vm.create_closure(proto.clone(), vec![cell.clone()]).unwrap();
        root.raw_set(Value::Integer(i), Value::Function(f)).unwrap();
    }
    let root = Value::Table(root);

    c.bench_function("roundtrip_shared_upvalues", |b| {
        b.iter(|| {
            let mut bytes = Vec::new();
            Serializer::new(&mut vm)
                .serialize_variable(&mut bytes, black_box(&root))
                .unwrap();
            Serializer::new(&mut vm)
                .deserialize_variable(&bytes[..])
                .unwrap()
        });
    });
}

fn bench_state(c: &mut Criterion) {
    let mut vm = Vm::new();
    for i in 0..200i64 {
        vm.set_global(&format!("global_{}", i), i);
    }
    vm.set_global("records", build_records(&vm, 100));

    c.bench_function("serialize_state", |b| {
        b.iter(|| {
            let mut bytes = Vec::new();
            Serializer::new(&mut vm).serialize_state(&mut bytes).unwrap();
            bytes
        });
    });
}

criterion_group!(
    benches,
    bench_serialize_tables,
    bench_deserialize_tables,
    bench_closures,
    bench_state
);
criterion_main!(benches);
