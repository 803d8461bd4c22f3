//! Criterion microbenches for the mask codec and object-file parsing.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure the performance of:
//! - instance raster encoding and decoding (encode_instances, decode_instances)
//! - part raster decoding against instances (decode_parts)
//! - ade20k object file parsing (from_ade20k_object_slice)

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

use labelbridge::codec::{
    decode_instances, decode_parts, encode_instances, encode_parts, ClassLookup, InstanceLayer,
    PartAssignment, PartLayer,
};
use labelbridge::format::io_ade20k::from_ade20k_object_slice;
use labelbridge::ir::{CategoryId, InstanceKey, LabelCategories, Mask};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// An 8 x 6 grid of tiles, one instance per tile, spread over 4 labels.
struct Scene {
    lookup: ClassLookup,
    instances: Vec<(InstanceKey, Mask)>,
    parts: Vec<Mask>,
}

fn scene() -> Scene {
    let labels = LabelCategories::from_names(["car", "person", "tree", "building", "wheel"])
        .unwrap();
    let lookup = ClassLookup::sequential(&labels);
    let (tile_w, tile_h) = (WIDTH / 8, HEIGHT / 6);

    let mut instances = Vec::new();
    let mut parts = Vec::new();
    for row in 0..6 {
        for col in 0..8 {
            let (x0, y0) = (col * tile_w, row * tile_h);
            let mask = Mask::from_fn(WIDTH, HEIGHT, |x, y| {
                x >= x0 + 2 && x < x0 + tile_w - 2 && y >= y0 + 2 && y < y0 + tile_h - 2
            })
            .unwrap();
            let part = Mask::from_fn(WIDTH, HEIGHT, |x, y| {
                x >= x0 + 4 && x < x0 + tile_w / 2 && y >= y0 + tile_h / 2 && y < y0 + tile_h - 4
            })
            .unwrap();
            let key = InstanceKey::new((row * 8 + col) % 4, row * 8 + col);
            instances.push((key, mask));
            parts.push(part);
        }
    }
    Scene {
        lookup,
        instances,
        parts,
    }
}

fn instance_layers(scene: &Scene) -> Vec<InstanceLayer<'_>> {
    scene
        .instances
        .iter()
        .map(|(key, mask)| InstanceLayer {
            key: *key,
            mask,
            z_order: 0,
        })
        .collect()
}

fn bench_encode_instances(c: &mut Criterion) {
    let scene = scene();
    let layers = instance_layers(&scene);
    let mut group = c.benchmark_group("instance_codec");
    group.throughput(Throughput::Elements(u64::from(WIDTH * HEIGHT)));

    group.bench_function("encode_instances", |b| {
        b.iter(|| {
            let encoded =
                encode_instances(WIDTH, HEIGHT, black_box(&layers), &scene.lookup).unwrap();
            black_box(encoded)
        })
    });

    group.finish();
}

fn bench_decode_instances(c: &mut Criterion) {
    let scene = scene();
    let raster = encode_instances(WIDTH, HEIGHT, &instance_layers(&scene), &scene.lookup)
        .unwrap()
        .raster;
    let mut group = c.benchmark_group("instance_codec");
    group.throughput(Throughput::Elements(u64::from(WIDTH * HEIGHT)));

    group.bench_function("decode_instances", |b| {
        b.iter(|| {
            let decoded = decode_instances(black_box(&raster), &scene.lookup).unwrap();
            black_box(decoded)
        })
    });

    group.finish();
}

/// Part decoding runs connected components and a majority vote per region.
fn bench_decode_parts(c: &mut Criterion) {
    let scene = scene();
    let wheel = CategoryId::new(4);
    let part_layers: Vec<PartLayer<'_>> = scene
        .parts
        .iter()
        .map(|mask| PartLayer {
            label: wheel,
            level: 1,
            mask,
            z_order: 0,
        })
        .collect();
    let encoded = encode_parts(WIDTH, HEIGHT, &part_layers, &scene.lookup).unwrap();
    let raster = &encoded.rasters[&1];
    let instances: Vec<(InstanceKey, &Mask)> =
        scene.instances.iter().map(|(key, mask)| (*key, mask)).collect();
    let policy = PartAssignment::default();

    let mut group = c.benchmark_group("part_codec");
    group.throughput(Throughput::Elements(u64::from(WIDTH * HEIGHT)));

    group.bench_function("decode_parts", |b| {
        b.iter(|| {
            let parts =
                decode_parts(black_box(raster), 1, &instances, &scene.lookup, &policy).unwrap();
            black_box(parts)
        })
    });

    group.finish();
}

fn object_file(objects: usize) -> String {
    let records: Vec<String> = (0..objects)
        .map(|i| {
            format!(
                r#"{{"id": {i}, "name": "label_{}", "class_id": {}, "instance": {}, "occluded": {}, "attributes": {{"source": "bench"}}}}"#,
                i % 20,
                i % 20 + 1,
                i / 20,
                i % 3 == 0
            )
        })
        .collect();
    format!(
        r#"{{"image": {{"width": 640, "height": 480}}, "objects": [{}]}}"#,
        records.join(",")
    )
}

fn bench_object_parse(c: &mut Criterion) {
    let json = object_file(500);
    let bytes = json.as_bytes();
    let mut group = c.benchmark_group("ade20k_parse");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("from_ade20k_object_slice", |b| {
        b.iter(|| {
            let file = from_ade20k_object_slice(black_box(bytes)).unwrap();
            black_box(file)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_instances,
    bench_decode_instances,
    bench_decode_parts,
    bench_object_parse
);
criterion_main!(benches);
