//! Search latency over an in-memory graph, plus codec throughput.

use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use semvec::vector::hnsw::{HnswGraph, HnswParams};
use semvec::vector::quantize::{ProjectionCodec, QuantParams};
use semvec::vector::types::{RecordId, Slot, VectorDimension};
use std::hint::black_box;

const DIM: usize = 64;
const NODES: u64 = 2_000;

fn random_unit_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

fn build_graph() -> HnswGraph {
    let mut rng = StdRng::seed_from_u64(7);
    let mut graph = HnswGraph::new(HnswParams {
        graph_degree: 16,
        build_breadth: 128,
        search_breadth: 64,
    });
    for i in 0..NODES {
        let vector = random_unit_vector(&mut rng, DIM);
        graph.insert(
            Slot::new(i as u32),
            RecordId::new(i + 1).unwrap(),
            vector,
        );
    }
    graph
}

fn bench_search(c: &mut Criterion) {
    let graph = build_graph();
    let mut rng = StdRng::seed_from_u64(99);
    let queries: Vec<Vec<f32>> = (0..32).map(|_| random_unit_vector(&mut rng, DIM)).collect();

    let mut group = c.benchmark_group("hnsw_search");
    for breadth in [16usize, 64, 128] {
        group.bench_function(format!("k10_breadth{breadth}"), |b| {
            let mut i = 0usize;
            b.iter(|| {
                let query = &queries[i % queries.len()];
                i += 1;
                black_box(graph.search(black_box(query), 10, breadth))
            });
        });
    }
    group.finish();
}

fn bench_quantize(c: &mut Criterion) {
    let dimension = VectorDimension::new(384).unwrap();
    let codec = ProjectionCodec::new(
        dimension,
        QuantParams {
            reduced_dims: 64,
            bits_per_component: 8,
            projection_seed: 42,
        },
    )
    .unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let vector = random_unit_vector(&mut rng, 384);

    c.bench_function("quantize_384_to_64", |b| {
        b.iter(|| black_box(codec.quantize(black_box(&vector)).unwrap()))
    });
}

criterion_group!(benches, bench_search, bench_quantize);
criterion_main!(benches);
