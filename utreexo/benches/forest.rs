use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use utreexo::sim::{Block, Simulator};
use utreexo::{utreexo_hasher, Forest, Hasher, MemStore, Pollard};

fn blocks(n: usize) -> Vec<Block> {
    Simulator::with_limits(0x07, 512, 8).take(n).collect()
}

fn hasher() -> Hasher<u64> {
    utreexo_hasher()
}

fn dense_modify(c: &mut Criterion) {
    let blocks = blocks(32);
    c.bench_function("forest modify 32 blocks", |b| {
        b.iter_batched(
            || Forest::new(MemStore::new(), hasher()).unwrap(),
            |mut forest| {
                for block in blocks.iter() {
                    let (proof, _) = forest.prove_batch(&block.dels).unwrap();
                    forest.modify(&block.adds, &proof.targets).unwrap();
                }
                forest
            },
            BatchSize::SmallInput,
        )
    });
}

fn pollard_modify(c: &mut Criterion) {
    let blocks = blocks(32);
    let mut forest = Forest::new(MemStore::new(), hasher()).unwrap();
    let proofs: Vec<_> = blocks
        .iter()
        .map(|block| {
            let (proof, hashes) = forest.prove_batch(&block.dels).unwrap();
            forest.modify(&block.adds, &proof.targets).unwrap();
            (proof, hashes)
        })
        .collect();

    c.bench_function("pollard modify 32 blocks", |b| {
        b.iter_batched(
            || Pollard::new(hasher()),
            |mut pollard| {
                for (block, (proof, hashes)) in blocks.iter().zip(proofs.iter()) {
                    pollard.modify(&block.adds, hashes, proof).unwrap();
                }
                pollard
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, dense_modify, pollard_modify);
criterion_main!(benches);
