//! # Notary Benchmarks
//!
//! | Component | Operation |
//! |-----------|-----------|
//! | nc-01 Uniqueness Store | `try_commit` for 1..64 inputs, fresh and conflicting |
//! | nc-03 Signature Aggregation | quorum from N votes, proof verification |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nc_01_uniqueness_store::{InMemoryDurableLog, UniquenessStore};
use nc_03_signature_aggregation::{QuorumProof, SignatureAggregator, VoteStatus};
use rand::Rng;
use shared_crypto::Ed25519KeyPair;
use shared_types::{
    ClusterConfig, Decision, Ed25519IdentityVerifier, PartyId, ReplicaId, ReplicaInfo,
    ReplicaVote, StateRef, TxId,
};

fn random_tx() -> TxId {
    TxId(rand::thread_rng().gen())
}

fn random_inputs(count: usize) -> Vec<StateRef> {
    (0..count).map(|i| StateRef::new(random_tx(), i as u32)).collect()
}

// ============================================================================
// NC-01: Uniqueness Store
// ============================================================================

fn bench_store_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("nc-01-uniqueness-store");
    group.measurement_time(Duration::from_secs(5));

    for inputs in [1usize, 8, 64] {
        group.throughput(Throughput::Elements(inputs as u64));
        group.bench_with_input(BenchmarkId::new("commit_fresh", inputs), &inputs, |b, &n| {
            let store = UniquenessStore::open(Arc::new(InMemoryDurableLog::new()), 16).unwrap();
            b.iter_batched(
                || random_inputs(n),
                |refs| black_box(store.try_commit(random_tx(), &refs, PartyId::default(), 0)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    let store = UniquenessStore::open(Arc::new(InMemoryDurableLog::new()), 16).unwrap();
    let taken = random_inputs(8);
    store
        .try_commit(random_tx(), &taken, PartyId::default(), 0)
        .unwrap();
    group.bench_function("commit_conflicting", |b| {
        b.iter(|| black_box(store.try_commit(random_tx(), &taken, PartyId::default(), 0)))
    });

    group.finish();
}

// ============================================================================
// NC-03: Signature Aggregation
// ============================================================================

fn cluster(size: usize) -> (Arc<ClusterConfig>, Vec<Ed25519KeyPair>) {
    let keys: Vec<_> = (0..size)
        .map(|i| Ed25519KeyPair::from_seed([i as u8 + 1; 32]))
        .collect();
    let cluster = ClusterConfig::new(
        keys.iter()
            .enumerate()
            .map(|(i, k)| ReplicaInfo {
                id: ReplicaId(i as u16),
                identity: PartyId::of(k),
                address: format!("bench://{}", i),
            })
            .collect(),
    )
    .unwrap();
    (Arc::new(cluster), keys)
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("nc-03-signature-aggregation");

    for size in [4usize, 16, 64] {
        let (cluster, keys) = cluster(size);
        let tx_id = TxId([9; 32]);
        let votes: Vec<_> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| ReplicaVote::signed(ReplicaId(i as u16), tx_id, Decision::Commit, k))
            .collect();

        group.throughput(Throughput::Elements(cluster.quorum() as u64));
        group.bench_with_input(BenchmarkId::new("reach_quorum", size), &votes, |b, votes| {
            b.iter(|| {
                let mut aggregator =
                    SignatureAggregator::new(tx_id, cluster.clone(), Arc::new(Ed25519IdentityVerifier));
                for vote in votes {
                    if let Ok(VoteStatus::QuorumReached(proof)) = aggregator.add_vote(vote.clone()) {
                        return black_box(proof.signer_count());
                    }
                }
                0
            })
        });

        let mut aggregator =
            SignatureAggregator::new(tx_id, cluster.clone(), Arc::new(Ed25519IdentityVerifier));
        let proof: QuorumProof = votes
            .iter()
            .find_map(|v| match aggregator.add_vote(v.clone()) {
                Ok(VoteStatus::QuorumReached(proof)) => Some(proof),
                _ => None,
            })
            .unwrap();
        group.bench_with_input(BenchmarkId::new("verify_proof", size), &proof, |b, proof| {
            b.iter(|| black_box(proof.verify(&cluster, &Ed25519IdentityVerifier).is_ok()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_commit, bench_aggregation);
criterion_main!(benches);
