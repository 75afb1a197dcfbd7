//! # Protocol Properties
//!
//! Uniqueness, atomicity, quorum safety, idempotence and liveness checked
//! against a running cluster.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;
    use nc_03_signature_aggregation::{AggregationError, QuorumProof};
    use nc_04_notary_client::ClientConfig;
    use shared_types::{
        Ed25519IdentityVerifier, ReplicaId, ReplicaResponse, ReplicaTransport, Signature, TxId,
    };

    use crate::integration::harness::ClusterHarness;

    #[tokio::test]
    async fn test_contested_state_has_one_identical_record_everywhere() {
        let harness = ClusterHarness::start(1);
        let client = harness.client(ClientConfig::for_testing());

        let requests: Vec<_> = (1..=4u8).map(|i| harness.request(i, &[20 + i, 9])).collect();
        let outcomes = tokio::time::timeout(
            Duration::from_secs(30),
            join_all(requests.into_iter().map(|r| client.notarise(r))),
        )
        .await
        .unwrap();
        let winner = outcomes
            .iter()
            .find_map(|o| o.as_ref().ok().map(|r| r.tx_id))
            .unwrap();

        let contested = ClusterHarness::state(9);
        assert!(
            harness
                .eventually(|h| h.records(&contested).iter().all(Option::is_some))
                .await
        );
        let records = harness.records(&contested);
        assert!(records.iter().all(|r| *r == records[0]));
        assert_eq!(records[0].as_ref().unwrap().consuming_tx, winner);

        // Losers left no trace of their own inputs.
        for i in 1..=4u8 {
            if TxId([i; 32]) == winner {
                continue;
            }
            let own = ClusterHarness::state(20 + i);
            assert!(harness.records(&own).iter().all(Option::is_none));
        }

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_result_below_quorum_does_not_verify() {
        let harness = ClusterHarness::start(1);
        let client = harness.client(ClientConfig {
            dispatch_subset: Some(3),
            ..ClientConfig::for_testing()
        });
        let result = client.notarise(harness.request(1, &[1])).await.unwrap();

        let mut short = result.clone();
        short.signatures.remove(&ReplicaId(0));
        assert_eq!(
            QuorumProof::from_result(&short, &harness.cluster)
                .verify(&harness.cluster, &Ed25519IdentityVerifier),
            Err(AggregationError::InsufficientSignatures { have: 2, need: 3 })
        );

        let mut forged = result;
        forged.signatures.insert(ReplicaId(1), Signature([1; 64]));
        assert_eq!(
            QuorumProof::from_result(&forged, &harness.cluster)
                .verify(&harness.cluster, &Ed25519IdentityVerifier),
            Err(AggregationError::InvalidSignature(ReplicaId(1)))
        );

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_replica_answers_resubmission_from_its_cache() {
        let harness = ClusterHarness::start(1);
        let client = harness.client(ClientConfig::for_testing());
        let request = harness.request(2, &[2]);
        client.notarise(request.clone()).await.unwrap();
        assert!(harness.eventually(|h| h.stores[1].len() == 1).await);

        let first = harness
            .transport
            .submit(ReplicaId(1), request.clone())
            .await
            .unwrap();
        let second = harness.transport.submit(ReplicaId(1), request).await.unwrap();

        assert!(matches!(first, ReplicaResponse::Vote(_)));
        assert_eq!(first, second);
        assert_eq!(harness.stores[1].len(), 1);

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_progress_after_primary_crash() {
        let harness = ClusterHarness::start(1);
        harness.set_offline(0, true);
        let client = harness.client(ClientConfig::for_testing());

        let result = client.notarise(harness.request(3, &[3])).await.unwrap();

        assert_eq!(result.signature_count(), 3);
        assert!(!result.signatures.contains_key(&ReplicaId(0)));

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_larger_cluster_commits_with_two_faults() {
        let harness = ClusterHarness::start(2);
        harness.set_offline(5, true);
        harness.set_offline(6, true);
        let client = harness.client(ClientConfig::for_testing());

        let result = client.notarise(harness.request(4, &[4, 5])).await.unwrap();

        assert_eq!(harness.cluster.quorum(), 5);
        assert_eq!(result.signature_count(), 5);

        harness.shutdown().await;
    }
}
