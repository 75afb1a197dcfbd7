//! # Notarisation Scenarios
//!
//! Four replicas (f = 1, quorum = 3) driven through `NotaryClient`.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;
    use nc_03_signature_aggregation::QuorumProof;
    use nc_04_notary_client::{CancelToken, ClientConfig};
    use shared_types::{Decision, Ed25519IdentityVerifier, NotaryError, ReplicaId, Signature, TxId};

    use crate::integration::harness::{CancellingTransport, ClusterHarness, CountingTransport};

    #[tokio::test]
    async fn test_single_uncontested_transaction_commits() {
        let harness = ClusterHarness::start(1);
        let client = harness.client(ClientConfig::for_testing());

        let result = client.notarise(harness.request(1, &[10])).await.unwrap();

        assert_eq!(result.decision, Decision::Commit);
        assert!(result.signature_count() >= 3);
        QuorumProof::from_result(&result, &harness.cluster)
            .verify(&harness.cluster, &Ed25519IdentityVerifier)
            .unwrap();

        let state = ClusterHarness::state(10);
        assert!(
            harness
                .eventually(|h| h.records(&state).iter().all(Option::is_some))
                .await
        );
        let records = harness.records(&state);
        assert!(records.iter().all(|r| *r == records[0]));
        assert_eq!(records[0].as_ref().unwrap().consuming_tx, TxId([1; 32]));

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_ten_competing_transactions_exactly_one_wins() {
        let harness = ClusterHarness::start(1);
        let client = harness.client(ClientConfig::for_testing());
        let contested = ClusterHarness::state(50);

        // T_i consumes its own input first and the contested one second.
        let requests: Vec<_> = (1..=10u8).map(|i| harness.request(i, &[100 + i, 50])).collect();
        let outcomes = tokio::time::timeout(
            Duration::from_secs(30),
            join_all(requests.into_iter().map(|r| client.notarise(r))),
        )
        .await
        .unwrap();

        let winners: Vec<TxId> = outcomes
            .iter()
            .filter_map(|o| o.as_ref().ok().map(|r| r.tx_id))
            .collect();
        assert_eq!(winners.len(), 1, "outcomes: {:?}", outcomes);
        let winner = winners[0];

        for outcome in &outcomes {
            match outcome {
                Ok(result) => assert_eq!(result.decision, Decision::Commit),
                Err(NotaryError::Conflict(conflict)) => {
                    assert_eq!(conflict.state_ref, contested);
                    assert_eq!(conflict.consuming_tx, winner);
                    assert_eq!(conflict.input_index, 1);
                    assert_eq!(conflict.consuming_requester, harness.requester());
                }
                Err(other) => panic!("unexpected outcome {:?}", other),
            }
        }

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_one_replica_offline_still_commits() {
        let harness = ClusterHarness::start(1);
        harness.set_offline(2, true);
        let client = harness.client(ClientConfig::for_testing());

        let result = client.notarise(harness.request(3, &[30, 31])).await.unwrap();

        assert_eq!(result.signature_count(), 3);
        assert!(!result.signatures.contains_key(&ReplicaId(2)));
        assert!(harness.stores[2].is_empty());

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_two_replicas_offline_is_unavailable_and_writes_nothing() {
        let harness = ClusterHarness::start(1);
        harness.set_offline(2, true);
        harness.set_offline(3, true);
        let client = harness.client(ClientConfig {
            round_timeout: Duration::from_millis(500),
            max_attempts: 2,
            ..ClientConfig::for_testing()
        });

        let err = client
            .notarise(harness.request(4, &[40]))
            .await
            .unwrap_err();

        assert!(matches!(err, NotaryError::Unavailable { attempts: 2, .. }));
        assert!(err.is_retryable());
        assert_eq!(harness.total_records(), 0);

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected_without_retry() {
        let harness = ClusterHarness::start(1);
        let counting = Arc::new(CountingTransport::new(harness.transport.clone()));
        let client = harness.client_over(counting.clone(), ClientConfig::for_testing());

        let mut request = harness.request(5, &[60]);
        request.signature = Signature([7; 64]);

        let err = client.notarise(request).await.unwrap_err();

        assert!(matches!(err, NotaryError::TransactionInvalid { .. }));
        assert!(!err.is_retryable());
        assert!(counting.calls() <= harness.cluster.size());
        assert_eq!(harness.total_records(), 0);

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_resubmission_returns_original_result() {
        let harness = ClusterHarness::start(1);
        let client = harness.client(ClientConfig {
            dispatch_subset: Some(3),
            ..ClientConfig::for_testing()
        });
        let request = harness.request(6, &[70, 71]);

        let first = client.notarise(request.clone()).await.unwrap();
        assert!(
            harness
                .eventually(|h| h.stores.iter().all(|s| s.len() == 2))
                .await
        );

        let second = client.notarise(request).await.unwrap();

        assert_eq!(second, first);
        assert!(harness.stores.iter().all(|s| s.len() == 2));
        assert!(harness
            .stores
            .iter()
            .all(|s| s.records_for(&TxId([6; 32])).len() == 2));

        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancellation_after_dispatch_leaves_agreed_commit_in_place() {
        let harness = ClusterHarness::start(1);
        let cancel = CancelToken::new();
        let cancelling = Arc::new(CancellingTransport::new(
            harness.transport.clone(),
            cancel.clone(),
        ));
        let client = harness.client_over(cancelling, ClientConfig::for_testing());
        let request = harness.request(7, &[80, 81]);

        let err = client
            .notarise_with_cancel(request.clone(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, NotaryError::Cancelled);

        let state = ClusterHarness::state(80);
        assert!(
            harness
                .eventually(|h| h.records(&state).iter().all(Option::is_some))
                .await
        );
        assert!(harness
            .records(&state)
            .iter()
            .all(|r| r.as_ref().map(|r| r.consuming_tx) == Some(TxId([7; 32]))));

        let result = harness
            .client(ClientConfig::for_testing())
            .notarise(request)
            .await
            .unwrap();
        assert_eq!(result.decision, Decision::Commit);
        assert_eq!(result.tx_id, TxId([7; 32]));

        harness.shutdown().await;
    }
}
