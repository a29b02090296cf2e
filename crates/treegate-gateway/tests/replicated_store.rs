//! Contract checks against the replicated (`hiqlite`) lease store.
//!
//! Starting a Raft node binds fixed ports and writes a data directory, so
//! these tests are ignored by default; run them explicitly with
//! `cargo test --test replicated_store -- --ignored`.

use hiqlite::{Node, NodeConfig};
use treegate_core::lease::Lease;
use treegate_core::path::LeasePath;
use treegate_gateway::store::{HiqliteLeaseStore, LeaseStore, StoreError};

fn single_node_config(data_dir: &std::path::Path) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node_id = 1;
    config.nodes = vec![Node {
        id: 1,
        addr_raft: "127.0.0.1:38101".to_string(),
        addr_api: "127.0.0.1:37101".to_string(),
    }];
    config.data_dir = data_dir.to_string_lossy().into_owned().into();
    config.secret_raft = "treegate-test-secret-raft".to_string();
    config.secret_api = "treegate-test-secret-api".to_string();
    config
}

fn p(raw: &str) -> LeasePath {
    LeasePath::parse(raw).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "starts a local Raft node; run with -- --ignored"]
async fn replicated_store_upholds_the_lease_contract() {
    let dir = tempfile::tempdir().unwrap();
    let client = hiqlite::start_node(single_node_config(dir.path()))
        .await
        .unwrap();
    let store = HiqliteLeaseStore::new(client).await.unwrap();
    store.clear().await.unwrap();

    // Round trip through both lookups.
    let granted = Lease::grant(p("/repo/a"), "alice", 100);
    store.insert(&granted).await.unwrap();
    let by_path = store.get_by_path(&p("/repo/a")).await.unwrap().unwrap();
    assert_eq!(by_path.public, granted.public);
    let by_public = store.get_by_public(&granted.public).await.unwrap().unwrap();
    assert_eq!(by_public.path, granted.path);

    // The overlap guard holds through consensus.
    for conflicting in ["/repo/a", "/repo/a/b", "/repo", "/"] {
        let err = store
            .insert(&Lease::grant(p(conflicting), "bob", 1))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::Collision),
            "expected collision for {conflicting}"
        );
    }
    store
        .insert(&Lease::grant(p("/repo/ab"), "bob", 1))
        .await
        .unwrap();

    // Scans come back in deterministic order.
    let hits = store.scan_overlapping(&p("/")).await.unwrap();
    let paths: Vec<_> = hits.iter().map(|l| l.path.as_str().to_string()).collect();
    assert_eq!(paths, vec!["/repo/a", "/repo/ab"]);

    // Guarded delete leaves a regranted path alone.
    let old_public = granted.public.clone();
    store.delete(&p("/repo/a")).await.unwrap();
    let fresh = Lease::grant(p("/repo/a"), "carol", 2);
    store.insert(&fresh).await.unwrap();
    store.delete_exact(&p("/repo/a"), &old_public).await.unwrap();
    assert!(store.get_by_path(&p("/repo/a")).await.unwrap().is_some());

    // Idempotent delete, then clear.
    store.delete(&p("/repo/a")).await.unwrap();
    store.delete(&p("/repo/a")).await.unwrap();
    assert!(store.get_by_path(&p("/repo/a")).await.unwrap().is_none());
    store.clear().await.unwrap();
    assert!(store.list().await.unwrap().is_empty());

    store.shutdown().await;
}
