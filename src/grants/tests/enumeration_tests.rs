//! Grant enumeration tests
//!
//! Covers both query modes end to end: the wildcard short-circuit, empty
//! results, fail-fast on oracle failure, cancellation and the concurrency bound.

use accessmap_grants::{
    oracle::from_fn,
    AccessTuple, DecisionOracle, EnumeratorConfig, GrantEnumerator, GrantError, GrantQuery,
    InMemoryTupleStore, PolicyRule, RbacOracle, ResourceCatalog, RoleAssignment, Snapshot,
    StoreError, TupleStore,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Oracle admitting a fixed set of tuples and recording every call
#[derive(Default)]
struct RecordingOracle {
    admitted: HashSet<AccessTuple>,
    calls: Mutex<Vec<AccessTuple>>,
}

impl RecordingOracle {
    fn admitting(tuples: &[(&str, &str, &str, &str, &str)]) -> Self {
        Self {
            admitted: tuples
                .iter()
                .map(|t| AccessTuple::new(t.0, t.1, t.2, t.3, t.4))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<AccessTuple> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for RecordingOracle {
    async fn admits(&self, tuple: &AccessTuple) -> accessmap_grants::Result<bool> {
        self.calls.lock().unwrap().push(tuple.clone());
        Ok(self.admitted.contains(tuple))
    }
}

/// Oracle that sleeps on every call and tracks peak concurrency
#[derive(Default)]
struct SlowOracle {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl DecisionOracle for SlowOracle {
    async fn admits(&self, _tuple: &AccessTuple) -> accessmap_grants::Result<bool> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        sleep(Duration::from_millis(5)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(true)
    }
}

struct UnreachableStore;

#[async_trait]
impl TupleStore for UnreachableStore {
    async fn policies(&self) -> Result<Vec<PolicyRule>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn role_assignments(&self) -> Result<Vec<RoleAssignment>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

fn example_snapshot() -> Snapshot {
    Snapshot::new(
        vec![PolicyRule::new("editor", "org1", "property", "write")],
        vec![RoleAssignment::new("alice", "editor", "org1")],
    )
}

/// Two domains, concrete ids for "property", three users
fn multi_domain_snapshot() -> Snapshot {
    Snapshot::new(
        vec![
            PolicyRule::new("editor", "org1", "property", "write"),
            PolicyRule::new("viewer", "org1", "property", "read").with_resource_id("p-1"),
            PolicyRule::new("viewer", "org2", "property", "read").with_resource_id("p-2"),
            PolicyRule::new("clerk", "org2", "invoice", "approve"),
        ],
        vec![
            RoleAssignment::new("alice", "editor", "org1"),
            RoleAssignment::new("alice", "viewer", "org2"),
            RoleAssignment::new("bob", "viewer", "org1"),
            RoleAssignment::new("carol", "clerk", "org2"),
        ],
    )
}

fn catalog() -> ResourceCatalog {
    ResourceCatalog::parse("property:write,property:read,invoice:approve").unwrap()
}

fn rbac_enumerator(snapshot: Snapshot, catalog: ResourceCatalog) -> GrantEnumerator {
    let oracle = Arc::new(RbacOracle::from_snapshot(&snapshot));
    GrantEnumerator::new(
        Arc::new(InMemoryTupleStore::from_snapshot(snapshot)),
        oracle,
        catalog,
    )
}

fn single_worker() -> EnumeratorConfig {
    EnumeratorConfig {
        max_concurrency: 1,
        enable_metrics: true,
    }
}

// ============================================================================
// EXAMPLE SCENARIO
// ============================================================================

#[tokio::test]
async fn test_by_subject_single_wildcard_grant() {
    let enumerator = rbac_enumerator(
        example_snapshot(),
        ResourceCatalog::parse("property:write,property:read").unwrap(),
    );

    let access = enumerator.enumerate_by_subject("alice").await.unwrap();

    assert_eq!(access.user, "alice");
    assert_eq!(access.access.len(), 1);
    let entry = &access.access[0];
    assert_eq!(entry.domain, "org1");
    assert_eq!(entry.resource_type, "property");
    assert_eq!(entry.action, "write");
    assert_eq!(entry.resource_id, "*");
}

#[tokio::test]
async fn test_by_resource_single_domain() {
    let enumerator = rbac_enumerator(example_snapshot(), ResourceCatalog::default());

    let view = enumerator
        .enumerate_by_resource("property", "write", None)
        .await
        .unwrap();

    assert_eq!(view.resource_id, "*");
    assert_eq!(view.access_by_domain.len(), 1);
    let users: Vec<&str> = view.users_in("org1").unwrap().iter().map(String::as_str).collect();
    assert_eq!(users, vec!["alice"]);
}

#[tokio::test]
async fn test_unassigned_user_not_found() {
    let enumerator = rbac_enumerator(example_snapshot(), catalog());

    let err = enumerator.enumerate_by_subject("bob").await.unwrap_err();
    assert!(matches!(err, GrantError::NotFound(msg) if msg == "no access for user"));
}

// ============================================================================
// WILDCARD SHORT-CIRCUIT
// ============================================================================

#[tokio::test]
async fn test_wildcard_subsumes_concrete_ids() {
    // Admits both the wildcard and a concrete id: only the wildcard is reported
    let oracle = Arc::new(RecordingOracle::admitting(&[
        ("alice", "org1", "property", "read", "*"),
        ("alice", "org1", "property", "read", "p-1"),
    ]));
    let enumerator = GrantEnumerator::with_config(
        Arc::new(InMemoryTupleStore::from_snapshot(multi_domain_snapshot())),
        oracle.clone(),
        ResourceCatalog::parse("property:read").unwrap(),
        single_worker(),
    );

    let grants = enumerator
        .enumerate(&GrantQuery::by_subject("alice"))
        .await
        .unwrap();

    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].resource_id, "*");

    // No concrete id was probed for the admitted triple
    let org1_calls: Vec<AccessTuple> = oracle
        .calls()
        .into_iter()
        .filter(|t| t.domain == "org1")
        .collect();
    assert_eq!(org1_calls.len(), 1);
    assert_eq!(org1_calls[0].resource_id, "*");
}

#[tokio::test]
async fn test_concrete_ids_probed_without_wildcard() {
    let enumerator = rbac_enumerator(multi_domain_snapshot(), catalog());

    let access = enumerator.enumerate_by_subject("bob").await.unwrap();

    assert_eq!(access.access.len(), 1);
    assert_eq!(access.access[0].domain, "org1");
    assert_eq!(access.access[0].action, "read");
    assert_eq!(access.access[0].resource_id, "p-1");
}

#[tokio::test]
async fn test_probe_order_and_call_count() {
    let oracle = Arc::new(RecordingOracle::admitting(&[
        ("alice", "org2", "property", "read", "p-2"),
    ]));
    let enumerator = GrantEnumerator::with_config(
        Arc::new(InMemoryTupleStore::from_snapshot(multi_domain_snapshot())),
        oracle.clone(),
        ResourceCatalog::parse("property:read").unwrap(),
        single_worker(),
    );

    let grants = enumerator
        .enumerate(&GrantQuery::by_subject("alice"))
        .await
        .unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].resource_id, "p-2");

    let probed: Vec<(String, String)> = oracle
        .calls()
        .into_iter()
        .map(|t| (t.domain, t.resource_id))
        .collect();
    let expected: Vec<(String, String)> = [
        ("org1", "*"),
        ("org1", "p-1"),
        ("org1", "p-2"),
        ("org2", "*"),
        ("org2", "p-1"),
        ("org2", "p-2"),
    ]
    .iter()
    .map(|(d, id)| (d.to_string(), id.to_string()))
    .collect();
    assert_eq!(probed, expected);
}

#[tokio::test]
async fn test_grants_emitted_in_enumeration_order() {
    let enumerator = rbac_enumerator(multi_domain_snapshot(), catalog());

    let access = enumerator.enumerate_by_subject("alice").await.unwrap();
    let got: Vec<(&str, &str, &str, &str)> = access
        .access
        .iter()
        .map(|e| {
            (
                e.domain.as_str(),
                e.resource_type.as_str(),
                e.action.as_str(),
                e.resource_id.as_str(),
            )
        })
        .collect();

    assert_eq!(
        got,
        vec![
            ("org1", "property", "write", "*"),
            ("org2", "property", "read", "p-2"),
        ]
    );
}

// ============================================================================
// BY RESOURCE
// ============================================================================

#[tokio::test]
async fn test_by_resource_concrete_id() {
    let enumerator = rbac_enumerator(multi_domain_snapshot(), catalog());

    let view = enumerator
        .enumerate_by_resource("property", "read", Some("p-1"))
        .await
        .unwrap();

    assert_eq!(view.resource_id, "p-1");
    assert_eq!(view.access_by_domain.len(), 1);
    assert!(view.users_in("org1").unwrap().contains("bob"));
    assert!(view.users_in("org2").is_none());
}

#[tokio::test]
async fn test_by_resource_groups_domains() {
    let enumerator = rbac_enumerator(multi_domain_snapshot(), catalog());

    let view = enumerator
        .enumerate_by_resource("invoice", "approve", None)
        .await
        .unwrap();

    assert_eq!(view.access_by_domain.len(), 1);
    assert!(view.users_in("org2").unwrap().contains("carol"));

    let err = enumerator
        .enumerate_by_resource("invoice", "delete", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GrantError::NotFound(msg) if msg == "no access to resource"));
}

#[tokio::test]
async fn test_by_resource_lists_end_users_only() {
    // alice -> editor -> viewer; "editor" holds a role but is not a user
    let snapshot = Snapshot::new(
        vec![PolicyRule::new("viewer", "org1", "property", "read")],
        vec![
            RoleAssignment::new("alice", "editor", "org1"),
            RoleAssignment::new("editor", "viewer", "org1"),
        ],
    );
    let enumerator = rbac_enumerator(snapshot, ResourceCatalog::default());

    let view = enumerator
        .enumerate_by_resource("property", "read", None)
        .await
        .unwrap();

    let users: Vec<&str> = view.users_in("org1").unwrap().iter().map(String::as_str).collect();
    assert_eq!(users, vec!["alice"]);
}

// ============================================================================
// EMPTY RESULTS
// ============================================================================

#[tokio::test]
async fn test_deny_all_is_not_found_from_both_entry_points() {
    let enumerator = GrantEnumerator::new(
        Arc::new(InMemoryTupleStore::from_snapshot(multi_domain_snapshot())),
        from_fn(|_| Ok(false)),
        catalog(),
    );

    assert!(enumerator
        .enumerate_by_subject("alice")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(enumerator
        .enumerate_by_resource("property", "write", None)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_no_domains_means_no_oracle_calls() {
    let oracle = Arc::new(RecordingOracle::default());
    let enumerator = GrantEnumerator::new(
        Arc::new(InMemoryTupleStore::from_snapshot(Snapshot::new(
            vec![],
            vec![RoleAssignment::new("alice", "editor", "org1")],
        ))),
        oracle.clone(),
        catalog(),
    );

    let grants = enumerator
        .enumerate(&GrantQuery::by_subject("alice"))
        .await
        .unwrap();
    assert!(grants.is_empty());
    assert!(oracle.calls().is_empty());

    assert!(enumerator
        .enumerate_by_subject("alice")
        .await
        .unwrap_err()
        .is_not_found());
}

// ============================================================================
// FAILURES AND CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_oracle_failure_aborts_without_partial_results() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let oracle = from_fn(move |tuple: &AccessTuple| {
        counter.fetch_add(1, Ordering::SeqCst);
        if tuple.domain == "org2" {
            Err(GrantError::OracleUnavailable("rule backend offline".to_string()))
        } else {
            Ok(true)
        }
    });

    let enumerator = GrantEnumerator::with_config(
        Arc::new(InMemoryTupleStore::from_snapshot(multi_domain_snapshot())),
        oracle,
        catalog(),
        single_worker(),
    );

    let err = enumerator.enumerate_by_subject("alice").await.unwrap_err();
    assert!(matches!(err, GrantError::OracleUnavailable(msg) if msg.contains("offline")));

    // org1: three wildcard probes; org2: the first failing probe, then nothing
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let metrics = enumerator.get_metrics().await.unwrap();
    assert_eq!(metrics.oracle_failures, 1);
    assert_eq!(metrics.grants_reported, 0);
}

#[tokio::test]
async fn test_store_failure_maps_to_oracle_unavailable() {
    let enumerator = GrantEnumerator::new(
        Arc::new(UnreachableStore),
        from_fn(|_| Ok(true)),
        catalog(),
    );

    let err = enumerator.enumerate_by_subject("alice").await.unwrap_err();
    assert!(matches!(err, GrantError::OracleUnavailable(msg) if msg.contains("connection refused")));

    let err = enumerator
        .enumerate_by_resource("property", "read", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GrantError::OracleUnavailable(_)));
}

#[tokio::test]
async fn test_cancelled_before_start_issues_no_calls() {
    let oracle = Arc::new(RecordingOracle::admitting(&[(
        "alice", "org1", "property", "write", "*",
    )]));
    let enumerator = GrantEnumerator::new(
        Arc::new(InMemoryTupleStore::from_snapshot(multi_domain_snapshot())),
        oracle.clone(),
        catalog(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = enumerator
        .enumerate_by_subject_with_cancel("alice", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GrantError::Cancelled));
    assert!(oracle.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_mid_enumeration_stops_new_calls() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    // The third call cancels the request; it still completes
    let oracle = from_fn(move |_tuple: &AccessTuple| {
        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
            trigger.cancel();
        }
        Ok(true)
    });

    let enumerator = GrantEnumerator::with_config(
        Arc::new(InMemoryTupleStore::from_snapshot(multi_domain_snapshot())),
        oracle,
        ResourceCatalog::default(),
        single_worker(),
    );

    let err = enumerator
        .enumerate_by_resource_with_cancel("property", "write", None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, GrantError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(enumerator.get_metrics().await.unwrap().cancellations, 1);
}

#[tokio::test]
async fn test_cancel_during_last_probe_is_cancelled() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    // One candidate pair; the token fires while its probe is in flight
    let oracle = from_fn(move |_tuple: &AccessTuple| {
        trigger.cancel();
        Ok(true)
    });
    let enumerator = GrantEnumerator::new(
        Arc::new(InMemoryTupleStore::from_snapshot(example_snapshot())),
        oracle,
        ResourceCatalog::default(),
    );

    let err = enumerator
        .enumerate_by_resource_with_cancel("property", "write", None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GrantError::Cancelled));
}

#[tokio::test]
async fn test_cancelled_request_over_empty_space() {
    let oracle = Arc::new(RecordingOracle::default());
    let enumerator = GrantEnumerator::new(
        Arc::new(InMemoryTupleStore::new()),
        oracle.clone(),
        catalog(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = enumerator
        .enumerate_by_subject_with_cancel("alice", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GrantError::Cancelled));
    assert!(oracle.calls().is_empty());
    assert_eq!(enumerator.get_metrics().await.unwrap().cancellations, 1);
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test]
async fn test_concurrency_bound_respected() {
    let mut policies = Vec::new();
    let mut assignments = Vec::new();
    for d in 0..4 {
        policies.push(PolicyRule::new("member", format!("org{}", d), "doc", "read"));
        for u in 0..6 {
            assignments.push(RoleAssignment::new(format!("user{}", u), "member", format!("org{}", d)));
        }
    }

    let oracle = Arc::new(SlowOracle::default());
    let enumerator = GrantEnumerator::with_config(
        Arc::new(InMemoryTupleStore::from_snapshot(Snapshot::new(policies, assignments))),
        oracle.clone(),
        ResourceCatalog::default(),
        EnumeratorConfig {
            max_concurrency: 3,
            enable_metrics: true,
        },
    );

    let view = enumerator
        .enumerate_by_resource("doc", "read", None)
        .await
        .unwrap();

    assert_eq!(view.access_by_domain.len(), 4);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 24);
    assert!(oracle.peak.load(Ordering::SeqCst) <= 3);
    assert!(oracle.peak.load(Ordering::SeqCst) > 1, "probes should overlap");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_decision_functions_overlap() {
    let mut policies = Vec::new();
    let mut assignments = Vec::new();
    for d in 0..4 {
        policies.push(PolicyRule::new("member", format!("org{}", d), "doc", "read"));
        for u in 0..4 {
            assignments.push(RoleAssignment::new(format!("user{}", u), "member", format!("org{}", d)));
        }
    }

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let (tracked, highest, counter) = (in_flight.clone(), peak.clone(), calls.clone());

    // Synchronous and blocking, like a decision function over a blocking client
    let oracle = from_fn(move |_tuple: &AccessTuple| {
        let now = tracked.fetch_add(1, Ordering::SeqCst) + 1;
        highest.fetch_max(now, Ordering::SeqCst);
        counter.fetch_add(1, Ordering::SeqCst);

        std::thread::sleep(Duration::from_millis(20));

        tracked.fetch_sub(1, Ordering::SeqCst);
        Ok(true)
    });

    let enumerator = GrantEnumerator::with_config(
        Arc::new(InMemoryTupleStore::from_snapshot(Snapshot::new(policies, assignments))),
        oracle,
        ResourceCatalog::default(),
        EnumeratorConfig {
            max_concurrency: 4,
            enable_metrics: false,
        },
    );

    let view = enumerator
        .enumerate_by_resource("doc", "read", None)
        .await
        .unwrap();

    assert_eq!(view.access_by_domain.len(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 16);
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(peak.load(Ordering::SeqCst) > 1, "blocking decisions should overlap");
}

#[tokio::test]
async fn test_concurrent_requests_share_nothing() {
    let enumerator = Arc::new(rbac_enumerator(multi_domain_snapshot(), catalog()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let enumerator = enumerator.clone();
        handles.push(tokio::spawn(async move {
            enumerator.enumerate_by_subject("alice").await.unwrap()
        }));
    }

    let results = futures::future::join_all(handles).await;
    let first = results[0].as_ref().unwrap().clone();
    for result in results {
        assert_eq!(result.unwrap(), first);
    }

    let by_resource = {
        let enumerator = enumerator.clone();
        tokio::spawn(async move {
            enumerator
                .enumerate_by_resource("property", "read", Some("p-1"))
                .await
        })
    };
    let view = by_resource.await.unwrap().unwrap();
    assert!(view.users_in("org1").unwrap().contains("bob"));

    let metrics = enumerator.get_metrics().await.unwrap();
    assert_eq!(metrics.by_subject_requests, 8);
    assert_eq!(metrics.by_resource_requests, 1);
    assert_eq!(metrics.grants_reported, 17);
}

// ============================================================================
// METRICS
// ============================================================================

#[tokio::test]
async fn test_short_circuit_metrics() {
    let enumerator = rbac_enumerator(multi_domain_snapshot(), catalog());

    enumerator.enumerate_by_subject("alice").await.unwrap();
    let _ = enumerator.enumerate_by_subject("nobody").await;

    let metrics = enumerator.get_metrics().await.unwrap();
    assert_eq!(metrics.by_subject_requests, 2);
    // alice: property:write in org1 settled by the wildcard
    assert_eq!(metrics.wildcard_short_circuits, 1);
    assert_eq!(metrics.not_found, 1);

    let text = enumerator.export_metrics().await.unwrap();
    assert!(text.contains("grants_wildcard_short_circuits_total 1"));
}
