//! Grant enumeration engine
//!
//! Computes complete grant sets from a pointwise decision oracle. Each request
//! reads one tuple snapshot, derives its candidate space, and fans oracle
//! probes out with bounded concurrency.
//!
//! ```text
//! Query → TupleStore::snapshot → CandidateSpace → probes (≤ max_concurrency) → grants → view
//!                                                    ↓
//!                                            DecisionOracle::admits
//! ```

pub mod metrics;

pub use metrics::{EngineMetrics, MetricsCollector};

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::candidate::{CandidateSpace, ResourceCatalog};
use crate::error::{GrantError, Result};
use crate::oracle::DecisionOracle;
use crate::store::TupleStore;
use crate::types::{AccessTuple, Grant, GrantQuery, WILDCARD};
use crate::view::{AccessByDomain, AccessList};

/// Enumerator configuration
#[derive(Debug, Clone)]
pub struct EnumeratorConfig {
    /// Maximum oracle probes in flight per request
    pub max_concurrency: usize,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get().max(1),
            enable_metrics: true,
        }
    }
}

/// Grant enumerator - drives candidate space construction and oracle probing
pub struct GrantEnumerator {
    /// Source of policy and role-assignment tuples
    store: Arc<dyn TupleStore>,

    /// Pointwise admit/deny decisions
    oracle: Arc<dyn DecisionOracle>,

    /// (resource type, action) pairs probed in by-subject mode
    catalog: ResourceCatalog,

    metrics: Option<Arc<MetricsCollector>>,

    config: EnumeratorConfig,
}

impl GrantEnumerator {
    /// Create an enumerator with the default configuration
    pub fn new(
        store: Arc<dyn TupleStore>,
        oracle: Arc<dyn DecisionOracle>,
        catalog: ResourceCatalog,
    ) -> Self {
        Self::with_config(store, oracle, catalog, EnumeratorConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn TupleStore>,
        oracle: Arc<dyn DecisionOracle>,
        catalog: ResourceCatalog,
        config: EnumeratorConfig,
    ) -> Self {
        let metrics = if config.enable_metrics {
            Some(Arc::new(MetricsCollector::new()))
        } else {
            None
        };

        info!(
            "GrantEnumerator initialized with catalog={} entries, max_concurrency={}, metrics={}",
            catalog.len(),
            config.max_concurrency,
            config.enable_metrics
        );

        Self {
            store,
            oracle,
            catalog,
            metrics,
            config,
        }
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    /// Everything `user` can do, and where
    pub async fn enumerate_by_subject(&self, user: &str) -> Result<AccessList> {
        self.enumerate_by_subject_with_cancel(user, &CancellationToken::new())
            .await
    }

    pub async fn enumerate_by_subject_with_cancel(
        &self,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessList> {
        let grants = self
            .enumerate_with_cancel(&GrantQuery::by_subject(user), cancel)
            .await?;
        AccessList::from_grants(user, grants)
    }

    /// Everyone who can perform `action` on a resource, per domain
    ///
    /// `resource_id` defaults to `"*"`, asking about the whole resource type.
    pub async fn enumerate_by_resource(
        &self,
        resource_type: &str,
        action: &str,
        resource_id: Option<&str>,
    ) -> Result<AccessByDomain> {
        self.enumerate_by_resource_with_cancel(
            resource_type,
            action,
            resource_id,
            &CancellationToken::new(),
        )
        .await
    }

    pub async fn enumerate_by_resource_with_cancel(
        &self,
        resource_type: &str,
        action: &str,
        resource_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AccessByDomain> {
        let resource_id = resource_id.unwrap_or(WILDCARD);
        let query = GrantQuery::by_resource(resource_type, action, Some(resource_id.to_string()));

        let grants = self.enumerate_with_cancel(&query, cancel).await?;
        AccessByDomain::from_grants(resource_type, action, resource_id, grants)
    }

    /// Raw grant set for a query, in enumeration order
    ///
    /// An empty result is returned as-is; the views decide whether it is an error.
    pub async fn enumerate(&self, query: &GrantQuery) -> Result<Vec<Grant>> {
        self.enumerate_with_cancel(query, &CancellationToken::new())
            .await
    }

    /// Raw grant set for a query, stopping early once `cancel` fires
    pub async fn enumerate_with_cancel(
        &self,
        query: &GrantQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Grant>> {
        let start = Instant::now();
        validate(query)?;

        let by_subject = matches!(query, GrantQuery::BySubject { .. });
        if let Some(metrics) = &self.metrics {
            metrics.record_request(by_subject).await;
        }

        let run = Enumeration::new(
            self.oracle.clone(),
            cancel,
            self.config.max_concurrency,
        );

        let outcome = match self.store.snapshot().await {
            Ok(snapshot) => {
                let space = CandidateSpace::build(&snapshot);
                debug!(
                    "Candidate space: {} domains, {} subjects, {} catalog entries",
                    space.domain_count(),
                    space.subject_count(),
                    self.catalog.len()
                );

                match query {
                    GrantQuery::BySubject { user } => {
                        run.by_subject(user, &space, &self.catalog).await
                    }
                    GrantQuery::ByResource {
                        resource_type,
                        action,
                        resource_id,
                    } => {
                        run.by_resource(resource_type, action, resource_id, &space)
                            .await
                    }
                }
            }
            Err(e) => {
                warn!("Tuple store read failed: {}", e);
                Err(GrantError::from(e))
            }
        };

        self.finalize(query, &run, outcome, start).await
    }

    /// Get engine metrics
    pub async fn get_metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Metrics in Prometheus text format
    pub async fn export_metrics(&self) -> Option<String> {
        match &self.metrics {
            Some(metrics) => Some(metrics.export_prometheus().await),
            None => None,
        }
    }

    async fn finalize(
        &self,
        query: &GrantQuery,
        run: &Enumeration,
        outcome: Result<Vec<Grant>>,
        start: Instant,
    ) -> Result<Vec<Grant>> {
        let latency = start.elapsed();
        let calls = run.calls();
        let short_circuits = run.short_circuits();

        if let Some(metrics) = &self.metrics {
            metrics.record_probes(calls, short_circuits).await;
            metrics.record_latency(latency).await;

            match &outcome {
                Ok(grants) => metrics.record_grants(grants.len()).await,
                Err(GrantError::Cancelled) => metrics.record_cancellation().await,
                Err(_) => metrics.record_oracle_failure().await,
            }
        }

        match &outcome {
            Ok(grants) => info!(
                "Enumerated {:?}: {} grants, {} oracle calls, {} wildcard short-circuits in {:?}",
                query,
                grants.len(),
                calls,
                short_circuits,
                latency
            ),
            Err(e) => warn!(
                "Enumeration {:?} aborted after {} oracle calls: {}",
                query, calls, e
            ),
        }

        outcome
    }
}

fn validate(query: &GrantQuery) -> Result<()> {
    let fields = match query {
        GrantQuery::BySubject { user } => vec![("user", user.as_str())],
        GrantQuery::ByResource {
            resource_type,
            action,
            resource_id,
        } => vec![
            ("resource_type", resource_type.as_str()),
            ("action", action.as_str()),
            ("resource_id", resource_id.as_str()),
        ],
    };

    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(GrantError::InvalidInput(format!("{} must not be empty", name)));
        }
    }
    Ok(())
}

/// Probe side of one enumeration request, shared by its tasks
///
/// `abort` is a child of the caller's token: it fires on caller cancellation
/// and on the first oracle failure. Probes check it before calling the
/// oracle, so probes already in flight finish and no new calls are issued.
#[derive(Clone)]
struct Prober {
    oracle: Arc<dyn DecisionOracle>,
    abort: CancellationToken,
    calls: Arc<AtomicU64>,
    short_circuits: Arc<AtomicU64>,
}

impl Prober {
    async fn probe(&self, tuple: &AccessTuple) -> Result<bool> {
        if self.abort.is_cancelled() {
            return Err(GrantError::Cancelled);
        }

        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.oracle.admits(tuple).await {
            Ok(admitted) => Ok(admitted),
            Err(e) => {
                warn!("Oracle failed on {}: {}", tuple, e);
                self.abort.cancel();
                Err(e)
            }
        }
    }

    /// Wildcard first; concrete ids only when the wildcard is denied
    async fn probe_unit(&self, unit: SubjectUnit) -> Result<Vec<Grant>> {
        if self.probe(&unit.wildcard).await? {
            self.short_circuits.fetch_add(1, Ordering::Relaxed);
            return Ok(vec![Grant::from(unit.wildcard)]);
        }

        let mut grants = Vec::new();
        for tuple in unit.concrete {
            if self.probe(&tuple).await? {
                grants.push(Grant::from(tuple));
            }
        }

        Ok(grants)
    }
}

/// One (domain, resource type, action) triple of a by-subject request
struct SubjectUnit {
    wildcard: AccessTuple,
    concrete: Vec<AccessTuple>,
}

/// One enumeration request: owned work units fanned out as tasks, at most
/// `max_concurrency` at a time, results reassembled in unit order
struct Enumeration {
    prober: Prober,
    max_concurrency: usize,
}

impl Enumeration {
    fn new(
        oracle: Arc<dyn DecisionOracle>,
        cancel: &CancellationToken,
        max_concurrency: usize,
    ) -> Self {
        Self {
            prober: Prober {
                oracle,
                abort: cancel.child_token(),
                calls: Arc::new(AtomicU64::new(0)),
                short_circuits: Arc::new(AtomicU64::new(0)),
            },
            max_concurrency: max_concurrency.max(1),
        }
    }

    fn calls(&self) -> u64 {
        self.prober.calls.load(Ordering::Relaxed)
    }

    fn short_circuits(&self) -> u64 {
        self.prober.short_circuits.load(Ordering::Relaxed)
    }

    /// Domain → catalog entry → resource id, wildcard first
    async fn by_subject(
        &self,
        user: &str,
        space: &CandidateSpace,
        catalog: &ResourceCatalog,
    ) -> Result<Vec<Grant>> {
        let mut units = Vec::new();
        for domain in space.domains() {
            for (resource_type, action) in catalog.iter() {
                units.push(SubjectUnit {
                    wildcard: AccessTuple::new(user, domain, resource_type, action, WILDCARD),
                    concrete: space
                        .resource_ids_for(resource_type)
                        .map(|id| AccessTuple::new(user, domain, resource_type, action, id))
                        .collect(),
                });
            }
        }

        let grants = self
            .fan_out(units, |prober, unit| async move { prober.probe_unit(unit).await })
            .await?;

        Ok(grants.into_iter().flatten().collect())
    }

    /// Domain → subject
    async fn by_resource(
        &self,
        resource_type: &str,
        action: &str,
        resource_id: &str,
        space: &CandidateSpace,
    ) -> Result<Vec<Grant>> {
        let mut units = Vec::new();
        for domain in space.domains() {
            for user in space.subjects() {
                units.push(AccessTuple::new(user, domain, resource_type, action, resource_id));
            }
        }

        let grants = self
            .fan_out(units, |prober, tuple| async move {
                let admitted = prober.probe(&tuple).await?;
                Ok::<_, GrantError>(admitted.then(|| Grant::from(tuple)))
            })
            .await?;

        Ok(grants.into_iter().flatten().collect())
    }

    /// Run `work` over every unit on spawned tasks, bounded by a semaphore
    ///
    /// No new unit is started once `abort` fires. Units never started count
    /// as cancelled.
    async fn fan_out<U, T, F, Fut>(&self, units: Vec<U>, work: F) -> Result<Vec<T>>
    where
        U: Send + 'static,
        T: Send + 'static,
        F: Fn(Prober, U) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut slots: Vec<Option<Result<T>>> = Vec::with_capacity(units.len());
        slots.resize_with(units.len(), || None);

        let mut tasks = JoinSet::new();
        for (index, unit) in units.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.prober.abort.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let task = work(self.prober.clone(), unit);
            tasks.spawn(async move {
                let _permit = permit;
                (index, task.await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    self.prober.abort.cancel();
                    return Err(GrantError::OracleUnavailable(format!(
                        "probe task failed: {}",
                        e
                    )));
                }
            }
        }

        let settled = settle(
            slots
                .into_iter()
                .map(|slot| slot.unwrap_or(Err(GrantError::Cancelled)))
                .collect(),
        )?;

        // The caller may cancel while the last probes are in flight
        if self.prober.abort.is_cancelled() {
            return Err(GrantError::Cancelled);
        }
        Ok(settled)
    }
}

/// Fold per-unit outcomes: any real failure wins over cancellation, and any
/// failure or cancellation discards every partial result.
fn settle<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut cancelled = false;
    let mut settled = Vec::with_capacity(results.len());

    for result in results {
        match result {
            Ok(value) => settled.push(value),
            Err(GrantError::Cancelled) => cancelled = true,
            Err(e) => return Err(e),
        }
    }

    if cancelled {
        return Err(GrantError::Cancelled);
    }
    Ok(settled)
}
