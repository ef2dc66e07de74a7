//! Sync driver
//!
//! The SyncDriver is responsible for:
//! - Refreshing target IPs of `auto_update` providers via IpSource
//! - Extracting hostnames from active routers
//! - Resolving providers through the registry
//! - Upserting and deleting records, one hostname at a time
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐   SyncTrigger    ┌──────────────┐
//!  │ SyncHandle   │ ───────────────► │              │ ◄── interval tick
//!  └──────────────┘  (bounded queue) │  SyncDriver  │
//!                                    │              │ ──► SyncEvent
//!                                    └──────────────┘
//!                                           │
//!           ┌───────────────────────────────┼──────────────────────┐
//!           ▼                               ▼                      ▼
//!   ┌───────────────┐              ┌─────────────────┐     ┌──────────────┐
//!   │ RouterSource  │              │ ProviderRegistry│     │  IpSource    │
//!   │ (hostnames)   │              │ + ProviderStore │     │ (auto IP)    │
//!   └───────────────┘              └─────────────────┘     └──────────────┘
//! ```
//!
//! ## Failure Isolation
//!
//! A failure for one hostname or provider never aborts the batch. Every
//! failure is logged and emitted as a [`SyncEvent`]; the next cycle retries
//! whatever did not converge. `NotManaged` refusals are reported but never
//! retried within a cycle.

use crate::config::{RouterDns, StoredProvider, SyncConfig};
use crate::error::{Error, Result};
use crate::manager::{DeleteOutcome, UpsertOutcome};
use crate::registry::ProviderRegistry;
use crate::traits::{DnsProvider, IpSource, ProviderStore, RouterSource};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Events emitted by the SyncDriver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Driver loop started
    Started {
        interval_secs: u64,
    },

    /// A full reconciliation cycle finished
    CycleCompleted {
        report: SyncReport,
        completed_at: DateTime<Utc>,
    },

    /// Upsert finished (possibly without writes)
    RecordUpserted {
        provider_id: i64,
        hostname: String,
        outcome: UpsertOutcome,
    },

    /// Delete finished
    RecordDeleted {
        provider_id: i64,
        hostname: String,
        removed: usize,
    },

    /// Upsert or delete failed
    RecordFailed {
        provider_id: i64,
        hostname: String,
        error: String,
        /// Whether the next cycle may succeed without operator action
        retryable: bool,
    },

    /// Delete refused because the ownership marker is missing
    NotManaged {
        provider_id: i64,
        hostname: String,
    },

    /// Provider could not be loaded or constructed
    ProviderFailed {
        provider_id: i64,
        error: String,
    },

    /// Stored target IP replaced by the detected public IP
    IpRefreshed {
        provider_id: i64,
        previous: String,
        current: IpAddr,
    },

    /// Driver loop stopped
    Stopped {
        reason: String,
    },
}

/// Per-batch counters, one unit per (provider, hostname) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Operations that reached the desired state
    pub succeeded: usize,
    /// Operations that errored or timed out
    pub failed: usize,
    /// Operations not attempted (inactive provider) or refused (not managed)
    pub skipped: usize,
}

impl SyncReport {
    /// Add another report's counters to this one
    pub fn merge(&mut self, other: SyncReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    /// Total number of (provider, hostname) pairs considered
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Work submitted to a running driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Reconcile every active router now
    FullSync,

    /// A router was created or edited
    RouterChanged {
        router: RouterDns,
        previous: Option<RouterDns>,
    },

    /// A router was removed
    RouterDeleted {
        router: RouterDns,
    },
}

/// Cloneable submitter for [`SyncTrigger`]s
///
/// Submission never blocks: when the queue is full the trigger is rejected
/// and the periodic cycle is left to converge.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncTrigger>,
}

impl SyncHandle {
    /// Queue a trigger for the driver loop
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Trigger queued
    /// - `Err(Error::Other)`: Queue full or driver gone
    pub fn submit(&self, trigger: SyncTrigger) -> Result<()> {
        match self.tx.try_send(trigger) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(trigger)) => {
                warn!(
                    "Sync trigger queue full, dropping {:?}. The next periodic cycle will converge.",
                    trigger
                );
                Err(Error::Other("Sync trigger queue is full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Other("Sync driver is not running".to_string()))
            }
        }
    }

    /// Request an immediate full reconciliation
    pub fn request_full_sync(&self) -> Result<()> {
        self.submit(SyncTrigger::FullSync)
    }

    /// Notify the driver that a router was created or edited
    pub fn router_changed(&self, router: RouterDns, previous: Option<RouterDns>) -> Result<()> {
        self.submit(SyncTrigger::RouterChanged { router, previous })
    }

    /// Notify the driver that a router was removed
    pub fn router_deleted(&self, router: RouterDns) -> Result<()> {
        self.submit(SyncTrigger::RouterDeleted { router })
    }
}

/// Hostnames to reconcile, grouped by provider id
type Plan = BTreeMap<i64, BTreeSet<String>>;

/// Outcome of loading a provider for a batch
enum Resolved {
    Ready(Arc<dyn DnsProvider>),
    Inactive,
    Failed,
}

/// Public IP detected once per batch
#[derive(Default)]
struct DetectedIp {
    value: Option<Option<IpAddr>>,
}

/// Periodic and trigger-driven DNS reconciliation
///
/// ## Lifecycle
///
/// 1. Create with [`SyncDriver::new()`]
/// 2. Start with [`SyncDriver::run()`]
/// 3. Submit work through the returned [`SyncHandle`]
/// 4. Driver runs until a shutdown signal is received
///
/// The batch operations (`sync_all`, `sync_router`, `remove_router`,
/// `router_changed`) can also be called directly without the loop.
pub struct SyncDriver {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn ProviderStore>,
    routers: Arc<dyn RouterSource>,
    ip_source: Option<Arc<dyn IpSource>>,
    interval: Duration,
    operation_timeout: Duration,
    trigger_tx: mpsc::Sender<SyncTrigger>,
    trigger_rx: Mutex<mpsc::Receiver<SyncTrigger>>,
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncDriver {
    /// Create a new sync driver
    ///
    /// # Parameters
    ///
    /// - `registry`: Provider factories
    /// - `store`: Provider configuration rows
    /// - `routers`: Active routing rules
    /// - `ip_source`: Public IP detection for `auto_update` providers
    /// - `config`: Driver settings
    ///
    /// # Returns
    ///
    /// A tuple of (driver, trigger handle, event receiver)
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn ProviderStore>,
        routers: Arc<dyn RouterSource>,
        ip_source: Option<Arc<dyn IpSource>>,
        config: SyncConfig,
    ) -> Result<(Self, SyncHandle, mpsc::Receiver<SyncEvent>)> {
        config.validate()?;

        let (trigger_tx, trigger_rx) = mpsc::channel(config.trigger_channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        let driver = Self {
            registry,
            store,
            routers,
            ip_source,
            interval: Duration::from_secs(config.interval_secs),
            operation_timeout: Duration::from_secs(config.operation_timeout_secs),
            trigger_tx: trigger_tx.clone(),
            trigger_rx: Mutex::new(trigger_rx),
            event_tx,
        };

        Ok((driver, SyncHandle { tx: trigger_tx }, event_rx))
    }

    /// Another submitter for this driver's trigger queue
    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Run the driver until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the driver until `shutdown_rx` fires or its sender is dropped
    pub async fn run_with_shutdown(&self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        self.run_internal(Some(shutdown_rx)).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let mut triggers = self
            .trigger_rx
            .try_lock()
            .map_err(|_| Error::Other("Sync driver is already running".to_string()))?;

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Sync driver started (interval: {}s)", self.interval.as_secs());
        self.emit_event(SyncEvent::Started {
            interval_secs: self.interval.as_secs(),
        });

        loop {
            let work = tokio::select! {
                biased;

                _ = &mut shutdown => break,

                Some(trigger) = triggers.recv() => Some(trigger),

                _ = ticker.tick() => None,
            };

            // In-flight requests are dropped if shutdown arrives mid-batch
            let interrupted = tokio::select! {
                _ = self.handle_work(work) => false,
                _ = &mut shutdown => true,
            };
            if interrupted {
                info!("Shutdown signal received during reconciliation, abandoning batch");
                break;
            }
        }

        info!("Shutdown signal received, sync driver stopped");
        self.emit_event(SyncEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        Ok(())
    }

    /// Dispatch a queued trigger, or run the periodic cycle for `None`
    async fn handle_work(&self, work: Option<SyncTrigger>) {
        let result = match work {
            None | Some(SyncTrigger::FullSync) => self.sync_all().await.map(|_| ()),
            Some(SyncTrigger::RouterChanged { router, previous }) => self
                .router_changed(&router, previous.as_ref())
                .await
                .map(|_| ()),
            Some(SyncTrigger::RouterDeleted { router }) => {
                self.remove_router(&router).await.map(|_| ())
            }
        };

        if let Err(e) = result {
            error!("Reconciliation failed: {}", e);
        }
    }

    /// Reconcile every hostname of every active router
    ///
    /// # Returns
    ///
    /// - `Ok(SyncReport)`: Counters for the batch
    /// - `Err(Error)`: The router source could not be read
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let routers = self.routers.active_routers().await?;

        let mut plan = Plan::new();
        for router in &routers {
            add_router(&mut plan, router);
        }

        debug!(
            "Full sync: {} router(s), {} provider(s)",
            routers.len(),
            plan.len()
        );

        let report = self.apply_upserts(plan).await;

        info!(
            "Sync cycle completed: {} succeeded, {} failed, {} skipped",
            report.succeeded, report.failed, report.skipped
        );
        self.emit_event(SyncEvent::CycleCompleted {
            report,
            completed_at: Utc::now(),
        });
        Ok(report)
    }

    /// Reconcile the hostnames of one router
    pub async fn sync_router(&self, router: &RouterDns) -> Result<SyncReport> {
        if !router.enabled {
            debug!("Router {} is disabled, skipping", router.name);
            return Ok(SyncReport::default());
        }

        let mut plan = Plan::new();
        add_router(&mut plan, router);
        Ok(self.apply_upserts(plan).await)
    }

    /// Delete records of a removed router
    ///
    /// Hostnames still referenced by another active router on the same
    /// provider are left alone.
    pub async fn remove_router(&self, router: &RouterDns) -> Result<SyncReport> {
        let still_referenced = self.referenced_elsewhere(&[router.name.as_str()]).await?;

        let mut plan = Plan::new();
        add_router(&mut plan, router);
        subtract(&mut plan, &still_referenced);

        Ok(self.apply_deletes(plan).await)
    }

    /// Reconcile an edited router
    ///
    /// Upserts the router's current hostnames, then deletes hostnames that
    /// only `previous` published and no other active router still needs.
    pub async fn router_changed(
        &self,
        router: &RouterDns,
        previous: Option<&RouterDns>,
    ) -> Result<SyncReport> {
        let mut report = self.sync_router(router).await?;

        let Some(previous) = previous else {
            return Ok(report);
        };

        let mut keep = self
            .referenced_elsewhere(&[router.name.as_str(), previous.name.as_str()])
            .await?;
        if router.enabled {
            add_router(&mut keep, router);
        }

        let mut stale = Plan::new();
        add_router(&mut stale, previous);
        subtract(&mut stale, &keep);

        if !stale.is_empty() {
            debug!(
                "Router {} dropped {} hostname binding(s)",
                router.name,
                stale.values().map(BTreeSet::len).sum::<usize>()
            );
            report.merge(self.apply_deletes(stale).await);
        }

        Ok(report)
    }

    /// Hostnames published by active routers other than `excluded`
    async fn referenced_elsewhere(&self, excluded: &[&str]) -> Result<Plan> {
        let mut plan = Plan::new();
        for other in self.routers.active_routers().await? {
            if !excluded.contains(&other.name.as_str()) {
                add_router(&mut plan, &other);
            }
        }
        Ok(plan)
    }

    async fn apply_upserts(&self, plan: Plan) -> SyncReport {
        let mut report = SyncReport::default();
        let mut detected = DetectedIp::default();

        for (provider_id, hostnames) in plan {
            let provider = match self.resolve(provider_id, &mut detected).await {
                Resolved::Ready(provider) => provider,
                Resolved::Inactive => {
                    report.skipped += hostnames.len();
                    continue;
                }
                Resolved::Failed => {
                    report.failed += hostnames.len();
                    continue;
                }
            };

            for hostname in hostnames {
                let result = self
                    .bounded("upsert", &hostname, provider.upsert_record(&hostname))
                    .await;
                match result {
                    Ok(outcome) => {
                        if outcome.is_noop() {
                            debug!("{} already up to date on provider {}", hostname, provider_id);
                        } else {
                            info!(
                                "Upserted {} on {} provider {} ({:?})",
                                hostname,
                                provider.provider_name(),
                                provider_id,
                                outcome.address
                            );
                        }
                        report.succeeded += 1;
                        self.emit_event(SyncEvent::RecordUpserted {
                            provider_id,
                            hostname,
                            outcome,
                        });
                    }
                    Err(e) => {
                        report.failed += 1;
                        self.record_failed(provider_id, hostname, "upsert", e);
                    }
                }
            }
        }

        report
    }

    async fn apply_deletes(&self, plan: Plan) -> SyncReport {
        let mut report = SyncReport::default();
        let mut detected = DetectedIp::default();

        for (provider_id, hostnames) in plan {
            let provider = match self.resolve(provider_id, &mut detected).await {
                Resolved::Ready(provider) => provider,
                Resolved::Inactive => {
                    report.skipped += hostnames.len();
                    continue;
                }
                Resolved::Failed => {
                    report.failed += hostnames.len();
                    continue;
                }
            };

            for hostname in hostnames {
                let result = self
                    .bounded("delete", &hostname, provider.delete_record(&hostname))
                    .await;
                match result {
                    Ok(outcome) => {
                        let removed = match outcome {
                            DeleteOutcome::NothingToDelete => 0,
                            DeleteOutcome::Deleted { records } => records.len(),
                        };
                        info!(
                            "Deleted {} record(s) for {} on provider {}",
                            removed, hostname, provider_id
                        );
                        report.succeeded += 1;
                        self.emit_event(SyncEvent::RecordDeleted {
                            provider_id,
                            hostname,
                            removed,
                        });
                    }
                    Err(Error::NotManaged(_)) => {
                        warn!(
                            "Not deleting {} on provider {}: records exist without the ownership marker",
                            hostname, provider_id
                        );
                        report.skipped += 1;
                        self.emit_event(SyncEvent::NotManaged {
                            provider_id,
                            hostname,
                        });
                    }
                    Err(e) => {
                        report.failed += 1;
                        self.record_failed(provider_id, hostname, "delete", e);
                    }
                }
            }
        }

        report
    }

    /// Log and report a failed upsert or delete
    ///
    /// Transient failures are left to the next cycle and logged at warn.
    fn record_failed(&self, provider_id: i64, hostname: String, operation: &str, e: Error) {
        let retryable = e.is_retryable();
        if retryable {
            warn!(
                "Failed to {} {} on provider {}, retrying next cycle: {}",
                operation, hostname, provider_id, e
            );
        } else {
            error!(
                "Failed to {} {} on provider {}: {}",
                operation, hostname, provider_id, e
            );
        }
        self.emit_event(SyncEvent::RecordFailed {
            provider_id,
            hostname,
            error: e.to_string(),
            retryable,
        });
    }

    /// Load a provider row, refresh its IP if needed, and build the adapter
    async fn resolve(&self, provider_id: i64, detected: &mut DetectedIp) -> Resolved {
        let mut stored = match self.store.get_provider(provider_id).await {
            Ok(stored) => stored,
            Err(e) => return self.provider_failed(provider_id, e),
        };

        if !stored.is_active {
            debug!("Provider {} ({}) is inactive, skipping", stored.id, stored.name);
            return Resolved::Inactive;
        }

        if stored.config.auto_update {
            self.refresh_ip(&mut stored, detected).await;
        }

        match self.registry.create_provider(&stored) {
            Ok(provider) => Resolved::Ready(Arc::from(provider)),
            Err(e) => self.provider_failed(provider_id, e),
        }
    }

    fn provider_failed(&self, provider_id: i64, e: Error) -> Resolved {
        error!("Provider {} unavailable: {}", provider_id, e);
        self.emit_event(SyncEvent::ProviderFailed {
            provider_id,
            error: e.to_string(),
        });
        Resolved::Failed
    }

    /// Replace the stored target IP with the detected one when they differ
    ///
    /// Detection failures keep the stored IP.
    async fn refresh_ip(&self, stored: &mut StoredProvider, detected: &mut DetectedIp) {
        let Some(ip_source) = &self.ip_source else {
            return;
        };

        let current = match detected.value {
            Some(value) => value,
            None => {
                let value = match ip_source.current().await {
                    Ok(ip) => Some(ip),
                    Err(e) => {
                        warn!(
                            "Public IP detection via {} failed, keeping stored IPs: {}",
                            ip_source.source_name(),
                            e
                        );
                        None
                    }
                };
                detected.value = Some(value);
                value
            }
        };

        let Some(current) = current else {
            return;
        };

        let unchanged = stored
            .config
            .ip
            .trim()
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip == current);
        if unchanged {
            return;
        }

        let previous = std::mem::replace(&mut stored.config.ip, current.to_string());
        match self
            .store
            .update_provider_ip(stored.id, &stored.config.ip)
            .await
        {
            Ok(()) => {
                info!(
                    "Provider {} target IP changed: {} -> {}",
                    stored.id, previous, current
                );
                self.emit_event(SyncEvent::IpRefreshed {
                    provider_id: stored.id,
                    previous,
                    current,
                });
            }
            // The detected IP is still used for this batch
            Err(e) => warn!("Failed to persist IP for provider {}: {}", stored.id, e),
        }
    }

    /// Bound a provider operation by the configured timeout
    async fn bounded<T>(
        &self,
        operation: &str,
        hostname: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} of {} exceeded {}s",
                operation,
                hostname,
                self.operation_timeout.as_secs()
            ))),
        }
    }

    /// Emit a sync event
    fn emit_event(&self, event: SyncEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!(
                "Event channel full, dropping event. Consider increasing event_channel_capacity."
            );
        }
    }
}

fn add_router(plan: &mut Plan, router: &RouterDns) {
    let hostnames = router.hostnames();
    if hostnames.is_empty() {
        return;
    }
    for provider_id in &router.provider_ids {
        plan.entry(*provider_id)
            .or_default()
            .extend(hostnames.iter().cloned());
    }
}

fn subtract(plan: &mut Plan, keep: &Plan) {
    for (provider_id, hostnames) in plan.iter_mut() {
        if let Some(kept) = keep.get(provider_id) {
            hostnames.retain(|h| !kept.contains(h));
        }
    }
    plan.retain(|_, hostnames| !hostnames.is_empty());
}
