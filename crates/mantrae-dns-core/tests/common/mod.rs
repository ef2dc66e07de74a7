//! Test doubles and common utilities for sync driver contract tests
//!
//! The fake backend applies the real RecordManager decisions to an
//! in-memory record set, so tests observe the same writes an adapter
//! would issue.

#![allow(dead_code)]

use async_trait::async_trait;
use mantrae_dns_core::config::{ProviderConfig, RouterDns, StoredProvider, SyncConfig};
use mantrae_dns_core::error::{Error, Result};
use mantrae_dns_core::manager::{
    DeleteOperations, DeleteOutcome, RecordManager, RecordOperations, UpsertOutcome,
};
use mantrae_dns_core::record::{DnsRecord, MARKER_CONTENT, RecordType};
use mantrae_dns_core::store::MemoryConfigStore;
use mantrae_dns_core::sync::{SyncDriver, SyncEvent, SyncHandle};
use mantrae_dns_core::traits::{DnsProvider, DnsProviderFactory, IpSource};
use mantrae_dns_core::ProviderRegistry;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Shared in-memory DNS backend
#[derive(Clone, Default)]
pub struct FakeBackend {
    records: Arc<Mutex<Vec<DnsRecord>>>,
    writes: Arc<AtomicUsize>,
    next_id: Arc<AtomicUsize>,
    failing: Arc<Mutex<HashSet<String>>>,
    rejecting: Arc<Mutex<HashSet<String>>>,
    hanging: Arc<Mutex<HashSet<String>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed records created outside mantrae
    pub fn seed(&self, records: Vec<DnsRecord>) {
        self.records.lock().unwrap().extend(records);
    }

    pub fn records(&self) -> Vec<DnsRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Records named exactly `name`
    pub fn named(&self, name: &str) -> Vec<DnsRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.has_name(name))
            .collect()
    }

    /// Number of create/update/delete calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every operation on `hostname` fail
    pub fn fail_on(&self, hostname: &str) {
        self.failing.lock().unwrap().insert(hostname.to_string());
    }

    /// Make every operation on `hostname` fail with an authentication error
    pub fn reject_on(&self, hostname: &str) {
        self.rejecting.lock().unwrap().insert(hostname.to_string());
    }

    /// Make every operation on `hostname` never complete
    pub fn hang_on(&self, hostname: &str) {
        self.hanging.lock().unwrap().insert(hostname.to_string());
    }

    fn next_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    async fn gate(&self, hostname: &str) -> Result<()> {
        let hangs = self.hanging.lock().unwrap().contains(hostname);
        if hangs {
            std::future::pending::<()>().await;
        }
        let fails = self.failing.lock().unwrap().contains(hostname);
        if fails {
            return Err(Error::provider("fake", "upsert", "injected failure"));
        }
        let rejects = self.rejecting.lock().unwrap().contains(hostname);
        if rejects {
            return Err(Error::auth("token revoked"));
        }
        Ok(())
    }
}

/// A DnsProvider over a FakeBackend
pub struct FakeProvider {
    backend: FakeBackend,
    target_ip: String,
}

struct FakeOps<'a> {
    backend: &'a FakeBackend,
    manager: &'a RecordManager,
}

#[async_trait]
impl RecordOperations for FakeOps<'_> {
    async fn create_record(&self, record_type: RecordType) -> Result<()> {
        self.backend.writes.fetch_add(1, Ordering::SeqCst);
        let record = DnsRecord::new(
            self.backend.next_id(),
            self.manager.subdomain(),
            record_type,
            self.manager.content(),
        );
        self.backend.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn update_record(&self, existing: &DnsRecord, _record_type: RecordType) -> Result<()> {
        self.backend.writes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.backend.records.lock().unwrap();
        for record in records.iter_mut().filter(|r| r.id == existing.id) {
            record.content = self.manager.content();
        }
        Ok(())
    }

    async fn create_marker(&self) -> Result<()> {
        self.backend.writes.fetch_add(1, Ordering::SeqCst);
        let record = DnsRecord::new(
            self.backend.next_id(),
            self.manager.marker_name(),
            RecordType::Txt,
            MARKER_CONTENT,
        );
        self.backend.records.lock().unwrap().push(record);
        Ok(())
    }
}

#[async_trait]
impl DeleteOperations for FakeOps<'_> {
    async fn delete_record(&self, record: &DnsRecord) -> Result<()> {
        self.backend.writes.fetch_add(1, Ordering::SeqCst);
        self.backend
            .records
            .lock()
            .unwrap()
            .retain(|r| r.id != record.id);
        Ok(())
    }
}

#[async_trait]
impl DnsProvider for FakeProvider {
    async fn list_records(&self, subdomain: &str) -> Result<Vec<DnsRecord>> {
        let marker = format!("_mantrae-{}", subdomain);
        Ok(self
            .backend
            .records()
            .into_iter()
            .filter(|r| r.has_name(subdomain) || r.has_name(&marker))
            .collect())
    }

    async fn upsert_record(&self, subdomain: &str) -> Result<UpsertOutcome> {
        self.backend.gate(subdomain).await?;
        let manager = RecordManager::new(subdomain, &self.target_ip)?;
        let existing = self.list_records(subdomain).await?;
        let ops = FakeOps {
            backend: &self.backend,
            manager: &manager,
        };
        manager.execute_upsert(&existing, &ops).await
    }

    async fn delete_record(&self, subdomain: &str) -> Result<DeleteOutcome> {
        self.backend.gate(subdomain).await?;
        let manager = RecordManager::new(subdomain, &self.target_ip)?;
        let existing = self.list_records(subdomain).await?;
        let ops = FakeOps {
            backend: &self.backend,
            manager: &manager,
        };
        manager.execute_delete(&existing, &ops).await
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// Factory handing every provider the same backend
pub struct FakeFactory {
    backend: FakeBackend,
    created: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn new(backend: FakeBackend) -> Self {
        Self {
            backend,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl DnsProviderFactory for FakeFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        config.validate(false)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProvider {
            backend: self.backend.clone(),
            target_ip: config.ip.clone(),
        }))
    }
}

/// An IpSource returning a fixed address
pub struct FixedIpSource {
    ip: IpAddr,
    calls: Arc<AtomicUsize>,
}

impl FixedIpSource {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl IpSource for FixedIpSource {
    async fn current(&self) -> Result<IpAddr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ip)
    }

    fn source_name(&self) -> &'static str {
        "fixed"
    }
}

/// An IpSource that always fails
pub struct FailingIpSource;

#[async_trait]
impl IpSource for FailingIpSource {
    async fn current(&self) -> Result<IpAddr> {
        Err(Error::http("detector unreachable"))
    }

    fn source_name(&self) -> &'static str {
        "failing"
    }
}

/// Provider row of type "fake"
pub fn fake_provider(id: i64, ip: &str) -> StoredProvider {
    StoredProvider {
        id,
        name: format!("fake-{}", id),
        provider_type: "fake".to_string(),
        config: ProviderConfig {
            api_key: "token".to_string(),
            ip: ip.to_string(),
            ..Default::default()
        },
        is_active: true,
    }
}

/// Router publishing `hosts` to `provider_ids`
pub fn router(name: &str, hosts: &[&str], provider_ids: Vec<i64>) -> RouterDns {
    let args: Vec<String> = hosts.iter().map(|h| format!("`{}`", h)).collect();
    RouterDns::new(name, format!("Host({})", args.join(", ")), provider_ids)
}

/// Driver settings with a short per-operation timeout
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        interval_secs: 3600,
        operation_timeout_secs: 1,
        trigger_channel_capacity: 4,
        event_channel_capacity: 256,
    }
}

/// Everything a contract test needs
pub struct Harness {
    pub driver: SyncDriver,
    pub handle: SyncHandle,
    pub events: mpsc::Receiver<SyncEvent>,
    pub store: MemoryConfigStore,
    pub backend: FakeBackend,
}

impl Harness {
    /// Drain the events emitted so far
    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Build a driver over a fake backend registered as "fake"
pub fn harness(
    providers: Vec<StoredProvider>,
    routers: Vec<RouterDns>,
    ip_source: Option<Arc<dyn IpSource>>,
) -> Harness {
    harness_with_config(providers, routers, ip_source, fast_config())
}

pub fn harness_with_config(
    providers: Vec<StoredProvider>,
    routers: Vec<RouterDns>,
    ip_source: Option<Arc<dyn IpSource>>,
    config: SyncConfig,
) -> Harness {
    let backend = FakeBackend::new();
    let registry = ProviderRegistry::new();
    registry.register_provider("fake", Box::new(FakeFactory::new(backend.clone())));

    let store = MemoryConfigStore::new(providers, routers);
    let (driver, handle, events) = SyncDriver::new(
        Arc::new(registry),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        ip_source,
        config,
    )
    .expect("driver construction succeeds");

    Harness {
        driver,
        handle,
        events,
        store,
        backend,
    }
}
