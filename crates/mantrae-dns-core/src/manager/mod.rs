//! Reconciliation decisions shared by every provider adapter
//!
//! The record manager never performs I/O. Adapters list the current record
//! set, hand it to the manager together with their backend primitives, and
//! the manager decides which primitives run.
//!
//! ## Upsert
//!
//! ```text
//! existing records ──► partition ──► address of desired type?
//!                                     ├─ none            → create_record(type)
//!                                     ├─ content differs → update_record(existing, type)
//!                                     └─ content matches → (no write)
//!                                    marker present?
//!                                     └─ no              → create_marker()
//! ```
//!
//! Running an upsert twice with unchanged inputs issues no writes on the
//! second run.
//!
//! ## Delete
//!
//! A subdomain is only deleted when its record set carries the ownership
//! marker. Address records go first, the marker last, so an interrupted
//! delete stays deletable.

use crate::error::{Error, Result};
use crate::record::{self, DnsRecord, MARKER_CONTENT, RecordType};
use async_trait::async_trait;
use std::net::IpAddr;
use tracing::debug;

/// Backend primitives an upsert may invoke
#[async_trait]
pub trait RecordOperations: Send + Sync {
    /// Create an address record for the subdomain pointing at the target IP
    async fn create_record(&self, record_type: RecordType) -> Result<()>;

    /// Point an existing address record at the target IP
    ///
    /// The whole record is passed because some backends address records by
    /// their current content rather than an id.
    async fn update_record(&self, existing: &DnsRecord, record_type: RecordType) -> Result<()>;

    /// Create the ownership marker TXT record
    async fn create_marker(&self) -> Result<()>;
}

/// Backend primitive a delete invokes once per record
#[async_trait]
pub trait DeleteOperations: Send + Sync {
    /// Remove exactly this record
    async fn delete_record(&self, record: &DnsRecord) -> Result<()>;
}

/// What happened to the address record during an upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressAction {
    /// No record of the desired type existed
    Created,
    /// A record of the desired type pointed elsewhere
    Updated {
        /// Content before the update
        previous: String,
    },
    /// The record already pointed at the target
    Unchanged,
}

/// Result of an upsert decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Address record action
    pub address: AddressAction,
    /// Whether the ownership marker had to be created
    pub marker_created: bool,
}

impl UpsertOutcome {
    /// Number of provider writes the upsert issued
    pub fn writes(&self) -> usize {
        let address = usize::from(self.address != AddressAction::Unchanged);
        address + usize::from(self.marker_created)
    }

    /// True when the provider already matched the desired state
    pub fn is_noop(&self) -> bool {
        self.writes() == 0
    }
}

/// Result of a delete decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The subdomain had no records
    NothingToDelete,
    /// These records were removed, marker last
    Deleted {
        /// Removed records
        records: Vec<DnsRecord>,
    },
}

/// Address records and marker of one subdomain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeparatedRecords {
    /// A and AAAA records named exactly the subdomain
    pub address: Vec<DnsRecord>,
    /// The ownership marker, when present with the sentinel content
    pub marker: Option<DnsRecord>,
}

impl SeparatedRecords {
    /// Whether the ownership marker was found
    pub fn has_marker(&self) -> bool {
        self.marker.is_some()
    }
}

/// Decision logic for one (subdomain, target IP) pair
#[derive(Debug, Clone)]
pub struct RecordManager {
    subdomain: String,
    target_ip: IpAddr,
    record_type: RecordType,
    marker_name: String,
}

impl RecordManager {
    /// Create a manager for `subdomain`
    ///
    /// Fails when `target_ip` is not an IPv4 or IPv6 literal.
    pub fn new(subdomain: &str, target_ip: &str) -> Result<Self> {
        let target_ip: IpAddr = target_ip.trim().parse().map_err(|_| {
            Error::config(format!("Target IP '{}' is not a valid IP address", target_ip))
        })?;

        let subdomain = record::normalize_name(subdomain);
        if subdomain.is_empty() {
            return Err(Error::invalid_hostname("subdomain cannot be empty"));
        }

        Ok(Self {
            marker_name: record::marker_name(&subdomain),
            record_type: RecordType::for_ip(target_ip),
            subdomain,
            target_ip,
        })
    }

    /// The managed subdomain
    pub fn subdomain(&self) -> &str {
        &self.subdomain
    }

    /// The address every managed record should resolve to
    pub fn target_ip(&self) -> IpAddr {
        self.target_ip
    }

    /// Address record content for the target IP
    pub fn content(&self) -> String {
        self.target_ip.to_string()
    }

    /// A for IPv4 targets, AAAA for IPv6 targets
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// `_mantrae-<subdomain>`
    pub fn marker_name(&self) -> &str {
        &self.marker_name
    }

    /// Unquoted marker payload
    pub fn marker_content(&self) -> &'static str {
        MARKER_CONTENT
    }

    /// Whether the record set carries this subdomain's ownership marker
    pub fn is_managed_by_us(&self, records: &[DnsRecord]) -> bool {
        records.iter().any(|r| self.is_marker(r))
    }

    /// Split a record set into address records and the marker
    pub fn separate_records(&self, records: &[DnsRecord]) -> SeparatedRecords {
        let mut separated = SeparatedRecords::default();
        for record in records {
            if record.record_type.is_address() && record.has_name(&self.subdomain) {
                separated.address.push(record.clone());
            } else if separated.marker.is_none() && self.is_marker(record) {
                separated.marker = Some(record.clone());
            }
        }
        separated
    }

    /// Converge the record set towards (subdomain → target IP) plus marker
    pub async fn execute_upsert(
        &self,
        existing: &[DnsRecord],
        ops: &(impl RecordOperations + ?Sized),
    ) -> Result<UpsertOutcome> {
        let separated = self.separate_records(existing);

        let desired: Vec<&DnsRecord> = separated
            .address
            .iter()
            .filter(|r| r.record_type == self.record_type)
            .collect();

        let address = if desired.is_empty() {
            debug!(
                "No {} record for {}, creating",
                self.record_type, self.subdomain
            );
            ops.create_record(self.record_type).await?;
            AddressAction::Created
        } else if desired.iter().any(|r| self.points_at_target(r)) {
            debug!(
                "{} record for {} already points at {}",
                self.record_type, self.subdomain, self.target_ip
            );
            AddressAction::Unchanged
        } else {
            let stale = desired[0];
            debug!(
                "{} record for {} points at {}, updating to {}",
                self.record_type, self.subdomain, stale.content, self.target_ip
            );
            ops.update_record(stale, self.record_type).await?;
            AddressAction::Updated {
                previous: stale.content.clone(),
            }
        };

        let marker_created = if separated.has_marker() {
            false
        } else {
            debug!("Ownership marker missing for {}, creating", self.subdomain);
            ops.create_marker().await?;
            true
        };

        Ok(UpsertOutcome {
            address,
            marker_created,
        })
    }

    /// Remove every address record and the marker, if and only if we own them
    pub async fn execute_delete(
        &self,
        existing: &[DnsRecord],
        ops: &(impl DeleteOperations + ?Sized),
    ) -> Result<DeleteOutcome> {
        if existing.is_empty() {
            return Ok(DeleteOutcome::NothingToDelete);
        }

        let separated = self.separate_records(existing);
        if !separated.has_marker() {
            return Err(Error::not_managed(&self.subdomain));
        }

        let mut deleted = Vec::with_capacity(separated.address.len() + 1);
        for record in &separated.address {
            ops.delete_record(record).await?;
            deleted.push(record.clone());
        }
        if let Some(marker) = separated.marker {
            ops.delete_record(&marker).await?;
            deleted.push(marker);
        }

        Ok(DeleteOutcome::Deleted { records: deleted })
    }

    fn is_marker(&self, record: &DnsRecord) -> bool {
        record.record_type == RecordType::Txt
            && record.has_name(&self.marker_name)
            && record::is_marker_content(&record.content)
    }

    fn points_at_target(&self, record: &DnsRecord) -> bool {
        record
            .content
            .trim()
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip == self.target_ip)
    }
}
