//! Server metrics over UCD-SNMP and HOST-RESOURCES
//!
//! ## CPU usage
//!
//! The agent exposes raw, monotonically increasing tick counters
//! (`ssCpuRawUser`, `ssCpuRawSystem`, `ssCpuRawIdle`). Usage is derived from
//! the delta between two samples:
//!
//! ```text
//! busy% = 100 × (Δtotal − Δidle) / Δtotal,   total = user + system + idle
//! ```
//!
//! The previous sample per host is kept for the lifetime of the collector.
//! When there is none (first poll), when the counters went backwards (agent
//! restart) or when no time has elapsed, a second sample is taken after
//! `resample_delay` and the delta is computed over that window instead.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use super::{CollectError, FetchTally, fetch_text, fetch_u64, record_field_error};
use crate::cache::{CacheKey, CacheKind, MetricCache};
use crate::keyed::KeyedMutex;
use crate::snmp::{Session, SnmpResult, oids};
use crate::util::clamp_percent;
use crate::{DiskInformation, FieldErrors, MemoryInformation, ServerMetrics};

/// One reading of the raw CPU tick counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSample {
    pub user: u64,
    pub system: u64,
    pub idle: u64,
    pub taken_at: Instant,
}

impl CpuSample {
    pub fn new(user: u64, system: u64, idle: u64) -> Self {
        Self {
            user,
            system,
            idle,
            taken_at: Instant::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.user.saturating_add(self.system).saturating_add(self.idle)
    }

    /// Whether `next` cannot follow `self` on a live counter set
    pub fn is_reset_by(&self, next: &CpuSample) -> bool {
        next.idle < self.idle || next.total() < self.total()
    }
}

/// Busy percentage between two samples, `None` when no ticks elapsed or the
/// counters went backwards
pub fn cpu_percent(previous: &CpuSample, current: &CpuSample) -> Option<f64> {
    let delta_total = current.total().checked_sub(previous.total())?;
    let delta_idle = current.idle.checked_sub(previous.idle)?;
    if delta_total == 0 {
        return None;
    }
    let delta_busy = delta_total.saturating_sub(delta_idle);
    Some(clamp_percent(delta_busy as f64 * 100.0 / delta_total as f64))
}

pub struct ServerCollector {
    cache: MetricCache<ServerMetrics>,
    cpu_samples: KeyedMutex<String, Option<CpuSample>>,
    resample_delay: Duration,
}

impl ServerCollector {
    pub fn new(cache_ttl: Duration, resample_delay: Duration) -> Self {
        Self {
            cache: MetricCache::new(cache_ttl),
            cpu_samples: KeyedMutex::new(),
            resample_delay,
        }
    }

    /// Collect a metric bundle, served from cache when fresh
    ///
    /// Only a device that answered nothing yields an error; every other
    /// failure lands in [`ServerMetrics::errors`].
    #[instrument(skip(self, session, credential))]
    pub async fn collect(
        &self,
        session: &dyn Session,
        ip: &str,
        credential: &str,
    ) -> Result<ServerMetrics, CollectError> {
        let key = CacheKey::new(ip, credential, CacheKind::ServerMetrics);
        self.cache
            .get_or_try_insert_with(&key, || self.collect_uncached(session, ip))
            .await
    }

    async fn collect_uncached(
        &self,
        session: &dyn Session,
        ip: &str,
    ) -> Result<ServerMetrics, CollectError> {
        let mut errors = FieldErrors::new();
        let mut tally = FetchTally::default();

        let sys_name = fetch_text(session, &oids::oid(oids::SYS_NAME)).await;
        // a silent host would otherwise cost one full timeout per scalar
        if let Err(e) = &sys_name {
            if e.is_transport() {
                warn!(%ip, error = %e, "server did not answer the first request");
                return Err(CollectError::Unreachable(e.clone()));
            }
        }
        tally.record(&sys_name);
        let sys_name = record_field_error(&mut errors, "system_name", sys_name);

        let mut counters = Vec::with_capacity(3);
        for (field, oid) in [
            ("cpu_user", oids::CPU_RAW_USER),
            ("cpu_system", oids::CPU_RAW_SYSTEM),
            ("cpu_idle", oids::CPU_RAW_IDLE),
        ] {
            let value = fetch_u64(session, &oids::oid(oid)).await;
            tally.record(&value);
            counters.push(record_field_error(&mut errors, field, value));
        }

        let mem_total = fetch_u64(session, &oids::oid(oids::MEM_TOTAL_REAL)).await;
        tally.record(&mem_total);
        let mem_total = record_field_error(&mut errors, "mem_total", mem_total);

        let mem_free = fetch_u64(session, &oids::oid(oids::MEM_AVAIL_REAL)).await;
        tally.record(&mem_free);
        let mem_free = record_field_error(&mut errors, "mem_free", mem_free);

        if let Some(e) = tally.unreachable() {
            warn!(%ip, error = %e, "server did not answer any request");
            return Err(CollectError::Unreachable(e));
        }

        let cpu_percent = match counters.as_slice() {
            [Some(user), Some(system), Some(idle)] => {
                let sample = CpuSample::new(*user, *system, *idle);
                match self.cpu_percent_for(session, ip, sample).await {
                    Ok(percent) => Some(percent),
                    Err(e) => {
                        errors.insert("cpu_calc".to_string(), e.to_string());
                        None
                    }
                }
            }
            _ => None,
        };

        let memory = match (mem_total, mem_free) {
            (Some(total), Some(free)) => Some(MemoryInformation::from_kb(total, free)),
            _ => None,
        };

        let disk = find_root_disk(session).await;
        let system_name = resolve_name(session, sys_name, ip).await;

        trace!(
            %ip,
            cpu = ?cpu_percent,
            memory = ?memory.as_ref().map(|m| m.percent),
            disk = disk.percent,
            failed_fields = errors.len(),
            "collected server metrics"
        );

        Ok(ServerMetrics {
            system_name,
            cpu_percent,
            memory,
            disk,
            errors,
            collected_at: Utc::now(),
        })
    }

    /// Drop expired bundles
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    /// CPU usage against the stored sample for `ip`, resampling when needed
    ///
    /// The per-host slot stays locked for the whole computation, including
    /// the resample pause, so concurrent polls of one host never interleave
    /// their counter reads.
    async fn cpu_percent_for(
        &self,
        session: &dyn Session,
        ip: &str,
        current: CpuSample,
    ) -> SnmpResult<f64> {
        let mut slot = self.cpu_samples.lock(&ip.to_string()).await;

        let previous = slot.take().filter(|previous| {
            let reset = previous.is_reset_by(&current);
            if reset {
                debug!(%ip, "CPU counters went backwards, discarding stored sample");
            }
            !reset
        });
        *slot = Some(current);

        if let Some(percent) = previous.and_then(|previous| cpu_percent(&previous, &current)) {
            return Ok(percent);
        }

        trace!(%ip, delay = ?self.resample_delay, "resampling CPU counters");
        tokio::time::sleep(self.resample_delay).await;

        let next = read_cpu_sample(session).await?;
        *slot = Some(next);
        Ok(cpu_percent(&current, &next).unwrap_or(0.0))
    }

    /// Last stored CPU sample for a host
    pub async fn stored_sample(&self, ip: &str) -> Option<CpuSample> {
        *self.cpu_samples.lock(&ip.to_string()).await
    }
}

async fn read_cpu_sample(session: &dyn Session) -> SnmpResult<CpuSample> {
    let user = fetch_u64(session, &oids::oid(oids::CPU_RAW_USER)).await?;
    let system = fetch_u64(session, &oids::oid(oids::CPU_RAW_SYSTEM)).await?;
    let idle = fetch_u64(session, &oids::oid(oids::CPU_RAW_IDLE)).await?;
    Ok(CpuSample::new(user, system, idle))
}

/// sysName, then sysDescr, then a name derived from the address
async fn resolve_name(session: &dyn Session, sys_name: Option<String>, ip: &str) -> String {
    if let Some(name) = sys_name.filter(|name| !name.trim().is_empty()) {
        return name;
    }

    match fetch_text(session, &oids::oid(oids::SYS_DESCR)).await {
        Ok(descr) if !descr.trim().is_empty() => descr,
        _ => format!("Server-{ip}"),
    }
}

/// Find the storage row mounted at `/` among the usual indexes
async fn find_root_disk(session: &dyn Session) -> DiskInformation {
    for &index in oids::ROOT_STORAGE_CANDIDATES {
        let path = match fetch_text(session, &oids::row(oids::HR_STORAGE_DESCR, index)).await {
            Ok(path) => path,
            Err(e) => {
                trace!(index, error = %e, "storage row unavailable");
                continue;
            }
        };
        if path.trim() != "/" {
            continue;
        }

        let (total_units, used_units, alloc_unit) = match (
            fetch_u64(session, &oids::row(oids::HR_STORAGE_SIZE, index)).await,
            fetch_u64(session, &oids::row(oids::HR_STORAGE_USED, index)).await,
            fetch_u64(session, &oids::row(oids::HR_STORAGE_ALLOC_UNITS, index)).await,
        ) {
            (Ok(total), Ok(used), Ok(alloc)) => (total, used, alloc),
            (total, used, alloc) => {
                debug!(index, ?total, ?used, ?alloc, "incomplete root storage row");
                continue;
            }
        };

        if total_units > 0 && alloc_unit > 0 {
            return DiskInformation::from_bytes(
                "/",
                total_units.saturating_mul(alloc_unit),
                used_units.saturating_mul(alloc_unit),
            );
        }
    }

    DiskInformation::empty()
}
