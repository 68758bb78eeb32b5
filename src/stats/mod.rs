use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// 生命周期计数器（进程内，重启清零；历史以审计日志为准）
#[derive(Debug, Default)]
pub struct LifecycleStats {
    dry_runs: AtomicU64,
    applied: AtomicU64,
    already_exists: AtomicU64,
    evictions: AtomicU64,
    eviction_failures: AtomicU64,
    create_failures: AtomicU64,
    audit_write_failures: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub dry_runs: u64,
    pub applied: u64,
    pub already_exists: u64,
    pub evictions: u64,
    pub eviction_failures: u64,
    pub create_failures: u64,
    pub audit_write_failures: u64,
}

#[derive(Clone, Copy, Debug)]
pub enum Counter {
    DryRun,
    Applied,
    AlreadyExists,
    Eviction,
    EvictionFailure,
    CreateFailure,
    AuditWriteFailure,
}

impl LifecycleStats {
    pub fn incr(&self, counter: Counter) {
        let c = match counter {
            Counter::DryRun => &self.dry_runs,
            Counter::Applied => &self.applied,
            Counter::AlreadyExists => &self.already_exists,
            Counter::Eviction => &self.evictions,
            Counter::EvictionFailure => &self.eviction_failures,
            Counter::CreateFailure => &self.create_failures,
            Counter::AuditWriteFailure => &self.audit_write_failures,
        };
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> StatsReport {
        StatsReport {
            dry_runs: self.dry_runs.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            already_exists: self.already_exists.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_failures: self.eviction_failures.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            audit_write_failures: self.audit_write_failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════╗")?;
        writeln!(f, "║       index-advisor Lifecycle Report     ║")?;
        writeln!(f, "╠══════════════════════════════════════════╣")?;
        writeln!(f, "║ dry runs:             {:>18} ║", self.dry_runs)?;
        writeln!(f, "║ applied:              {:>18} ║", self.applied)?;
        writeln!(f, "║ already exists:       {:>18} ║", self.already_exists)?;
        writeln!(f, "╠──────────────────────────────────────────╣")?;
        writeln!(f, "║ evictions:            {:>18} ║", self.evictions)?;
        writeln!(f, "║ eviction failures:    {:>18} ║", self.eviction_failures)?;
        writeln!(f, "║ create failures:      {:>18} ║", self.create_failures)?;
        writeln!(f, "║ audit write failures: {:>18} ║", self.audit_write_failures)?;
        writeln!(f, "╚══════════════════════════════════════════╝")?;
        Ok(())
    }
}
