pub mod record;
pub mod wal;

use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::error::Result;

pub use record::{format_rfc3339, AuditAction, AuditFilter, AuditRecord, NewAuditRecord, RecordId};
pub use wal::WalAuditLog;

/// 审计日志抽象：只追加 + 按条件查询。
///
/// ## 契约
/// - `append` 失败必须返回错误（`LifecycleError::AuditWrite`），不能静默丢弃。
/// - `query` 结果按 `(ts, id)` 升序。
/// - 不提供删除/修改接口；更正通过追加新记录表达。
/// - 不感知 catalog 状态，"是否仍存在" 由 manager 自行与 CatalogProbe 求交。
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: NewAuditRecord) -> Result<RecordId>;
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>>;
}

/// 两种实现共用的内存态：记录列表 + 单调 id/ts 分配。
#[derive(Debug, Default)]
pub(crate) struct AuditState {
    records: Vec<AuditRecord>,
    last_id: RecordId,
    last_ts: Option<SystemTime>,
}

impl AuditState {
    pub(crate) fn from_records(records: Vec<AuditRecord>) -> Self {
        let last_id = records.iter().map(|r| r.id).max().unwrap_or(0);
        let last_ts = records.iter().map(|r| r.ts).max();
        Self {
            records,
            last_id,
            last_ts,
        }
    }

    /// 生成下一条记录但不提交；落盘成功后再 `commit`。
    pub(crate) fn prepare(&self, entry: NewAuditRecord) -> AuditRecord {
        let ts = next_timestamp(self.last_ts);
        AuditRecord::stamp(self.last_id + 1, ts, entry)
    }

    pub(crate) fn commit(&mut self, rec: AuditRecord) -> RecordId {
        let id = rec.id;
        self.last_id = id;
        self.last_ts = Some(rec.ts);
        self.records.push(rec);
        id
    }

    pub(crate) fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        filter.compile().apply(&self.records)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

/// 严格递增的写入时间戳：墙钟回拨或同一时刻写入时，在上一条基础上 +1µs。
fn next_timestamp(last: Option<SystemTime>) -> SystemTime {
    let now = SystemTime::now();
    match last {
        Some(prev) if now <= prev => prev + Duration::from_micros(1),
        _ => now,
    }
}

/// 纯内存审计日志（测试、无持久化的部署）。
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    state: Mutex<AuditState>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, entry: NewAuditRecord) -> Result<RecordId> {
        let mut state = self.state.lock();
        let rec = state.prepare(entry);
        Ok(state.commit(rec))
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        Ok(self.state.lock().query(filter))
    }
}
