use std::collections::HashMap;
use std::time::SystemTime;

use serde::Serialize;

use crate::audit::{format_rfc3339, AuditAction, AuditRecord, RecordId};
use crate::core::IndexDescriptor;
use crate::error::Result;

/// 一个仍然存活的受管索引：最近一次成功 create 的记录 + catalog 确认存在。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveIndex {
    pub descriptor: IndexDescriptor,
    pub created_at: SystemTime,
    pub record_id: RecordId,
    pub user_name: String,
}

impl LiveIndex {
    /// 淘汰顺序键：(create 时间, 追加顺序)
    pub fn order_key(&self) -> (SystemTime, RecordId) {
        (self.created_at, self.record_id)
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }
}

/// `/indexes` 的对外形态
#[derive(Clone, Debug, Serialize)]
pub struct LiveIndexSummary {
    pub index_name: String,
    pub table_name: String,
    pub column_name: String,
    /// RFC 3339，与审计记录的 `ts` 同一格式
    pub created_at: String,
    pub user_name: String,
    /// 引擎报告的大小（`8192 bytes` / `16 kB`）；拿不到时为 `N/A`
    pub size: String,
}

impl LiveIndexSummary {
    pub fn new(l: &LiveIndex, size_bytes: Option<u64>) -> Self {
        Self {
            index_name: l.descriptor.name().to_string(),
            table_name: l.descriptor.table().to_string(),
            column_name: l.descriptor.column().to_string(),
            created_at: format_rfc3339(l.created_at).unwrap_or_default(),
            user_name: l.user_name.clone(),
            size: size_bytes.map_or_else(|| "N/A".to_string(), pretty_size),
        }
    }
}

/// 与 `pg_size_pretty` 相同的取整规则：10 KiB 以下按字节，往上每级 1024，四舍五入
pub fn pretty_size(bytes: u64) -> String {
    const LIMIT: u64 = 10 * 1024;
    if bytes < LIMIT {
        return format!("{} bytes", bytes);
    }
    // 以半个单位计数，最后 (n + 1) / 2 完成四舍五入
    let mut half = bytes >> 9;
    for unit in ["kB", "MB", "GB"] {
        if half < LIMIT * 2 {
            return format!("{} {}", (half + 1) / 2, unit);
        }
        half >>= 10;
    }
    format!("{} TB", (half + 1) / 2)
}

/// 派生视图（不落盘）：每个名字最多一项，按 create 时间升序（最老的在前）。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveIndexView {
    entries: Vec<LiveIndex>,
}

impl LiveIndexView {
    /// 由审计记录与 catalog 存在性求交。
    ///
    /// 对每个名字取最近一条 create/delete：最近的是 create 且物理上仍存在才算存活。
    /// `*_failed` 记录不改变状态（delete_failed 的索引仍然存活）。
    pub fn build<F>(records: &[AuditRecord], mut exists: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        let mut latest: HashMap<&str, &AuditRecord> = HashMap::new();
        for rec in records {
            if !matches!(rec.action, AuditAction::Create | AuditAction::Delete) {
                continue;
            }
            let newer = latest
                .get(rec.index_name.as_str())
                .map_or(true, |prev| prev.order_key() <= rec.order_key());
            if newer {
                latest.insert(rec.index_name.as_str(), rec);
            }
        }

        let mut entries = Vec::new();
        for rec in latest.into_values() {
            if rec.action != AuditAction::Create {
                continue;
            }
            let Some(column) = rec.column_name.clone() else {
                continue;
            };
            if !exists(rec.index_name.as_str())? {
                continue;
            }
            entries.push(LiveIndex {
                descriptor: IndexDescriptor::from_parts(
                    rec.index_name.clone(),
                    rec.table_name.clone(),
                    column,
                ),
                created_at: rec.ts,
                record_id: rec.id,
                user_name: rec.user_name.clone(),
            });
        }
        entries.sort_by_key(|e| e.order_key());
        Ok(Self { entries })
    }

    pub fn from_entries(mut entries: Vec<LiveIndex>) -> Self {
        entries.sort_by_key(|e| e.order_key());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name() == name)
    }

    pub fn oldest(&self) -> Option<&LiveIndex> {
        self.entries.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LiveIndex> {
        self.entries.iter()
    }
}
