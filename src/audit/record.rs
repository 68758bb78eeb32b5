use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use wildmatch::WildMatch;

pub type RecordId = u64;

/// 审计动作类型（持久化时使用 snake_case 字符串）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    CreateFailed,
    Delete,
    DeleteFailed,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::CreateFailed => "create_failed",
            AuditAction::Delete => "delete",
            AuditAction::DeleteFailed => "delete_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(AuditAction::Create),
            "create_failed" => Some(AuditAction::CreateFailed),
            "delete" => Some(AuditAction::Delete),
            "delete_failed" => Some(AuditAction::DeleteFailed),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 待写入的审计条目；`id` 与 `ts` 由 AuditLog 在写入时分配。
#[derive(Clone, Debug, PartialEq)]
pub struct NewAuditRecord {
    pub action: AuditAction,
    pub index_name: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub user_name: String,
    pub details: serde_json::Value,
}

/// 已落盘的审计条目。只追加，从不修改。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: RecordId,
    pub action: AuditAction,
    pub index_name: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub user_name: String,
    #[serde(with = "rfc3339")]
    pub ts: SystemTime,
    pub details: serde_json::Value,
}

impl AuditRecord {
    pub(crate) fn stamp(id: RecordId, ts: SystemTime, entry: NewAuditRecord) -> Self {
        Self {
            id,
            action: entry.action,
            index_name: entry.index_name,
            table_name: entry.table_name,
            column_name: entry.column_name,
            user_name: entry.user_name,
            ts,
            details: entry.details,
        }
    }

    /// (ts, id)：淘汰顺序与查询顺序共用的排序键。
    pub fn order_key(&self) -> (SystemTime, RecordId) {
        (self.ts, self.id)
    }
}

/// 审计查询条件。
///
/// `index` 支持通配符（`idx_orders_*`）；`limit` 取最近的 N 条，结果仍按时间升序。
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub actions: Vec<AuditAction>,
    pub index: Option<String>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn actions(actions: &[AuditAction]) -> Self {
        Self {
            actions: actions.to_vec(),
            ..Self::default()
        }
    }

    pub(crate) fn compile(&self) -> CompiledFilter<'_> {
        CompiledFilter {
            filter: self,
            pattern: self.index.as_deref().map(WildMatch::new),
        }
    }
}

pub(crate) struct CompiledFilter<'a> {
    filter: &'a AuditFilter,
    pattern: Option<WildMatch>,
}

impl CompiledFilter<'_> {
    pub(crate) fn matches(&self, rec: &AuditRecord) -> bool {
        if !self.filter.actions.is_empty() && !self.filter.actions.contains(&rec.action) {
            return false;
        }
        match &self.pattern {
            Some(p) => p.matches(&rec.index_name),
            None => true,
        }
    }

    pub(crate) fn apply(&self, records: &[AuditRecord]) -> Vec<AuditRecord> {
        let mut out: Vec<AuditRecord> = records
            .iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.order_key());
        if let Some(limit) = self.filter.limit {
            if out.len() > limit {
                out.drain(..out.len() - limit);
            }
        }
        out
    }
}

/// SystemTime 的 RFC 3339 表示（UTC，保留纳秒）
pub fn format_rfc3339(ts: SystemTime) -> Result<String, time::error::Format> {
    OffsetDateTime::from(ts).format(&Rfc3339)
}

/// `#[serde(with = "rfc3339")]`：落盘与 HTTP 输出都用字符串时间戳
pub(crate) mod rfc3339 {
    use std::time::SystemTime;

    use serde::{de, ser, Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let text = super::format_rfc3339(*ts).map_err(ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        let parsed = OffsetDateTime::parse(&text, &Rfc3339).map_err(de::Error::custom)?;
        Ok(SystemTime::from(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample(ts: SystemTime) -> AuditRecord {
        AuditRecord {
            id: 7,
            action: AuditAction::DeleteFailed,
            index_name: "idx_users_city".to_string(),
            table_name: "users".to_string(),
            column_name: Some("city".to_string()),
            user_name: "ops".to_string(),
            ts,
            details: serde_json::json!({ "error": "lock timeout" }),
        }
    }

    #[test]
    fn ts_is_written_as_rfc3339_string() {
        let ts = UNIX_EPOCH + Duration::from_millis(1_700_000_000_250);
        let value = serde_json::to_value(sample(ts)).unwrap();
        assert_eq!(value["ts"], "2023-11-14T22:13:20.25Z");
        assert_eq!(value["action"], "delete_failed");
    }

    #[test]
    fn sub_microsecond_timestamps_survive_a_reload() {
        // 同一微秒内的 +1µs 递增必须在重放后保持顺序
        let ts = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let text = serde_json::to_string(&sample(ts)).unwrap();
        let back: AuditRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back.ts, ts);
        assert_eq!(back, sample(ts));
    }

    #[test]
    fn malformed_ts_is_rejected() {
        let mut value = serde_json::to_value(sample(UNIX_EPOCH)).unwrap();
        value["ts"] = serde_json::json!({ "secs_since_epoch": 1, "nanos_since_epoch": 0 });
        assert!(serde_json::from_value::<AuditRecord>(value).is_err());
    }
}
