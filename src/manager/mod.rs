use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{AuditAction, AuditFilter, AuditLog, AuditRecord, NewAuditRecord};
use crate::catalog::{CatalogProbe, EngineCatalog};
use crate::core::{
    Decision, IndexDescriptor, LifecyclePolicy, LiveIndex, LiveIndexSummary, LiveIndexView,
};
use crate::engine::{DdlStatement, StorageEngine};
use crate::error::{LifecycleError, Result};
use crate::stats::{Counter, LifecycleStats, StatsReport};

fn default_actor() -> String {
    "api".to_string()
}

/// `/apply` 请求体
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_actor", alias = "user")]
    pub actor: String,
}

/// `apply` 的结果；失败走 `Err`，不存在 "部分成功" 形态。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ApplyOutcome {
    DryRun {
        index: String,
        existing: Vec<String>,
    },
    AlreadyExists {
        index: String,
    },
    Applied {
        index: String,
        /// 只有淘汰 drop 成功时才出现
        #[serde(
            rename = "deletedIndex",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        deleted_index: Option<String>,
    },
}

/// 索引生命周期管理器：`apply` 的唯一入口。
///
/// 并发模型：不加外部锁，只依赖引擎自身的 DDL 串行化。两个并发的 force apply
/// 可能同时选中同一个 victim（drop if exists 保证第二次 drop 无害），也可能让
/// 存活数量暂时超出容量；下一次 force apply 会把超出的部分一并淘汰。
///
/// DDL 与审计之间是 best-effort 关系：concurrent DDL 无法与审计写入放在同一事务里，
/// 审计写失败只记日志和计数，不回滚已经成功的 DDL。
pub struct IndexLifecycleManager {
    engine: Arc<dyn StorageEngine>,
    catalog: Arc<dyn CatalogProbe>,
    audit: Arc<dyn AuditLog>,
    policy: LifecyclePolicy,
    stats: LifecycleStats,
}

impl IndexLifecycleManager {
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        catalog: Arc<dyn CatalogProbe>,
        audit: Arc<dyn AuditLog>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            engine,
            catalog,
            audit,
            policy,
            stats: LifecycleStats::default(),
        }
    }

    /// catalog 直接由同一个引擎提供
    pub fn with_engine(
        engine: Arc<dyn StorageEngine>,
        audit: Arc<dyn AuditLog>,
        capacity: usize,
    ) -> Self {
        let catalog = Arc::new(EngineCatalog::new(engine.clone()));
        Self::new(engine, catalog, audit, LifecyclePolicy::new(capacity))
    }

    pub fn capacity(&self) -> usize {
        self.policy.capacity()
    }

    pub fn apply_request(&self, req: &ApplyRequest) -> Result<ApplyOutcome> {
        self.apply(&req.table, &req.column, req.force, &req.actor)
    }

    pub fn apply(&self, table: &str, column: &str, force: bool, actor: &str) -> Result<ApplyOutcome> {
        let target = IndexDescriptor::new(table, column)?;
        // catalog 不可达时在任何 DDL 之前失败
        let existing = self.catalog.list_indexes(target.table())?;

        if !force {
            self.stats.incr(Counter::DryRun);
            return Ok(ApplyOutcome::DryRun {
                index: target.name().to_string(),
                existing: existing.into_iter().collect(),
            });
        }

        let live = self.live_view()?;
        let decision = self.policy.decide(&live, &target);
        tracing::debug!(
            "apply {}: live={}/{} decision={:?}",
            target.name(),
            live.len(),
            self.policy.capacity(),
            decision
        );

        let deleted_index = match decision {
            Decision::AlreadyLive => {
                self.stats.incr(Counter::AlreadyExists);
                tracing::info!("Index {} already live, nothing to do", target.name());
                return Ok(ApplyOutcome::AlreadyExists {
                    index: target.name().to_string(),
                });
            }
            Decision::Admit => None,
            Decision::Evict { victims } => {
                // 每个 victim 各自一条 delete/delete_failed；对外只报告第一个成功删除的
                let mut first_dropped = None;
                for victim in &victims {
                    let dropped = self.evict(victim, &target, actor);
                    if first_dropped.is_none() {
                        first_dropped = dropped;
                    }
                }
                first_dropped
            }
        };

        self.create(&target, deleted_index.as_deref(), actor)?;
        Ok(ApplyOutcome::Applied {
            index: target.name().to_string(),
            deleted_index,
        })
    }

    /// 审计日志 ∩ catalog：当前存活的受管索引（最老的在前）
    pub fn live_view(&self) -> Result<LiveIndexView> {
        let records = self
            .audit
            .query(&AuditFilter::actions(&[AuditAction::Create, AuditAction::Delete]))
            .map_err(as_audit_unavailable)?;
        LiveIndexView::build(&records, |name| self.catalog.exists(name))
    }

    /// `/indexes`：最新的在前，带上引擎报告的大小
    pub fn live_summaries(&self) -> Result<Vec<LiveIndexSummary>> {
        let view = self.live_view()?;
        Ok(view
            .iter()
            .rev()
            .map(|entry| {
                let size = self.engine.index_size(entry.name()).unwrap_or_else(|e| {
                    tracing::debug!("Size of {} unavailable: {}", entry.name(), e);
                    None
                });
                LiveIndexSummary::new(entry, size)
            })
            .collect())
    }

    pub fn audit_records(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        self.audit.query(filter).map_err(as_audit_unavailable)
    }

    pub fn stats(&self) -> StatsReport {
        self.stats.report()
    }

    /// 淘汰 victim。失败不致命：记 `delete_failed` 后继续创建。
    fn evict(&self, victim: &LiveIndex, replaced_by: &IndexDescriptor, actor: &str) -> Option<String> {
        let stmt = DdlStatement::DropIndexConcurrently {
            name: victim.name().to_string(),
        };
        match self.engine.execute_ddl(&stmt) {
            Ok(()) => {
                self.stats.incr(Counter::Eviction);
                tracing::info!(
                    "Evicted {} (rotation limit {}), replaced by {}",
                    victim.name(),
                    self.policy.capacity(),
                    replaced_by.name()
                );
                self.record(NewAuditRecord {
                    action: AuditAction::Delete,
                    index_name: victim.name().to_string(),
                    table_name: victim.descriptor.table().to_string(),
                    column_name: Some(victim.descriptor.column().to_string()),
                    user_name: actor.to_string(),
                    details: json!({
                        "reason": "rotation_limit",
                        "replaced_by": replaced_by.name(),
                    }),
                });
                Some(victim.name().to_string())
            }
            Err(e) => {
                self.stats.incr(Counter::EvictionFailure);
                tracing::warn!(
                    "Eviction of {} failed, creating {} anyway: {}",
                    victim.name(),
                    replaced_by.name(),
                    e
                );
                self.record(NewAuditRecord {
                    action: AuditAction::DeleteFailed,
                    index_name: victim.name().to_string(),
                    table_name: victim.descriptor.table().to_string(),
                    column_name: Some(victim.descriptor.column().to_string()),
                    user_name: actor.to_string(),
                    details: json!({
                        "reason": "rotation_limit",
                        "replaced_by": replaced_by.name(),
                        "error": e.to_string(),
                    }),
                });
                None
            }
        }
    }

    fn create(&self, target: &IndexDescriptor, replaced: Option<&str>, actor: &str) -> Result<()> {
        let stmt = DdlStatement::CreateIndexConcurrently(target.clone());
        match self.engine.execute_ddl(&stmt) {
            Ok(()) => {
                self.stats.incr(Counter::Applied);
                tracing::info!("Created {} by {}", target, actor);
                let mut details = json!({ "note": "applied" });
                if let Some(old) = replaced {
                    details["replaced"] = json!(old);
                }
                self.record(NewAuditRecord {
                    action: AuditAction::Create,
                    index_name: target.name().to_string(),
                    table_name: target.table().to_string(),
                    column_name: Some(target.column().to_string()),
                    user_name: actor.to_string(),
                    details,
                });
                Ok(())
            }
            Err(e) => {
                self.stats.incr(Counter::CreateFailure);
                tracing::error!("Create {} failed: {}", target, e);
                // 审计失败不能盖掉真正的 DDL 错误
                self.record(NewAuditRecord {
                    action: AuditAction::CreateFailed,
                    index_name: target.name().to_string(),
                    table_name: target.table().to_string(),
                    column_name: Some(target.column().to_string()),
                    user_name: actor.to_string(),
                    details: json!({ "error": e.to_string() }),
                });
                Err(LifecycleError::Ddl {
                    index: target.name().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// best-effort：写失败只记录，不影响调用结果
    fn record(&self, entry: NewAuditRecord) {
        let action = entry.action;
        let name = entry.index_name.clone();
        if let Err(e) = self.audit.append(entry) {
            self.stats.incr(Counter::AuditWriteFailure);
            tracing::error!("Audit {} for {} was not recorded: {}", action, name, e);
        }
    }
}

fn as_audit_unavailable(e: LifecycleError) -> LifecycleError {
    match e {
        LifecycleError::AuditUnavailable(_) => e,
        other => LifecycleError::AuditUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests;
