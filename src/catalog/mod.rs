use std::collections::BTreeSet;
use std::sync::Arc;

use crate::engine::{EngineError, StorageEngine};
use crate::error::{LifecycleError, Result};

/// 只读 catalog 探针：索引可能在 manager 之外消失（DBA 手工删除、DDL 中途崩溃），
/// 审计日志里的 create 记录必须与它求交后才算 "仍然存活"。
pub trait CatalogProbe: Send + Sync {
    /// 表上现存的物理索引；表不存在时返回空集合
    fn list_indexes(&self, table: &str) -> Result<BTreeSet<String>>;
    fn exists(&self, index: &str) -> Result<bool>;
}

/// 基于 StorageEngine 的探针实现。
pub struct EngineCatalog {
    engine: Arc<dyn StorageEngine>,
}

impl EngineCatalog {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }
}

fn unavailable(e: EngineError) -> LifecycleError {
    LifecycleError::CatalogUnavailable(e.to_string())
}

impl CatalogProbe for EngineCatalog {
    fn list_indexes(&self, table: &str) -> Result<BTreeSet<String>> {
        match self.engine.list_indexes(table) {
            Ok(names) => Ok(names.into_iter().collect()),
            Err(EngineError::UndefinedTable(_)) => Ok(BTreeSet::new()),
            Err(e) => Err(unavailable(e)),
        }
    }

    fn exists(&self, index: &str) -> Result<bool> {
        self.engine.index_exists(index).map_err(unavailable)
    }
}
