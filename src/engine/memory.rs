use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::engine::{DdlStatement, EngineError, StorageEngine};

#[derive(Clone, Debug)]
struct IndexEntry {
    table: String,
    columns: Vec<String>,
}

const EMPTY_INDEX_BYTES: u64 = 8192;

/// 故障注入点（一次性）。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Create(String),
    Drop(String),
}

/// 内存存储引擎：按配置的 schema 模拟 catalog 与并发 DDL 语义。
///
/// 每张表注册时自带 `<table>_pkey` 主键索引（不属于受管索引）。
pub struct MemoryEngine {
    tables: DashMap<String, Vec<String>>,
    indexes: DashMap<String, IndexEntry>,
    faults: Mutex<HashSet<FaultPoint>>,
    unavailable: AtomicBool,
    ddl_count: AtomicU64,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            indexes: DashMap::new(),
            faults: Mutex::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
            ddl_count: AtomicU64::new(0),
        }
    }

    pub fn with_schema(schema: &BTreeMap<String, Vec<String>>) -> Self {
        let engine = Self::new();
        for (table, columns) in schema {
            engine.add_table(table, columns);
        }
        engine
    }

    pub fn add_table(&self, table: &str, columns: &[String]) {
        self.tables.insert(table.to_string(), columns.to_vec());
        self.indexes.insert(
            format!("{}_pkey", table),
            IndexEntry {
                table: table.to_string(),
                columns: vec!["id".to_string()],
            },
        );
    }

    /// 绕过 manager 直接删掉索引（模拟 DBA 手工操作）。
    pub fn drop_externally(&self, name: &str) -> bool {
        self.indexes.remove(name).is_some()
    }

    pub fn inject_fault(&self, point: FaultPoint) {
        self.faults.lock().insert(point);
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// 已执行（含失败）的 DDL 次数
    pub fn ddl_count(&self) -> u64 {
        self.ddl_count.load(Ordering::SeqCst)
    }

    pub fn index_columns(&self, name: &str) -> Option<(String, Vec<String>)> {
        self.indexes
            .get(name)
            .map(|e| (e.table.clone(), e.columns.clone()))
    }

    fn check_available(&self) -> Result<(), EngineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn take_fault(&self, point: &FaultPoint) -> bool {
        self.faults.lock().remove(point)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for MemoryEngine {
    fn execute_ddl(&self, stmt: &DdlStatement) -> Result<(), EngineError> {
        self.check_available()?;
        self.ddl_count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("MemoryEngine DDL: {}", stmt);

        match stmt {
            DdlStatement::CreateIndexConcurrently(d) => {
                let columns = self
                    .tables
                    .get(d.table())
                    .map(|c| c.value().clone())
                    .ok_or_else(|| EngineError::UndefinedTable(d.table().to_string()))?;
                if !columns.iter().any(|c| c == d.column()) {
                    return Err(EngineError::UndefinedColumn {
                        table: d.table().to_string(),
                        column: d.column().to_string(),
                    });
                }
                if self.take_fault(&FaultPoint::Create(d.name().to_string())) {
                    return Err(EngineError::Conflict(d.name().to_string()));
                }
                // IF NOT EXISTS：同名已存在则 no-op
                self.indexes
                    .entry(d.name().to_string())
                    .or_insert_with(|| IndexEntry {
                        table: d.table().to_string(),
                        columns: vec![d.column().to_string()],
                    });
                Ok(())
            }
            DdlStatement::DropIndexConcurrently { name } => {
                if self.take_fault(&FaultPoint::Drop(name.clone())) {
                    return Err(EngineError::Conflict(name.clone()));
                }
                // IF EXISTS：已被别人删掉也算成功
                self.indexes.remove(name);
                Ok(())
            }
        }
    }

    fn list_indexes(&self, table: &str) -> Result<Vec<String>, EngineError> {
        self.check_available()?;
        let mut names: Vec<String> = self
            .indexes
            .iter()
            .filter(|e| e.value().table == table)
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn index_exists(&self, name: &str) -> Result<bool, EngineError> {
        self.check_available()?;
        Ok(self.indexes.contains_key(name))
    }

    /// 不存数据，每个索引按一个空 btree 的 metapage 计
    fn index_size(&self, name: &str) -> Result<Option<u64>, EngineError> {
        self.check_available()?;
        Ok(self.indexes.contains_key(name).then_some(EMPTY_INDEX_BYTES))
    }
}
