pub mod memory;

use std::fmt;

use thiserror::Error;

use crate::core::IndexDescriptor;

pub use memory::{FaultPoint, MemoryEngine};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("relation \"{0}\" does not exist")]
    UndefinedTable(String),

    #[error("column \"{column}\" does not exist on \"{table}\"")]
    UndefinedColumn { table: String, column: String },

    #[error("concurrent DDL conflict on \"{0}\"")]
    Conflict(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// 引擎 DDL 语句。只由 manager 通过受控命名构造，标识符已校验。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DdlStatement {
    /// `CREATE INDEX CONCURRENTLY IF NOT EXISTS`：不锁表，失败可能留下 invalid 索引
    CreateIndexConcurrently(IndexDescriptor),
    /// `DROP INDEX CONCURRENTLY IF EXISTS`：对已不存在的索引是 no-op
    DropIndexConcurrently { name: String },
}

impl DdlStatement {
    pub fn index_name(&self) -> &str {
        match self {
            DdlStatement::CreateIndexConcurrently(d) => d.name(),
            DdlStatement::DropIndexConcurrently { name } => name,
        }
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl fmt::Display for DdlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlStatement::CreateIndexConcurrently(d) => write!(
                f,
                "CREATE INDEX CONCURRENTLY IF NOT EXISTS {} ON {} ({});",
                quote_ident(d.name()),
                quote_ident(d.table()),
                quote_ident(d.column())
            ),
            DdlStatement::DropIndexConcurrently { name } => {
                write!(f, "DROP INDEX CONCURRENTLY IF EXISTS {};", quote_ident(name))
            }
        }
    }
}

/// 存储引擎能力：执行 DDL + 只读 catalog 查询。
///
/// 实现需要保证：
/// - create/drop 都是 "if (not) exists" 语义，重复执行不报错。
/// - `list_indexes` 对不存在的表返回空列表，而不是错误。
/// - 连接层面的失败统一返回 `EngineError::Unavailable`。
pub trait StorageEngine: Send + Sync {
    fn execute_ddl(&self, stmt: &DdlStatement) -> Result<(), EngineError>;
    fn list_indexes(&self, table: &str) -> Result<Vec<String>, EngineError>;
    fn index_exists(&self, name: &str) -> Result<bool, EngineError>;

    /// 索引占用的字节数；引擎不支持或索引不存在时为 `None`
    fn index_size(&self, _name: &str) -> Result<Option<u64>, EngineError> {
        Ok(None)
    }
}
