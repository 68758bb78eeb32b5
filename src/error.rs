use thiserror::Error;

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// 生命周期管理的错误分类。
///
/// - `Validation` / `CatalogUnavailable` / `AuditUnavailable`：在任何 DDL 之前中止。
/// - `Ddl`：引擎拒绝 create/drop。淘汰阶段的 drop 失败由 manager 本地吸收，
///   create 失败则直接返回给调用方。
/// - `AuditWrite`：审计落盘失败；manager 只记录日志，不回滚已成功的 DDL。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid {field} identifier: {value:?}")]
    Validation { field: &'static str, value: String },

    #[error("DDL failed on {index}: {message}")]
    Ddl { index: String, message: String },

    #[error("audit write failed: {0}")]
    AuditWrite(String),

    #[error("audit log unavailable: {0}")]
    AuditUnavailable(String),

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),
}

impl LifecycleError {
    pub fn is_validation(&self) -> bool {
        matches!(self, LifecycleError::Validation { .. })
    }
}
