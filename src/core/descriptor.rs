use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

/// 引擎侧标识符长度上限（PostgreSQL NAMEDATALEN - 1）。
pub const MAX_IDENTIFIER_LEN: usize = 63;

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// 白名单校验：只允许 `[A-Za-z_][A-Za-z0-9_]*`。
///
/// DDL 无法像数据语句那样参数化，标识符必须在拼接进语句前拦下。
pub fn validate_identifier(field: &'static str, value: &str) -> Result<()> {
    if value.len() > MAX_IDENTIFIER_LEN || !identifier_re().is_match(value) {
        return Err(LifecycleError::Validation {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// 受管索引标识：名字由 table + column 确定性派生。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDescriptor {
    name: String,
    table: String,
    column: String,
}

impl IndexDescriptor {
    /// 校验 table/column 并派生 `idx_<table>_<column>`。
    pub fn new(table: &str, column: &str) -> Result<Self> {
        validate_identifier("table", table)?;
        validate_identifier("column", column)?;

        let name = format!("idx_{}_{}", table, column);
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(LifecycleError::Validation {
                field: "index",
                value: name,
            });
        }

        Ok(Self {
            name,
            table: table.to_string(),
            column: column.to_string(),
        })
    }

    /// 从已落盘的审计记录还原（不重新校验，名字以记录为准）。
    pub(crate) fn from_parts(name: String, table: String, column: String) -> Self {
        Self {
            name,
            table,
            column,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self) -> &str {
        &self.column
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ON {}({})", self.name, self.table, self.column)
    }
}
