use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::DEFAULT_CAPACITY;

/// 服务配置（TOML），CLI 参数可覆盖。
///
/// ```toml
/// listen = "0.0.0.0:8000"
/// data_dir = "/var/lib/index-advisor"
/// capacity = 3
/// recommendations = "data/recommendations.json"
///
/// [schema]
/// orders = ["id", "user_id", "item_id", "status", "amount", "created_at"]
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub listen: String,
    pub data_dir: PathBuf,
    pub capacity: usize,
    pub recommendations: Option<PathBuf>,
    /// 内存引擎的表结构：table -> columns
    pub schema: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            data_dir: default_data_dir(),
            capacity: DEFAULT_CAPACITY,
            recommendations: None,
            schema: demo_schema(),
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("index-advisor")
}

/// users / items / orders 演示表结构
pub fn demo_schema() -> BTreeMap<String, Vec<String>> {
    let table = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    let mut schema = BTreeMap::new();
    schema.insert(
        "users".to_string(),
        table(&["id", "email", "hashed_password", "is_admin", "created_at", "city", "age"]),
    );
    schema.insert("items".to_string(), table(&["id", "name", "price"]));
    schema.insert(
        "orders".to_string(),
        table(&["id", "user_id", "item_id", "status", "amount", "created_at"]),
    );
    schema
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {:?}: {}", path, e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capacity == 0 {
            anyhow::bail!("capacity must be at least 1");
        }
        for (table, columns) in &self.schema {
            crate::core::validate_identifier("table", table)?;
            for c in columns {
                crate::core::validate_identifier("column", c)?;
            }
        }
        Ok(())
    }
}
