use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use index_advisor::api::{ApiServer, AppState};
use index_advisor::audit::WalAuditLog;
use index_advisor::config::Config;
use index_advisor::engine::MemoryEngine;
use index_advisor::IndexLifecycleManager;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "index-advisor", version, about = "Capped FIFO index lifecycle manager")]
struct Cli {
    /// TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 监听地址，覆盖配置
    #[arg(long)]
    listen: Option<String>,

    /// 审计日志目录，覆盖配置
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 受管索引上限，覆盖配置
    #[arg(long)]
    capacity: Option<usize>,

    /// 推荐列表 JSON 文件
    #[arg(long)]
    recommendations: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = match cli.config.as_deref() {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }
    if let Some(cap) = cli.capacity {
        cfg.capacity = cap;
    }
    if cli.recommendations.is_some() {
        cfg.recommendations = cli.recommendations;
    }
    cfg.validate()?;

    info!(
        "Starting index-advisor: capacity={}, data_dir={:?}, tables={}",
        cfg.capacity,
        cfg.data_dir,
        cfg.schema.len()
    );

    let audit = Arc::new(WalAuditLog::open_in_dir(&cfg.data_dir)?);
    let engine = Arc::new(MemoryEngine::with_schema(&cfg.schema));
    let manager = IndexLifecycleManager::with_engine(engine, audit, cfg.capacity);

    match manager.live_view() {
        Ok(view) => info!("{} managed index(es) live at startup", view.len()),
        Err(e) => tracing::warn!("Could not build live view at startup: {}", e),
    }

    let state = Arc::new(AppState {
        manager,
        recommendations: cfg.recommendations.clone(),
    });

    let addr: SocketAddr = cfg
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address {:?}: {}", cfg.listen, e))?;
    let server = ApiServer::new(state.clone());
    let handle = tokio::spawn(server.run(addr));

    info!("index-advisor ready. Try: curl -X POST http://{}/apply", addr);

    // 优雅退出处理
    tokio::select! {
        res = handle => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    info!("\n{}", state.manager.stats());
    Ok(())
}
