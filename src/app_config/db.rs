//! 决策账本的数据库连接配置
//!
//! 不再使用全局 `DB_CLIENT`：每个交易单元的账本持有自己的 `RBatis` 实例，
//! 共享 MySQL 不可用时由账本降级到单机 SQLite。

use std::path::{Path, PathBuf};
use std::time::Duration;

use rbatis::RBatis;
use rbdc_mysql::MysqlDriver;
use rbdc_sqlite::SqliteDriver;
use tracing::{debug, info};

use crate::app_config::env::{env_opt, env_or_default, env_u64};
use crate::error::app_error::LedgerError;

/// 账本存储配置
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// 共享 MySQL 连接串（DB_HOST），未配置时直接使用本地存储
    pub shared_url: Option<String>,
    /// 共享库最大连接数
    pub max_connections: u64,
    /// 本地 SQLite / JSON 文件的根目录
    pub data_dir: PathBuf,
    /// 建连 + 可达性检查的超时
    pub connect_timeout: Duration,
    /// 单次查询/写入的超时
    pub query_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            shared_url: None,
            max_connections: 50,
            data_dir: PathBuf::from("decision_logs"),
            connect_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(30),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        Self {
            shared_url: env_opt("DB_HOST"),
            max_connections: env_u64("DB_MAX_CONNECTIONS", 50),
            data_dir: PathBuf::from(env_or_default("LEDGER_DATA_DIR", "decision_logs")),
            connect_timeout: Duration::from_secs(env_u64("LEDGER_CONNECT_TIMEOUT_SECS", 30)),
            query_timeout: Duration::from_secs(env_u64("LEDGER_QUERY_TIMEOUT_SECS", 30)),
        }
    }

    /// 本地数据目录：每个交易单元一份
    pub fn trader_dir(&self, trader_id: &str) -> PathBuf {
        self.data_dir.join(sanitize_trader_id(trader_id))
    }
}

/// 交易单元ID用作目录名时只保留安全字符
pub fn sanitize_trader_id(trader_id: &str) -> String {
    let cleaned: String = trader_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

/// 连接共享 MySQL，并在超时内确认可达
pub async fn connect_mysql(
    url: &str,
    max_connections: u64,
    connect_timeout: Duration,
) -> Result<RBatis, LedgerError> {
    debug!("Initializing shared database connection pool...");
    let rb = RBatis::new();

    let connect = async {
        rb.link(MysqlDriver {}, url).await?;
        let pool = rb.get_pool()?;
        pool.set_max_open_conns(max_connections).await;
        // 减少空闲连接数，避免占用过多
        pool.set_max_idle_conns((max_connections / 3).max(1)).await;
        pool.set_conn_max_lifetime(Some(Duration::from_secs(3600))).await;
        rb.exec("SELECT 1", vec![]).await?;
        Ok::<(), rbatis::rbdc::Error>(())
    };

    let result = tokio::time::timeout(connect_timeout, connect).await;
    match result {
        Ok(Ok(())) => {
            info!(
                "共享数据库连接成功, max_connections={}",
                max_connections
            );
            Ok(rb)
        }
        Ok(Err(e)) => Err(LedgerError::Unavailable(format!("共享数据库连接失败: {}", e))),
        Err(_) => Err(LedgerError::Timeout(format!(
            "共享数据库连接超时 ({:?})",
            connect_timeout
        ))),
    }
}

/// 打开（必要时创建）单机 SQLite 文件
pub async fn connect_sqlite(path: &Path, connect_timeout: Duration) -> Result<RBatis, LedgerError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // rbdc-sqlite 不会自动创建文件
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let url = format!("sqlite://{}", path.display());
    let rb = RBatis::new();
    let connect = async {
        rb.link(SqliteDriver {}, &url).await?;
        rb.exec("SELECT 1", vec![]).await?;
        Ok::<(), rbatis::rbdc::Error>(())
    };

    let result = tokio::time::timeout(connect_timeout, connect).await;
    match result {
        Ok(Ok(())) => {
            info!("本地 SQLite 打开成功: {}", path.display());
            Ok(rb)
        }
        Ok(Err(e)) => Err(LedgerError::Unavailable(format!(
            "本地 SQLite 打开失败 {}: {}",
            path.display(),
            e
        ))),
        Err(_) => Err(LedgerError::Timeout(format!(
            "本地 SQLite 打开超时 {}",
            path.display()
        ))),
    }
}
