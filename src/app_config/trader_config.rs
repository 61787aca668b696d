//! 交易单元配置
//!
//! 每个交易单元一份 `TraderConfig`，从 JSON 文件加载（`TRADERS_CONFIG`，默认 traders.json）。

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app_config::env::{env_or_default, env_u64};
use crate::trading::decision::RiskLimits;

fn default_scan_interval_secs() -> u64 {
    180
}

fn default_model_timeout_secs() -> u64 {
    60
}

fn default_context_timeout_secs() -> u64 {
    30
}

fn default_execution_timeout_secs() -> u64 {
    30
}

fn default_performance_lookback() -> usize {
    100
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderConfig {
    /// 交易单元ID，同时用作账本目录名和共享库的 trader_id
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// 使用的模型名称，仅用于展示
    #[serde(default)]
    pub ai_model: String,
    /// 决策周期间隔（秒）
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// 初始资金，写入种子记录
    #[serde(default)]
    pub initial_balance: f64,
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
    #[serde(default = "default_context_timeout_secs")]
    pub context_timeout_secs: u64,
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// 构建上下文时分析的历史周期数，0 表示全部
    #[serde(default = "default_performance_lookback")]
    pub performance_lookback: usize,
    #[serde(default)]
    pub risk_limits: RiskLimits,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl TraderConfig {
    pub fn new(id: impl Into<String>, initial_balance: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            ai_model: String::new(),
            scan_interval_secs: default_scan_interval_secs(),
            initial_balance,
            model_timeout_secs: default_model_timeout_secs(),
            context_timeout_secs: default_context_timeout_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            performance_lookback: default_performance_lookback(),
            risk_limits: RiskLimits::default(),
            enabled: true,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_secs(self.context_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// 解析交易单元配置列表，只保留启用的单元
pub fn parse_trader_configs(json: &str) -> anyhow::Result<Vec<TraderConfig>> {
    let configs: Vec<TraderConfig> = serde_json::from_str(json)?;
    let mut seen = HashSet::new();
    for config in &configs {
        if config.id.trim().is_empty() {
            return Err(anyhow!("交易单元ID不能为空"));
        }
        if !seen.insert(config.id.clone()) {
            return Err(anyhow!("交易单元ID重复: {}", config.id));
        }
        if config.initial_balance < 0.0 {
            return Err(anyhow!("交易单元 {} 初始资金不能为负", config.id));
        }
    }
    Ok(configs.into_iter().filter(|c| c.enabled).collect())
}

/// 从文件加载交易单元配置
pub async fn load_trader_configs(path: &Path) -> anyhow::Result<Vec<TraderConfig>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("读取交易单元配置失败: {}", path.display()))?;
    let configs = parse_trader_configs(&content)
        .with_context(|| format!("解析交易单元配置失败: {}", path.display()))?;
    info!("加载交易单元配置 {} 个: {}", configs.len(), path.display());
    Ok(configs)
}

/// 交易单元配置文件路径
pub fn traders_config_path() -> String {
    env_or_default("TRADERS_CONFIG", "traders.json")
}

/// 调度器配置
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// 单元故障后重启前的等待时间
    pub restart_backoff: Duration,
    /// 优雅关闭总超时
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_backoff: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        Self {
            restart_backoff: Duration::from_secs(env_u64("TRADER_RESTART_BACKOFF_SECS", 5)),
            shutdown_timeout: Duration::from_secs(env_u64("TRADER_SHUTDOWN_TIMEOUT_SECS", 30)),
        }
    }
}
