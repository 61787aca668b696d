//! 进程启动：初始化环境与日志，加载交易单元，启动调度器并等待退出信号

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use dotenv::dotenv;
use tracing::{error, info, warn};

use crate::app_config::db::LedgerConfig;
use crate::app_config::log::setup_logging;
use crate::app_config::shutdown_manager::ShutdownManager;
use crate::app_config::trader_config::{
    load_trader_configs, traders_config_path, SupervisorConfig, TraderConfig,
};
use crate::trading::ledger::{DecisionLedger, SharedPool};
use crate::trading::task::collaborators::{
    CompletionProvider, ExecutionClient, MarketContextProvider,
};
use crate::trading::task::{AutoTrader, TraderSupervisor};

/// 单个交易单元的外部协作方
pub struct TraderCollaborators {
    pub context_provider: Arc<dyn MarketContextProvider>,
    pub completion: Arc<dyn CompletionProvider>,
    pub executor: Arc<dyn ExecutionClient>,
}

/// 加载 .env 并初始化日志（含 panic hook）
pub async fn app_init() -> anyhow::Result<()> {
    dotenv().ok();
    setup_logging().await?;
    Ok(())
}

/// 为每个交易单元打开账本并注册到调度器
pub async fn build_supervisor<F>(
    configs: Vec<TraderConfig>,
    ledger_config: &LedgerConfig,
    supervisor_config: SupervisorConfig,
    mut collaborators: F,
) -> anyhow::Result<TraderSupervisor>
where
    F: FnMut(&TraderConfig) -> anyhow::Result<TraderCollaborators>,
{
    let supervisor = TraderSupervisor::new(supervisor_config);
    // 所有交易单元共用一个共享库连接池
    let shared = SharedPool::from_config(ledger_config).await;
    for config in configs {
        let parts = collaborators(&config)?;
        let ledger = DecisionLedger::open(&config.id, ledger_config, shared.as_ref()).await?;
        info!("[{}] 决策账本后端: {}", config.id, ledger.backend());
        let trader = AutoTrader::new(
            config,
            Arc::new(ledger),
            parts.context_provider,
            parts.completion,
            parts.executor,
        );
        supervisor.register(Arc::new(trader)).await?;
    }
    Ok(supervisor)
}

/// 启动所有单元，收到退出信号后优雅关闭
pub async fn run_until_signal(supervisor: &TraderSupervisor) -> anyhow::Result<()> {
    if supervisor.start_all().await == 0 {
        warn!("没有可运行的交易单元");
    }

    let signal_name = ShutdownManager::wait_for_shutdown_signal().await?;
    info!("接收到 {} 信号，开始优雅关闭...", signal_name);

    if let Err(e) = supervisor.shutdown().await {
        error!("优雅关闭失败: {:#}", e);
        return Err(e);
    }
    for entry in supervisor.leaderboard().await {
        info!(
            "🏁 {} 收益率 {:.2}% 状态 {:?}",
            entry.name, entry.pn_l_pct, entry.state
        );
    }
    Ok(())
}

/// 完整启动流程
pub async fn run<F>(collaborators: F) -> anyhow::Result<()>
where
    F: FnMut(&TraderConfig) -> anyhow::Result<TraderCollaborators>,
{
    app_init().await?;

    let path = traders_config_path();
    let configs = load_trader_configs(Path::new(&path)).await?;
    if configs.is_empty() {
        return Err(anyhow!("没有启用的交易单元: {}", path));
    }

    let supervisor = build_supervisor(
        configs,
        &LedgerConfig::from_env(),
        SupervisorConfig::from_env(),
        collaborators,
    )
    .await?;
    run_until_signal(&supervisor).await
}
