#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use rust_quant_agent::app_config::db::LedgerConfig;
use rust_quant_agent::app_config::trader_config::TraderConfig;
use rust_quant_agent::trading::context::{
    CandidateCoin, Context, CycleInfo, PerformanceView, PromptPair,
};
use rust_quant_agent::trading::decision::Decision;
use rust_quant_agent::trading::ledger::DecisionLedger;
use rust_quant_agent::trading::model::decision_record::AccountSnapshot;
use rust_quant_agent::trading::task::collaborators::{
    CompletionProvider, ExecutionClient, ExecutionReport, MarketContextProvider,
};
use rust_quant_agent::trading::task::AutoTrader;

pub const OPEN_BTC_RESPONSE: &str = r#"<reasoning>BTC 回踩支撑，开多</reasoning>
<decision>
```json
[
  {"symbol": "BTCUSDT", "action": "open_long", "leverage": 5, "position_size_usd": 1000,
   "stop_loss": 95000, "take_profit": 110000, "confidence": 80, "risk_usd": 50,
   "reasoning": "support holds"},
  {"symbol": "ETHUSDT", "action": "hold", "reasoning": "keep"}
]
```
</decision>"#;

pub struct StaticContext {
    pub equity: f64,
}

#[async_trait]
impl MarketContextProvider for StaticContext {
    async fn build_context(
        &self,
        _config: &TraderConfig,
        cycle: CycleInfo,
        performance: Option<Arc<dyn PerformanceView>>,
    ) -> Result<Context> {
        Ok(Context {
            current_time: Utc::now(),
            cycle,
            account: AccountSnapshot {
                total_balance: self.equity,
                available_balance: self.equity,
                ..Default::default()
            },
            positions: vec![],
            candidate_coins: vec![CandidateCoin {
                symbol: "BTCUSDT".to_string(),
                sources: vec!["ai500".to_string()],
            }],
            market_summaries: HashMap::new(),
            performance,
        })
    }

    fn render_prompts(&self, context: &Context) -> PromptPair {
        PromptPair {
            system: "你是交易员".to_string(),
            user: format!("cycle {}", context.cycle.cycle_number),
        }
    }
}

/// 固定返回同一段模型输出
pub struct CannedCompletion {
    pub response: String,
    pub delay: Duration,
}

impl CannedCompletion {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl CompletionProvider for CannedCompletion {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.response.clone())
    }
}

/// 每次调用都 panic
pub struct PanickingCompletion {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CompletionProvider for PanickingCompletion {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("model client crashed");
    }
}

/// 记录下单顺序；symbols 中的币种下单失败
#[derive(Default)]
pub struct RecordingExecutor {
    pub executed: Mutex<Vec<String>>,
    pub rejected_symbols: Vec<String>,
}

#[async_trait]
impl ExecutionClient for RecordingExecutor {
    async fn execute(&self, decision: &Decision) -> Result<ExecutionReport> {
        self.executed
            .lock()
            .await
            .push(format!("{} {}", decision.action, decision.symbol));
        if self.rejected_symbols.contains(&decision.symbol) {
            return Err(anyhow!("insufficient margin"));
        }
        Ok(ExecutionReport {
            price: 100000.0,
            quantity: decision.position_size_usd / 100000.0,
            order_id: format!("order-{}", decision.symbol),
        })
    }
}

pub fn ledger_config(dir: &Path) -> LedgerConfig {
    LedgerConfig {
        shared_url: None,
        max_connections: 5,
        data_dir: dir.to_path_buf(),
        connect_timeout: Duration::from_secs(5),
        query_timeout: Duration::from_secs(5),
    }
}

pub async fn build_trader(
    dir: &Path,
    config: TraderConfig,
    completion: Arc<dyn CompletionProvider>,
    executor: Arc<dyn ExecutionClient>,
) -> AutoTrader {
    let ledger = DecisionLedger::open(&config.id, &ledger_config(dir), None)
        .await
        .unwrap();
    AutoTrader::new(
        config,
        Arc::new(ledger),
        Arc::new(StaticContext { equity: 1000.0 }),
        completion,
        executor,
    )
}
