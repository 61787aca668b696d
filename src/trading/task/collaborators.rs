//! 外部协作方接口：上下文构建、模型调用、下单执行

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::app_config::trader_config::TraderConfig;
use crate::trading::context::{Context, CycleInfo, PerformanceView, PromptPair};
use crate::trading::decision::Decision;

/// 组装周期上下文、渲染提示词
#[async_trait]
pub trait MarketContextProvider: Send + Sync {
    async fn build_context(
        &self,
        config: &TraderConfig,
        cycle: CycleInfo,
        performance: Option<Arc<dyn PerformanceView>>,
    ) -> Result<Context>;

    fn render_prompts(&self, context: &Context) -> PromptPair;
}

/// 语言模型补全
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// 一次下单的成交结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub price: f64,
    pub quantity: f64,
    pub order_id: String,
}

/// 交易所执行
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn execute(&self, decision: &Decision) -> Result<ExecutionReport>;
}
