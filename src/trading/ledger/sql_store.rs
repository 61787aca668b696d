//! 关系型账本存储（共享 MySQL / 单机 SQLite）

use std::collections::HashMap;

use async_trait::async_trait;
use rbatis::executor::RBatisTxExecutor;
use rbatis::RBatis;
use rbs::Value;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app_config::db::{connect_mysql, LedgerConfig};
use crate::error::app_error::LedgerError;
use crate::time_util::ms_to_utc;
use crate::trading::ledger::schema::{MYSQL_SCHEMA, SQLITE_SCHEMA};
use crate::trading::ledger::store::{DecisionStore, LedgerBackend, Statistics};
use crate::trading::model::decision_record::{
    AccountSnapshot, DecisionAction, DecisionRecord, PositionSnapshot,
};

/// 子表按 decision_id 批量加载时每批的 id 数
const CHILD_BATCH_SIZE: usize = 500;

/// 主表自由文本列
const TEXT_COLUMNS: [&str; 8] = [
    "system_prompt",
    "input_prompt",
    "cot_trace",
    "decision_json",
    "raw_response",
    "candidate_coins",
    "execution_log",
    "error_message",
];

/// SQL 方言
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlDialect {
    /// 共享库，每行带交易单元ID
    SharedMysql { trader_id: String },
    /// 单机库，一个交易单元一份文件
    EmbeddedSqlite,
}

#[derive(Debug, Clone, Deserialize)]
struct DecisionRow {
    id: i64,
    cycle_number: i64,
    ts: i64,
    system_prompt: Value,
    input_prompt: Value,
    cot_trace: Value,
    decision_json: Value,
    raw_response: Value,
    total_balance: f64,
    available_balance: f64,
    total_unrealized_profit: f64,
    position_count: i64,
    margin_used_pct: f64,
    candidate_coins: Value,
    execution_log: Value,
    success: i64,
    error_message: Value,
}

impl DecisionRow {
    fn into_record(
        self,
        positions: Vec<PositionSnapshot>,
        decisions: Vec<DecisionAction>,
    ) -> DecisionRecord {
        DecisionRecord {
            timestamp: ms_to_utc(self.ts),
            cycle_number: self.cycle_number,
            system_prompt: column_text(self.system_prompt),
            input_prompt: column_text(self.input_prompt),
            cot_trace: column_text(self.cot_trace),
            decision_json: column_text(self.decision_json),
            raw_response: match self.raw_response {
                Value::Null => None,
                raw => Some(column_text(raw)),
            },
            account_state: AccountSnapshot {
                total_balance: self.total_balance,
                available_balance: self.available_balance,
                total_unrealized_profit: self.total_unrealized_profit,
                position_count: self.position_count,
                margin_used_pct: self.margin_used_pct,
            },
            positions,
            candidate_coins: serde_json::from_str(&column_text(self.candidate_coins))
                .unwrap_or_default(),
            decisions,
            execution_log: serde_json::from_str(&column_text(self.execution_log))
                .unwrap_or_default(),
            success: self.success != 0,
            error_message: column_text(self.error_message),
        }
    }
}

/// 文本列还原成原始字符串
///
/// rbdc-sqlite 会把形如 `[...]`/`{...}` 的 TEXT 自动解析成结构化值，
/// 所以 SQLite 查询把文本列转成 BLOB 读出；结构化值只作兜底，按 JSON 重新序列化。
fn column_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        other => serde_json::to_string(&other).unwrap_or_default(),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PositionRow {
    decision_id: i64,
    symbol: Value,
    side: Value,
    position_amt: f64,
    entry_price: f64,
    mark_price: f64,
    unrealized_profit: f64,
    leverage: f64,
    liquidation_price: f64,
}

impl PositionRow {
    fn to_domain(&self) -> PositionSnapshot {
        PositionSnapshot {
            symbol: column_text(self.symbol.clone()),
            side: column_text(self.side.clone()),
            position_amt: self.position_amt,
            entry_price: self.entry_price,
            mark_price: self.mark_price,
            unrealized_profit: self.unrealized_profit,
            leverage: self.leverage,
            liquidation_price: self.liquidation_price,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ActionRow {
    decision_id: i64,
    action: Value,
    symbol: Value,
    quantity: f64,
    leverage: i64,
    price: f64,
    order_id: Value,
    ts: i64,
    success: i64,
    error: Value,
}

impl ActionRow {
    fn to_domain(&self) -> DecisionAction {
        DecisionAction {
            action: column_text(self.action.clone()),
            symbol: column_text(self.symbol.clone()),
            quantity: self.quantity,
            leverage: self.leverage,
            price: self.price,
            order_id: column_text(self.order_id.clone()),
            timestamp: ms_to_utc(self.ts),
            success: self.success != 0,
            error: column_text(self.error.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MaxCycleRow {
    max_cycle: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    cnt: i64,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: i64,
}

async fn create_tables(rb: &RBatis, statements: &[&str]) -> Result<(), LedgerError> {
    for sql in statements {
        rb.exec(sql, vec![]).await?;
    }
    Ok(())
}

/// 进程内共享的 MySQL 连接池
///
/// 连接和建表整个进程只做一次，各交易单元的存储复用同一个连接池，按 trader_id 区分数据。
#[derive(Clone)]
pub struct SharedPool {
    rb: RBatis,
}

impl SharedPool {
    pub async fn connect(url: &str, config: &LedgerConfig) -> Result<Self, LedgerError> {
        let rb = connect_mysql(url, config.max_connections, config.connect_timeout).await?;
        match tokio::time::timeout(config.connect_timeout, create_tables(&rb, &MYSQL_SCHEMA)).await {
            Ok(result) => result?,
            Err(_) => return Err(LedgerError::Timeout("共享数据库建表超时".to_string())),
        }
        info!("共享账本表结构已就绪");
        Ok(Self { rb })
    }

    /// 未配置或不可用时返回 None，各交易单元改用本地存储
    pub async fn from_config(config: &LedgerConfig) -> Option<Self> {
        let url = config.shared_url.as_deref()?;
        match Self::connect(url, config).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("共享数据库不可用，交易单元将降级到本地 SQLite: {}", e);
                None
            }
        }
    }

    /// 某个交易单元在共享库上的存储视图
    pub fn store_for(&self, trader_id: &str) -> SqlDecisionStore {
        SqlDecisionStore {
            rb: self.rb.clone(),
            dialect: SqlDialect::SharedMysql {
                trader_id: trader_id.to_string(),
            },
        }
    }
}

/// 基于 rbatis 的决策记录存储
pub struct SqlDecisionStore {
    rb: RBatis,
    dialect: SqlDialect,
}

impl SqlDecisionStore {
    /// 绑定单机 SQLite 连接并建表
    pub async fn embedded(rb: RBatis) -> Result<Self, LedgerError> {
        create_tables(&rb, &SQLITE_SCHEMA).await?;
        debug!("本地账本表结构已就绪");
        Ok(Self {
            rb,
            dialect: SqlDialect::EmbeddedSqlite,
        })
    }

    pub fn dialect(&self) -> &SqlDialect {
        &self.dialect
    }

    /// 按交易单元过滤的 WHERE 条件；alias 为空时不带表前缀
    fn scope(&self, alias: &str) -> (String, Vec<Value>) {
        match &self.dialect {
            SqlDialect::SharedMysql { trader_id } => {
                let column = if alias.is_empty() {
                    "trader_id = ?".to_string()
                } else {
                    format!("{}.trader_id = ?", alias)
                };
                (column, vec![trader_id.clone().into()])
            }
            SqlDialect::EmbeddedSqlite => ("1 = 1".to_string(), vec![]),
        }
    }

    /// SQLite 下文本列按 BLOB 读出，避免被驱动当成 JSON 解析
    fn text_column(&self, alias: &str, column: &str) -> String {
        let qualified = if alias.is_empty() {
            column.to_string()
        } else {
            format!("{}.{}", alias, column)
        };
        match self.dialect {
            SqlDialect::SharedMysql { .. } => qualified,
            SqlDialect::EmbeddedSqlite => format!("CAST({} AS BLOB) AS {}", qualified, column),
        }
    }

    fn decision_columns(&self) -> String {
        let text: Vec<String> = TEXT_COLUMNS
            .iter()
            .map(|c| self.text_column("", c))
            .collect();
        format!(
            "id, cycle_number, ts, total_balance, available_balance, total_unrealized_profit, \
             position_count, margin_used_pct, success, {}",
            text.join(", ")
        )
    }

    async fn count(&self, sql: &str, params: Vec<Value>) -> Result<i64, LedgerError> {
        let rows: Vec<CountRow> = self.rb.query_decode(sql, params).await?;
        Ok(rows.first().map(|r| r.cnt).unwrap_or(0))
    }

    /// 查询主表并批量挂载持仓和动作
    async fn load(&self, sql: &str, params: Vec<Value>) -> Result<Vec<DecisionRecord>, LedgerError> {
        let rows: Vec<DecisionRow> = self.rb.query_decode(sql, params).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut positions: HashMap<i64, Vec<PositionSnapshot>> = HashMap::new();
        let mut actions: HashMap<i64, Vec<DecisionAction>> = HashMap::new();

        for chunk in ids.chunks(CHILD_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let params: Vec<Value> = chunk.iter().map(|id| (*id).into()).collect();

            let sql = format!(
                "SELECT decision_id, {}, {}, position_amt, entry_price, mark_price, \
                 unrealized_profit, leverage, liquidation_price \
                 FROM positions WHERE decision_id IN ({}) ORDER BY id ASC",
                self.text_column("", "symbol"),
                self.text_column("", "side"),
                placeholders
            );
            let rows: Vec<PositionRow> = self.rb.query_decode(&sql, params.clone()).await?;
            for row in rows {
                positions.entry(row.decision_id).or_default().push(row.to_domain());
            }

            let sql = format!(
                "SELECT decision_id, {}, {}, quantity, leverage, price, {}, ts, success, {} \
                 FROM decision_actions WHERE decision_id IN ({}) ORDER BY id ASC",
                self.text_column("", "action"),
                self.text_column("", "symbol"),
                self.text_column("", "order_id"),
                self.text_column("", "error"),
                placeholders
            );
            let rows: Vec<ActionRow> = self.rb.query_decode(&sql, params).await?;
            for row in rows {
                actions.entry(row.decision_id).or_default().push(row.to_domain());
            }
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id;
                row.into_record(
                    positions.remove(&id).unwrap_or_default(),
                    actions.remove(&id).unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn insert_in_tx(
        &self,
        tx: &RBatisTxExecutor,
        record: &DecisionRecord,
    ) -> Result<(), LedgerError> {
        let (tenant_column, tenant_placeholder, mut params): (&str, &str, Vec<Value>) =
            match &self.dialect {
                SqlDialect::SharedMysql { trader_id } => {
                    ("trader_id, ", "?, ", vec![trader_id.clone().into()])
                }
                SqlDialect::EmbeddedSqlite => ("", "", vec![]),
            };

        let sql = format!(
            "INSERT INTO decisions ({}cycle_number, ts, system_prompt, input_prompt, cot_trace, \
             decision_json, raw_response, total_balance, available_balance, \
             total_unrealized_profit, position_count, margin_used_pct, candidate_coins, \
             execution_log, success, error_message) \
             VALUES ({}?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            tenant_column, tenant_placeholder
        );
        let account = &record.account_state;
        params.push(record.cycle_number.into());
        params.push(record.timestamp_ms().into());
        params.push(record.system_prompt.clone().into());
        params.push(record.input_prompt.clone().into());
        params.push(record.cot_trace.clone().into());
        params.push(record.decision_json.clone().into());
        params.push(match &record.raw_response {
            Some(raw) => raw.clone().into(),
            None => Value::Null,
        });
        params.push(account.total_balance.into());
        params.push(account.available_balance.into());
        params.push(account.total_unrealized_profit.into());
        params.push(account.position_count.into());
        params.push(account.margin_used_pct.into());
        params.push(serde_json::to_string(&record.candidate_coins)?.into());
        params.push(serde_json::to_string(&record.execution_log)?.into());
        params.push((record.success as i64).into());
        params.push(record.error_message.clone().into());

        let result = tx.exec(&sql, params).await?;
        let decision_id = match result.last_insert_id.as_i64() {
            Some(id) if id > 0 => id,
            _ => {
                let (scope, mut params) = self.scope("");
                params.push(record.cycle_number.into());
                let sql = format!(
                    "SELECT id FROM decisions WHERE {} AND cycle_number = ?",
                    scope
                );
                let rows: Vec<IdRow> = tx.exec_decode(&sql, params).await?;
                rows.first().map(|r| r.id).ok_or_else(|| {
                    LedgerError::Database(format!(
                        "写入后找不到周期 #{} 的记录ID",
                        record.cycle_number
                    ))
                })?
            }
        };

        for position in &record.positions {
            tx.exec(
                "INSERT INTO positions (decision_id, symbol, side, position_amt, entry_price, \
                 mark_price, unrealized_profit, leverage, liquidation_price) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    decision_id.into(),
                    position.symbol.clone().into(),
                    position.side.clone().into(),
                    position.position_amt.into(),
                    position.entry_price.into(),
                    position.mark_price.into(),
                    position.unrealized_profit.into(),
                    position.leverage.into(),
                    position.liquidation_price.into(),
                ],
            )
            .await?;
        }

        for action in &record.decisions {
            tx.exec(
                "INSERT INTO decision_actions (decision_id, action, symbol, quantity, leverage, \
                 price, order_id, ts, success, error) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    decision_id.into(),
                    action.action.clone().into(),
                    action.symbol.clone().into(),
                    action.quantity.into(),
                    action.leverage.into(),
                    action.price.into(),
                    action.order_id.clone().into(),
                    action.timestamp.timestamp_millis().into(),
                    (action.success as i64).into(),
                    action.error.clone().into(),
                ],
            )
            .await?;
        }

        Ok(())
    }

    async fn purge_in_tx(&self, tx: &RBatisTxExecutor, cutoff_ms: i64) -> Result<u64, LedgerError> {
        let (scope, scope_params) = self.scope("");
        let filter = format!("{} AND ts < ? AND cycle_number > 0", scope);
        let mut params = scope_params;
        params.push(cutoff_ms.into());

        for child in ["positions", "decision_actions"] {
            let sql = format!(
                "DELETE FROM {} WHERE decision_id IN (SELECT id FROM decisions WHERE {})",
                child, filter
            );
            tx.exec(&sql, params.clone()).await?;
        }
        let sql = format!("DELETE FROM decisions WHERE {}", filter);
        let result = tx.exec(&sql, params).await?;
        Ok(result.rows_affected)
    }
}

#[async_trait]
impl DecisionStore for SqlDecisionStore {
    fn backend(&self) -> LedgerBackend {
        match self.dialect {
            SqlDialect::SharedMysql { .. } => LedgerBackend::SharedMysql,
            SqlDialect::EmbeddedSqlite => LedgerBackend::EmbeddedSqlite,
        }
    }

    async fn max_cycle_number(&self) -> Result<Option<i64>, LedgerError> {
        let (scope, params) = self.scope("");
        let sql = format!(
            "SELECT MAX(cycle_number) AS max_cycle FROM decisions WHERE {}",
            scope
        );
        let rows: Vec<MaxCycleRow> = self.rb.query_decode(&sql, params).await?;
        Ok(rows.first().and_then(|r| r.max_cycle))
    }

    async fn cycle_exists(&self, cycle_number: i64) -> Result<bool, LedgerError> {
        let (scope, mut params) = self.scope("");
        params.push(cycle_number.into());
        let sql = format!(
            "SELECT COUNT(*) AS cnt FROM decisions WHERE {} AND cycle_number = ?",
            scope
        );
        Ok(self.count(&sql, params).await? > 0)
    }

    async fn insert(&self, record: &DecisionRecord) -> Result<(), LedgerError> {
        let tx = self.rb.acquire_begin().await?;
        let result = self.insert_in_tx(&tx, record).await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                debug!("周期 #{} 已写入 {:?}", record.cycle_number, self.dialect);
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("周期 #{} 写入失败后回滚出错: {}", record.cycle_number, rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn latest(&self, n: usize) -> Result<Vec<DecisionRecord>, LedgerError> {
        let (scope, mut params) = self.scope("");
        params.push((n as i64).into());
        let sql = format!(
            "SELECT * FROM (SELECT {} FROM decisions WHERE {} ORDER BY cycle_number DESC LIMIT ?) t \
             ORDER BY cycle_number ASC",
            self.decision_columns(), scope
        );
        self.load(&sql, params).await
    }

    async fn all(&self) -> Result<Vec<DecisionRecord>, LedgerError> {
        let (scope, params) = self.scope("");
        let sql = format!(
            "SELECT {} FROM decisions WHERE {} ORDER BY cycle_number ASC",
            self.decision_columns(), scope
        );
        self.load(&sql, params).await
    }

    async fn between(&self, start_ms: i64, end_ms: i64) -> Result<Vec<DecisionRecord>, LedgerError> {
        let (scope, mut params) = self.scope("");
        params.push(start_ms.into());
        params.push(end_ms.into());
        let sql = format!(
            "SELECT {} FROM decisions WHERE {} AND ts >= ? AND ts < ? ORDER BY cycle_number ASC",
            self.decision_columns(), scope
        );
        self.load(&sql, params).await
    }

    async fn purge_before(&self, cutoff_ms: i64) -> Result<u64, LedgerError> {
        let tx = self.rb.acquire_begin().await?;
        let result = self.purge_in_tx(&tx, cutoff_ms).await;
        match result {
            Ok(deleted) => {
                tx.commit().await?;
                Ok(deleted)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("清理历史记录失败后回滚出错: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn statistics(&self) -> Result<Statistics, LedgerError> {
        let (scope, params) = self.scope("");
        let total = self
            .count(
                &format!(
                    "SELECT COUNT(*) AS cnt FROM decisions WHERE {} AND cycle_number > 0",
                    scope
                ),
                params.clone(),
            )
            .await?;
        let successful = self
            .count(
                &format!(
                    "SELECT COUNT(*) AS cnt FROM decisions WHERE {} AND cycle_number > 0 AND success = 1",
                    scope
                ),
                params,
            )
            .await?;

        let (scope, params) = self.scope("d");
        let action_count = |actions: &'static str| {
            format!(
                "SELECT COUNT(*) AS cnt FROM decision_actions a JOIN decisions d ON a.decision_id = d.id \
                 WHERE {} AND d.cycle_number > 0 AND a.success = 1 AND a.action IN ({})",
                scope, actions
            )
        };
        let opens = self
            .count(&action_count("'open_long', 'open_short'"), params.clone())
            .await?;
        let closes = self
            .count(&action_count("'close_long', 'close_short'"), params)
            .await?;

        Ok(Statistics {
            total_cycles: total,
            successful_cycles: successful,
            failed_cycles: total - successful,
            total_open_positions: opens,
            total_close_positions: closes,
        })
    }
}
