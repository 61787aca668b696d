//! 账本表结构
//!
//! 时间统一存毫秒时间戳（BIGINT），两种方言共用同一套行模型。
//! 共享库每行带 `trader_id`，唯一约束 (trader_id, cycle_number)；
//! 单机库一个交易单元一份文件，唯一约束只有 cycle_number。

pub const MYSQL_SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS decisions (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        trader_id VARCHAR(128) NOT NULL,
        cycle_number BIGINT NOT NULL,
        ts BIGINT NOT NULL,
        system_prompt LONGTEXT NOT NULL,
        input_prompt LONGTEXT NOT NULL,
        cot_trace LONGTEXT NOT NULL,
        decision_json LONGTEXT NOT NULL,
        raw_response LONGTEXT NULL,
        total_balance DOUBLE NOT NULL DEFAULT 0,
        available_balance DOUBLE NOT NULL DEFAULT 0,
        total_unrealized_profit DOUBLE NOT NULL DEFAULT 0,
        position_count BIGINT NOT NULL DEFAULT 0,
        margin_used_pct DOUBLE NOT NULL DEFAULT 0,
        candidate_coins TEXT NOT NULL,
        execution_log LONGTEXT NOT NULL,
        success INT NOT NULL DEFAULT 0,
        error_message TEXT NOT NULL,
        UNIQUE KEY uk_trader_cycle (trader_id, cycle_number),
        KEY idx_trader_ts (trader_id, ts)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS positions (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        decision_id BIGINT NOT NULL,
        symbol VARCHAR(64) NOT NULL,
        side VARCHAR(16) NOT NULL,
        position_amt DOUBLE NOT NULL DEFAULT 0,
        entry_price DOUBLE NOT NULL DEFAULT 0,
        mark_price DOUBLE NOT NULL DEFAULT 0,
        unrealized_profit DOUBLE NOT NULL DEFAULT 0,
        leverage DOUBLE NOT NULL DEFAULT 0,
        liquidation_price DOUBLE NOT NULL DEFAULT 0,
        KEY idx_decision (decision_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS decision_actions (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        decision_id BIGINT NOT NULL,
        action VARCHAR(32) NOT NULL,
        symbol VARCHAR(64) NOT NULL,
        quantity DOUBLE NOT NULL DEFAULT 0,
        leverage BIGINT NOT NULL DEFAULT 0,
        price DOUBLE NOT NULL DEFAULT 0,
        order_id VARCHAR(128) NOT NULL,
        ts BIGINT NOT NULL,
        success INT NOT NULL DEFAULT 0,
        error TEXT NOT NULL,
        KEY idx_decision (decision_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
];

pub const SQLITE_SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS decisions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cycle_number INTEGER NOT NULL UNIQUE,
        ts INTEGER NOT NULL,
        system_prompt TEXT NOT NULL,
        input_prompt TEXT NOT NULL,
        cot_trace TEXT NOT NULL,
        decision_json TEXT NOT NULL,
        raw_response TEXT NULL,
        total_balance REAL NOT NULL DEFAULT 0,
        available_balance REAL NOT NULL DEFAULT 0,
        total_unrealized_profit REAL NOT NULL DEFAULT 0,
        position_count INTEGER NOT NULL DEFAULT 0,
        margin_used_pct REAL NOT NULL DEFAULT 0,
        candidate_coins TEXT NOT NULL,
        execution_log TEXT NOT NULL,
        success INTEGER NOT NULL DEFAULT 0,
        error_message TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_decisions_ts ON decisions (ts)",
    r#"
    CREATE TABLE IF NOT EXISTS positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        decision_id INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        side TEXT NOT NULL,
        position_amt REAL NOT NULL DEFAULT 0,
        entry_price REAL NOT NULL DEFAULT 0,
        mark_price REAL NOT NULL DEFAULT 0,
        unrealized_profit REAL NOT NULL DEFAULT 0,
        leverage REAL NOT NULL DEFAULT 0,
        liquidation_price REAL NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_positions_decision ON positions (decision_id)",
    r#"
    CREATE TABLE IF NOT EXISTS decision_actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        decision_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        symbol TEXT NOT NULL,
        quantity REAL NOT NULL DEFAULT 0,
        leverage INTEGER NOT NULL DEFAULT 0,
        price REAL NOT NULL DEFAULT 0,
        order_id TEXT NOT NULL,
        ts INTEGER NOT NULL,
        success INTEGER NOT NULL DEFAULT 0,
        error TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_actions_decision ON decision_actions (decision_id)",
];
