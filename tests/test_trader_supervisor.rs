mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_quant_agent::app_config::trader_config::{SupervisorConfig, TraderConfig};
use rust_quant_agent::error::app_error::SupervisorError;
use rust_quant_agent::trading::task::{TraderSupervisor, UnitState};

use common::{build_trader, CannedCompletion, PanickingCompletion, RecordingExecutor, OPEN_BTC_RESPONSE};

fn supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        restart_backoff: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(5),
    }
}

async fn wait_for_state(supervisor: &TraderSupervisor, id: &str, expected: UnitState) {
    for _ in 0..100 {
        if supervisor.unit_state(id).await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "{} 未进入 {:?}，当前 {:?}",
        id,
        expected,
        supervisor.unit_state(id).await
    );
}

#[tokio::test]
async fn test_panicking_unit_restarts_once_without_affecting_others() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let faulty = build_trader(
        dir.path(),
        TraderConfig::new("faulty", 1000.0),
        Arc::new(PanickingCompletion { calls: calls.clone() }),
        Arc::new(RecordingExecutor::default()),
    )
    .await;
    let healthy = build_trader(
        dir.path(),
        TraderConfig::new("healthy", 1000.0),
        Arc::new(CannedCompletion::new(OPEN_BTC_RESPONSE)),
        Arc::new(RecordingExecutor::default()),
    )
    .await;
    let healthy_ledger = healthy.ledger().clone();

    let supervisor = TraderSupervisor::new(supervisor_config());
    supervisor.register(Arc::new(faulty)).await.unwrap();
    supervisor.register(Arc::new(healthy)).await.unwrap();
    assert_eq!(supervisor.start_all().await, 2);

    wait_for_state(&supervisor, "faulty", UnitState::Stopped).await;
    // 首次运行 + 重启一次
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let healthy_state = supervisor.unit_state("healthy").await.unwrap();
    assert!(
        !matches!(healthy_state, UnitState::Faulted | UnitState::Stopped),
        "{:?}",
        healthy_state
    );
    for _ in 0..100 {
        if healthy_ledger.current_cycle().await >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(healthy_ledger.current_cycle().await >= 1);

    supervisor.shutdown().await.unwrap();
    assert_eq!(
        supervisor.unit_state("healthy").await.unwrap(),
        UnitState::Stopped
    );
}

#[tokio::test]
async fn test_register_and_lookup_errors() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = TraderSupervisor::new(supervisor_config());
    let first = build_trader(
        dir.path(),
        TraderConfig::new("solo", 1000.0),
        Arc::new(CannedCompletion::new("[]")),
        Arc::new(RecordingExecutor::default()),
    )
    .await;
    let ledger = first.ledger().clone();
    supervisor.register(Arc::new(first)).await.unwrap();

    let duplicate = rust_quant_agent::trading::task::AutoTrader::new(
        TraderConfig::new("solo", 1000.0),
        ledger,
        Arc::new(common::StaticContext { equity: 1000.0 }),
        Arc::new(CannedCompletion::new("[]")),
        Arc::new(RecordingExecutor::default()),
    );
    assert!(matches!(
        supervisor.register(Arc::new(duplicate)).await,
        Err(SupervisorError::AlreadyRegistered(_))
    ));
    assert!(matches!(
        supervisor.unit_state("missing").await,
        Err(SupervisorError::UnitNotFound(_))
    ));
    assert_eq!(supervisor.unit_state("solo").await.unwrap(), UnitState::Idle);

    supervisor.start("solo").await.unwrap();
    assert!(matches!(
        supervisor.start("solo").await,
        Err(SupervisorError::AlreadyRunning(_))
    ));
    supervisor.shutdown().await.unwrap();
    // 重复关闭不会重复注册回调
    supervisor.shutdown().await.unwrap();
    assert_eq!(supervisor.shutdown_manager().hook_count().await, 1);
    assert!(supervisor.shutdown_manager().is_shutting_down());
}

#[tokio::test]
async fn test_leaderboard_ranks_and_flags_shared_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = TraderSupervisor::new(supervisor_config());
    // 两个单元的上下文返回同样的权益，视为共用账户
    for (id, initial) in [("a", 800.0), ("b", 1000.0)] {
        let trader = build_trader(
            dir.path(),
            TraderConfig::new(id, initial),
            Arc::new(CannedCompletion::new("[]")),
            Arc::new(RecordingExecutor::default()),
        )
        .await;
        trader.prepare().await;
        trader.run_cycle().await.unwrap();
        supervisor.register(Arc::new(trader)).await.unwrap();
    }

    let board = supervisor.leaderboard().await;
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].trader_id, "a");
    assert!((board[0].pn_l_pct - 25.0).abs() < 1e-9);
    assert_eq!(board[0].shared_with, vec!["b".to_string()]);
    assert_eq!(board[1].pn_l_pct, 0.0);
    assert_eq!(board[0].call_count, 1);
}
