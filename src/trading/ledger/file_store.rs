//! JSON 文件账本：每个周期一个文件
//!
//! 关系型存储都不可用时的最后一级降级，同时也是旧版本遗留记录的格式。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::app_error::LedgerError;
use crate::trading::ledger::store::{DecisionStore, LedgerBackend};
use crate::trading::model::decision_record::DecisionRecord;

pub struct FileDecisionStore {
    dir: PathBuf,
}

impl FileDecisionStore {
    /// 打开目录，不存在则创建
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// 只读打开已有目录（旧记录迁移用），目录不存在返回 None
    pub async fn open_existing(dir: impl Into<PathBuf>) -> Option<Self> {
        let dir = dir.into();
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Some(Self { dir }),
            _ => None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, cycle_number: i64) -> PathBuf {
        self.dir.join(format!("decision_cycle{:06}.json", cycle_number))
    }

    /// 读取目录下所有可解析的记录，按周期号升序
    async fn read_all(&self) -> Result<Vec<DecisionRecord>, LedgerError> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("读取决策文件失败 {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<DecisionRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!("解析决策文件失败 {}: {}", path.display(), e),
            }
        }

        records.sort_by_key(|r| r.cycle_number);
        Ok(records)
    }
}

#[async_trait]
impl DecisionStore for FileDecisionStore {
    fn backend(&self) -> LedgerBackend {
        LedgerBackend::JsonFile
    }

    async fn max_cycle_number(&self) -> Result<Option<i64>, LedgerError> {
        let records = self.read_all().await?;
        Ok(records.iter().map(|r| r.cycle_number).max())
    }

    async fn cycle_exists(&self, cycle_number: i64) -> Result<bool, LedgerError> {
        if tokio::fs::try_exists(self.record_path(cycle_number)).await? {
            return Ok(true);
        }
        // 旧版本文件名不同，回退到按内容查找
        let records = self.read_all().await?;
        Ok(records.iter().any(|r| r.cycle_number == cycle_number))
    }

    async fn insert(&self, record: &DecisionRecord) -> Result<(), LedgerError> {
        let path = self.record_path(record.cycle_number);
        if tokio::fs::try_exists(&path).await? {
            return Err(LedgerError::Conflict(format!(
                "周期 #{} 的文件已存在",
                record.cycle_number
            )));
        }

        // 先写临时文件再改名，避免读到半个文件
        let tmp = self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let content = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("周期 #{} 已写入 {}", record.cycle_number, path.display());
        Ok(())
    }

    async fn latest(&self, n: usize) -> Result<Vec<DecisionRecord>, LedgerError> {
        let mut records = self.read_all().await?;
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }

    async fn all(&self) -> Result<Vec<DecisionRecord>, LedgerError> {
        self.read_all().await
    }

    async fn between(&self, start_ms: i64, end_ms: i64) -> Result<Vec<DecisionRecord>, LedgerError> {
        let records = self.read_all().await?;
        Ok(records
            .into_iter()
            .filter(|r| {
                let ts = r.timestamp_ms();
                ts >= start_ms && ts < end_ms
            })
            .collect())
    }

    async fn purge_before(&self, cutoff_ms: i64) -> Result<u64, LedgerError> {
        let mut deleted = 0u64;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<DecisionRecord>(&content) else {
                continue;
            };
            if !record.is_seed() && record.timestamp_ms() < cutoff_ms {
                tokio::fs::remove_file(&path).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
