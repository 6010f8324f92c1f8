use crate::error::{Result, SyncError};
use crate::storage::{FileInfo, Storage};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::btree_map::{self, BTreeMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 列举得到的对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub key: String,
    pub size: u64,
    /// 内容指纹，未知时为 None
    pub checksum: Option<String>,
    pub modified_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(key: impl Into<String>, size: u64, checksum: Option<&str>) -> Self {
        Self {
            key: key.into(),
            size,
            checksum: checksum.map(String::from),
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl From<FileInfo> for Entry {
    fn from(file: FileInfo) -> Self {
        Self {
            key: file.path,
            size: file.size,
            checksum: file.checksum,
            modified_at: file.modified_time,
        }
    }
}

/// 一端在某一时刻的快照，按 key 排序，构建后只读
#[derive(Debug, Clone, Default)]
pub struct Listing {
    entries: BTreeMap<String, Entry>,
}

impl Listing {
    /// 空列表（目标不存在时使用）
    pub fn empty() -> Self {
        Self::default()
    }

    /// 由条目构建；key 重复时返回重复的 key
    pub fn from_entries(entries: impl IntoIterator<Item = Entry>) -> Result<Self, String> {
        let mut map = BTreeMap::new();
        for entry in entries {
            match map.entry(entry.key.clone()) {
                btree_map::Entry::Occupied(_) => return Err(entry.key),
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
            }
        }
        Ok(Self { entries: map })
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按 key 顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}

/// 对象列举器
#[derive(Debug, Clone, Default)]
pub struct ObjectLister {
    /// 位置不存在时视为空列表（用于目标）
    missing_ok: bool,
    cancel: Option<CancellationToken>,
}

impl ObjectLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing_ok(mut self, missing_ok: bool) -> Self {
        self.missing_ok = missing_ok;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.is_cancelled())
            .unwrap_or(false)
    }

    /// 列举存储中的全部对象；中途出错时整体失败，不返回部分结果
    pub async fn list(&self, storage: &dyn Storage) -> Result<Listing> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!("开始列举: {}", storage.name());

        let Some(mut stream) = storage
            .list()
            .await
            .map_err(|e| SyncError::listing(storage.name(), format!("{:#}", e)))?
        else {
            if self.missing_ok {
                info!("{} 不存在，按空列表处理", storage.name());
                return Ok(Listing::empty());
            }
            return Err(SyncError::listing(storage.name(), "位置不存在"));
        };

        let mut entries = Vec::new();
        let mut dir_count = 0usize;

        while let Some(file) = stream
            .try_next()
            .await
            .map_err(|e| SyncError::listing(storage.name(), format!("{:#}", e)))?
        {
            // 每处理一定数量检查一次取消状态
            if entries.len() % 100 == 0 && self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            if file.is_dir {
                dir_count += 1;
                continue;
            }

            debug!("发现对象: {} ({} 字节)", file.path, file.size);
            entries.push(Entry::from(file));
        }

        let listing = Listing::from_entries(entries).map_err(|key| {
            SyncError::listing(storage.name(), format!("重复的 key: {}", key))
        })?;

        info!(
            "列举完成: {} 个对象 ({} 字节), 跳过 {} 个目录",
            listing.len(),
            listing.total_bytes(),
            dir_count
        );

        Ok(listing)
    }
}
