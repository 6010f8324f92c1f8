use crate::core::lister::{Entry, Listing};
use serde::Serialize;

/// 同步动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    /// 复制源对象到目标
    Copy { key: String, entry: Entry },
    /// 删除目标中多余的对象（仅镜像模式）
    Delete { key: String },
}

impl Action {
    pub fn key(&self) -> &str {
        match self {
            Action::Copy { key, .. } | Action::Delete { key } => key,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, Action::Copy { .. })
    }
}

/// 动作统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSummary {
    pub copy_count: usize,
    pub copy_bytes: u64,
    pub delete_count: usize,
    /// 两边相同而跳过的对象
    pub skip_count: usize,
}

impl ActionSummary {
    pub fn total_actions(&self) -> usize {
        self.copy_count + self.delete_count
    }
}

/// 源与目标是否需要复制
///
/// 大小不同必然不同；两边都有校验和时再比较校验和。
/// 只有一边有校验和（例如多段上传的 ETag）时按大小判断。
pub fn needs_copy(source: &Entry, target: &Entry) -> bool {
    if source.size != target.size {
        tracing::debug!(
            "大小不同: {} (src={}, dst={})",
            source.key,
            source.size,
            target.size
        );
        return true;
    }

    match (&source.checksum, &target.checksum) {
        (Some(src), Some(dst)) if !src.eq_ignore_ascii_case(dst) => {
            tracing::debug!("校验和不同: {} (src={}, dst={})", source.key, src, dst);
            true
        }
        _ => false,
    }
}

/// 比较两个列表，返回同步动作
///
/// 复制按源列表顺序排在前面，删除排在最后。
pub fn plan(source: &Listing, target: &Listing, mirror: bool) -> Vec<Action> {
    let mut actions: Vec<Action> = source
        .iter()
        .filter(|src| match target.get(&src.key) {
            Some(dst) => needs_copy(src, dst),
            None => true,
        })
        .map(|src| Action::Copy {
            key: src.key.clone(),
            entry: src.clone(),
        })
        .collect();

    if mirror {
        actions.extend(
            target
                .iter()
                .filter(|dst| !source.contains_key(&dst.key))
                .map(|dst| Action::Delete {
                    key: dst.key.clone(),
                }),
        );
    }

    actions
}

/// 统计同步动作
pub fn summarize(source: &Listing, actions: &[Action]) -> ActionSummary {
    let mut summary = ActionSummary::default();

    for action in actions {
        match action {
            Action::Copy { entry, .. } => {
                summary.copy_count += 1;
                summary.copy_bytes += entry.size;
            }
            Action::Delete { .. } => summary.delete_count += 1,
        }
    }
    summary.skip_count = source.len() - summary.copy_count;

    summary
}
