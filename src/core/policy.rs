use crate::core::{IndexDescriptor, LiveIndex, LiveIndexView};

/// 默认同时存活的受管索引上限
pub const DEFAULT_CAPACITY: usize = 3;

/// 策略决策（纯函数结果，不抛错）
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// 目标名字已经存活：不淘汰、不重建
    AlreadyLive,
    /// 有空位，直接创建
    Admit,
    /// 已满：先按 FIFO 顺序淘汰 victims 再创建。
    /// 之前的淘汰失败会让存活数超出容量，这里一次补齐，回到 `capacity - 1` 再放入新索引
    Evict { victims: Vec<LiveIndex> },
}

impl Decision {
    pub fn must_evict(&self) -> bool {
        matches!(self, Decision::Evict { .. })
    }

    pub fn victims(&self) -> &[LiveIndex] {
        match self {
            Decision::Evict { victims } => victims,
            _ => &[],
        }
    }
}

/// FIFO 淘汰策略。
///
/// - 请求的名字已在视图中 → `AlreadyLive`（优先于容量判断）
/// - `|live| >= capacity` → 淘汰 (created_at, record_id) 最小的 `|live| - capacity + 1` 项
/// - 否则 → `Admit`
#[derive(Clone, Copy, Debug)]
pub struct LifecyclePolicy {
    capacity: usize,
}

impl LifecyclePolicy {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn decide(&self, live: &LiveIndexView, request: &IndexDescriptor) -> Decision {
        if live.contains(request.name()) {
            return Decision::AlreadyLive;
        }
        if live.len() < self.capacity {
            return Decision::Admit;
        }
        let mut ordered: Vec<&LiveIndex> = live.iter().collect();
        ordered.sort_by_key(|e| e.order_key());
        let excess = live.len() - self.capacity + 1;
        Decision::Evict {
            victims: ordered.into_iter().take(excess).cloned().collect(),
        }
    }
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
