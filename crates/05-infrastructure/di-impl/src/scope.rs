//! 作用域实例
//!
//! 每个作用域持有自己的共享实例槽位和需要释放的实例。子作用域强引用父作用域，
//! 父作用域只弱引用子作用域；释放时先子后父，同一作用域内按创建的逆序释放。
//!
//! 槽位记录正在构造它的线程。其他线程遇到未完成的槽位时在该作用域的条件变量上等待，
//! 只阻塞在这一个槽位上；构造线程自己的重入请求直接拿到临时实例。

use chrono::{DateTime, Utc};
use di_abstractions::{PartActivator, PartInstance};
use infrastructure_common::{ActivationError, ActivationResult, DisposalError, DisposalFailure};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// 共享实例槽位状态
#[derive(Clone)]
pub(crate) enum SharedSlot {
    /// 正在构造，尚无实例
    Allocating(ThreadId),
    /// 已构造，导入尚未全部满足；只对构造线程可见
    Provisional { instance: PartInstance, builder: ThreadId },
    /// 完成
    Ready(PartInstance),
    /// 构造失败且按配置缓存了失败
    Failed(String),
}

/// 认领槽位的结果
pub(crate) enum SlotClaim {
    Ready(PartInstance),
    /// 当前线程自己发布的临时实例
    Provisional(PartInstance),
    /// 槽位已交给当前线程构造
    Claimed,
}

struct TrackedInstance {
    part: String,
    instance: PartInstance,
    activator: Arc<dyn PartActivator>,
}

/// 作用域实例
pub(crate) struct ScopeInstance {
    id: Uuid,
    boundaries: BTreeSet<String>,
    parent: Option<Arc<ScopeInstance>>,
    children: Mutex<Vec<Weak<ScopeInstance>>>,
    created_at: DateTime<Utc>,
    slots: Mutex<HashMap<usize, SharedSlot>>,
    slot_changed: Condvar,
    tracked: Mutex<Vec<TrackedInstance>>,
    disposed: AtomicBool,
}

impl ScopeInstance {
    /// 根作用域
    pub(crate) fn root() -> Arc<Self> {
        Arc::new(Self::new(BTreeSet::new(), None))
    }

    fn new(boundaries: BTreeSet<String>, parent: Option<Arc<ScopeInstance>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            boundaries,
            parent,
            children: Mutex::new(Vec::new()),
            created_at: Utc::now(),
            slots: Mutex::new(HashMap::new()),
            slot_changed: Condvar::new(),
            tracked: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// 创建子作用域，其边界集合为父作用域的边界加上新建的边界
    pub(crate) fn child(self: &Arc<Self>, created: BTreeSet<String>) -> ActivationResult<Arc<Self>> {
        self.ensure_alive()?;
        let boundaries = self.boundaries.union(&created).cloned().collect();
        let child = Arc::new(Self::new(boundaries, Some(self.clone())));

        let mut children = self.children.lock();
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child));
        drop(children);

        debug!(
            "创建子作用域 {} (父作用域 {}), 边界: {:?}",
            child.id, self.id, child.boundaries
        );
        Ok(child)
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn boundaries(&self) -> &BTreeSet<String> {
        &self.boundaries
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_alive(&self) -> ActivationResult<()> {
        if self.is_disposed() {
            Err(ActivationError::Disposed {
                scope: self.id.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// 拥有者作用域：沿父链向上，边界集合仍包含 `required` 的最顶层作用域
    pub(crate) fn owner_for(self: &Arc<Self>, required: &BTreeSet<String>) -> Option<Arc<Self>> {
        if !required.is_subset(&self.boundaries) {
            return None;
        }
        let mut owner = self.clone();
        while let Some(parent) = owner.parent.clone() {
            if !required.is_subset(&parent.boundaries) {
                break;
            }
            owner = parent;
        }
        Some(owner)
    }

    pub(crate) fn slot(&self, part: usize) -> Option<SharedSlot> {
        self.slots.lock().get(&part).cloned()
    }

    /// 认领共享槽位
    ///
    /// 槽位由其他线程占用时等待其完成；等待前调用 `before_wait`，参数为占用线程，
    /// 返回错误即放弃等待。作用域在等待期间被释放时返回 [`ActivationError::Disposed`]。
    pub(crate) fn claim_slot(
        &self,
        part: usize,
        name: &str,
        mut before_wait: impl FnMut(ThreadId) -> ActivationResult<()>,
    ) -> ActivationResult<SlotClaim> {
        let me = thread::current().id();
        let mut slots = self.slots.lock();
        loop {
            self.ensure_alive()?;
            let builder = match slots.get(&part) {
                None => {
                    slots.insert(part, SharedSlot::Allocating(me));
                    return Ok(SlotClaim::Claimed);
                }
                Some(SharedSlot::Ready(instance)) => return Ok(SlotClaim::Ready(instance.clone())),
                Some(SharedSlot::Failed(message)) => {
                    return Err(ActivationError::CachedFailure {
                        part: name.to_string(),
                        message: message.clone(),
                    });
                }
                Some(SharedSlot::Provisional { instance, builder }) if *builder == me => {
                    return Ok(SlotClaim::Provisional(instance.clone()));
                }
                Some(SharedSlot::Allocating(builder)) if *builder == me => {
                    return Err(ActivationError::CyclicActivation {
                        part: name.to_string(),
                    });
                }
                Some(SharedSlot::Allocating(builder)) | Some(SharedSlot::Provisional { builder, .. }) => *builder,
            };
            before_wait(builder)?;
            trace!("等待线程 {:?} 完成 {} 的构造", builder, name);
            self.slot_changed.wait(&mut slots);
        }
    }

    /// 发布当前线程构造出的临时实例
    pub(crate) fn publish_provisional(&self, part: usize, instance: PartInstance) {
        self.set_slot(
            part,
            SharedSlot::Provisional {
                instance,
                builder: thread::current().id(),
            },
        );
    }

    pub(crate) fn set_slot(&self, part: usize, slot: SharedSlot) {
        if self.is_disposed() {
            return;
        }
        self.slots.lock().insert(part, slot);
        self.slot_changed.notify_all();
    }

    pub(crate) fn remove_slot(&self, part: usize) {
        self.slots.lock().remove(&part);
        self.slot_changed.notify_all();
    }

    /// 外层激活成功后把临时实例转为就绪；未得到实例的槽位直接移除
    pub(crate) fn finalize_slot(&self, part: usize) {
        let mut slots = self.slots.lock();
        match slots.get(&part).cloned() {
            Some(SharedSlot::Provisional { instance, .. }) => {
                slots.insert(part, SharedSlot::Ready(instance));
            }
            Some(SharedSlot::Allocating(_)) => {
                slots.remove(&part);
            }
            _ => {}
        }
        drop(slots);
        self.slot_changed.notify_all();
    }

    /// 登记需要释放的实例；作用域已释放时立即释放该实例并返回错误
    pub(crate) fn track(
        &self,
        part: &str,
        instance: &PartInstance,
        activator: &Arc<dyn PartActivator>,
    ) -> ActivationResult<()> {
        let mut tracked = self.tracked.lock();
        if self.is_disposed() {
            drop(tracked);
            if let Err(e) = activator.dispose(instance) {
                warn!("释放迟到的实例 {} 失败: {}", part, e);
            }
            return Err(ActivationError::Disposed {
                scope: self.id.to_string(),
            });
        }
        tracked.push(TrackedInstance {
            part: part.to_string(),
            instance: instance.clone(),
            activator: activator.clone(),
        });
        Ok(())
    }

    /// 释放作用域：先释放子作用域，再按创建的逆序释放本作用域的实例
    ///
    /// 单个实例释放失败不影响其余实例，全部失败汇总后返回。重复调用无副作用。
    pub(crate) fn dispose(&self) -> Result<(), DisposalError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut failures = Vec::new();

        let children: Vec<Weak<ScopeInstance>> = std::mem::take(&mut *self.children.lock());
        for child in children.iter().rev().filter_map(Weak::upgrade) {
            if let Err(error) = child.dispose() {
                failures.extend(error.failures);
            }
        }

        let tracked = std::mem::take(&mut *self.tracked.lock());
        let count = tracked.len();
        for entry in tracked.into_iter().rev() {
            if let Err(source) = entry.activator.dispose(&entry.instance) {
                warn!("释放 {} 失败: {}", entry.part, source);
                failures.push(DisposalFailure {
                    part: entry.part,
                    source,
                });
            }
        }
        self.slots.lock().clear();
        self.slot_changed.notify_all();

        info!("作用域 {} 已释放: {} 个实例", self.id, count);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DisposalError { failures })
        }
    }
}

impl Drop for ScopeInstance {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!("作用域 {} 在销毁时释放失败: {}", self.id, e);
        }
    }
}

impl fmt::Debug for ScopeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeInstance")
            .field("id", &self.id)
            .field("boundaries", &self.boundaries)
            .field("created_at", &self.created_at)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
