//! 激活引擎
//!
//! 按运行时组合中的构造配方创建实例。共享实例按 (作用域, 部件) 加锁：
//! 构造期间槽位归构造线程所有，其他线程只在该槽位上等待，互不相关的部件可以并行构造。
//! 每个线程有自己的激活会话，记录本线程发布的临时实例和待执行的通知。
//!
//! 激活顺序：解析构造参数 → 构造 → 登记释放 → 发布临时实例 → 按声明顺序
//! 设置成员导入 → 排队导入满足通知。最外层激活结束时按完成顺序执行通知，
//! 之后临时实例才转为就绪。激活失败时只回滚未完成的部件，以及借用了它们临时实例的部件；
//! 已完整构造的共享实例照常转为就绪。

use crate::scope::{ScopeInstance, SharedSlot, SlotClaim};
use di_abstractions::{
    DeferredValue, ExportFactory, ExportedValue, FactoryExport, ImportArguments, ImportSite,
    ImportValue, ImportWrapper, ImportedItem, PartActivator, PartInstance, Resolver, RuntimeComposition,
    RuntimeExportRef, RuntimeImport, RuntimePart, ScopeFactory, ValueSource,
};
use infrastructure_common::{
    ActivationError, ActivationResult, BoxError, CompositionOptions, Disposable, MemberRef,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// 同一线程上同一非共享部件允许的最大嵌套次数
const MAX_NON_SHARED_REENTRY: usize = 8;

struct PendingNotification {
    part: String,
    instance: PartInstance,
    activator: Arc<dyn PartActivator>,
    member: MemberRef,
    /// 所属的共享槽位登记；为空时随最外层请求的结果
    entry: Option<usize>,
}

/// 本线程认领的共享槽位
struct ProvisionalEntry {
    scope: Arc<ScopeInstance>,
    part: usize,
    completed: bool,
    /// 借用了该登记的临时实例，它回滚时本登记一并回滚
    tied_to: usize,
}

#[derive(Default)]
struct ActivationSession {
    depth: usize,
    notifications: Vec<PendingNotification>,
    provisional: Vec<ProvisionalEntry>,
    /// 仍在构造中的登记，按嵌套顺序
    open: Vec<usize>,
    /// 正在构造的非共享部件及其嵌套次数
    non_shared: HashMap<(Uuid, usize), usize>,
}

/// 需要回滚的登记
fn rolled_back(entries: &[ProvisionalEntry]) -> Vec<bool> {
    let mut rolled: Vec<bool> = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        let tied = entry.tied_to < position && rolled[entry.tied_to];
        rolled.push(!entry.completed || tied);
    }
    rolled
}

/// 激活引擎
pub(crate) struct Engine {
    composition: RuntimeComposition,
    resolver: Arc<Resolver>,
    options: CompositionOptions,
    sessions: Mutex<HashMap<ThreadId, ActivationSession>>,
    /// 等待关系：等待线程 → 占用槽位的线程
    waits: Mutex<HashMap<ThreadId, ThreadId>>,
}

impl Engine {
    pub(crate) fn new(composition: RuntimeComposition, resolver: Arc<Resolver>, options: CompositionOptions) -> Self {
        Self {
            composition,
            resolver,
            options,
            sessions: Mutex::new(HashMap::new()),
            waits: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn composition(&self) -> &RuntimeComposition {
        &self.composition
    }

    pub(crate) fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// 在指定作用域中获取导出值
    pub(crate) fn get_export_value(
        self: &Arc<Self>,
        scope: &Arc<ScopeInstance>,
        export: RuntimeExportRef,
    ) -> ActivationResult<ExportedValue> {
        self.with_session(|session| session.depth += 1);
        let result = self.activate_export(scope, export);
        let outermost = self.with_session(|session| {
            session.depth -= 1;
            session.depth == 0
        });

        let result = if outermost { self.finish(result) } else { result };

        // 激活期间作用域被并发释放
        match result {
            Ok(_) if scope.is_disposed() => Err(ActivationError::Disposed {
                scope: scope.id().to_string(),
            }),
            other => other,
        }
    }

    /// 延迟值的求值来源
    pub(crate) fn value_source(self: &Arc<Self>, scope: &Arc<ScopeInstance>, export: RuntimeExportRef) -> Arc<dyn ValueSource> {
        Arc::new(EngineValueSource {
            engine: self.clone(),
            scope: Arc::downgrade(scope),
            export,
        })
    }

    /// 访问当前线程的会话；不得在回调中执行用户代码
    fn with_session<R>(&self, f: impl FnOnce(&mut ActivationSession) -> R) -> R {
        let mut sessions = self.sessions.lock();
        f(sessions.entry(thread::current().id()).or_default())
    }

    fn finish<T>(&self, result: ActivationResult<T>) -> ActivationResult<T> {
        let mut result = result;

        // 通知中发起的请求不应再次触发收尾
        self.with_session(|session| session.depth += 1);
        loop {
            let pending = self.with_session(|session| std::mem::take(&mut session.notifications));
            if pending.is_empty() {
                break;
            }
            for notification in pending {
                let runs = match notification.entry {
                    Some(entry) => self.with_session(|session| !rolled_back(&session.provisional)[entry]),
                    None => result.is_ok(),
                };
                if !runs {
                    trace!("跳过已回滚部件的通知: {}", notification.part);
                    continue;
                }

                trace!("导入满足通知: {}", notification.part);
                let Err(source) = notification
                    .activator
                    .notify_imports_satisfied(&notification.instance, &notification.member)
                else {
                    continue;
                };
                if let Some(entry) = notification.entry {
                    self.with_session(|session| session.provisional[entry].completed = false);
                }
                if result.is_ok() {
                    result = Err(ActivationError::NotificationFailed {
                        part: notification.part,
                        source,
                    });
                } else {
                    warn!("部件 {} 的导入满足通知失败: {}", notification.part, source);
                }
            }
        }

        let entries = {
            let mut sessions = self.sessions.lock();
            sessions
                .remove(&thread::current().id())
                .map(|session| session.provisional)
                .unwrap_or_default()
        };

        let rolled = rolled_back(&entries);
        let reverted = rolled.iter().filter(|r| **r).count();
        if let Err(error) = &result {
            warn!(
                "激活失败，回滚 {} 个临时实例，保留 {} 个已完成的共享实例: {}",
                reverted,
                entries.len() - reverted,
                error
            );
        }
        let message = result.as_ref().err().map(ToString::to_string).unwrap_or_default();
        for (entry, rolled) in entries.into_iter().zip(rolled) {
            if !rolled {
                entry.scope.finalize_slot(entry.part);
            } else if self.options.cache_activation_failures {
                entry.scope.set_slot(entry.part, SharedSlot::Failed(message.clone()));
            } else {
                entry.scope.remove_slot(entry.part);
            }
        }

        result
    }

    fn activate_export(self: &Arc<Self>, scope: &Arc<ScopeInstance>, export: RuntimeExportRef) -> ActivationResult<ExportedValue> {
        let part = self.part(export.part)?;
        let definition = part
            .exports
            .get(export.export)
            .ok_or_else(|| ActivationError::TypeNotResolvable {
                type_name: format!("{} 的导出 #{}", part.type_ref, export.export),
            })?;

        let (instance, activator) = self.activate_part(scope, export.part, export.shared)?;
        activator
            .export_value(&instance, definition.member.as_ref(), &definition.contract_type)
            .map_err(|source| ActivationError::ExportValueFailed {
                part: part.type_ref.to_string(),
                source,
            })
    }

    fn part(&self, index: usize) -> ActivationResult<&RuntimePart> {
        self.composition
            .parts
            .get(index)
            .ok_or_else(|| ActivationError::TypeNotResolvable {
                type_name: format!("部件 #{}", index),
            })
    }

    fn activate_part(
        self: &Arc<Self>,
        scope: &Arc<ScopeInstance>,
        index: usize,
        shared: bool,
    ) -> ActivationResult<(PartInstance, Arc<dyn PartActivator>)> {
        scope.ensure_alive()?;
        let part = self.part(index)?;
        let part_name = part.type_ref.to_string();

        let owner = scope
            .owner_for(&part.sharing_boundaries)
            .ok_or_else(|| ActivationError::SharingBoundaryUnavailable {
                part: part_name.clone(),
                boundaries: describe_boundaries(&part.sharing_boundaries),
            })?;
        let activator = self.resolver.activator_for(&part.type_ref)?;

        if shared {
            self.activate_shared(&owner, index, part, &part_name, activator)
        } else {
            self.activate_non_shared(&owner, index, part, &part_name, activator)
        }
    }

    fn activate_shared(
        self: &Arc<Self>,
        owner: &Arc<ScopeInstance>,
        index: usize,
        part: &RuntimePart,
        part_name: &str,
        activator: Arc<dyn PartActivator>,
    ) -> ActivationResult<(PartInstance, Arc<dyn PartActivator>)> {
        let me = thread::current().id();
        let claim = owner.claim_slot(index, part_name, |builder| self.wait_for(me, builder, part_name));
        self.waits.lock().remove(&me);

        match claim? {
            SlotClaim::Ready(instance) => return Ok((instance, activator)),
            SlotClaim::Provisional(instance) => {
                self.with_session(|session| {
                    let borrowed = session
                        .provisional
                        .iter()
                        .rposition(|entry| entry.part == index && Arc::ptr_eq(&entry.scope, owner));
                    if let Some(borrowed) = borrowed {
                        for &open in session.open.iter().filter(|&&open| open > borrowed) {
                            let entry = &mut session.provisional[open];
                            entry.tied_to = entry.tied_to.min(borrowed);
                        }
                    }
                });
                return Ok((instance, activator));
            }
            SlotClaim::Claimed => {}
        }

        let position = self.with_session(|session| {
            let position = session.provisional.len();
            session.provisional.push(ProvisionalEntry {
                scope: owner.clone(),
                part: index,
                completed: false,
                tied_to: position,
            });
            session.open.push(position);
            position
        });

        let result = self.build(owner, part, part_name, &activator, Some(position), |instance| {
            owner.publish_provisional(index, instance.clone());
        });

        self.with_session(|session| {
            session.open.retain(|&open| open != position);
            if result.is_ok() {
                session.provisional[position].completed = true;
            }
        });
        result.map(|instance| (instance, activator))
    }

    fn activate_non_shared(
        self: &Arc<Self>,
        owner: &Arc<ScopeInstance>,
        index: usize,
        part: &RuntimePart,
        part_name: &str,
        activator: Arc<dyn PartActivator>,
    ) -> ActivationResult<(PartInstance, Arc<dyn PartActivator>)> {
        let key = (owner.id(), index);
        let nested = self.with_session(|session| {
            let count = session.non_shared.entry(key).or_default();
            *count += 1;
            *count
        });

        let result = if nested > MAX_NON_SHARED_REENTRY {
            Err(ActivationError::CyclicActivation {
                part: part_name.to_string(),
            })
        } else {
            self.build(owner, part, part_name, &activator, None, |_| {})
        };

        self.with_session(|session| {
            if let Some(count) = session.non_shared.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    session.non_shared.remove(&key);
                }
            }
        });
        result.map(|instance| (instance, activator))
    }

    /// 登记等待关系；等待链回到当前线程时放弃等待
    fn wait_for(&self, me: ThreadId, builder: ThreadId, part: &str) -> ActivationResult<()> {
        let mut waits = self.waits.lock();
        let mut current = builder;
        for _ in 0..=waits.len() {
            if current == me {
                waits.remove(&me);
                return Err(ActivationError::CyclicActivation {
                    part: format!("{}（线程间相互等待）", part),
                });
            }
            match waits.get(&current) {
                Some(&next) => current = next,
                None => break,
            }
        }
        waits.insert(me, builder);
        Ok(())
    }

    /// 构造实例并注入全部导入
    fn build(
        self: &Arc<Self>,
        owner: &Arc<ScopeInstance>,
        part: &RuntimePart,
        part_name: &str,
        activator: &Arc<dyn PartActivator>,
        entry: Option<usize>,
        publish: impl FnOnce(&PartInstance),
    ) -> ActivationResult<PartInstance> {
        debug!("激活部件 {} (作用域 {}, 共享: {})", part_name, owner.id(), entry.is_some());

        let mut arguments = Vec::with_capacity(part.constructor_arguments.len());
        for import in &part.constructor_arguments {
            arguments.push(self.import_value(owner, part, import)?);
        }
        let instance = activator
            .construct(&part.type_ref, ImportArguments::new(arguments))
            .map_err(|source| ActivationError::ConstructionFailed {
                part: part_name.to_string(),
                source,
            })?;

        if part.is_disposable {
            owner.track(part_name, &instance, activator)?;
        }
        publish(&instance);

        for import in &part.member_imports {
            let value = self.import_value(owner, part, import)?;
            let member = match &import.site {
                ImportSite::Member(member) => member,
                ImportSite::Parameter { constructor, .. } => constructor,
            };
            activator
                .set_import(&instance, member, value)
                .map_err(|source| ActivationError::ImportSetFailed {
                    part: part_name.to_string(),
                    member: member.to_string(),
                    source,
                })?;
        }

        if let Some(member) = &part.on_imports_satisfied {
            self.with_session(|session| {
                let entry = entry.or_else(|| session.open.last().copied());
                session.notifications.push(PendingNotification {
                    part: part_name.to_string(),
                    instance: instance.clone(),
                    activator: activator.clone(),
                    member: member.clone(),
                    entry,
                });
            });
        }

        Ok(instance)
    }

    fn import_value(
        self: &Arc<Self>,
        scope: &Arc<ScopeInstance>,
        part: &RuntimePart,
        import: &RuntimeImport,
    ) -> ActivationResult<ImportValue> {
        let mut items = Vec::with_capacity(import.satisfying_exports.len());
        for export in &import.satisfying_exports {
            let item = self
                .import_item(scope, import, *export)
                .map_err(|source| ActivationError::DependencyFailed {
                    part: part.type_ref.to_string(),
                    contract: import.contract_name.clone(),
                    source: Box::new(source),
                })?;
            items.push(item);
        }
        Ok(ImportValue::new(import.cardinality, items))
    }

    fn import_item(
        self: &Arc<Self>,
        scope: &Arc<ScopeInstance>,
        import: &RuntimeImport,
        export: RuntimeExportRef,
    ) -> ActivationResult<ImportedItem> {
        let metadata = self
            .composition
            .export(&export)
            .map(|definition| definition.metadata.clone())
            .unwrap_or_default();

        match &import.wrapper {
            ImportWrapper::Direct => Ok(ImportedItem::Value(self.activate_export(scope, export)?)),
            ImportWrapper::Lazy => Ok(ImportedItem::Deferred(DeferredValue::new(
                self.value_source(scope, export),
                metadata,
            ))),
            ImportWrapper::ExportFactory { sharing_boundaries } => {
                let factory = EngineScopeFactory {
                    engine: self.clone(),
                    scope: Arc::downgrade(scope),
                    boundaries: sharing_boundaries.clone(),
                    export,
                };
                Ok(ImportedItem::Factory(ExportFactory::new(Arc::new(factory), metadata)))
            }
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("parts", &self.composition.parts.len())
            .field("resolver", &self.resolver)
            .field("options", &self.options)
            .finish()
    }
}

fn describe_boundaries(boundaries: &BTreeSet<String>) -> String {
    boundaries.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn scope_gone() -> ActivationError {
    ActivationError::Disposed {
        scope: "已销毁的作用域".to_string(),
    }
}

/// 延迟值来源：首次访问时在原作用域中激活导出
struct EngineValueSource {
    engine: Arc<Engine>,
    scope: Weak<ScopeInstance>,
    export: RuntimeExportRef,
}

impl ValueSource for EngineValueSource {
    fn evaluate(&self) -> ActivationResult<ExportedValue> {
        let scope = self.scope.upgrade().ok_or_else(scope_gone)?;
        self.engine.get_export_value(&scope, self.export)
    }
}

/// 导出工厂来源：每次创建都在新的子作用域中激活导出
struct EngineScopeFactory {
    engine: Arc<Engine>,
    scope: Weak<ScopeInstance>,
    boundaries: BTreeSet<String>,
    export: RuntimeExportRef,
}

impl ScopeFactory for EngineScopeFactory {
    fn create(&self) -> ActivationResult<FactoryExport> {
        let parent = self.scope.upgrade().ok_or_else(scope_gone)?;
        let child = parent.child(self.boundaries.clone())?;
        let value = match self.engine.get_export_value(&child, self.export) {
            Ok(value) => value,
            Err(error) => {
                if let Err(disposal) = child.dispose() {
                    warn!("释放失败的工厂作用域出错: {}", disposal);
                }
                return Err(error);
            }
        };
        Ok(FactoryExport::new(value, Arc::new(ScopeLifetime(child))))
    }
}

/// 子作用域的生命周期句柄
struct ScopeLifetime(Arc<ScopeInstance>);

impl Disposable for ScopeLifetime {
    fn dispose(&self) -> Result<(), BoxError> {
        self.0.dispose().map_err(Into::into)
    }
}
