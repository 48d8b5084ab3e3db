//! 解析上下文
//!
//! 持有类型到激活器的映射以及已加载编译单元的缓存。生命周期与所属的组合会话
//! 一致，不存在任何进程级的全局缓存。

use crate::factory::{PartActivator, TypeRegistration};
use dashmap::DashMap;
use infrastructure_common::{ActivationError, ActivationResult, BoxError, TypeRef};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 编译单元加载器
///
/// 激活第一次需要某个编译单元中的类型时调用，负责向解析上下文注册该单元的激活器。
/// 加载可能很慢（涉及外部 I/O），只会在真正需要时触发。
pub trait UnitLoader: Send + Sync {
    /// 加载编译单元
    fn load(&self, unit: &str, resolver: &Resolver) -> Result<(), BoxError>;
}

/// 解析上下文
#[derive(Default)]
pub struct Resolver {
    activators: DashMap<TypeRef, Arc<dyn PartActivator>>,
    units: DashMap<String, Arc<OnceCell<()>>>,
    loader: Option<Arc<dyn UnitLoader>>,
}

impl Resolver {
    /// 创建空的解析上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带编译单元加载器的解析上下文
    pub fn with_loader(loader: Arc<dyn UnitLoader>) -> Self {
        Self {
            loader: Some(loader),
            ..Self::default()
        }
    }

    /// 注册激活器；开放泛型部件以泛型定义注册
    pub fn register(&self, type_ref: TypeRef, activator: Arc<dyn PartActivator>) {
        debug!("注册激活器: {}", type_ref);
        self.activators.insert(type_ref, activator);
    }

    /// 注册闭包形式的类型
    pub fn register_type<T: Send + Sync + 'static>(&self, type_ref: TypeRef, registration: TypeRegistration<T>) {
        self.register(type_ref, Arc::new(registration));
    }

    /// 是否已注册指定类型
    pub fn is_registered(&self, type_ref: &TypeRef) -> bool {
        self.lookup(type_ref).is_some()
    }

    /// 已成功加载的编译单元
    pub fn loaded_units(&self) -> Vec<String> {
        let mut units: Vec<String> = self
            .units
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .map(|entry| entry.key().clone())
            .collect();
        units.sort();
        units
    }

    /// 获取类型的激活器，必要时加载其编译单元
    pub fn activator_for(&self, type_ref: &TypeRef) -> ActivationResult<Arc<dyn PartActivator>> {
        if let Some(activator) = self.lookup(type_ref) {
            return Ok(activator);
        }

        if let Some(unit) = type_ref.unit() {
            if self.loader.is_some() {
                self.ensure_unit_loaded(unit)?;
                if let Some(activator) = self.lookup(type_ref) {
                    return Ok(activator);
                }
            }
        }

        Err(ActivationError::TypeNotResolvable {
            type_name: type_ref.to_string(),
        })
    }

    /// 确保编译单元已加载；失败不会被缓存，下次请求会重试
    pub fn ensure_unit_loaded(&self, unit: &str) -> ActivationResult<()> {
        let Some(loader) = &self.loader else {
            return Ok(());
        };

        let cell = self
            .units
            .entry(unit.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| {
            info!("加载编译单元: {}", unit);
            loader.load(unit, self).map_err(|source| {
                warn!("加载编译单元 {} 失败: {}", unit, source);
                ActivationError::UnitLoadFailed {
                    unit: unit.to_string(),
                    source,
                }
            })
        })
        .map(|_| ())
    }

    fn lookup(&self, type_ref: &TypeRef) -> Option<Arc<dyn PartActivator>> {
        if let Some(entry) = self.activators.get(type_ref) {
            return Some(entry.value().clone());
        }
        if type_ref.args().is_empty() {
            return None;
        }
        self.activators
            .get(&type_ref.generic_definition())
            .map(|entry| entry.value().clone())
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("activators", &self.activators.len())
            .field("loaded_units", &self.loaded_units())
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}
