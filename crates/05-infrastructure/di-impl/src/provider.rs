//! 导出提供者
//!
//! 运行时组合的查询入口。每个导出提供者对应一个作用域实例；根提供者由运行时
//! 组合创建，子提供者通过 [`ExportProvider::create_scope`] 创建。

use crate::activation::Engine;
use crate::scope::ScopeInstance;
use chrono::{DateTime, Utc};
use di_abstractions::{downcast_value, Cardinality, DeferredValue, Resolver, RuntimeComposition};
use infrastructure_common::{
    satisfies_constraints, ActivationError, ActivationResult, CompositionOptions, CreationPolicy,
    DisposalError, Metadata, MetadataValue, MismatchKind, TypeRef,
};
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// 导出查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportQuery {
    /// 契约名
    pub contract_name: String,
    /// 契约类型，`None` 表示不限
    pub contract_type: Option<TypeRef>,
    /// 元数据约束
    pub metadata_constraints: Metadata,
    /// 基数
    pub cardinality: Cardinality,
    /// 要求的创建策略
    pub creation_policy: CreationPolicy,
}

impl ExportQuery {
    /// 按契约名查询
    pub fn new(contract_name: impl Into<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            contract_type: None,
            metadata_constraints: Metadata::new(),
            cardinality: Cardinality::ExactlyOne,
            creation_policy: CreationPolicy::Any,
        }
    }

    /// 按类型查询，契约名取类型的默认契约名
    pub fn of_type(contract_type: TypeRef) -> Self {
        Self {
            contract_type: Some(contract_type.clone()),
            ..Self::new(contract_type.contract_name())
        }
    }

    pub fn with_type(mut self, contract_type: TypeRef) -> Self {
        self.contract_type = Some(contract_type);
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata_constraints.insert(key.into(), value.into());
        self
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn with_creation_policy(mut self, policy: CreationPolicy) -> Self {
        self.creation_policy = policy;
        self
    }
}

/// 查询得到的导出：值在首次访问时才激活
#[derive(Debug, Clone)]
pub struct Export {
    /// 契约名
    pub contract_name: String,
    /// 导出部件
    pub part_type: TypeRef,
    /// 导出值
    pub value: DeferredValue,
}

impl Export {
    /// 导出元数据
    pub fn metadata(&self) -> &Metadata {
        self.value.metadata()
    }

    /// 具体类型的导出值
    pub fn value_as<T: Any + Send + Sync>(&self) -> ActivationResult<Arc<T>> {
        self.value.value_as::<T>()
    }
}

/// 导出提供者
#[derive(Debug, Clone)]
pub struct ExportProvider {
    engine: Arc<Engine>,
    scope: Arc<ScopeInstance>,
}

impl ExportProvider {
    /// 由运行时组合创建根导出提供者
    pub fn new(composition: RuntimeComposition, resolver: Arc<Resolver>, options: CompositionOptions) -> Self {
        info!("创建导出提供者: {} 个部件", composition.parts.len());
        Self {
            engine: Arc::new(Engine::new(composition, resolver, options)),
            scope: ScopeInstance::root(),
        }
    }

    /// 作用域标识
    pub fn id(&self) -> Uuid {
        self.scope.id()
    }

    /// 当前作用域可用的共享边界
    pub fn boundaries(&self) -> &BTreeSet<String> {
        self.scope.boundaries()
    }

    /// 作用域创建时间
    pub fn created_at(&self) -> DateTime<Utc> {
        self.scope.created_at()
    }

    /// 运行时组合
    pub fn composition(&self) -> &RuntimeComposition {
        self.engine.composition()
    }

    /// 解析上下文
    pub fn resolver(&self) -> &Arc<Resolver> {
        self.engine.resolver()
    }

    /// 查询导出，返回按目录顺序排列的延迟导出
    ///
    /// 匹配数量不符合查询基数时返回 [`ActivationError::CardinalityMismatch`]。
    pub fn get_exports(&self, query: &ExportQuery) -> ActivationResult<Vec<Export>> {
        self.scope.ensure_alive()?;
        let composition = self.engine.composition();

        let mut exports = Vec::new();
        for export_ref in composition.exports_for(&query.contract_name) {
            let (Some(part), Some(export)) = (
                composition.parts.get(export_ref.part),
                composition.export(export_ref),
            ) else {
                continue;
            };
            if query
                .contract_type
                .as_ref()
                .is_some_and(|contract_type| contract_type != &export.contract_type)
            {
                continue;
            }
            if !query.creation_policy.accepts(part.creation_policy)
                || !satisfies_constraints(&export.metadata, &query.metadata_constraints)
            {
                continue;
            }

            let mut export_ref = *export_ref;
            export_ref.shared = query.creation_policy.yields_shared(part.creation_policy);
            exports.push(Export {
                contract_name: export.contract_name.clone(),
                part_type: part.type_ref.clone(),
                value: DeferredValue::new(
                    self.engine.value_source(&self.scope, export_ref),
                    export.metadata.clone(),
                ),
            });
        }

        debug!("查询契约 {}: {} 个导出", query.contract_name, exports.len());
        if !query.cardinality.accepts(exports.len()) {
            let kind = if exports.is_empty() {
                MismatchKind::NotFound
            } else {
                MismatchKind::Ambiguous
            };
            return Err(ActivationError::CardinalityMismatch {
                contract: query.contract_name.clone(),
                kind,
                count: exports.len(),
            });
        }
        Ok(exports)
    }

    /// 查询唯一导出
    pub fn get_export(&self, query: &ExportQuery) -> ActivationResult<Export> {
        let query = query.clone().with_cardinality(Cardinality::ExactlyOne);
        let mut exports = self.get_exports(&query)?;
        exports.pop().ok_or(ActivationError::CardinalityMismatch {
            contract: query.contract_name,
            kind: MismatchKind::NotFound,
            count: 0,
        })
    }

    /// 按 Rust 类型获取唯一导出值
    pub fn get_exported_value<T: Any + Send + Sync>(&self) -> ActivationResult<Arc<T>> {
        self.get_export(&ExportQuery::of_type(TypeRef::of::<T>()))?
            .value_as::<T>()
    }

    /// 按契约名获取唯一导出值
    pub fn get_exported_value_by_contract<T: Any + Send + Sync>(&self, contract_name: &str) -> ActivationResult<Arc<T>> {
        self.get_export(&ExportQuery::new(contract_name))?.value_as::<T>()
    }

    /// 按契约名获取全部导出值
    pub fn get_exported_values<T: Any + Send + Sync>(&self, contract_name: &str) -> ActivationResult<Vec<Arc<T>>> {
        let query = ExportQuery::new(contract_name).with_cardinality(Cardinality::ZeroOrMore);
        self.get_exports(&query)?
            .iter()
            .map(|export| export.value.value().and_then(downcast_value::<T>))
            .collect()
    }

    /// 创建子作用域提供者，新增指定的共享边界
    pub fn create_scope<I, S>(&self, boundaries: I) -> ActivationResult<ExportProvider>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let created = boundaries.into_iter().map(Into::into).collect();
        let scope = self.scope.child(created)?;
        info!("创建作用域 {}: 边界 {:?}", scope.id(), scope.boundaries());
        Ok(Self {
            engine: self.engine.clone(),
            scope,
        })
    }

    /// 释放本作用域及其子作用域中创建的全部实例
    pub fn dispose(&self) -> Result<(), DisposalError> {
        self.scope.dispose()
    }

    /// 是否已释放
    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }
}
