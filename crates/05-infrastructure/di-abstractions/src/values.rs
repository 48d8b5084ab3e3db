//! 导入值
//!
//! 注入到构造函数参数与成员上的值：直接值、延迟值或导出工厂。

use crate::factory::ExportedValue;
use crate::part::Cardinality;
use infrastructure_common::{ActivationError, ActivationResult, BoxError, Disposable, Metadata};
use once_cell::sync::OnceCell;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// 把导出值向下转型为具体类型
pub fn downcast_value<T: Any + Send + Sync>(value: ExportedValue) -> ActivationResult<Arc<T>> {
    value.downcast::<T>().map_err(|_| ActivationError::TypeMismatch {
        expected: type_name::<T>().to_string(),
    })
}

/// 延迟值的求值来源
pub trait ValueSource: Send + Sync {
    /// 求值，每次调用都可能产生新的激活
    fn evaluate(&self) -> ActivationResult<ExportedValue>;
}

struct FnSource<F>(F);

impl<F> ValueSource for FnSource<F>
where
    F: Fn() -> ActivationResult<ExportedValue> + Send + Sync,
{
    fn evaluate(&self) -> ActivationResult<ExportedValue> {
        (self.0)()
    }
}

struct DeferredInner {
    source: Arc<dyn ValueSource>,
    value: OnceCell<ExportedValue>,
    metadata: Metadata,
}

/// 延迟值
///
/// 首次成功求值后记住结果，同一句柄后续访问返回同一个值；求值失败不记忆，
/// 下次访问会重新求值。求值不持有任何锁，可以在任意线程上进行。
#[derive(Clone)]
pub struct DeferredValue {
    inner: Arc<DeferredInner>,
}

impl DeferredValue {
    /// 创建延迟值
    pub fn new(source: Arc<dyn ValueSource>, metadata: Metadata) -> Self {
        Self {
            inner: Arc::new(DeferredInner {
                source,
                value: OnceCell::new(),
                metadata,
            }),
        }
    }

    /// 由闭包创建延迟值
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> ActivationResult<ExportedValue> + Send + Sync + 'static,
    {
        Self::new(Arc::new(FnSource(f)), Metadata::new())
    }

    /// 获取值，必要时触发激活
    pub fn value(&self) -> ActivationResult<ExportedValue> {
        if let Some(value) = self.inner.value.get() {
            return Ok(value.clone());
        }
        let evaluated = self.inner.source.evaluate()?;
        // 并发求值时以先写入者为准
        let value = match self.inner.value.try_insert(evaluated) {
            Ok(value) => value,
            Err((existing, _)) => existing,
        };
        Ok(value.clone())
    }

    /// 获取具体类型的值
    pub fn value_as<T: Any + Send + Sync>(&self) -> ActivationResult<Arc<T>> {
        downcast_value(self.value()?)
    }

    /// 是否已经求值
    pub fn is_value_created(&self) -> bool {
        self.inner.value.get().is_some()
    }

    /// 导出元数据
    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredValue")
            .field("is_value_created", &self.is_value_created())
            .field("metadata", &self.inner.metadata)
            .finish()
    }
}

/// 导出工厂的创建来源
pub trait ScopeFactory: Send + Sync {
    /// 在新的子作用域中创建导出
    fn create(&self) -> ActivationResult<FactoryExport>;
}

/// 导出工厂产出的值，持有其子作用域
pub struct FactoryExport {
    value: ExportedValue,
    lifetime: Arc<dyn Disposable>,
}

impl FactoryExport {
    /// 创建工厂导出
    pub fn new(value: ExportedValue, lifetime: Arc<dyn Disposable>) -> Self {
        Self { value, lifetime }
    }

    /// 导出值
    pub fn value(&self) -> ExportedValue {
        self.value.clone()
    }

    /// 具体类型的导出值
    pub fn value_as<T: Any + Send + Sync>(&self) -> ActivationResult<Arc<T>> {
        downcast_value(self.value.clone())
    }

    /// 释放子作用域及其中创建的全部实例
    pub fn dispose(&self) -> Result<(), BoxError> {
        self.lifetime.dispose()
    }
}

impl fmt::Debug for FactoryExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryExport").finish_non_exhaustive()
    }
}

/// 导出工厂
#[derive(Clone)]
pub struct ExportFactory {
    factory: Arc<dyn ScopeFactory>,
    metadata: Metadata,
}

impl ExportFactory {
    /// 创建导出工厂
    pub fn new(factory: Arc<dyn ScopeFactory>, metadata: Metadata) -> Self {
        Self { factory, metadata }
    }

    /// 创建新的导出，每次调用都有独立的子作用域
    pub fn create_export(&self) -> ActivationResult<FactoryExport> {
        self.factory.create()
    }

    /// 导出元数据
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl fmt::Debug for ExportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportFactory")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// 单个导入项
#[derive(Clone)]
pub enum ImportedItem {
    /// 已激活的值
    Value(ExportedValue),
    /// 延迟值
    Deferred(DeferredValue),
    /// 导出工厂
    Factory(ExportFactory),
}

impl ImportedItem {
    fn shape(&self) -> &'static str {
        match self {
            Self::Value(_) => "值",
            Self::Deferred(_) => "延迟值",
            Self::Factory(_) => "导出工厂",
        }
    }
}

impl fmt::Debug for ImportedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => write!(f, "Value(..)"),
            Self::Deferred(deferred) => fmt::Debug::fmt(deferred, f),
            Self::Factory(factory) => fmt::Debug::fmt(factory, f),
        }
    }
}

/// 一个导入点上的全部导入项
#[derive(Debug, Clone)]
pub struct ImportValue {
    cardinality: Cardinality,
    items: Vec<ImportedItem>,
}

impl ImportValue {
    /// 创建导入值
    pub fn new(cardinality: Cardinality, items: Vec<ImportedItem>) -> Self {
        Self { cardinality, items }
    }

    /// 导入基数
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// 导入项
    pub fn items(&self) -> &[ImportedItem] {
        &self.items
    }

    /// 是否没有任何导入项
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn single_item(&self) -> ActivationResult<Option<&ImportedItem>> {
        match self.items.as_slice() {
            [] => Ok(None),
            [item] => Ok(Some(item)),
            _ => Err(ActivationError::ImportShapeMismatch {
                expected: "至多一个导入项".to_string(),
                actual: format!("{} 个导入项", self.items.len()),
            }),
        }
    }

    /// 唯一的直接值
    pub fn single<T: Any + Send + Sync>(&self) -> ActivationResult<Arc<T>> {
        self.optional::<T>()?.ok_or(ActivationError::ImportShapeMismatch {
            expected: "一个导入项".to_string(),
            actual: "0 个导入项".to_string(),
        })
    }

    /// 可选的直接值
    pub fn optional<T: Any + Send + Sync>(&self) -> ActivationResult<Option<Arc<T>>> {
        self.single_item()?.map(expect_value::<T>).transpose()
    }

    /// 全部直接值
    pub fn many<T: Any + Send + Sync>(&self) -> ActivationResult<Vec<Arc<T>>> {
        self.items.iter().map(expect_value::<T>).collect()
    }

    /// 唯一的延迟值
    pub fn deferred(&self) -> ActivationResult<DeferredValue> {
        self.deferred_optional()?
            .ok_or(ActivationError::ImportShapeMismatch {
                expected: "一个延迟值".to_string(),
                actual: "0 个导入项".to_string(),
            })
    }

    /// 可选的延迟值
    pub fn deferred_optional(&self) -> ActivationResult<Option<DeferredValue>> {
        self.single_item()?.map(expect_deferred).transpose()
    }

    /// 全部延迟值
    pub fn deferred_many(&self) -> ActivationResult<Vec<DeferredValue>> {
        self.items.iter().map(expect_deferred).collect()
    }

    /// 唯一的导出工厂
    pub fn factory(&self) -> ActivationResult<ExportFactory> {
        self.single_item()?
            .map(expect_factory)
            .transpose()?
            .ok_or(ActivationError::ImportShapeMismatch {
                expected: "一个导出工厂".to_string(),
                actual: "0 个导入项".to_string(),
            })
    }

    /// 全部导出工厂
    pub fn factories(&self) -> ActivationResult<Vec<ExportFactory>> {
        self.items.iter().map(expect_factory).collect()
    }
}

fn shape_mismatch(expected: &str, item: &ImportedItem) -> ActivationError {
    ActivationError::ImportShapeMismatch {
        expected: expected.to_string(),
        actual: item.shape().to_string(),
    }
}

fn expect_value<T: Any + Send + Sync>(item: &ImportedItem) -> ActivationResult<Arc<T>> {
    match item {
        ImportedItem::Value(value) => downcast_value(value.clone()),
        other => Err(shape_mismatch("值", other)),
    }
}

fn expect_deferred(item: &ImportedItem) -> ActivationResult<DeferredValue> {
    match item {
        ImportedItem::Deferred(deferred) => Ok(deferred.clone()),
        other => Err(shape_mismatch("延迟值", other)),
    }
}

fn expect_factory(item: &ImportedItem) -> ActivationResult<ExportFactory> {
    match item {
        ImportedItem::Factory(factory) => Ok(factory.clone()),
        other => Err(shape_mismatch("导出工厂", other)),
    }
}

/// 构造函数参数，按位置取出
#[derive(Debug, Default)]
pub struct ImportArguments {
    values: Vec<Option<ImportValue>>,
}

impl ImportArguments {
    /// 创建构造参数
    pub fn new(values: Vec<ImportValue>) -> Self {
        Self {
            values: values.into_iter().map(Some).collect(),
        }
    }

    /// 参数个数
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否没有参数
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 取出指定位置的参数，每个位置只能取一次
    pub fn take(&mut self, position: usize) -> ActivationResult<ImportValue> {
        self.values
            .get_mut(position)
            .and_then(Option::take)
            .ok_or(ActivationError::MissingArgument { position })
    }
}
