//! 部件激活器
//!
//! 运行时的"反射"接缝：组合引擎只认识类型句柄，真正的构造、成员赋值、
//! 通知与释放都委托给按类型注册的激活器。

use crate::values::{downcast_value, ImportArguments, ImportValue};
use infrastructure_common::{BoxError, Disposable, MemberRef, TypeRef};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 部件实例
pub type PartInstance = Arc<dyn Any + Send + Sync>;

/// 导出值
pub type ExportedValue = Arc<dyn Any + Send + Sync>;

/// 部件激活器
pub trait PartActivator: Send + Sync {
    /// 用构造参数创建实例；`part_type` 为（已关闭的）部件类型
    fn construct(&self, part_type: &TypeRef, arguments: ImportArguments) -> Result<PartInstance, BoxError>;

    /// 为字段或属性赋值
    fn set_import(&self, instance: &PartInstance, member: &MemberRef, value: ImportValue) -> Result<(), BoxError>;

    /// 调用导入满足通知
    fn notify_imports_satisfied(&self, instance: &PartInstance, member: &MemberRef) -> Result<(), BoxError>;

    /// 获取导出值；`member` 为 `None` 时导出实例本身
    fn export_value(
        &self,
        instance: &PartInstance,
        member: Option<&MemberRef>,
        contract_type: &TypeRef,
    ) -> Result<ExportedValue, BoxError>;

    /// 释放实例
    fn dispose(&self, instance: &PartInstance) -> Result<(), BoxError>;
}

type Constructor<T> = Arc<dyn Fn(&TypeRef, ImportArguments) -> Result<T, BoxError> + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&T, ImportValue) -> Result<(), BoxError> + Send + Sync>;
type Callback<T> = Arc<dyn Fn(&T) -> Result<(), BoxError> + Send + Sync>;
type MemberExport<T> = Arc<dyn Fn(&T) -> Result<ExportedValue, BoxError> + Send + Sync>;
type Conversion<T> = Arc<dyn Fn(Arc<T>) -> ExportedValue + Send + Sync>;

/// 基于闭包的类型注册
///
/// ```rust,ignore
/// let registration = TypeRegistration::new(|mut args| {
///     Ok(Consumer::new(args.take(0)?.single::<Logger>()?))
/// })
/// .setter("plugins", |consumer: &Consumer, value| consumer.set_plugins(value.many()?))
/// .on_imports_satisfied("ready", |consumer: &Consumer| consumer.ready());
/// ```
pub struct TypeRegistration<T> {
    constructor: Constructor<T>,
    setters: HashMap<String, Setter<T>>,
    notifications: HashMap<String, Callback<T>>,
    member_exports: HashMap<String, MemberExport<T>>,
    conversions: HashMap<TypeRef, Conversion<T>>,
    disposer: Option<Callback<T>>,
}

impl<T: Send + Sync + 'static> TypeRegistration<T> {
    /// 使用构造闭包创建注册
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn(ImportArguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::generic(move |_, arguments| constructor(arguments))
    }

    /// 使用能感知关闭后类型的构造闭包创建注册，用于开放泛型部件
    pub fn generic<F>(constructor: F) -> Self
    where
        F: Fn(&TypeRef, ImportArguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            constructor: Arc::new(constructor),
            setters: HashMap::new(),
            notifications: HashMap::new(),
            member_exports: HashMap::new(),
            conversions: HashMap::new(),
            disposer: None,
        }
    }

    /// 注册成员赋值
    pub fn setter<F>(mut self, member: impl Into<String>, setter: F) -> Self
    where
        F: Fn(&T, ImportValue) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.setters.insert(member.into(), Arc::new(setter));
        self
    }

    /// 注册导入满足通知
    pub fn on_imports_satisfied<F>(mut self, method: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.notifications.insert(method.into(), Arc::new(callback));
        self
    }

    /// 注册成员导出
    pub fn member_export<F>(mut self, member: impl Into<String>, export: F) -> Self
    where
        F: Fn(&T) -> Result<ExportedValue, BoxError> + Send + Sync + 'static,
    {
        self.member_exports.insert(member.into(), Arc::new(export));
        self
    }

    /// 注册以指定契约类型导出时的值转换
    pub fn export_as<F>(mut self, contract_type: TypeRef, conversion: F) -> Self
    where
        F: Fn(Arc<T>) -> ExportedValue + Send + Sync + 'static,
    {
        self.conversions.insert(contract_type, Arc::new(conversion));
        self
    }

    fn instance<'a>(&self, instance: &'a PartInstance) -> Result<&'a T, BoxError> {
        instance
            .downcast_ref::<T>()
            .ok_or_else(|| format!("实例类型不是 {}", std::any::type_name::<T>()).into())
    }
}

impl<T: Disposable + 'static> TypeRegistration<T> {
    /// 实例销毁时调用 [`Disposable::dispose`]
    pub fn disposable(mut self) -> Self {
        self.disposer = Some(Arc::new(|instance: &T| instance.dispose()));
        self
    }
}

fn member_name(member: &MemberRef) -> Result<&str, BoxError> {
    member
        .name()
        .ok_or_else(|| format!("成员没有名称: {}", member).into())
}

impl<T: Send + Sync + 'static> PartActivator for TypeRegistration<T> {
    fn construct(&self, part_type: &TypeRef, arguments: ImportArguments) -> Result<PartInstance, BoxError> {
        let instance = (self.constructor)(part_type, arguments)?;
        Ok(Arc::new(instance))
    }

    fn set_import(&self, instance: &PartInstance, member: &MemberRef, value: ImportValue) -> Result<(), BoxError> {
        let name = member_name(member)?;
        let setter = self
            .setters
            .get(name)
            .ok_or_else(|| format!("未注册成员赋值: {}", member))?;
        setter(self.instance(instance)?, value)
    }

    fn notify_imports_satisfied(&self, instance: &PartInstance, member: &MemberRef) -> Result<(), BoxError> {
        let name = member_name(member)?;
        let callback = self
            .notifications
            .get(name)
            .ok_or_else(|| format!("未注册导入满足通知: {}", member))?;
        callback(self.instance(instance)?)
    }

    fn export_value(
        &self,
        instance: &PartInstance,
        member: Option<&MemberRef>,
        contract_type: &TypeRef,
    ) -> Result<ExportedValue, BoxError> {
        match member {
            Some(member) => {
                let name = member_name(member)?;
                let export = self
                    .member_exports
                    .get(name)
                    .ok_or_else(|| format!("未注册成员导出: {}", member))?;
                export(self.instance(instance)?)
            }
            None => match self.conversions.get(contract_type) {
                Some(conversion) => {
                    let typed = downcast_value::<T>(instance.clone())?;
                    Ok(conversion(typed))
                }
                None => Ok(instance.clone()),
            },
        }
    }

    fn dispose(&self, instance: &PartInstance) -> Result<(), BoxError> {
        match &self.disposer {
            Some(disposer) => disposer(self.instance(instance)?),
            None => Ok(()),
        }
    }
}

impl<T> fmt::Debug for TypeRegistration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistration")
            .field("type", &std::any::type_name::<T>())
            .field("setters", &self.setters.keys().collect::<Vec<_>>())
            .field("notifications", &self.notifications.keys().collect::<Vec<_>>())
            .field("member_exports", &self.member_exports.keys().collect::<Vec<_>>())
            .field("disposable", &self.disposer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::Cardinality;
    use crate::values::ImportedItem;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    #[derive(Default)]
    struct Service {
        name: Mutex<Option<String>>,
        ready: AtomicBool,
        disposed: AtomicBool,
    }

    impl Greeter for Service {
        fn greet(&self) -> String {
            format!("hello {}", self.name.lock().clone().unwrap_or_default())
        }
    }

    impl Disposable for Service {
        fn dispose(&self) -> Result<(), BoxError> {
            self.disposed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service_type() -> TypeRef {
        TypeRef::new("tests", "tests::Service")
    }

    fn registration() -> TypeRegistration<Service> {
        TypeRegistration::new(|_| Ok(Service::default()))
            .setter("name", |service: &Service, value| {
                *service.name.lock() = Some(value.single::<String>()?.as_ref().clone());
                Ok(())
            })
            .on_imports_satisfied("ready", |service: &Service| {
                service.ready.store(true, Ordering::SeqCst);
                Ok(())
            })
            .export_as(TypeRef::new("tests", "tests::Greeter"), |service| {
                Arc::new(service as Arc<dyn Greeter>) as ExportedValue
            })
            .disposable()
    }

    #[test]
    fn test_registration_drives_instance_lifecycle() {
        let activator = registration();
        let instance = activator
            .construct(&service_type(), ImportArguments::default())
            .unwrap();

        let value = ImportValue::new(
            Cardinality::ExactlyOne,
            vec![ImportedItem::Value(Arc::new("mef".to_string()))],
        );
        activator
            .set_import(&instance, &MemberRef::property(service_type(), "name"), value)
            .unwrap();
        activator
            .notify_imports_satisfied(&instance, &MemberRef::method(service_type(), "ready"))
            .unwrap();

        let greeter = activator
            .export_value(&instance, None, &TypeRef::new("tests", "tests::Greeter"))
            .unwrap();
        let greeter = downcast_value::<Arc<dyn Greeter>>(greeter).unwrap();
        assert_eq!(greeter.greet(), "hello mef");

        activator.dispose(&instance).unwrap();
        let service = instance.downcast_ref::<Service>().unwrap();
        assert!(service.ready.load(Ordering::SeqCst));
        assert!(service.disposed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unknown_member_is_an_error() {
        let activator = registration();
        let instance = activator
            .construct(&service_type(), ImportArguments::default())
            .unwrap();
        let value = ImportValue::new(Cardinality::ZeroOrOne, Vec::new());
        assert!(activator
            .set_import(&instance, &MemberRef::field(service_type(), "missing"), value)
            .is_err());
    }
}
