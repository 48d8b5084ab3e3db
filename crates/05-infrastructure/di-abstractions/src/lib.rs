//! # Dependency Injection Abstractions
//!
//! 组合引擎的数据模型与接缝定义。
//!
//! ## 核心内容
//!
//! - [`PartDefinition`] - 部件定义（导出、导入、共享边界、创建策略）
//! - [`ComposableCatalog`] - 不可变的部件目录
//! - [`PartDiscovery`] - 部件发现接口及声明式描述适配器
//! - [`Resolver`] / [`PartActivator`] - 运行时解析上下文与激活器
//! - [`DeferredValue`] / [`ExportFactory`] - 延迟值与导出工厂
//! - [`RuntimeComposition`] - 可执行、可序列化的运行时计划

pub mod catalog;
pub mod discovery;
pub mod factory;
pub mod part;
pub mod resolver;
pub mod runtime;
pub mod values;

pub use catalog::*;
pub use discovery::*;
pub use factory::*;
pub use part::*;
pub use resolver::*;
pub use runtime::*;
pub use values::*;
