//! # Infrastructure Common
//!
//! 组合引擎各层共享的基础类型。
//!
//! ## 核心内容
//!
//! - [`TypeRef`] / [`MemberRef`] - 延迟解析的类型与成员句柄
//! - [`MetadataValue`] - 导出元数据值
//! - [`CreationPolicy`] / [`Disposable`] - 实例共享策略与释放约定
//! - [`CompositionOptions`] - 引擎配置
//! - [`CompositionError`] - 组合诊断
//! - [`ActivationError`] 等 - 运行时错误类型
//!
//! ## 设计原则
//!
//! - 所有描述性数据均为不可变值，可序列化
//! - 句柄只携带身份信息，真正的解析推迟到运行时
//! - 不使用进程级全局状态

pub mod configuration;
pub mod diagnostics;
pub mod errors;
pub mod lifecycle;
pub mod metadata;
pub mod reflection;

pub use configuration::*;
pub use diagnostics::*;
pub use errors::*;
pub use lifecycle::*;
pub use metadata::*;
pub use reflection::*;
