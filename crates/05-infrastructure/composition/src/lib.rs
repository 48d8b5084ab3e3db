//! # 组合层
//!
//! 把部件目录组合成可执行的依赖图：
//!
//! - **导入解析**: 按契约名和契约类型匹配导出，按需关闭开放泛型部件
//! - **错误分组**: 出错部件被排除后重新解析，后续错误按因果关系归入新的分组
//! - **共享边界**: 推断每个部件所需的边界并检查边界嵌套
//! - **循环分类**: 区分运行时可以打破的循环与非法循环
//! - **运行时计划**: 生成可序列化的 [`RuntimeComposition`](di_abstractions::RuntimeComposition)
//!
//! ## 基本使用
//!
//! ```rust,no_run
//! use infrastructure_composition::{CompositionBuilder, LoggingConfig};
//! use di_abstractions::PartDefinition;
//! use infrastructure_common::TypeRef;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = CompositionBuilder::new()
//!         .add_part(PartDefinition::new(TypeRef::new("app", "app::Clock")).with_self_export())
//!         .with_logging(LoggingConfig::development())
//!         .build()
//!         .await?;
//!
//!     let exports = provider.get_exports(&di_impl::ExportQuery::new("app::Clock"))?;
//!     println!("找到 {} 个导出", exports.len());
//!
//!     provider.dispose()?;
//!     Ok(())
//! }
//! ```

mod cycles;
mod resolution;
mod sharing;

pub mod builder;
pub mod configuration;
pub mod graph;
pub mod planner;

// 重新导出主要类型
pub use builder::{CompositionBuilder, LoggingConfig};
pub use configuration::{ComposedPart, CompositionConfiguration, ExportBinding};
pub use graph::{DependencyGraph, GraphEdge, GraphNode};

// 重新导出错误类型
pub use infrastructure_common::{CompositionError, CompositionFailedError, InfrastructureError};
