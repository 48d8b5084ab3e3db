//! # 导出提供者
//!
//! 运行时组合的执行引擎：按构造配方激活部件，维护作用域内的共享实例，
//! 提供延迟值与导出工厂，并在作用域销毁时释放实例。
//!
//! ```rust,ignore
//! let provider = ExportProvider::new(runtime, resolver, CompositionOptions::default());
//! let logger = provider.get_exported_value::<Logger>()?;
//!
//! let request = provider.create_scope(["request"])?;
//! let context = request.get_exported_value::<RequestContext>()?;
//! request.dispose()?;
//! ```

mod activation;
mod scope;

pub mod provider;

pub use provider::{Export, ExportProvider, ExportQuery};
