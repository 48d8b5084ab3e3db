//! 组合构建器
//!
//! 把部件发现、目录合并、图构建、运行时计划和导出提供者串成一条流水线。

use crate::configuration::CompositionConfiguration;
use di_abstractions::{ComposableCatalog, PartDefinition, PartDiscovery, Resolver, RuntimeComposition};
use di_impl::ExportProvider;
use futures::future::join_all;
use infrastructure_common::{CompositionOptions, InfrastructureError};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 组合构建器
///
/// 使用建造者模式组装目录并生成导出提供者
pub struct CompositionBuilder {
    /// 部件发现器，按添加顺序合并
    discoveries: Vec<Arc<dyn PartDiscovery>>,
    /// 直接添加的部件
    parts: Vec<PartDefinition>,
    /// 预先构建的目录
    catalogs: Vec<ComposableCatalog>,
    /// 引擎配置
    options: CompositionOptions,
    /// 解析上下文，未指定时使用空的解析上下文
    resolver: Option<Arc<Resolver>>,
    /// 是否启用日志初始化
    logging_enabled: bool,
    /// 日志配置
    logging_config: LoggingConfig,
}

impl CompositionBuilder {
    /// 创建新的组合构建器
    pub fn new() -> Self {
        Self {
            discoveries: Vec::new(),
            parts: Vec::new(),
            catalogs: Vec::new(),
            options: CompositionOptions::default(),
            resolver: None,
            logging_enabled: false, // 默认不启用日志初始化
            logging_config: LoggingConfig::default(),
        }
    }

    /// 添加部件发现器
    pub fn add_discovery<D: PartDiscovery + 'static>(mut self, discovery: D) -> Self {
        debug!("添加部件发现器: {}", discovery.name());
        self.discoveries.push(Arc::new(discovery));
        self
    }

    /// 添加部件定义
    pub fn add_part(mut self, part: PartDefinition) -> Self {
        self.parts.push(part);
        self
    }

    /// 批量添加部件定义
    pub fn add_parts<I: IntoIterator<Item = PartDefinition>>(mut self, parts: I) -> Self {
        self.parts.extend(parts);
        self
    }

    /// 合并已有目录
    pub fn add_catalog(mut self, catalog: ComposableCatalog) -> Self {
        self.catalogs.push(catalog);
        self
    }

    /// 设置引擎配置
    pub fn with_options(mut self, options: CompositionOptions) -> Self {
        self.options = options;
        self
    }

    /// 从配置文件加载引擎配置
    pub fn with_options_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, InfrastructureError> {
        let path = path.as_ref();
        info!("加载组合引擎配置: {}", path.display());
        self.options = CompositionOptions::from_file(path)?;
        Ok(self)
    }

    /// 设置解析上下文
    pub fn with_resolver(mut self, resolver: Arc<Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// 配置日志
    pub fn with_logging(mut self, config: LoggingConfig) -> Self {
        self.logging_config = config;
        self.logging_enabled = true;
        self
    }

    /// 引擎配置
    pub fn options(&self) -> &CompositionOptions {
        &self.options
    }

    /// 运行全部发现器并合并成目录
    ///
    /// 顺序为：预先构建的目录、直接添加的部件、各发现器的结果。
    pub async fn build_catalog(&self) -> Result<ComposableCatalog, InfrastructureError> {
        let mut catalog = ComposableCatalog::new()
            .add_catalogs(&self.catalogs)?
            .add_parts(self.parts.iter().cloned())?;

        let discovered = join_all(self.discoveries.iter().map(|discovery| discovery.discover())).await;
        for (discovery, parts) in self.discoveries.iter().zip(discovered) {
            if !parts.errors.is_empty() {
                warn!("发现器 {} 报告 {} 个错误", discovery.name(), parts.errors.len());
            }
            debug!("发现器 {} 提供 {} 个部件", discovery.name(), parts.parts.len());
            catalog = catalog.add_discovered(parts)?;
        }

        info!(
            "目录构建完成: {} 个部件, {} 个发现错误",
            catalog.len(),
            catalog.discovery_errors().len()
        );
        Ok(catalog)
    }

    /// 构建组合配置，组合错误保留在配置中
    pub async fn build_configuration(&self) -> Result<CompositionConfiguration, InfrastructureError> {
        let catalog = self.build_catalog().await?;
        Ok(CompositionConfiguration::create(catalog))
    }

    /// 构建运行时组合
    pub async fn build_runtime(&self) -> Result<RuntimeComposition, InfrastructureError> {
        let configuration = self.build_configuration().await?;
        Ok(configuration.to_runtime(&self.options)?)
    }

    /// 构建导出提供者
    pub async fn build(self) -> Result<ExportProvider, InfrastructureError> {
        info!("开始构建组合");

        // 只有在明确配置了日志时才初始化日志
        if self.logging_enabled {
            self.initialize_logging()?;
        }

        let runtime = self.build_runtime().await?;
        let provider = self.into_provider(runtime);
        info!("组合构建完成");
        Ok(provider)
    }

    /// 跳过图构建，直接使用已保存的运行时组合
    pub async fn build_from_cache<P: AsRef<Path>>(self, path: P) -> Result<ExportProvider, InfrastructureError> {
        if self.logging_enabled {
            self.initialize_logging()?;
        }

        let runtime = RuntimeComposition::load_from_file(path).await?;
        info!("使用缓存的运行时组合: {} 个部件", runtime.parts.len());
        Ok(self.into_provider(runtime))
    }

    fn into_provider(self, runtime: RuntimeComposition) -> ExportProvider {
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(Resolver::new()));
        ExportProvider::new(runtime, resolver, self.options)
    }

    /// 初始化日志系统
    fn initialize_logging(&self) -> Result<(), InfrastructureError> {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(self.logging_config.level)
            .with_target(self.logging_config.show_target)
            .with_thread_ids(self.logging_config.show_thread_ids)
            .with_file(self.logging_config.show_file)
            .with_line_number(self.logging_config.show_line_number);

        if self.logging_config.json_format {
            subscriber.json().try_init()
        } else {
            subscriber.try_init()
        }
        .map_err(|e| InfrastructureError::BootstrapFailed {
            message: format!("日志初始化失败: {}", e),
        })?;

        info!("日志系统初始化完成");
        Ok(())
    }
}

impl Default for CompositionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: tracing::Level,
    /// 是否显示目标
    pub show_target: bool,
    /// 是否显示线程ID
    pub show_thread_ids: bool,
    /// 是否显示文件名
    pub show_file: bool,
    /// 是否显示行号
    pub show_line_number: bool,
    /// 是否使用 JSON 格式
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: tracing::Level::INFO,
            show_target: true,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// 开发环境：DEBUG 级别，附带线程与源码位置
    pub fn development() -> Self {
        Self {
            level: tracing::Level::DEBUG,
            show_target: true,
            show_thread_ids: true,
            show_file: true,
            show_line_number: true,
            json_format: false,
        }
    }

    /// 生产环境：JSON 输出
    pub fn production() -> Self {
        Self {
            level: tracing::Level::INFO,
            show_target: false,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
            json_format: true,
        }
    }

    /// 使用引擎配置中的日志级别
    pub fn from_options(options: &CompositionOptions) -> Self {
        Self {
            level: options.tracing_level(),
            ..Self::default()
        }
    }
}
