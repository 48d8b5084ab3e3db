//! 组合引擎配置
//!
//! 通过 `config` crate 从可选配置文件与环境变量加载。

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// 默认配置文件（不含扩展名）
pub const DEFAULT_CONFIG_FILE: &str = "config/composition";

/// 环境变量前缀
pub const ENV_PREFIX: &str = "COMPOSITION";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 组合引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionOptions {
    /// 配置存在组合错误时仍允许生成运行时组合（仅供诊断工具使用）
    pub allow_invalid_configuration: bool,
    /// 共享部件构造失败后是否缓存失败；关闭时后续请求会重新尝试构造
    pub cache_activation_failures: bool,
    /// 日志级别
    pub log_level: String,
}

impl Default for CompositionOptions {
    fn default() -> Self {
        Self {
            allow_invalid_configuration: false,
            cache_activation_failures: false,
            log_level: "info".to_string(),
        }
    }
}

impl CompositionOptions {
    /// 从默认配置文件（可缺省）和环境变量加载
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::ParseError {
                source: Box::new(e),
            })?;
        Self::from_settings(settings)
    }

    /// 从指定配置文件加载，文件必须存在
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        debug!("加载组合引擎配置文件: {}", path.display());
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| ConfigError::ParseError {
                source: Box::new(e),
            })?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self, ConfigError> {
        let options: Self = settings
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError {
                source: Box::new(e),
            })?;
        options.validate()?;
        Ok(options)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!("未知的日志级别: {}", self.log_level),
            });
        }
        Ok(())
    }

    /// 对应的 tracing 日志级别
    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}
