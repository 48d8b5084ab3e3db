//! 错误类型定义

use crate::diagnostics::CompositionFailedError;
use crate::lifecycle::BoxError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    #[error("配置解析失败: {source}")]
    ParseError { source: BoxError },

    #[error("配置验证失败: {message}")]
    ValidationError { message: String },
}

/// 部件发现错误
///
/// 单个类型的发现失败不会阻断整个来源，错误与成功发现的部件一起返回。
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("部件发现失败 [{source_name}]: {message}")]
pub struct DiscoveryError {
    /// 发现来源名称
    pub source_name: String,
    /// 出错的类型（若可确定）
    pub type_name: Option<String>,
    /// 错误描述
    pub message: String,
}

impl DiscoveryError {
    /// 创建发现错误
    pub fn new(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            type_name: None,
            message: message.into(),
        }
    }

    /// 设置出错类型
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

/// 目录错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("部件类型已注册且定义不一致: {type_name}")]
    ConflictingPart { type_name: String },
}

/// 导出数量不符的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MismatchKind {
    /// 没有任何匹配的导出
    NotFound,
    /// 匹配的导出多于允许数量
    Ambiguous,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "未找到"),
            Self::Ambiguous => write!(f, "不唯一"),
        }
    }
}

/// 运行时激活错误类型
#[derive(Error, Debug)]
pub enum ActivationError {
    #[error("无法解析类型: {type_name}")]
    TypeNotResolvable { type_name: String },

    #[error("加载编译单元失败: {unit}, 原因: {source}")]
    UnitLoadFailed { unit: String, source: BoxError },

    #[error("部件构造失败: {part}, 原因: {source}")]
    ConstructionFailed { part: String, source: BoxError },

    #[error("设置导入成员失败: {part}.{member}, 原因: {source}")]
    ImportSetFailed {
        part: String,
        member: String,
        source: BoxError,
    },

    #[error("导入满足通知失败: {part}, 原因: {source}")]
    NotificationFailed { part: String, source: BoxError },

    #[error("获取导出值失败: {part}, 原因: {source}")]
    ExportValueFailed { part: String, source: BoxError },

    #[error("部件 {part} 的依赖 {contract} 激活失败: {source}")]
    DependencyFailed {
        part: String,
        contract: String,
        source: Box<ActivationError>,
    },

    #[error("契约 {contract} 的导出{kind}: 共 {count} 个")]
    CardinalityMismatch {
        contract: String,
        kind: MismatchKind,
        count: usize,
    },

    #[error("部件 {part} 需要的共享边界 {boundaries} 在当前作用域不可用")]
    SharingBoundaryUnavailable { part: String, boundaries: String },

    #[error("作用域已释放: {scope}")]
    Disposed { scope: String },

    #[error("检测到运行时循环激活: {part}")]
    CyclicActivation { part: String },

    #[error("部件 {part} 之前激活失败: {message}")]
    CachedFailure { part: String, message: String },

    #[error("导出值类型不匹配: 期望 {expected}")]
    TypeMismatch { expected: String },

    #[error("导入值形态不匹配: 期望 {expected}, 实际 {actual}")]
    ImportShapeMismatch { expected: String, actual: String },

    #[error("构造参数缺失: 位置 {position}")]
    MissingArgument { position: usize },
}

impl ActivationError {
    /// 是否由作用域释放引起（包括嵌套依赖）
    pub fn is_disposed(&self) -> bool {
        match self {
            Self::Disposed { .. } => true,
            Self::DependencyFailed { source, .. } => source.is_disposed(),
            _ => false,
        }
    }

    /// 最内层的激活错误
    pub fn root_cause(&self) -> &ActivationError {
        match self {
            Self::DependencyFailed { source, .. } => source.root_cause(),
            _ => self,
        }
    }
}

/// 单个实例的释放失败
#[derive(Error, Debug)]
#[error("释放 {part} 失败: {source}")]
pub struct DisposalFailure {
    /// 部件类型
    pub part: String,
    /// 释放时抛出的错误
    pub source: BoxError,
}

/// 释放错误：汇总一次释放过程中的全部失败
#[derive(Error, Debug)]
#[error("释放过程中 {} 个实例出错: {}", .failures.len(), describe_failures(.failures))]
pub struct DisposalError {
    /// 全部失败
    pub failures: Vec<DisposalFailure>,
}

fn describe_failures(failures: &[DisposalFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 组合缓存读写错误
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("缓存读写失败: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("缓存序列化失败: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

/// 基础设施错误类型
#[derive(Error, Debug)]
pub enum InfrastructureError {
    #[error("配置错误: {source}")]
    ConfigError {
        #[from]
        source: ConfigError,
    },

    #[error("目录错误: {source}")]
    CatalogError {
        #[from]
        source: CatalogError,
    },

    #[error("组合错误: {source}")]
    CompositionError {
        #[from]
        source: CompositionFailedError,
    },

    #[error("激活错误: {source}")]
    ActivationError {
        #[from]
        source: ActivationError,
    },

    #[error("释放错误: {source}")]
    DisposalError {
        #[from]
        source: DisposalError,
    },

    #[error("缓存错误: {source}")]
    CacheError {
        #[from]
        source: CacheError,
    },

    #[error("组合引擎启动失败: {message}")]
    BootstrapFailed { message: String },
}

/// 结果类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ActivationResult<T> = Result<T, ActivationError>;
pub type InfrastructureResult<T> = Result<T, InfrastructureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_dependency_chain() {
        let error = ActivationError::DependencyFailed {
            part: "app::A".to_string(),
            contract: "app::B".to_string(),
            source: Box::new(ActivationError::Disposed {
                scope: "root".to_string(),
            }),
        };
        assert!(error.is_disposed());
        assert!(matches!(error.root_cause(), ActivationError::Disposed { .. }));
    }

    #[test]
    fn test_disposal_error_lists_every_failure() {
        let error = DisposalError {
            failures: vec![
                DisposalFailure {
                    part: "app::A".to_string(),
                    source: "boom".into(),
                },
                DisposalFailure {
                    part: "app::B".to_string(),
                    source: "bang".into(),
                },
            ],
        };
        let message = error.to_string();
        assert!(message.contains("app::A"));
        assert!(message.contains("app::B"));
    }
}
