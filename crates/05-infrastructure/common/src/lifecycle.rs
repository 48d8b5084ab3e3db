//! 部件生命周期约定

use serde::{Deserialize, Serialize};
use std::fmt;

/// 用户回调返回的错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 部件创建策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum CreationPolicy {
    /// 由导入端决定：未明确要求非共享时按共享处理
    #[default]
    Any,
    /// 共享 - 每个作用域实例内只创建一个实例
    Shared,
    /// 非共享 - 每次请求都创建新实例
    NonShared,
}

impl CreationPolicy {
    /// 导入端要求的策略是否接受该部件策略
    pub fn accepts(self, part_policy: CreationPolicy) -> bool {
        match self {
            Self::Any => true,
            Self::Shared => part_policy != Self::NonShared,
            Self::NonShared => part_policy != Self::Shared,
        }
    }

    /// 以本策略（导入端要求）获取该部件时，得到的是否为共享实例
    pub fn yields_shared(self, part_policy: CreationPolicy) -> bool {
        match part_policy {
            Self::Shared => true,
            Self::NonShared => false,
            Self::Any => self != Self::NonShared,
        }
    }
}

impl fmt::Display for CreationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Shared => write!(f, "Shared"),
            Self::NonShared => write!(f, "NonShared"),
        }
    }
}

/// 可释放约定
///
/// 实现此 trait 的部件会登记到激活它的作用域，作用域销毁时统一释放。
pub trait Disposable: Send + Sync {
    /// 释放资源
    fn dispose(&self) -> Result<(), BoxError>;
}
