//! 元数据定义
//!
//! 导出与部件携带的键值元数据

use crate::reflection::TypeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// 元数据值
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetadataValue {
    /// 空值
    Null,
    /// 布尔值
    Bool(bool),
    /// 整数
    Integer(i64),
    /// 字符串
    String(String),
    /// 类型引用
    Type(TypeRef),
    /// 数组
    Array(Vec<MetadataValue>),
}

impl MetadataValue {
    /// 获取字符串值
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// 获取布尔值
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// 获取整数值
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// 获取类型引用
    pub fn as_type(&self) -> Option<&TypeRef> {
        match self {
            Self::Type(value) => Some(value),
            _ => None,
        }
    }

    /// 收集值中引用到的编译单元
    pub fn collect_units(&self, units: &mut BTreeSet<String>) {
        match self {
            Self::Type(type_ref) => type_ref.collect_units(units),
            Self::Array(items) => {
                for item in items {
                    item.collect_units(units);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{}", value),
            Self::Integer(value) => write!(f, "{}", value),
            Self::String(value) => write!(f, "\"{}\"", value),
            Self::Type(value) => write!(f, "typeof({})", value),
            Self::Array(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<TypeRef> for MetadataValue {
    fn from(value: TypeRef) -> Self {
        Self::Type(value)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

/// 元数据映射，按键排序以保证确定的比较与序列化
pub type Metadata = BTreeMap<String, MetadataValue>;

/// 检查元数据是否满足全部约束：每个约束键都存在且值相等
pub fn satisfies_constraints(metadata: &Metadata, constraints: &Metadata) -> bool {
    constraints
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// 收集元数据中引用到的编译单元
pub fn collect_metadata_units(metadata: &Metadata, units: &mut BTreeSet<String>) {
    for value in metadata.values() {
        value.collect_units(units);
    }
}
