//! 组合诊断
//!
//! 图构建阶段产生的结构化错误。错误按依赖关系分组：后面的组可能由前面组中的
//! 问题引起，使用方应优先修复靠前的错误。

use crate::reflection::TypeRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 组合错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositionErrorKind {
    /// 部件定义本身不合法
    InvalidPart,
    /// 导入无法满足
    UnsatisfiedImport,
    /// 导入匹配到多个导出，但只允许一个
    AmbiguousImport,
    /// 无法打破的循环依赖
    IllegalCycle,
    /// 跨越了不可见的共享边界
    SharingBoundaryViolation,
}

impl fmt::Display for CompositionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidPart => "部件定义无效",
            Self::UnsatisfiedImport => "导入无法满足",
            Self::AmbiguousImport => "导入不唯一",
            Self::IllegalCycle => "非法循环依赖",
            Self::SharingBoundaryViolation => "共享边界冲突",
        };
        write!(f, "{}", text)
    }
}

/// 单条组合错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionError {
    /// 错误类别
    pub kind: CompositionErrorKind,
    /// 错误描述
    pub message: String,
    /// 涉及的部件，第一个为出错部件
    pub parts: Vec<TypeRef>,
    /// 相关导入的契约名
    pub contract: Option<String>,
}

impl CompositionError {
    /// 部件定义无效
    pub fn invalid_part(part: &TypeRef, reasons: &[String]) -> Self {
        Self {
            kind: CompositionErrorKind::InvalidPart,
            message: format!("部件 {} 定义无效: {}", part, reasons.join("; ")),
            parts: vec![part.clone()],
            contract: None,
        }
    }

    /// 导入无法满足
    pub fn unsatisfied_import(part: &TypeRef, site: &str, contract: &str) -> Self {
        Self {
            kind: CompositionErrorKind::UnsatisfiedImport,
            message: format!(
                "部件 {} 的导入 {} 无法满足: 没有匹配契约 {} 的导出",
                part, site, contract
            ),
            parts: vec![part.clone()],
            contract: Some(contract.to_string()),
        }
    }

    /// 导入匹配到多个导出
    pub fn ambiguous_import(
        part: &TypeRef,
        site: &str,
        contract: &str,
        candidates: Vec<TypeRef>,
    ) -> Self {
        let names: Vec<String> = candidates.iter().map(ToString::to_string).collect();
        let mut parts = vec![part.clone()];
        parts.extend(candidates);
        Self {
            kind: CompositionErrorKind::AmbiguousImport,
            message: format!(
                "部件 {} 的导入 {} 只允许一个导出，但契约 {} 有 {} 个: {}",
                part,
                site,
                contract,
                names.len(),
                names.join(", ")
            ),
            parts,
            contract: Some(contract.to_string()),
        }
    }

    /// 非法循环依赖
    pub fn illegal_cycle(parts: Vec<TypeRef>, reason: &str) -> Self {
        let names: Vec<String> = parts.iter().map(ToString::to_string).collect();
        Self {
            kind: CompositionErrorKind::IllegalCycle,
            message: format!("部件 {} 之间存在无法打破的循环依赖: {}", names.join(" -> "), reason),
            parts,
            contract: None,
        }
    }

    /// 共享边界冲突
    pub fn sharing_boundary_violation(
        part: &TypeRef,
        boundary: &str,
        imported: &TypeRef,
        foreign_boundary: &str,
    ) -> Self {
        Self {
            kind: CompositionErrorKind::SharingBoundaryViolation,
            message: format!(
                "共享边界 {} 内的部件 {} 导入了属于共享边界 {} 的部件 {}，该边界对其不可见",
                boundary, part, foreign_boundary, imported
            ),
            parts: vec![part.clone(), imported.clone()],
            contract: None,
        }
    }

    /// 出错的部件
    pub fn part(&self) -> Option<&TypeRef> {
        self.parts.first()
    }
}

impl fmt::Display for CompositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// 组合失败：携带完整的错误分组
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct CompositionFailedError {
    /// 错误分组，靠前的组是根因
    pub error_groups: Vec<Vec<CompositionError>>,
}

impl CompositionFailedError {
    /// 创建组合失败错误
    pub fn new(error_groups: Vec<Vec<CompositionError>>) -> Self {
        Self { error_groups }
    }

    /// 第一组非空错误
    pub fn first_group(&self) -> &[CompositionError] {
        self.error_groups
            .iter()
            .find(|group| !group.is_empty())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 全部错误，按组顺序
    pub fn errors(&self) -> impl Iterator<Item = &CompositionError> {
        self.error_groups.iter().flatten()
    }
}

impl fmt::Display for CompositionFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total: usize = self.error_groups.iter().map(Vec::len).sum();
        write!(
            f,
            "组合失败: {} 组共 {} 个错误，请优先处理第一组",
            self.error_groups.len(),
            total
        )?;
        for error in self.first_group() {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}
