//! 组合配置
//!
//! 图构建的结果：每个部件的每个导入都已解析到具体导出，共享边界已推断，
//! 循环依赖已分类。构建过程不会因单个部件出错而中止，出错部件被排除后重新
//! 解析，错误按因果关系分组。

use crate::cycles::illegal_cycles;
use crate::graph::DependencyGraph;
use crate::planner;
use crate::resolution::{resolve, ResolutionPass};
use crate::sharing::{boundary_violations, required_boundaries};
use di_abstractions::{ComposableCatalog, ImportDefinitionBinding, PartDefinition, RuntimeComposition};
use infrastructure_common::{
    CompositionError, CompositionFailedError, CompositionOptions, TypeRef,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// 满足导入的一个导出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportBinding {
    /// 导出部件在配置中的序号
    pub part: usize,
    /// 导出序号，对应 [`PartDefinition::all_exports`]
    pub export: usize,
}

/// 已组合的部件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedPart {
    /// 部件定义（开放泛型已关闭）
    pub definition: PartDefinition,
    /// 与 `definition.imports` 一一对应的满足导出
    pub satisfying_exports: Vec<Vec<ExportBinding>>,
    /// 实例所需的共享边界
    pub required_boundaries: BTreeSet<String>,
}

impl ComposedPart {
    /// 导入绑定及其满足导出
    pub fn resolved_imports(&self) -> impl Iterator<Item = (&ImportDefinitionBinding, &[ExportBinding])> {
        self.definition
            .imports
            .iter()
            .zip(self.satisfying_exports.iter().map(Vec::as_slice))
    }
}

/// 组合配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionConfiguration {
    catalog: ComposableCatalog,
    parts: Vec<ComposedPart>,
    error_groups: Vec<Vec<CompositionError>>,
}

impl CompositionConfiguration {
    /// 由目录构建组合配置
    pub fn create(catalog: ComposableCatalog) -> Self {
        info!("开始构建组合配置: {} 个部件", catalog.len());

        let mut excluded: HashSet<TypeRef> = HashSet::new();
        let mut error_groups: Vec<Vec<CompositionError>> = Vec::new();

        let invalid: Vec<CompositionError> = catalog
            .parts()
            .iter()
            .filter_map(|part| {
                part.validate()
                    .err()
                    .map(|reasons| CompositionError::invalid_part(&part.type_ref, &reasons))
            })
            .collect();
        if !invalid.is_empty() {
            excluded.extend(invalid.iter().filter_map(|e| e.part().cloned()));
            record_group(&mut error_groups, invalid);
        }

        let parts = loop {
            let pass = resolve(&catalog, &excluded);
            if !pass.errors.is_empty() {
                excluded.extend(pass.failed);
                record_group(&mut error_groups, pass.errors);
                continue;
            }

            let mut parts = compact(pass);
            let required = required_boundaries(&parts);
            for (part, boundaries) in parts.iter_mut().zip(required) {
                part.required_boundaries = boundaries;
            }

            let violations = boundary_violations(&parts);
            if !violations.is_empty() {
                excluded.extend(violations.iter().filter_map(|e| e.part().cloned()));
                record_group(&mut error_groups, violations);
                continue;
            }

            let cycles = illegal_cycles(&parts);
            if !cycles.is_empty() {
                excluded.extend(cycles.iter().flat_map(|e| e.parts.iter().cloned()));
                record_group(&mut error_groups, cycles);
                continue;
            }

            break parts;
        };

        if error_groups.is_empty() {
            info!("组合配置构建完成: {} 个部件", parts.len());
        } else {
            warn!(
                "组合配置构建完成: {} 个部件可用, {} 组错误",
                parts.len(),
                error_groups.len()
            );
        }

        Self {
            catalog,
            parts,
            error_groups,
        }
    }

    /// 源目录
    pub fn catalog(&self) -> &ComposableCatalog {
        &self.catalog
    }

    /// 成功组合的部件
    pub fn parts(&self) -> &[ComposedPart] {
        &self.parts
    }

    /// 按类型查找已组合的部件
    pub fn part(&self, type_ref: &TypeRef) -> Option<&ComposedPart> {
        self.parts
            .iter()
            .find(|part| &part.definition.type_ref == type_ref)
    }

    /// 错误分组，靠前的组是根因
    pub fn error_groups(&self) -> &[Vec<CompositionError>] {
        &self.error_groups
    }

    /// 全部错误
    pub fn errors(&self) -> impl Iterator<Item = &CompositionError> {
        self.error_groups.iter().flatten()
    }

    /// 是否没有任何组合错误
    pub fn is_valid(&self) -> bool {
        self.error_groups.is_empty()
    }

    /// 存在错误时返回聚合的组合失败错误
    pub fn throw_on_errors(&self) -> Result<&Self, CompositionFailedError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(CompositionFailedError::new(self.error_groups.clone()))
        }
    }

    /// 生成运行时组合
    pub fn to_runtime(&self, options: &CompositionOptions) -> Result<RuntimeComposition, CompositionFailedError> {
        planner::plan(self, options)
    }

    /// 生成依赖关系图
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_configuration(self)
    }
}

fn record_group(groups: &mut Vec<Vec<CompositionError>>, group: Vec<CompositionError>) {
    for error in &group {
        debug!("组合错误: {}", error);
    }
    warn!("第 {} 组组合错误: {} 个", groups.len() + 1, group.len());
    groups.push(group);
}

/// 去掉开放泛型与被排除的部件，重新编号
fn compact(pass: ResolutionPass) -> Vec<ComposedPart> {
    let mut renumber = HashMap::new();
    for (old, imports) in pass.imports.iter().enumerate() {
        if imports.is_some() {
            renumber.insert(old, renumber.len());
        }
    }

    pass.parts
        .into_iter()
        .zip(pass.imports)
        .filter_map(|(definition, imports)| {
            let imports = imports?;
            let satisfying_exports = imports
                .into_iter()
                .map(|candidates| {
                    candidates
                        .into_iter()
                        .filter_map(|candidate| {
                            renumber.get(&candidate.part).map(|&part| ExportBinding {
                                part,
                                export: candidate.export,
                            })
                        })
                        .collect()
                })
                .collect();
            Some(ComposedPart {
                definition,
                satisfying_exports,
                required_boundaries: BTreeSet::new(),
            })
        })
        .collect()
}
