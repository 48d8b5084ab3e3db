//! 共享边界推断
//!
//! 部件所需的边界 = 显式边界 ∪ 所有直接依赖所需的边界；经导出工厂导入的依赖
//! 扣除工厂创建的边界。结果按不动点迭代求得。

use crate::configuration::ComposedPart;
use di_abstractions::ComposableCatalog;
use infrastructure_common::CompositionError;
use std::collections::{BTreeMap, BTreeSet};

/// 计算每个部件所需的共享边界
pub(crate) fn required_boundaries(parts: &[ComposedPart]) -> Vec<BTreeSet<String>> {
    let mut required: Vec<BTreeSet<String>> = parts
        .iter()
        .map(|part| part.definition.sharing_boundary.iter().cloned().collect())
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for (index, part) in parts.iter().enumerate() {
            let mut inherited = BTreeSet::new();
            for (binding, exports) in part.resolved_imports() {
                let created = binding.wrapper.factory_boundaries();
                for export in exports {
                    inherited.extend(
                        required[export.part]
                            .iter()
                            .filter(|boundary| created.map_or(true, |set| !set.contains(*boundary)))
                            .cloned(),
                    );
                }
            }
            for boundary in inherited {
                if required[index].insert(boundary) {
                    changed = true;
                }
            }
        }
    }

    required
}

/// 边界的父子关系：工厂在部件 P 上创建边界集合 F 时，
/// F 中每个边界都是 `(required(P) ∪ F) − {自身}` 的子边界
fn boundary_parents(parts: &[ComposedPart]) -> BTreeMap<String, BTreeSet<String>> {
    let mut parents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for part in parts {
        for (binding, _) in part.resolved_imports() {
            let Some(created) = binding.wrapper.factory_boundaries() else {
                continue;
            };
            for child in created {
                let entry = parents.entry(child.clone()).or_default();
                entry.extend(
                    part.required_boundaries
                        .iter()
                        .chain(created)
                        .filter(|boundary| *boundary != child)
                        .cloned(),
                );
            }
        }
    }
    parents
}

fn is_ancestor(parents: &BTreeMap<String, BTreeSet<String>>, candidate: &str, boundary: &str) -> bool {
    let mut visited = BTreeSet::new();
    let mut pending = vec![boundary];
    while let Some(current) = pending.pop() {
        if !visited.insert(current) {
            continue;
        }
        if let Some(direct) = parents.get(current) {
            if direct.contains(candidate) {
                return true;
            }
            pending.extend(direct.iter().map(String::as_str));
        }
    }
    false
}

/// 解析阶段的边界可见性
///
/// 解析前还不知道导入落在哪个导出上，所以按契约名对所需边界做上估计：
/// 凡是可能满足某个导入的导出方，其边界都计入导入方。由此得到的祖先关系只会偏多，
/// 据此剔除的候选一定不可见。
#[derive(Debug, Default)]
pub(crate) struct BoundaryVisibility {
    parents: BTreeMap<String, BTreeSet<String>>,
}

impl BoundaryVisibility {
    pub(crate) fn from_catalog(catalog: &ComposableCatalog) -> Self {
        let parts = catalog.parts();
        let mut possible: Vec<BTreeSet<String>> = parts
            .iter()
            .map(|part| part.sharing_boundary.iter().cloned().collect())
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for (index, part) in parts.iter().enumerate() {
                let mut inherited = Vec::new();
                for binding in &part.imports {
                    let created = binding.wrapper.factory_boundaries();
                    for location in catalog.exports_for(&binding.import.contract_name) {
                        inherited.extend(
                            possible[location.part_index]
                                .iter()
                                .filter(|boundary| created.map_or(true, |set| !set.contains(*boundary)))
                                .cloned(),
                        );
                    }
                }
                for boundary in inherited {
                    if possible[index].insert(boundary) {
                        changed = true;
                    }
                }
            }
        }

        let mut parents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (index, part) in parts.iter().enumerate() {
            for binding in &part.imports {
                let Some(created) = binding.wrapper.factory_boundaries() else {
                    continue;
                };
                for child in created {
                    parents.entry(child.clone()).or_default().extend(
                        possible[index]
                            .iter()
                            .chain(created)
                            .filter(|boundary| *boundary != child)
                            .cloned(),
                    );
                }
            }
        }

        Self { parents }
    }

    /// 显式边界为 `importer` 的部件能否直接导入显式边界为 `exporter` 的部件
    ///
    /// 根边界处处可见；没有显式边界的导入方交给边界推断处理。
    pub(crate) fn can_import(&self, importer: Option<&str>, exporter: Option<&str>) -> bool {
        match (importer, exporter) {
            (_, None) | (None, _) => true,
            (Some(own), Some(other)) => own == other || is_ancestor(&self.parents, other, own),
        }
    }
}

/// 查找共享边界冲突：显式声明边界 `b` 的部件直接导入了需要边界 `a` 的部件，
/// 而 `a` 既不是 `b` 也不是 `b` 的祖先。每个部件至多报告一次。
pub(crate) fn boundary_violations(parts: &[ComposedPart]) -> Vec<CompositionError> {
    let parents = boundary_parents(parts);
    let mut errors = Vec::new();

    'parts: for part in parts {
        let Some(own) = &part.definition.sharing_boundary else {
            continue;
        };
        for (binding, exports) in part.resolved_imports() {
            if binding.wrapper.is_export_factory() {
                continue;
            }
            for export in exports {
                let imported = &parts[export.part];
                let foreign = imported
                    .required_boundaries
                    .iter()
                    .find(|boundary| *boundary != own && !is_ancestor(&parents, boundary, own));
                if let Some(foreign) = foreign {
                    errors.push(CompositionError::sharing_boundary_violation(
                        &part.definition.type_ref,
                        own,
                        &imported.definition.type_ref,
                        foreign,
                    ));
                    continue 'parts;
                }
            }
        }
    }

    errors
}
