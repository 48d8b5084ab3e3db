//! 导入解析
//!
//! 为每个部件的每个导入在目录中查找候选导出：契约名、契约类型（支持开放泛型）、
//! 创建策略与元数据约束全部匹配的导出，按目录顺序排列。导入方声明了共享边界时，
//! 位于兄弟或后代边界的导出不作为候选，经导出工厂的导入除外。

use crate::sharing::BoundaryVisibility;
use di_abstractions::{ComposableCatalog, ImportDefinition, ImportDefinitionBinding, PartDefinition};
use infrastructure_common::{satisfies_constraints, CompositionError, TypeRef};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// 泛型实参的最大嵌套深度，防止 `Foo<T>` 导入 `Foo<Bar<T>>` 之类的无限展开
const MAX_GENERIC_DEPTH: usize = 8;

/// 候选导出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Candidate {
    /// 部件在本轮部件表中的序号
    pub part: usize,
    /// 导出序号
    pub export: usize,
}

/// 一轮解析的结果
#[derive(Debug)]
pub(crate) struct ResolutionPass {
    /// 本轮部件表：目录部件在前，按需关闭的泛型部件依次追加在后
    pub parts: Vec<PartDefinition>,
    /// 每个部件每个导入的候选；开放泛型与已排除部件为 `None`
    pub imports: Vec<Option<Vec<Vec<Candidate>>>>,
    /// 本轮发现的局部错误
    pub errors: Vec<CompositionError>,
    /// 出错的部件
    pub failed: Vec<TypeRef>,
}

struct PartTable {
    parts: Vec<PartDefinition>,
    index: HashMap<TypeRef, usize>,
    catalog_len: usize,
}

impl PartTable {
    fn new(catalog: &ComposableCatalog) -> Self {
        let parts = catalog.parts().to_vec();
        let index = parts
            .iter()
            .enumerate()
            .map(|(i, part)| (part.type_ref.clone(), i))
            .collect();
        Self {
            catalog_len: parts.len(),
            parts,
            index,
        }
    }

    fn insert_closed(&mut self, part: PartDefinition) -> Option<usize> {
        match self.index.get(&part.type_ref) {
            // 目录中已显式注册了同一封闭类型，由目录部件自己提供导出
            Some(&existing) if existing < self.catalog_len => None,
            Some(&existing) => Some(existing),
            None => {
                let position = self.parts.len();
                self.index.insert(part.type_ref.clone(), position);
                self.parts.push(part);
                Some(position)
            }
        }
    }
}

/// 对目录做一轮完整解析，跳过 `excluded` 中的部件
pub(crate) fn resolve(catalog: &ComposableCatalog, excluded: &HashSet<TypeRef>) -> ResolutionPass {
    let mut table = PartTable::new(catalog);
    let visibility = BoundaryVisibility::from_catalog(catalog);
    let mut imports = Vec::new();
    let mut errors = Vec::new();
    let mut failed = Vec::new();

    let mut cursor = 0;
    while cursor < table.parts.len() {
        let part = table.parts[cursor].clone();
        cursor += 1;

        if part.is_generic_definition() || excluded.contains(&part.type_ref) {
            imports.push(None);
            continue;
        }

        let mut part_failed = false;
        let mut resolved = Vec::with_capacity(part.imports.len());
        for binding in &part.imports {
            let candidates = find_candidates(catalog, &mut table, excluded, &visibility, &part, binding);
            let count = candidates.len();
            if !binding.import.cardinality.accepts(count) {
                part_failed = true;
                let site = binding.site.to_string();
                let error = if count == 0 {
                    CompositionError::unsatisfied_import(
                        &part.type_ref,
                        &site,
                        &binding.import.contract_name,
                    )
                } else {
                    let exporters = candidates
                        .iter()
                        .map(|c| table.parts[c.part].type_ref.clone())
                        .collect();
                    CompositionError::ambiguous_import(
                        &part.type_ref,
                        &site,
                        &binding.import.contract_name,
                        exporters,
                    )
                };
                errors.push(error);
            }
            resolved.push(candidates);
        }

        if part_failed {
            failed.push(part.type_ref.clone());
        }
        imports.push(Some(resolved));
    }

    ResolutionPass {
        parts: table.parts,
        imports,
        errors,
        failed,
    }
}

fn find_candidates(
    catalog: &ComposableCatalog,
    table: &mut PartTable,
    excluded: &HashSet<TypeRef>,
    visibility: &BoundaryVisibility,
    importer: &PartDefinition,
    binding: &ImportDefinitionBinding,
) -> Vec<Candidate> {
    let import = &binding.import;
    let mut candidates = Vec::new();
    for location in catalog.exports_for(&import.contract_name) {
        let exporter = &catalog.parts()[location.part_index];
        if excluded.contains(&exporter.type_ref) {
            continue;
        }
        if !binding.wrapper.is_export_factory()
            && !visibility.can_import(importer.sharing_boundary.as_deref(), exporter.sharing_boundary.as_deref())
        {
            trace!(
                "{} 位于边界 {:?}，对 {} 不可见",
                exporter.type_ref,
                exporter.sharing_boundary,
                importer.type_ref
            );
            continue;
        }

        if exporter.is_generic_definition() {
            let Some(closed) = close_for_import(exporter, location.export_index, import) else {
                continue;
            };
            if excluded.contains(&closed.type_ref) || !is_acceptable(&closed, location.export_index, import) {
                continue;
            }
            trace!("按导入 {} 关闭泛型部件 {}", import.contract_type, closed.type_ref);
            if let Some(part) = table.insert_closed(closed) {
                candidates.push(Candidate {
                    part,
                    export: location.export_index,
                });
            }
        } else {
            let export = exporter.all_exports()[location.export_index].definition;
            if export.contract_type == import.contract_type
                && is_acceptable(exporter, location.export_index, import)
            {
                candidates.push(Candidate {
                    part: location.part_index,
                    export: location.export_index,
                });
            }
        }
    }
    candidates
}

fn is_acceptable(exporter: &PartDefinition, export_index: usize, import: &ImportDefinition) -> bool {
    let exports = exporter.all_exports();
    let Some(export) = exports.get(export_index) else {
        return false;
    };
    import.required_creation_policy.accepts(exporter.creation_policy)
        && satisfies_constraints(&export.definition.metadata, &import.metadata_constraints)
}

fn close_for_import(
    exporter: &PartDefinition,
    export_index: usize,
    import: &ImportDefinition,
) -> Option<PartDefinition> {
    if import.contract_type.is_open() || type_depth(&import.contract_type) > MAX_GENERIC_DEPTH {
        return None;
    }
    let exports = exporter.all_exports();
    let pattern = &exports.get(export_index)?.definition.contract_type;

    let mut bindings = Vec::new();
    if !pattern.unify(&import.contract_type, &mut bindings) {
        return None;
    }

    let arity = exporter.type_ref.generic_parameter_count();
    if bindings.len() < arity {
        return None;
    }
    let args: Option<Vec<TypeRef>> = bindings.into_iter().take(arity).collect();
    args.map(|args| exporter.close(&args))
}

fn type_depth(type_ref: &TypeRef) -> usize {
    1 + type_ref.args().iter().map(type_depth).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use di_abstractions::{Cardinality, ExportDefinition, ImportDefinitionBinding};
    use infrastructure_common::{CompositionErrorKind, CreationPolicy, MemberRef};

    fn ty(name: &str) -> TypeRef {
        TypeRef::new("app", format!("app::{}", name))
    }

    fn importer(name: &str, import: ImportDefinition) -> PartDefinition {
        PartDefinition::new(ty(name))
            .with_import(ImportDefinitionBinding::member(MemberRef::property(ty(name), "dep"), import))
    }

    fn catalog(parts: Vec<PartDefinition>) -> ComposableCatalog {
        ComposableCatalog::new().add_parts(parts).unwrap()
    }

    #[test]
    fn test_exact_match_and_missing() {
        let pass = resolve(
            &catalog(vec![
                PartDefinition::new(ty("Logger")).with_self_export(),
                importer("Consumer", ImportDefinition::new(ty("Logger"))),
                importer("Orphan", ImportDefinition::new(ty("Missing"))),
            ]),
            &HashSet::new(),
        );

        let consumer = pass.imports[1].as_ref().unwrap();
        assert_eq!(consumer[0], vec![Candidate { part: 0, export: 0 }]);
        assert_eq!(pass.errors.len(), 1);
        assert_eq!(pass.errors[0].kind, CompositionErrorKind::UnsatisfiedImport);
        assert_eq!(pass.failed, vec![ty("Orphan")]);
    }

    #[test]
    fn test_policy_and_metadata_filters() {
        let plugin = ty("IPlugin");
        let pass = resolve(
            &catalog(vec![
                PartDefinition::new(ty("Shared"))
                    .with_creation_policy(CreationPolicy::Shared)
                    .with_export(ExportDefinition::new(plugin.clone()).with_metadata("Name", "a")),
                PartDefinition::new(ty("Fresh"))
                    .with_creation_policy(CreationPolicy::NonShared)
                    .with_export(ExportDefinition::new(plugin.clone()).with_metadata("Name", "b")),
                importer(
                    "NeedsNonShared",
                    ImportDefinition::new(plugin.clone())
                        .with_cardinality(Cardinality::ZeroOrMore)
                        .with_creation_policy(CreationPolicy::NonShared),
                ),
                importer(
                    "NeedsA",
                    ImportDefinition::new(plugin).with_constraint("Name", "a"),
                ),
            ]),
            &HashSet::new(),
        );

        assert!(pass.errors.is_empty());
        assert_eq!(pass.imports[2].as_ref().unwrap()[0], vec![Candidate { part: 1, export: 0 }]);
        assert_eq!(pass.imports[3].as_ref().unwrap()[0], vec![Candidate { part: 0, export: 0 }]);
    }

    #[test]
    fn test_ambiguous_exactly_one() {
        let plugin = ty("IPlugin");
        let pass = resolve(
            &catalog(vec![
                PartDefinition::new(ty("A")).with_export(ExportDefinition::new(plugin.clone())),
                PartDefinition::new(ty("B")).with_export(ExportDefinition::new(plugin.clone())),
                importer("Consumer", ImportDefinition::new(plugin)),
            ]),
            &HashSet::new(),
        );
        assert_eq!(pass.errors.len(), 1);
        assert_eq!(pass.errors[0].kind, CompositionErrorKind::AmbiguousImport);
        assert_eq!(pass.errors[0].parts.len(), 3);
    }

    #[test]
    fn test_open_generic_is_closed_on_demand() {
        let open = TypeRef::generic("app", "app::Repository", vec![TypeRef::parameter(0)]);
        let user = TypeRef::new("model", "model::User");
        let closed = TypeRef::generic("app", "app::Repository", vec![user.clone()]);
        let entity = TypeRef::new("model", "model::Entity");

        let repository = PartDefinition::new(open.clone())
            .with_self_export()
            .with_import(ImportDefinitionBinding::member(
                MemberRef::property(open, "entity"),
                ImportDefinition::new(TypeRef::parameter(0)),
            ));

        let pass = resolve(
            &catalog(vec![
                repository,
                PartDefinition::new(user.clone()).with_self_export(),
                PartDefinition::new(entity).with_self_export(),
                importer("Service", ImportDefinition::new(closed.clone())),
            ]),
            &HashSet::new(),
        );

        assert!(pass.errors.is_empty(), "{:?}", pass.errors);
        assert_eq!(pass.parts.len(), 5);
        assert_eq!(pass.parts[4].type_ref, closed);
        assert!(pass.imports[0].is_none());
        let closed_imports = pass.imports[4].as_ref().unwrap();
        assert_eq!(closed_imports[0], vec![Candidate { part: 1, export: 0 }]);
        assert_eq!(pass.imports[3].as_ref().unwrap()[0], vec![Candidate { part: 4, export: 0 }]);
    }

    #[test]
    fn test_excluded_exporter_is_not_a_candidate() {
        let mut excluded = HashSet::new();
        excluded.insert(ty("Logger"));
        let pass = resolve(
            &catalog(vec![
                PartDefinition::new(ty("Logger")).with_self_export(),
                importer("Consumer", ImportDefinition::new(ty("Logger"))),
            ]),
            &excluded,
        );
        assert!(pass.imports[0].is_none());
        assert_eq!(pass.failed, vec![ty("Consumer")]);
    }

    #[test]
    fn test_sibling_boundary_exports_are_not_candidates() {
        let plugin = ty("IPlugin");
        let pass = resolve(
            &catalog(vec![
                PartDefinition::new(ty("RootPlugin")).with_export(ExportDefinition::new(plugin.clone())),
                PartDefinition::new(ty("UploadPlugin"))
                    .with_sharing_boundary("upload")
                    .with_export(ExportDefinition::new(plugin.clone())),
                importer(
                    "Request",
                    ImportDefinition::new(plugin.clone()).with_cardinality(Cardinality::ExactlyOne),
                )
                .with_sharing_boundary("request"),
                importer("Unscoped", ImportDefinition::new(plugin).with_cardinality(Cardinality::ZeroOrMore)),
            ]),
            &HashSet::new(),
        );

        assert!(pass.errors.is_empty(), "{:?}", pass.errors);
        assert_eq!(pass.imports[2].as_ref().unwrap()[0], vec![Candidate { part: 0, export: 0 }]);
        assert_eq!(pass.imports[3].as_ref().unwrap()[0].len(), 2);
    }
}
