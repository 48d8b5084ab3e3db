//! 运行时计划生成
//!
//! 把组合配置中的每个部件展开成构造配方。

use crate::configuration::{CompositionConfiguration, ExportBinding};
use di_abstractions::{
    ImportDefinitionBinding, ImportSite, RuntimeComposition, RuntimeExport, RuntimeExportRef,
    RuntimeImport, RuntimePart,
};
use infrastructure_common::{CompositionFailedError, CompositionOptions, CreationPolicy};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// 生成运行时组合
///
/// 配置存在错误时拒绝生成，除非 `allow_invalid_configuration` 打开；此时只包含
/// 成功组合的部件。
pub fn plan(
    configuration: &CompositionConfiguration,
    options: &CompositionOptions,
) -> Result<RuntimeComposition, CompositionFailedError> {
    if !configuration.is_valid() {
        if !options.allow_invalid_configuration {
            return Err(CompositionFailedError::new(configuration.error_groups().to_vec()));
        }
        warn!("组合配置存在错误，按配置要求仍然生成运行时组合");
    }

    let composed = configuration.parts();
    let policy_of = |binding: &ExportBinding| composed[binding.part].definition.creation_policy;

    let mut parts = Vec::with_capacity(composed.len());
    let mut exports: BTreeMap<String, Vec<RuntimeExportRef>> = BTreeMap::new();

    for (part_index, part) in composed.iter().enumerate() {
        let definition = &part.definition;

        let mut constructor_arguments = Vec::new();
        let mut member_imports = Vec::new();
        for (binding, satisfying) in part.resolved_imports() {
            let import = runtime_import(binding, satisfying, policy_of);
            match binding.site {
                ImportSite::Parameter { position, .. } => constructor_arguments.push((position, import)),
                ImportSite::Member(_) => member_imports.push(import),
            }
        }
        constructor_arguments.sort_by_key(|(position, _)| *position);

        let runtime_exports: Vec<RuntimeExport> = definition
            .all_exports()
            .into_iter()
            .map(|export| RuntimeExport {
                contract_name: export.definition.contract_name.clone(),
                contract_type: export.definition.contract_type.clone(),
                member: export.member.cloned(),
                metadata: export.definition.metadata.clone(),
            })
            .collect();

        for (export_index, export) in runtime_exports.iter().enumerate() {
            exports
                .entry(export.contract_name.clone())
                .or_default()
                .push(RuntimeExportRef {
                    part: part_index,
                    export: export_index,
                    shared: CreationPolicy::Any.yields_shared(definition.creation_policy),
                });
        }

        parts.push(RuntimePart {
            type_ref: definition.type_ref.clone(),
            importing_constructor: definition.importing_constructor.clone(),
            constructor_arguments: constructor_arguments
                .into_iter()
                .map(|(_, import)| import)
                .collect(),
            member_imports,
            exports: runtime_exports,
            creation_policy: definition.creation_policy,
            sharing_boundaries: part.required_boundaries.clone(),
            on_imports_satisfied: definition.on_imports_satisfied.clone(),
            is_disposable: definition.is_disposable,
            metadata: definition.metadata.clone(),
        });
    }

    info!("运行时组合生成完成: {} 个部件, {} 个契约", parts.len(), exports.len());
    Ok(RuntimeComposition { parts, exports })
}

fn runtime_import(
    binding: &ImportDefinitionBinding,
    satisfying: &[ExportBinding],
    policy_of: impl Fn(&ExportBinding) -> CreationPolicy,
) -> RuntimeImport {
    let import = &binding.import;
    RuntimeImport {
        site: binding.site.clone(),
        contract_name: import.contract_name.clone(),
        contract_type: import.contract_type.clone(),
        cardinality: import.cardinality,
        wrapper: binding.wrapper.clone(),
        satisfying_exports: satisfying
            .iter()
            .map(|export| RuntimeExportRef {
                part: export.part,
                export: export.export,
                shared: import.required_creation_policy.yields_shared(policy_of(export)),
            })
            .collect(),
    }
}
