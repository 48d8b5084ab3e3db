//! 可组合目录
//!
//! 不可变的部件定义集合。每次添加都返回新目录，原目录保持不变。

use crate::discovery::DiscoveredParts;
use crate::part::PartDefinition;
use infrastructure_common::{CatalogError, DiscoveryError, TypeRef};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// 导出在目录中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportLocation {
    /// 部件在目录中的序号
    pub part_index: usize,
    /// 导出在 [`PartDefinition::all_exports`] 中的序号
    pub export_index: usize,
}

#[derive(Debug, Clone, Default)]
struct CatalogIndex {
    by_type: HashMap<TypeRef, usize>,
    by_contract: HashMap<String, Vec<ExportLocation>>,
}

/// 可组合目录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposableCatalog {
    parts: Vec<PartDefinition>,
    discovery_errors: Vec<DiscoveryError>,
    #[serde(skip)]
    index: OnceCell<CatalogIndex>,
}

impl ComposableCatalog {
    /// 创建空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加部件，返回新目录
    ///
    /// 完全相同的部件会被静默去重；同一类型但定义不同则报错。
    pub fn add_parts<I>(&self, parts: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = PartDefinition>,
    {
        let mut merged = self.parts.clone();
        let mut by_type: HashMap<TypeRef, usize> = merged
            .iter()
            .enumerate()
            .map(|(index, part)| (part.type_ref.clone(), index))
            .collect();

        let mut added = 0usize;
        for part in parts {
            match by_type.get(&part.type_ref) {
                Some(&existing) if merged[existing] == part => {
                    debug!("部件已存在且定义相同，跳过: {}", part.type_ref);
                }
                Some(_) => {
                    return Err(CatalogError::ConflictingPart {
                        type_name: part.type_ref.to_string(),
                    });
                }
                None => {
                    by_type.insert(part.type_ref.clone(), merged.len());
                    merged.push(part);
                    added += 1;
                }
            }
        }

        debug!("目录新增 {} 个部件，共 {} 个", added, merged.len());
        Ok(Self {
            parts: merged,
            discovery_errors: self.discovery_errors.clone(),
            index: OnceCell::new(),
        })
    }

    /// 添加一次发现的结果：部件合并，发现错误追加
    pub fn add_discovered(&self, discovered: DiscoveredParts) -> Result<Self, CatalogError> {
        let mut catalog = self.add_parts(discovered.parts)?;
        catalog.discovery_errors.extend(discovered.errors);
        Ok(catalog)
    }

    /// 合并另一个目录，发现错误直接拼接不去重
    pub fn add_catalog(&self, other: &ComposableCatalog) -> Result<Self, CatalogError> {
        let mut catalog = self.add_parts(other.parts.iter().cloned())?;
        catalog
            .discovery_errors
            .extend(other.discovery_errors.iter().cloned());
        Ok(catalog)
    }

    /// 依次合并多个目录
    pub fn add_catalogs<'a, I>(&self, others: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = &'a ComposableCatalog>,
    {
        let mut catalog = self.clone();
        for other in others {
            catalog = catalog.add_catalog(other)?;
        }
        info!(
            "目录合并完成: {} 个部件, {} 个发现错误",
            catalog.parts.len(),
            catalog.discovery_errors.len()
        );
        Ok(catalog)
    }

    /// 全部部件，按添加顺序
    pub fn parts(&self) -> &[PartDefinition] {
        &self.parts
    }

    /// 发现错误
    pub fn discovery_errors(&self) -> &[DiscoveryError] {
        &self.discovery_errors
    }

    /// 部件数量
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// 按类型查找部件
    pub fn get(&self, type_ref: &TypeRef) -> Option<&PartDefinition> {
        self.index()
            .by_type
            .get(type_ref)
            .map(|&index| &self.parts[index])
    }

    /// 可能满足指定契约的全部导出，按目录添加顺序
    pub fn exports_for(&self, contract_name: &str) -> &[ExportLocation] {
        self.index()
            .by_contract
            .get(contract_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 缓存的组合在运行时需要加载的编译单元闭包
    ///
    /// 只遍历部件描述数据，不经过解析上下文，因此不会触发任何延迟加载。
    pub fn get_input_units(&self) -> BTreeSet<String> {
        let mut units = BTreeSet::new();
        for part in &self.parts {
            part.collect_units(&mut units);
        }
        units
    }

    fn index(&self) -> &CatalogIndex {
        self.index.get_or_init(|| {
            let mut index = CatalogIndex::default();
            for (part_index, part) in self.parts.iter().enumerate() {
                index.by_type.insert(part.type_ref.clone(), part_index);
                for (export_index, export) in part.all_exports().iter().enumerate() {
                    index
                        .by_contract
                        .entry(export.definition.contract_name.clone())
                        .or_default()
                        .push(ExportLocation {
                            part_index,
                            export_index,
                        });
                }
            }
            index
        })
    }
}

impl PartialEq for ComposableCatalog {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts && self.discovery_errors == other.discovery_errors
    }
}

impl Eq for ComposableCatalog {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::{ExportDefinition, ImportDefinition, ImportDefinitionBinding};
    use infrastructure_common::MemberRef;

    fn service(name: &str) -> PartDefinition {
        PartDefinition::new(TypeRef::new("app", format!("app::{}", name))).with_self_export()
    }

    #[test]
    fn test_adding_identical_part_is_idempotent() {
        let part = service("Logger");
        let once = ComposableCatalog::new().add_parts(vec![part.clone()]).unwrap();
        let twice = once.add_parts(vec![part]).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn test_conflicting_part_is_rejected() {
        let part = service("Logger");
        let catalog = ComposableCatalog::new().add_parts(vec![part.clone()]).unwrap();
        let changed = part.with_export(ExportDefinition::named(
            "Extra",
            TypeRef::new("app", "app::Logger"),
        ));
        let result = catalog.add_parts(vec![changed]);
        assert!(matches!(result, Err(CatalogError::ConflictingPart { .. })));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_merge_concatenates_discovery_errors() {
        let errors = DiscoveredParts {
            parts: vec![service("A")],
            errors: vec![DiscoveryError::new("scan", "坏类型")],
        };
        let left = ComposableCatalog::new().add_discovered(errors).unwrap();
        let merged = left.add_catalogs([&left, &left]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.discovery_errors().len(), 3);
    }

    #[test]
    fn test_exports_for_keeps_insertion_order() {
        let plugin = TypeRef::new("app", "app::IPlugin");
        let first = PartDefinition::new(TypeRef::new("app", "app::Zeta"))
            .with_export(ExportDefinition::new(plugin.clone()));
        let second = PartDefinition::new(TypeRef::new("app", "app::Alpha"))
            .with_export(ExportDefinition::new(plugin.clone()));
        let catalog = ComposableCatalog::new().add_parts(vec![first, second]).unwrap();

        let locations = catalog.exports_for(&plugin.contract_name());
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].part_index, 0);
        assert_eq!(locations[1].part_index, 1);
        assert!(catalog.exports_for("app::Missing").is_empty());
    }

    #[test]
    fn test_get_input_units() {
        let consumer = TypeRef::new("app", "app::Consumer");
        let part = PartDefinition::new(consumer.clone()).with_import(
            ImportDefinitionBinding::member(
                MemberRef::property(consumer, "logger"),
                ImportDefinition::new(TypeRef::new("logging", "logging::Logger")),
            ),
        );
        let catalog = ComposableCatalog::new().add_parts(vec![part]).unwrap();
        let units: Vec<String> = catalog.get_input_units().into_iter().collect();
        assert_eq!(units, vec!["app".to_string(), "logging".to_string()]);
    }

    #[test]
    fn test_serde_round_trip_rebuilds_index() {
        let catalog = ComposableCatalog::new()
            .add_parts(vec![service("Logger")])
            .unwrap();
        let json = serde_json::to_string(&catalog).unwrap();
        let restored: ComposableCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(catalog, restored);
        assert!(restored.get(&TypeRef::new("app", "app::Logger")).is_some());
    }
}
