//! 运行时组合
//!
//! 经过验证的组合图展开后的可执行计划。纯数据，可序列化，导出提供者只依赖它。

use crate::part::{Cardinality, ImportSite, ImportWrapper};
use infrastructure_common::{CacheError, CreationPolicy, MemberRef, Metadata, TypeRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// 对某个部件导出的引用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuntimeExportRef {
    /// 部件序号
    pub part: usize,
    /// 导出序号
    pub export: usize,
    /// 取得的是否为共享实例
    pub shared: bool,
}

/// 运行时导出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeExport {
    /// 契约名
    pub contract_name: String,
    /// 契约类型
    pub contract_type: TypeRef,
    /// 导出成员，类型导出为 `None`
    pub member: Option<MemberRef>,
    /// 导出元数据
    pub metadata: Metadata,
}

/// 运行时导入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeImport {
    /// 导入点
    pub site: ImportSite,
    /// 契约名
    pub contract_name: String,
    /// 契约类型
    pub contract_type: TypeRef,
    /// 基数
    pub cardinality: Cardinality,
    /// 包装形式
    pub wrapper: ImportWrapper,
    /// 满足该导入的导出，按目录顺序
    pub satisfying_exports: Vec<RuntimeExportRef>,
}

/// 运行时部件：一份构造配方
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimePart {
    /// 部件类型
    pub type_ref: TypeRef,
    /// 导入构造函数
    pub importing_constructor: Option<MemberRef>,
    /// 构造参数，按位置排列
    pub constructor_arguments: Vec<RuntimeImport>,
    /// 成员导入，按声明顺序赋值
    pub member_imports: Vec<RuntimeImport>,
    /// 导出
    pub exports: Vec<RuntimeExport>,
    /// 创建策略
    pub creation_policy: CreationPolicy,
    /// 实例所需的共享边界
    pub sharing_boundaries: BTreeSet<String>,
    /// 导入满足通知
    pub on_imports_satisfied: Option<MemberRef>,
    /// 是否需要释放
    pub is_disposable: bool,
    /// 部件元数据
    pub metadata: Metadata,
}

impl RuntimePart {
    /// 全部导入：先构造参数后成员
    pub fn imports(&self) -> impl Iterator<Item = &RuntimeImport> {
        self.constructor_arguments.iter().chain(&self.member_imports)
    }
}

/// 运行时组合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeComposition {
    /// 全部部件
    pub parts: Vec<RuntimePart>,
    /// 契约名到导出的索引，按目录顺序
    pub exports: BTreeMap<String, Vec<RuntimeExportRef>>,
}

impl RuntimeComposition {
    /// 按类型查找部件序号
    pub fn part_index(&self, type_ref: &TypeRef) -> Option<usize> {
        self.parts.iter().position(|part| &part.type_ref == type_ref)
    }

    /// 指定契约的全部导出
    pub fn exports_for(&self, contract_name: &str) -> &[RuntimeExportRef] {
        self.exports
            .get(contract_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 导出引用对应的导出定义
    pub fn export(&self, export_ref: &RuntimeExportRef) -> Option<&RuntimeExport> {
        self.parts
            .get(export_ref.part)
            .and_then(|part| part.exports.get(export_ref.export))
    }

    /// 运行时可能需要加载的编译单元
    pub fn collect_units(&self) -> BTreeSet<String> {
        let mut units = BTreeSet::new();
        for part in &self.parts {
            part.type_ref.collect_units(&mut units);
            for export in &part.exports {
                export.contract_type.collect_units(&mut units);
            }
        }
        units
    }

    /// 写入 JSON
    pub fn save<W: Write>(&self, writer: W) -> Result<(), CacheError> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// 从 JSON 读取
    pub fn load<R: Read>(reader: R) -> Result<Self, CacheError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// 保存到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, bytes).await?;
        info!("运行时组合已保存: {} ({} 个部件)", path.display(), self.parts.len());
        Ok(())
    }

    /// 从文件加载
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let composition: Self = serde_json::from_slice(&bytes)?;
        debug!("运行时组合已加载: {} ({} 个部件)", path.display(), composition.parts.len());
        Ok(composition)
    }
}
