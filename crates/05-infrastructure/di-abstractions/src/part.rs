//! 部件定义模型
//!
//! 发现阶段产出的不可变部件描述：类型、导出契约、导入点、共享边界与创建策略。
//! 除了相等比较与结构校验外不包含任何行为。

use infrastructure_common::{
    collect_metadata_units, CreationPolicy, MemberRef, Metadata, MetadataValue, TypeRef,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 导入基数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Cardinality {
    /// 恰好一个
    #[default]
    ExactlyOne,
    /// 零个或一个
    ZeroOrOne,
    /// 任意个
    ZeroOrMore,
}

impl Cardinality {
    /// 给定数量的导出是否满足基数要求
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::ExactlyOne => count == 1,
            Self::ZeroOrOne => count <= 1,
            Self::ZeroOrMore => true,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactlyOne => write!(f, "ExactlyOne"),
            Self::ZeroOrOne => write!(f, "ZeroOrOne"),
            Self::ZeroOrMore => write!(f, "ZeroOrMore"),
        }
    }
}

/// 导出定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDefinition {
    /// 契约名
    pub contract_name: String,
    /// 契约类型
    pub contract_type: TypeRef,
    /// 导出元数据
    pub metadata: Metadata,
}

impl ExportDefinition {
    /// 以类型本身的契约名导出
    pub fn new(contract_type: TypeRef) -> Self {
        Self {
            contract_name: contract_type.contract_name(),
            contract_type,
            metadata: Metadata::new(),
        }
    }

    /// 以指定契约名导出
    pub fn named(contract_name: impl Into<String>, contract_type: TypeRef) -> Self {
        Self {
            contract_name: contract_name.into(),
            contract_type,
            metadata: Metadata::new(),
        }
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn substitute(&self, bindings: &[TypeRef]) -> Self {
        let contract_type = self.contract_type.substitute(bindings);
        Self {
            contract_name: substitute_contract_name(&self.contract_name, &self.contract_type, &contract_type),
            contract_type,
            metadata: substitute_metadata(&self.metadata, bindings),
        }
    }

    fn collect_units(&self, units: &mut BTreeSet<String>) {
        self.contract_type.collect_units(units);
        collect_metadata_units(&self.metadata, units);
    }
}

/// 导入定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDefinition {
    /// 契约名
    pub contract_name: String,
    /// 契约类型
    pub contract_type: TypeRef,
    /// 基数
    pub cardinality: Cardinality,
    /// 要求的创建策略
    pub required_creation_policy: CreationPolicy,
    /// 元数据约束：每个键必须存在于导出元数据中且值相等
    pub metadata_constraints: Metadata,
}

impl ImportDefinition {
    /// 按类型本身的契约名导入
    pub fn new(contract_type: TypeRef) -> Self {
        Self {
            contract_name: contract_type.contract_name(),
            contract_type,
            cardinality: Cardinality::ExactlyOne,
            required_creation_policy: CreationPolicy::Any,
            metadata_constraints: Metadata::new(),
        }
    }

    /// 按指定契约名导入
    pub fn named(contract_name: impl Into<String>, contract_type: TypeRef) -> Self {
        Self {
            contract_name: contract_name.into(),
            ..Self::new(contract_type)
        }
    }

    /// 设置基数
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// 设置要求的创建策略
    pub fn with_creation_policy(mut self, policy: CreationPolicy) -> Self {
        self.required_creation_policy = policy;
        self
    }

    /// 添加元数据约束
    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata_constraints.insert(key.into(), value.into());
        self
    }

    fn substitute(&self, bindings: &[TypeRef]) -> Self {
        let contract_type = self.contract_type.substitute(bindings);
        Self {
            contract_name: substitute_contract_name(&self.contract_name, &self.contract_type, &contract_type),
            contract_type,
            cardinality: self.cardinality,
            required_creation_policy: self.required_creation_policy,
            metadata_constraints: substitute_metadata(&self.metadata_constraints, bindings),
        }
    }
}

/// 导入值的包装形式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImportWrapper {
    /// 直接注入导出值
    #[default]
    Direct,
    /// 延迟值，首次访问时才激活
    Lazy,
    /// 导出工厂，每次调用在新的子作用域中创建实例
    ExportFactory {
        /// 工厂创建的共享边界
        sharing_boundaries: BTreeSet<String>,
    },
}

impl ImportWrapper {
    /// 是否延迟求值
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Lazy)
    }

    /// 是否为导出工厂
    pub fn is_export_factory(&self) -> bool {
        matches!(self, Self::ExportFactory { .. })
    }

    /// 导出工厂创建的共享边界
    pub fn factory_boundaries(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::ExportFactory { sharing_boundaries } => Some(sharing_boundaries),
            _ => None,
        }
    }
}

impl fmt::Display for ImportWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Lazy => write!(f, "lazy"),
            Self::ExportFactory { sharing_boundaries } if sharing_boundaries.is_empty() => {
                write!(f, "factory")
            }
            Self::ExportFactory { sharing_boundaries } => {
                let names: Vec<&str> = sharing_boundaries.iter().map(String::as_str).collect();
                write!(f, "factory[{}]", names.join(","))
            }
        }
    }
}

/// 导入点：构造函数参数或可赋值成员
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportSite {
    /// 导入构造函数的参数
    Parameter {
        /// 所属构造函数
        constructor: MemberRef,
        /// 参数位置
        position: usize,
    },
    /// 字段或属性
    Member(MemberRef),
}

impl ImportSite {
    /// 是否为构造函数参数
    pub fn is_parameter(&self) -> bool {
        matches!(self, Self::Parameter { .. })
    }

    fn substitute(&self, bindings: &[TypeRef]) -> Self {
        match self {
            Self::Parameter {
                constructor,
                position,
            } => Self::Parameter {
                constructor: constructor.substitute(bindings),
                position: *position,
            },
            Self::Member(member) => Self::Member(member.substitute(bindings)),
        }
    }
}

impl fmt::Display for ImportSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameter {
                constructor,
                position,
            } => write!(f, "{} 参数 #{}", constructor, position),
            Self::Member(member) => write!(f, "{}", member),
        }
    }
}

/// 导入绑定：导入点 + 导入定义 + 包装形式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDefinitionBinding {
    /// 导入点
    pub site: ImportSite,
    /// 导入定义
    pub import: ImportDefinition,
    /// 包装形式
    pub wrapper: ImportWrapper,
}

impl ImportDefinitionBinding {
    /// 构造函数参数导入
    pub fn parameter(constructor: &MemberRef, position: usize, import: ImportDefinition) -> Self {
        Self {
            site: ImportSite::Parameter {
                constructor: constructor.clone(),
                position,
            },
            import,
            wrapper: ImportWrapper::Direct,
        }
    }

    /// 成员导入
    pub fn member(member: MemberRef, import: ImportDefinition) -> Self {
        Self {
            site: ImportSite::Member(member),
            import,
            wrapper: ImportWrapper::Direct,
        }
    }

    /// 改为延迟导入
    pub fn lazy(mut self) -> Self {
        self.wrapper = ImportWrapper::Lazy;
        self
    }

    /// 改为导出工厂导入
    pub fn export_factory<I, S>(mut self, sharing_boundaries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wrapper = ImportWrapper::ExportFactory {
            sharing_boundaries: sharing_boundaries.into_iter().map(Into::into).collect(),
        };
        self
    }

    fn substitute(&self, bindings: &[TypeRef]) -> Self {
        Self {
            site: self.site.substitute(bindings),
            import: self.import.substitute(bindings),
            wrapper: self.wrapper.clone(),
        }
    }
}

/// 成员上的导出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberExports {
    /// 导出成员（字段、属性或方法）
    pub member: MemberRef,
    /// 该成员的导出
    pub exports: Vec<ExportDefinition>,
}

/// 部件导出的引用：类型导出的 `member` 为 `None`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartExport<'a> {
    /// 导出成员
    pub member: Option<&'a MemberRef>,
    /// 导出定义
    pub definition: &'a ExportDefinition,
}

/// 部件定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDefinition {
    /// 部件类型（身份）
    pub type_ref: TypeRef,
    /// 基类型
    pub base_types: Vec<TypeRef>,
    /// 实现的接口
    pub interfaces: Vec<TypeRef>,
    /// 类型上的导出
    pub exports_on_type: Vec<ExportDefinition>,
    /// 成员上的导出
    pub exports_on_members: Vec<MemberExports>,
    /// 导入绑定，成员导入按声明顺序排列
    pub imports: Vec<ImportDefinitionBinding>,
    /// 导入构造函数，`None` 表示无参构造
    pub importing_constructor: Option<MemberRef>,
    /// 显式共享边界
    pub sharing_boundary: Option<String>,
    /// 创建策略
    pub creation_policy: CreationPolicy,
    /// 部件级元数据
    pub metadata: Metadata,
    /// 导入满足后调用的方法
    pub on_imports_satisfied: Option<MemberRef>,
    /// 实例是否需要释放
    pub is_disposable: bool,
}

impl PartDefinition {
    /// 创建空部件定义
    pub fn new(type_ref: TypeRef) -> Self {
        Self {
            type_ref,
            base_types: Vec::new(),
            interfaces: Vec::new(),
            exports_on_type: Vec::new(),
            exports_on_members: Vec::new(),
            imports: Vec::new(),
            importing_constructor: None,
            sharing_boundary: None,
            creation_policy: CreationPolicy::Any,
            metadata: Metadata::new(),
            on_imports_satisfied: None,
            is_disposable: false,
        }
    }

    /// 以部件类型本身导出
    pub fn with_self_export(self) -> Self {
        let export = ExportDefinition::new(self.type_ref.clone());
        self.with_export(export)
    }

    /// 添加类型导出
    pub fn with_export(mut self, export: ExportDefinition) -> Self {
        self.exports_on_type.push(export);
        self
    }

    /// 添加成员导出
    pub fn with_member_export(mut self, member: MemberRef, export: ExportDefinition) -> Self {
        if let Some(existing) = self
            .exports_on_members
            .iter_mut()
            .find(|entry| entry.member == member)
        {
            existing.exports.push(export);
        } else {
            self.exports_on_members.push(MemberExports {
                member,
                exports: vec![export],
            });
        }
        self
    }

    /// 设置导入构造函数
    pub fn with_importing_constructor(mut self, constructor: MemberRef) -> Self {
        self.importing_constructor = Some(constructor);
        self
    }

    /// 添加导入
    pub fn with_import(mut self, binding: ImportDefinitionBinding) -> Self {
        self.imports.push(binding);
        self
    }

    /// 设置共享边界
    pub fn with_sharing_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.sharing_boundary = Some(boundary.into());
        self
    }

    /// 设置创建策略
    pub fn with_creation_policy(mut self, policy: CreationPolicy) -> Self {
        self.creation_policy = policy;
        self
    }

    /// 添加部件元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 设置导入满足通知方法
    pub fn with_on_imports_satisfied(mut self, method: MemberRef) -> Self {
        self.on_imports_satisfied = Some(method);
        self
    }

    /// 标记为需要释放
    pub fn disposable(mut self) -> Self {
        self.is_disposable = true;
        self
    }

    /// 添加基类型
    pub fn with_base_type(mut self, base: TypeRef) -> Self {
        self.base_types.push(base);
        self
    }

    /// 添加实现的接口
    pub fn with_interface(mut self, interface: TypeRef) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// 是否为开放泛型定义
    pub fn is_generic_definition(&self) -> bool {
        self.type_ref.is_open()
    }

    /// 全部导出：先类型导出，后按成员声明顺序的成员导出
    pub fn all_exports(&self) -> Vec<PartExport<'_>> {
        let on_type = self.exports_on_type.iter().map(|definition| PartExport {
            member: None,
            definition,
        });
        let on_members = self.exports_on_members.iter().flat_map(|entry| {
            entry.exports.iter().map(move |definition| PartExport {
                member: Some(&entry.member),
                definition,
            })
        });
        on_type.chain(on_members).collect()
    }

    /// 构造函数参数导入，按位置排序
    pub fn constructor_imports(&self) -> Vec<(usize, &ImportDefinitionBinding)> {
        let mut imports: Vec<(usize, &ImportDefinitionBinding)> = self
            .imports
            .iter()
            .filter_map(|binding| match &binding.site {
                ImportSite::Parameter { position, .. } => Some((*position, binding)),
                ImportSite::Member(_) => None,
            })
            .collect();
        imports.sort_by_key(|(position, _)| *position);
        imports
    }

    /// 结构校验，返回全部问题
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if matches!(self.type_ref, TypeRef::Parameter { .. }) {
            problems.push("部件类型不能是泛型形参".to_string());
        }

        let mut positions = Vec::new();
        for binding in &self.imports {
            match &binding.site {
                ImportSite::Parameter {
                    constructor,
                    position,
                } => {
                    if !constructor.is_constructor() {
                        problems.push(format!("导入参数所属成员不是构造函数: {}", constructor));
                    }
                    match &self.importing_constructor {
                        Some(importing) if importing == constructor => {}
                        Some(importing) => problems.push(format!(
                            "导入参数属于 {}，但导入构造函数是 {}",
                            constructor, importing
                        )),
                        None => problems.push(format!(
                            "存在构造参数导入 {} 但未指定导入构造函数",
                            binding.site
                        )),
                    }
                    positions.push(*position);
                }
                ImportSite::Member(member) => {
                    if !member.is_settable() {
                        problems.push(format!("导入成员必须是字段或属性: {}", member));
                    }
                }
            }
        }

        if let Some(constructor) = &self.importing_constructor {
            match constructor {
                MemberRef::Constructor { parameters, .. } => {
                    positions.sort_unstable();
                    let expected: Vec<usize> = (0..parameters.len()).collect();
                    if positions != expected {
                        problems.push(format!(
                            "构造函数 {} 有 {} 个参数，导入位置应为 0..{} 且各出现一次，实际为 {:?}",
                            constructor,
                            parameters.len(),
                            parameters.len(),
                            positions
                        ));
                    }
                }
                other => problems.push(format!("导入构造函数不是构造函数: {}", other)),
            }
        }

        if let Some(method) = &self.on_imports_satisfied {
            if !method.is_method() {
                problems.push(format!("导入满足通知必须是方法: {}", method));
            }
        }

        for entry in &self.exports_on_members {
            if !(entry.member.is_settable() || entry.member.is_method()) {
                problems.push(format!("成员导出必须是字段、属性或方法: {}", entry.member));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// 用泛型实参关闭开放泛型部件
    pub fn close(&self, args: &[TypeRef]) -> Self {
        Self {
            type_ref: self.type_ref.substitute(args),
            base_types: self.base_types.iter().map(|t| t.substitute(args)).collect(),
            interfaces: self.interfaces.iter().map(|t| t.substitute(args)).collect(),
            exports_on_type: self
                .exports_on_type
                .iter()
                .map(|export| export.substitute(args))
                .collect(),
            exports_on_members: self
                .exports_on_members
                .iter()
                .map(|entry| MemberExports {
                    member: entry.member.substitute(args),
                    exports: entry.exports.iter().map(|e| e.substitute(args)).collect(),
                })
                .collect(),
            imports: self.imports.iter().map(|b| b.substitute(args)).collect(),
            importing_constructor: self
                .importing_constructor
                .as_ref()
                .map(|c| c.substitute(args)),
            sharing_boundary: self.sharing_boundary.clone(),
            creation_policy: self.creation_policy,
            metadata: substitute_metadata(&self.metadata, args),
            on_imports_satisfied: self
                .on_imports_satisfied
                .as_ref()
                .map(|m| m.substitute(args)),
            is_disposable: self.is_disposable,
        }
    }

    /// 收集部件引用到的全部编译单元
    ///
    /// 只遍历描述数据，不会触发任何编译单元的加载。
    pub fn collect_units(&self, units: &mut BTreeSet<String>) {
        self.type_ref.collect_units(units);
        for base in self.base_types.iter().chain(&self.interfaces) {
            base.collect_units(units);
        }
        for export in &self.exports_on_type {
            export.collect_units(units);
        }
        for entry in &self.exports_on_members {
            entry.member.collect_units(units);
            for export in &entry.exports {
                export.collect_units(units);
            }
        }
        for binding in &self.imports {
            binding.import.contract_type.collect_units(units);
            collect_metadata_units(&binding.import.metadata_constraints, units);
        }
        collect_metadata_units(&self.metadata, units);
    }
}

// 默认契约名随类型一起替换，显式契约名保持不变
fn substitute_contract_name(name: &str, original: &TypeRef, substituted: &TypeRef) -> String {
    if name == original.contract_name() {
        substituted.contract_name()
    } else {
        name.to_string()
    }
}

fn substitute_metadata(metadata: &Metadata, bindings: &[TypeRef]) -> Metadata {
    metadata
        .iter()
        .map(|(key, value)| (key.clone(), substitute_value(value, bindings)))
        .collect()
}

fn substitute_value(value: &MetadataValue, bindings: &[TypeRef]) -> MetadataValue {
    match value {
        MetadataValue::Type(type_ref) => MetadataValue::Type(type_ref.substitute(bindings)),
        MetadataValue::Array(items) => MetadataValue::Array(
            items
                .iter()
                .map(|item| substitute_value(item, bindings))
                .collect(),
        ),
        other => other.clone(),
    }
}
