//! 部件发现
//!
//! 发现器把各种来源的部件描述统一转换为 [`PartDefinition`]。单个类型的失败
//! 只记录为 [`DiscoveryError`]，不会影响同一来源中的其它部件。

use crate::part::{
    Cardinality, ExportDefinition, ImportDefinition, ImportDefinitionBinding, PartDefinition,
};
use async_trait::async_trait;
use futures::future::join_all;
use infrastructure_common::{
    CreationPolicy, DiscoveryError, MemberRef, Metadata, MetadataValue, TypeRef,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 发现结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredParts {
    /// 成功发现的部件
    pub parts: Vec<PartDefinition>,
    /// 非致命的发现错误
    pub errors: Vec<DiscoveryError>,
}

impl DiscoveredParts {
    /// 合并另一次发现的结果
    pub fn merge(&mut self, other: DiscoveredParts) {
        self.parts.extend(other.parts);
        self.errors.extend(other.errors);
    }
}

/// 部件发现器
#[async_trait]
pub trait PartDiscovery: Send + Sync {
    /// 执行发现
    async fn discover(&self) -> DiscoveredParts;

    /// 发现器名称
    fn name(&self) -> &str;
}

/// 部件来源
///
/// 每种来源由各自的适配器转换为统一的部件定义，组合核心不区分来源。
#[derive(Debug, Clone)]
pub enum PartSource {
    /// 已经是部件定义
    Definition(PartDefinition),
    /// 声明式部件描述
    Descriptor(PartDescriptor),
}

impl PartSource {
    /// 转换为部件定义
    pub fn normalize(self, source_name: &str) -> Result<PartDefinition, DiscoveryError> {
        match self {
            Self::Definition(definition) => Ok(definition),
            Self::Descriptor(descriptor) => {
                let type_name = descriptor.part_type.display_name();
                descriptor
                    .into_definition()
                    .map_err(|message| DiscoveryError::new(source_name, message).with_type(type_name))
            }
        }
    }
}

/// 声明式类型描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeDescriptor {
    /// 泛型形参
    Parameter {
        /// 形参位置
        parameter: usize,
    },
    /// 具名类型
    Named {
        /// 编译单元
        unit: String,
        /// 类型名
        name: String,
        /// 泛型实参
        #[serde(default)]
        args: Vec<TypeDescriptor>,
    },
}

impl TypeDescriptor {
    fn to_type_ref(&self) -> TypeRef {
        match self {
            Self::Parameter { parameter } => TypeRef::parameter(*parameter),
            Self::Named { unit, name, args } => TypeRef::generic(
                unit.clone(),
                name.clone(),
                args.iter().map(TypeDescriptor::to_type_ref).collect(),
            ),
        }
    }

    fn display_name(&self) -> String {
        self.to_type_ref().to_string()
    }
}

/// 声明式导出描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDescriptor {
    /// 契约名，缺省为契约类型名
    #[serde(default)]
    pub contract: Option<String>,
    /// 契约类型，缺省为部件类型
    #[serde(default, rename = "type")]
    pub contract_type: Option<TypeDescriptor>,
    /// 导出成员（属性名），缺省为类型导出
    #[serde(default)]
    pub property: Option<String>,
    /// 元数据
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// 声明式导入点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SiteDescriptor {
    /// 构造函数参数
    Parameter {
        /// 参数位置
        position: usize,
    },
    /// 字段
    Field {
        /// 字段名
        name: String,
    },
    /// 属性
    Property {
        /// 属性名
        name: String,
    },
}

/// 声明式导入描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDescriptor {
    /// 导入点
    pub site: SiteDescriptor,
    /// 契约名，缺省为契约类型名
    #[serde(default)]
    pub contract: Option<String>,
    /// 契约类型
    #[serde(rename = "type")]
    pub contract_type: TypeDescriptor,
    /// 基数
    #[serde(default)]
    pub cardinality: Cardinality,
    /// 要求的创建策略
    #[serde(default)]
    pub creation_policy: CreationPolicy,
    /// 是否延迟导入
    #[serde(default)]
    pub lazy: bool,
    /// 以导出工厂导入，值为工厂创建的共享边界
    #[serde(default)]
    pub export_factory: Option<Vec<String>>,
    /// 元数据约束
    #[serde(default)]
    pub constraints: BTreeMap<String, serde_json::Value>,
}

/// 声明式部件描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    /// 部件类型
    #[serde(rename = "type")]
    pub part_type: TypeDescriptor,
    /// 导入构造函数的参数类型
    #[serde(default)]
    pub constructor: Option<Vec<TypeDescriptor>>,
    /// 导出
    #[serde(default)]
    pub exports: Vec<ExportDescriptor>,
    /// 导入
    #[serde(default)]
    pub imports: Vec<ImportDescriptor>,
    /// 共享边界
    #[serde(default)]
    pub sharing_boundary: Option<String>,
    /// 创建策略
    #[serde(default)]
    pub creation_policy: CreationPolicy,
    /// 部件元数据
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// 导入满足通知方法名
    #[serde(default)]
    pub on_imports_satisfied: Option<String>,
    /// 是否需要释放
    #[serde(default)]
    pub disposable: bool,
}

impl PartDescriptor {
    /// 转换为部件定义
    pub fn into_definition(self) -> Result<PartDefinition, String> {
        let type_ref = self.part_type.to_type_ref();
        let mut part = PartDefinition::new(type_ref.clone()).with_creation_policy(self.creation_policy);

        let constructor = self.constructor.as_ref().map(|parameters| {
            MemberRef::constructor(
                type_ref.clone(),
                parameters.iter().map(TypeDescriptor::to_type_ref).collect(),
            )
        });
        if let Some(constructor) = &constructor {
            part = part.with_importing_constructor(constructor.clone());
        }

        for export in self.exports {
            let contract_type = export
                .contract_type
                .as_ref()
                .map_or_else(|| type_ref.clone(), TypeDescriptor::to_type_ref);
            let mut definition = match export.contract {
                Some(contract) => ExportDefinition::named(contract, contract_type),
                None => ExportDefinition::new(contract_type),
            };
            definition.metadata = convert_metadata(export.metadata)?;
            part = match export.property {
                Some(property) => {
                    part.with_member_export(MemberRef::property(type_ref.clone(), property), definition)
                }
                None => part.with_export(definition),
            };
        }

        for import in self.imports {
            let contract_type = import.contract_type.to_type_ref();
            let mut definition = match import.contract {
                Some(contract) => ImportDefinition::named(contract, contract_type),
                None => ImportDefinition::new(contract_type),
            }
            .with_cardinality(import.cardinality)
            .with_creation_policy(import.creation_policy);
            definition.metadata_constraints = convert_metadata(import.constraints)?;

            let mut binding = match import.site {
                SiteDescriptor::Parameter { position } => {
                    let constructor = constructor.as_ref().ok_or_else(|| {
                        format!("参数导入 #{} 需要声明 constructor", position)
                    })?;
                    ImportDefinitionBinding::parameter(constructor, position, definition)
                }
                SiteDescriptor::Field { name } => {
                    ImportDefinitionBinding::member(MemberRef::field(type_ref.clone(), name), definition)
                }
                SiteDescriptor::Property { name } => ImportDefinitionBinding::member(
                    MemberRef::property(type_ref.clone(), name),
                    definition,
                ),
            };
            if import.lazy && import.export_factory.is_some() {
                return Err("导入不能同时是延迟导入和导出工厂".to_string());
            }
            if import.lazy {
                binding = binding.lazy();
            }
            if let Some(boundaries) = import.export_factory {
                binding = binding.export_factory(boundaries);
            }
            part = part.with_import(binding);
        }

        if let Some(boundary) = self.sharing_boundary {
            part = part.with_sharing_boundary(boundary);
        }
        part.metadata = convert_metadata(self.metadata)?;
        if let Some(method) = self.on_imports_satisfied {
            part = part.with_on_imports_satisfied(MemberRef::method(type_ref.clone(), method));
        }
        if self.disposable {
            part = part.disposable();
        }
        Ok(part)
    }
}

fn convert_metadata(values: BTreeMap<String, serde_json::Value>) -> Result<Metadata, String> {
    values
        .into_iter()
        .map(|(key, value)| {
            let converted = convert_value(&value)
                .ok_or_else(|| format!("元数据 {} 的值不受支持: {}", key, value))?;
            Ok((key, converted))
        })
        .collect()
}

fn convert_value(value: &serde_json::Value) -> Option<MetadataValue> {
    match value {
        serde_json::Value::Null => Some(MetadataValue::Null),
        serde_json::Value::Bool(flag) => Some(MetadataValue::Bool(*flag)),
        serde_json::Value::Number(number) => number.as_i64().map(MetadataValue::Integer),
        serde_json::Value::String(text) => Some(MetadataValue::String(text.clone())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(convert_value)
            .collect::<Option<Vec<_>>>()
            .map(MetadataValue::Array),
        serde_json::Value::Object(_) => {
            serde_json::from_value::<TypeDescriptor>(value.clone())
                .ok()
                .map(|descriptor| MetadataValue::Type(descriptor.to_type_ref()))
        }
    }
}

/// 内存中的部件来源
pub struct StaticDiscovery {
    name: String,
    sources: Vec<PartSource>,
}

impl StaticDiscovery {
    /// 创建静态发现器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
        }
    }

    /// 添加部件定义
    pub fn with_part(mut self, part: PartDefinition) -> Self {
        self.sources.push(PartSource::Definition(part));
        self
    }

    /// 添加部件来源
    pub fn with_source(mut self, source: PartSource) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
impl PartDiscovery for StaticDiscovery {
    async fn discover(&self) -> DiscoveredParts {
        let mut discovered = DiscoveredParts::default();
        for source in &self.sources {
            match source.clone().normalize(&self.name) {
                Ok(part) => discovered.parts.push(part),
                Err(error) => {
                    warn!("{}", error);
                    discovered.errors.push(error);
                }
            }
        }
        discovered
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 描述文档来源
#[derive(Debug, Clone)]
pub enum DescriptorSource {
    /// 内存中的 JSON 文本
    Inline(String),
    /// JSON 文件
    File(PathBuf),
}

/// 声明式描述发现器
///
/// 读取 JSON 描述文档：顶层为部件描述数组，或带 `parts` 数组的对象。
pub struct DescriptorDiscovery {
    name: String,
    sources: Vec<DescriptorSource>,
}

impl DescriptorDiscovery {
    /// 创建描述发现器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
        }
    }

    /// 添加内存中的描述文档
    pub fn with_json(mut self, json: impl Into<String>) -> Self {
        self.sources.push(DescriptorSource::Inline(json.into()));
        self
    }

    /// 添加描述文件
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(DescriptorSource::File(path.into()));
        self
    }

    async fn read_source(&self, source: &DescriptorSource) -> Result<String, DiscoveryError> {
        match source {
            DescriptorSource::Inline(json) => Ok(json.clone()),
            DescriptorSource::File(path) => {
                debug!("读取部件描述文件: {}", path.display());
                tokio::fs::read_to_string(path).await.map_err(|e| {
                    DiscoveryError::new(
                        &self.name,
                        format!("读取描述文件 {} 失败: {}", path.display(), e),
                    )
                })
            }
        }
    }

    fn parse_document(&self, text: &str, discovered: &mut DiscoveredParts) {
        let document: serde_json::Value = match serde_json::from_str(text) {
            Ok(document) => document,
            Err(e) => {
                discovered
                    .errors
                    .push(DiscoveryError::new(&self.name, format!("描述文档不是合法 JSON: {}", e)));
                return;
            }
        };

        let entries = match document {
            serde_json::Value::Array(entries) => entries,
            serde_json::Value::Object(mut object) => match object.remove("parts") {
                Some(serde_json::Value::Array(entries)) => entries,
                _ => {
                    discovered
                        .errors
                        .push(DiscoveryError::new(&self.name, "描述文档缺少 parts 数组"));
                    return;
                }
            },
            _ => {
                discovered
                    .errors
                    .push(DiscoveryError::new(&self.name, "描述文档必须是数组或对象"));
                return;
            }
        };

        for entry in entries {
            let type_hint = entry
                .get("type")
                .and_then(|t| serde_json::from_value::<TypeDescriptor>(t.clone()).ok())
                .map(|t| t.display_name());
            let result = serde_json::from_value::<PartDescriptor>(entry)
                .map_err(|e| format!("部件描述格式错误: {}", e))
                .and_then(PartDescriptor::into_definition);
            match result {
                Ok(part) => discovered.parts.push(part),
                Err(message) => {
                    let mut error = DiscoveryError::new(&self.name, message);
                    if let Some(type_name) = type_hint {
                        error = error.with_type(type_name);
                    }
                    warn!("{}", error);
                    discovered.errors.push(error);
                }
            }
        }
    }
}

#[async_trait]
impl PartDiscovery for DescriptorDiscovery {
    async fn discover(&self) -> DiscoveredParts {
        let mut discovered = DiscoveredParts::default();
        for source in &self.sources {
            match self.read_source(source).await {
                Ok(text) => self.parse_document(&text, &mut discovered),
                Err(error) => {
                    warn!("{}", error);
                    discovered.errors.push(error);
                }
            }
        }
        info!(
            "发现器 {} 完成: {} 个部件, {} 个错误",
            self.name,
            discovered.parts.len(),
            discovered.errors.len()
        );
        discovered
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 组合多个发现器，结果按发现器顺序拼接
pub struct CombinedDiscovery {
    name: String,
    discoveries: Vec<Arc<dyn PartDiscovery>>,
}

impl CombinedDiscovery {
    /// 创建组合发现器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discoveries: Vec::new(),
        }
    }

    /// 添加发现器
    pub fn with(mut self, discovery: Arc<dyn PartDiscovery>) -> Self {
        self.discoveries.push(discovery);
        self
    }
}

#[async_trait]
impl PartDiscovery for CombinedDiscovery {
    async fn discover(&self) -> DiscoveredParts {
        let results = join_all(self.discoveries.iter().map(|d| d.discover())).await;
        let mut discovered = DiscoveredParts::default();
        for result in results {
            discovered.merge(result);
        }
        discovered
    }

    fn name(&self) -> &str {
        &self.name
    }
}
