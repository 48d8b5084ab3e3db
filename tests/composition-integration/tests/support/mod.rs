//! 场景测试共用的部件构造函数

#![allow(dead_code)]

use di_abstractions::{ImportDefinition, ImportDefinitionBinding, PartDefinition};
use infrastructure_common::{MemberRef, TypeRef};

pub fn ty(name: &str) -> TypeRef {
    TypeRef::new("app", format!("app::{}", name))
}

/// 属性导入，属性名为目标类型名的小写
pub fn member(owner: &str, target: &str) -> ImportDefinitionBinding {
    ImportDefinitionBinding::member(
        MemberRef::property(ty(owner), target.to_lowercase()),
        ImportDefinition::new(ty(target)),
    )
}

/// 导出自身的部件
pub fn part(name: &str) -> PartDefinition {
    PartDefinition::new(ty(name)).with_self_export()
}

/// 通过导入构造函数依赖 `params` 的部件
pub fn constructed(name: &str, params: &[&str]) -> PartDefinition {
    let constructor = MemberRef::constructor(ty(name), params.iter().map(|p| ty(p)).collect());
    params.iter().enumerate().fold(
        part(name).with_importing_constructor(constructor.clone()),
        |definition, (position, param)| {
            definition.with_import(ImportDefinitionBinding::parameter(
                &constructor,
                position,
                ImportDefinition::new(ty(param)),
            ))
        },
    )
}
