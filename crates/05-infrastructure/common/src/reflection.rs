//! 反射句柄
//!
//! 以纯数据描述类型与成员。句柄只保存身份信息（编译单元、名称、泛型实参），
//! 不持有任何运行时对象，真正的解析由解析上下文在激活时完成。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 类型引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeRef {
    /// 具名类型，可带泛型实参
    Named {
        /// 所属编译单元
        unit: String,
        /// 完整类型名（不含泛型实参）
        name: String,
        /// 泛型实参
        args: Vec<TypeRef>,
    },
    /// 泛型形参占位符
    Parameter {
        /// 形参位置
        position: usize,
    },
}

impl TypeRef {
    /// 创建非泛型类型引用
    pub fn new(unit: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Named {
            unit: unit.into(),
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// 创建泛型类型引用
    pub fn generic(unit: impl Into<String>, name: impl Into<String>, args: Vec<TypeRef>) -> Self {
        Self::Named {
            unit: unit.into(),
            name: name.into(),
            args,
        }
    }

    /// 创建泛型形参占位符
    pub fn parameter(position: usize) -> Self {
        Self::Parameter { position }
    }

    /// 从 Rust 类型获取类型引用
    ///
    /// 编译单元取类型路径的第一段，名称为完整的类型路径。
    pub fn of<T: ?Sized + 'static>() -> Self {
        let full = std::any::type_name::<T>();
        let trimmed = full.trim_start_matches('&').trim_start_matches("dyn ");
        let unit = trimmed
            .split("::")
            .next()
            .and_then(|segment| segment.split('<').next())
            .unwrap_or(trimmed);
        Self::new(unit, full)
    }

    /// 所属编译单元
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Named { unit, .. } => Some(unit),
            Self::Parameter { .. } => None,
        }
    }

    /// 泛型实参
    pub fn args(&self) -> &[TypeRef] {
        match self {
            Self::Named { args, .. } => args,
            Self::Parameter { .. } => &[],
        }
    }

    /// 默认契约名：不含泛型实参的类型名
    pub fn contract_name(&self) -> String {
        match self {
            Self::Named { name, .. } => name.clone(),
            Self::Parameter { position } => format!("T{}", position),
        }
    }

    /// 是否包含未绑定的泛型形参
    pub fn is_open(&self) -> bool {
        match self {
            Self::Named { args, .. } => args.iter().any(TypeRef::is_open),
            Self::Parameter { .. } => true,
        }
    }

    /// 类型中出现的泛型形参个数（最大位置 + 1）
    pub fn generic_parameter_count(&self) -> usize {
        match self {
            Self::Named { args, .. } => args
                .iter()
                .map(TypeRef::generic_parameter_count)
                .max()
                .unwrap_or(0),
            Self::Parameter { position } => position + 1,
        }
    }

    /// 泛型定义：同名类型，实参依次替换为形参
    pub fn generic_definition(&self) -> TypeRef {
        match self {
            Self::Named { unit, name, args } => Self::Named {
                unit: unit.clone(),
                name: name.clone(),
                args: (0..args.len()).map(TypeRef::parameter).collect(),
            },
            Self::Parameter { .. } => self.clone(),
        }
    }

    /// 用实参替换泛型形参
    pub fn substitute(&self, bindings: &[TypeRef]) -> TypeRef {
        match self {
            Self::Named { unit, name, args } => Self::Named {
                unit: unit.clone(),
                name: name.clone(),
                args: args.iter().map(|arg| arg.substitute(bindings)).collect(),
            },
            Self::Parameter { position } => bindings
                .get(*position)
                .cloned()
                .unwrap_or_else(|| self.clone()),
        }
    }

    /// 将本类型（可含形参）与具体类型合一，成功时把形参绑定写入 `bindings`
    pub fn unify(&self, concrete: &TypeRef, bindings: &mut Vec<Option<TypeRef>>) -> bool {
        match (self, concrete) {
            (Self::Parameter { position }, _) => {
                if bindings.len() <= *position {
                    bindings.resize(*position + 1, None);
                }
                match &bindings[*position] {
                    Some(bound) => bound == concrete,
                    None => {
                        bindings[*position] = Some(concrete.clone());
                        true
                    }
                }
            }
            (
                Self::Named { unit, name, args },
                Self::Named {
                    unit: other_unit,
                    name: other_name,
                    args: other_args,
                },
            ) => {
                unit == other_unit
                    && name == other_name
                    && args.len() == other_args.len()
                    && args
                        .iter()
                        .zip(other_args)
                        .all(|(pattern, arg)| pattern.unify(arg, bindings))
            }
            _ => false,
        }
    }

    /// 收集类型树中引用到的所有编译单元
    pub fn collect_units(&self, units: &mut BTreeSet<String>) {
        if let Self::Named { unit, args, .. } = self {
            units.insert(unit.clone());
            for arg in args {
                arg.collect_units(units);
            }
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { name, args, .. } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
                    write!(f, "<{}>", rendered.join(", "))?;
                }
                Ok(())
            }
            Self::Parameter { position } => write!(f, "T{}", position),
        }
    }
}

/// 成员引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberRef {
    /// 类型本身
    Type(TypeRef),
    /// 构造函数
    Constructor {
        declaring_type: TypeRef,
        parameters: Vec<TypeRef>,
    },
    /// 字段
    Field { declaring_type: TypeRef, name: String },
    /// 属性
    Property { declaring_type: TypeRef, name: String },
    /// 方法
    Method {
        declaring_type: TypeRef,
        name: String,
        parameters: Vec<TypeRef>,
    },
}

impl MemberRef {
    /// 创建构造函数引用
    pub fn constructor(declaring_type: TypeRef, parameters: Vec<TypeRef>) -> Self {
        Self::Constructor {
            declaring_type,
            parameters,
        }
    }

    /// 创建字段引用
    pub fn field(declaring_type: TypeRef, name: impl Into<String>) -> Self {
        Self::Field {
            declaring_type,
            name: name.into(),
        }
    }

    /// 创建属性引用
    pub fn property(declaring_type: TypeRef, name: impl Into<String>) -> Self {
        Self::Property {
            declaring_type,
            name: name.into(),
        }
    }

    /// 创建无参方法引用
    pub fn method(declaring_type: TypeRef, name: impl Into<String>) -> Self {
        Self::Method {
            declaring_type,
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// 声明该成员的类型
    pub fn declaring_type(&self) -> &TypeRef {
        match self {
            Self::Type(type_ref) => type_ref,
            Self::Constructor { declaring_type, .. }
            | Self::Field { declaring_type, .. }
            | Self::Property { declaring_type, .. }
            | Self::Method { declaring_type, .. } => declaring_type,
        }
    }

    /// 成员名称，类型与构造函数没有名称
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Field { name, .. } | Self::Property { name, .. } | Self::Method { name, .. } => {
                Some(name)
            }
            Self::Type(_) | Self::Constructor { .. } => None,
        }
    }

    /// 是否为可赋值成员（字段或属性）
    pub fn is_settable(&self) -> bool {
        matches!(self, Self::Field { .. } | Self::Property { .. })
    }

    /// 是否为方法
    pub fn is_method(&self) -> bool {
        matches!(self, Self::Method { .. })
    }

    /// 是否为构造函数
    pub fn is_constructor(&self) -> bool {
        matches!(self, Self::Constructor { .. })
    }

    /// 用实参替换泛型形参
    pub fn substitute(&self, bindings: &[TypeRef]) -> Self {
        let all = |types: &[TypeRef]| -> Vec<TypeRef> {
            types.iter().map(|t| t.substitute(bindings)).collect()
        };
        match self {
            Self::Type(type_ref) => Self::Type(type_ref.substitute(bindings)),
            Self::Constructor {
                declaring_type,
                parameters,
            } => Self::Constructor {
                declaring_type: declaring_type.substitute(bindings),
                parameters: all(parameters.as_slice()),
            },
            Self::Field {
                declaring_type,
                name,
            } => Self::Field {
                declaring_type: declaring_type.substitute(bindings),
                name: name.clone(),
            },
            Self::Property {
                declaring_type,
                name,
            } => Self::Property {
                declaring_type: declaring_type.substitute(bindings),
                name: name.clone(),
            },
            Self::Method {
                declaring_type,
                name,
                parameters,
            } => Self::Method {
                declaring_type: declaring_type.substitute(bindings),
                name: name.clone(),
                parameters: all(parameters.as_slice()),
            },
        }
    }

    /// 收集成员签名中引用到的编译单元
    pub fn collect_units(&self, units: &mut BTreeSet<String>) {
        self.declaring_type().collect_units(units);
        if let Self::Constructor { parameters, .. } | Self::Method { parameters, .. } = self {
            for parameter in parameters {
                parameter.collect_units(units);
            }
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(type_ref) => write!(f, "{}", type_ref),
            Self::Constructor { declaring_type, .. } => write!(f, "{}::new", declaring_type),
            Self::Field {
                declaring_type,
                name,
            }
            | Self::Property {
                declaring_type,
                name,
            }
            | Self::Method {
                declaring_type,
                name,
                ..
            } => write!(f, "{}::{}", declaring_type, name),
        }
    }
}
