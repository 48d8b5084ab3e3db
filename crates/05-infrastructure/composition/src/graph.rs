//! 依赖关系图
//!
//! 供诊断工具使用的只读视图：节点是部件，边是已解析的导入。

use crate::configuration::CompositionConfiguration;
use crate::cycles::{dependency_edges, strongly_connected_components};
use infrastructure_common::CreationPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write;

/// 图节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: usize,
    pub type_name: String,
    /// 所需共享边界
    pub boundaries: Vec<String>,
    pub creation_policy: CreationPolicy,
    /// 部件因组合错误被排除
    pub has_errors: bool,
}

/// 图的边：导入方指向导出方
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub contract: String,
    /// 包装形式：direct、lazy 或 factory[..]
    pub wrapper: String,
    /// 运行时在此处打破循环
    pub cycle_break: bool,
}

/// 依赖关系图
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl DependencyGraph {
    /// 由组合配置生成
    pub fn from_configuration(configuration: &CompositionConfiguration) -> Self {
        let parts = configuration.parts();
        let mut nodes: Vec<GraphNode> = parts
            .iter()
            .enumerate()
            .map(|(id, part)| GraphNode {
                id,
                type_name: part.definition.type_ref.to_string(),
                boundaries: part.required_boundaries.iter().cloned().collect(),
                creation_policy: part.definition.creation_policy,
                has_errors: false,
            })
            .collect();

        let mut seen: HashSet<String> = nodes.iter().map(|n| n.type_name.clone()).collect();
        for error in configuration.errors() {
            let Some(type_ref) = error.part() else {
                continue;
            };
            let type_name = type_ref.to_string();
            if !seen.insert(type_name.clone()) {
                continue;
            }
            let policy = configuration
                .catalog()
                .get(type_ref)
                .map(|part| part.creation_policy)
                .unwrap_or_default();
            nodes.push(GraphNode {
                id: nodes.len(),
                type_name,
                boundaries: Vec::new(),
                creation_policy: policy,
                has_errors: true,
            });
        }

        let component = strongly_connected_components(parts.len(), &dependency_edges(parts));
        let mut edges = Vec::new();
        for (from, part) in parts.iter().enumerate() {
            for (binding, exports) in part.resolved_imports() {
                for export in exports {
                    let in_cycle = !binding.wrapper.is_export_factory() && component[from] == component[export.part];
                    edges.push(GraphEdge {
                        from,
                        to: export.part,
                        contract: binding.import.contract_name.clone(),
                        wrapper: binding.wrapper.to_string(),
                        cycle_break: in_cycle && binding.wrapper.is_deferred(),
                    });
                }
            }
        }

        Self { nodes, edges }
    }

    /// JSON 格式，供外部可视化工具读取
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Graphviz DOT 格式
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph composition {\n    node [shape=box];\n");
        for node in &self.nodes {
            let mut label = escape(&node.type_name);
            if !node.boundaries.is_empty() {
                let _ = write!(label, "\\n[{}]", escape(&node.boundaries.join(", ")));
            }
            let _ = write!(label, "\\n{}", node.creation_policy);
            let style = if node.has_errors { ", color=red" } else { "" };
            let _ = writeln!(dot, "    n{} [label=\"{}\"{}];", node.id, label, style);
        }
        for edge in &self.edges {
            let mut attributes = format!("label=\"{}\"", escape(&edge.contract));
            if edge.wrapper != "direct" {
                let _ = write!(attributes, ", style=dashed, taillabel=\"{}\"", escape(&edge.wrapper));
            }
            if edge.cycle_break {
                attributes.push_str(", color=blue");
            }
            let _ = writeln!(dot, "    n{} -> n{} [{}];", edge.from, edge.to, attributes);
        }
        dot.push_str("}\n");
        dot
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
