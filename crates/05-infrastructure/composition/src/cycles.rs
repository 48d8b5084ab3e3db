//! 循环依赖分类
//!
//! 在“导入方 → 导出方”的依赖图上求强连通分量。导出工厂导入不计入依赖边。
//! 分量内的每个简单环至多只能有一条非延迟边，其余边都要经过延迟导入，
//! 否则环上至少两个部件都要求对方先完成构造。

use crate::configuration::ComposedPart;
use infrastructure_common::CompositionError;

/// 依赖边
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DependencyEdge {
    pub from: usize,
    pub to: usize,
    /// 延迟导入
    pub lazy: bool,
    /// 构造参数导入
    pub parameter: bool,
    /// 取得的是共享实例
    pub shared: bool,
}

/// 收集全部非导出工厂的依赖边
pub(crate) fn dependency_edges(parts: &[ComposedPart]) -> Vec<DependencyEdge> {
    let mut edges = Vec::new();
    for (from, part) in parts.iter().enumerate() {
        for (binding, exports) in part.resolved_imports() {
            if binding.wrapper.is_export_factory() {
                continue;
            }
            for export in exports {
                let target = &parts[export.part].definition;
                edges.push(DependencyEdge {
                    from,
                    to: export.part,
                    lazy: binding.wrapper.is_deferred(),
                    parameter: binding.site.is_parameter(),
                    shared: binding
                        .import
                        .required_creation_policy
                        .yields_shared(target.creation_policy),
                });
            }
        }
    }
    edges
}

/// Tarjan 强连通分量，返回每个节点所属分量的编号
pub(crate) fn strongly_connected_components(node_count: usize, edges: &[DependencyEdge]) -> Vec<usize> {
    let mut adjacency = vec![Vec::new(); node_count];
    for edge in edges {
        adjacency[edge.from].push(edge.to);
    }

    const UNVISITED: usize = usize::MAX;
    let mut index = vec![UNVISITED; node_count];
    let mut lowlink = vec![0; node_count];
    let mut on_stack = vec![false; node_count];
    let mut stack = Vec::new();
    let mut component = vec![UNVISITED; node_count];
    let mut next_index = 0;
    let mut next_component = 0;

    for root in 0..node_count {
        if index[root] != UNVISITED {
            continue;
        }
        // (节点, 下一个待访问的邻接序号)
        let mut work = vec![(root, 0usize)];
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(frame) = work.last_mut() {
            let node = frame.0;
            if let Some(&next) = adjacency[node].get(frame.1) {
                frame.1 += 1;
                if index[next] == UNVISITED {
                    index[next] = next_index;
                    lowlink[next] = next_index;
                    next_index += 1;
                    stack.push(next);
                    on_stack[next] = true;
                    work.push((next, 0));
                } else if on_stack[next] {
                    lowlink[node] = lowlink[node].min(index[next]);
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[node]);
            }
            if lowlink[node] == index[node] {
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component[member] = next_component;
                    if member == node {
                        break;
                    }
                }
                next_component += 1;
            }
        }
    }

    component
}

/// 简单环枚举的步数上限，超出后按无法打破处理
const CYCLE_SEARCH_BUDGET: usize = 100_000;

/// 查找无法在运行时打破的循环，每个强连通分量至多一个错误
pub(crate) fn illegal_cycles(parts: &[ComposedPart]) -> Vec<CompositionError> {
    let edges = dependency_edges(parts);
    let component = strongly_connected_components(parts.len(), &edges);
    let component_count = component.iter().map(|c| c + 1).max().unwrap_or(0);

    let mut members = vec![Vec::new(); component_count];
    for (node, &id) in component.iter().enumerate() {
        members[id].push(node);
    }

    let mut errors = Vec::new();
    for (id, nodes) in members.iter().enumerate() {
        let mut adjacency: Vec<Vec<DependencyEdge>> = vec![Vec::new(); parts.len()];
        let mut internal = 0;
        for edge in edges.iter().filter(|e| component[e.from] == id && component[e.to] == id) {
            adjacency[edge.from].push(*edge);
            internal += 1;
        }
        if internal == 0 {
            continue;
        }

        let self_import = adjacency
            .iter()
            .flatten()
            .any(|e| e.from == e.to && !e.lazy && (e.parameter || !e.shared));
        let reason = if self_import {
            Some("部件不能通过构造参数或非共享导入依赖自身")
        } else {
            match find_eager_cycle(nodes, &adjacency) {
                Search::Found => Some("循环中有两条以上的导入需要先完成构造，缺少可以打破循环的延迟导入"),
                Search::Exhausted => Some("循环结构过于复杂，无法确认能否通过延迟导入打破"),
                Search::Clean => None,
            }
        };

        if let Some(reason) = reason {
            let cycle = nodes
                .iter()
                .map(|&node| parts[node].definition.type_ref.clone())
                .collect();
            errors.push(CompositionError::illegal_cycle(cycle, reason));
        }
    }

    errors
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Search {
    Clean,
    Found,
    Exhausted,
}

/// 在分量内寻找含两条以上非延迟边的简单环
///
/// 每个环只从其编号最小的节点出发枚举一次。路径上已有两条非延迟边之后，
/// 只需确认能否绕开路径上的节点回到起点。
fn find_eager_cycle(nodes: &[usize], adjacency: &[Vec<DependencyEdge>]) -> Search {
    let mut budget = CYCLE_SEARCH_BUDGET;
    let mut on_path = vec![false; adjacency.len()];
    for &start in nodes {
        on_path[start] = true;
        let found = walk(start, start, 0, adjacency, &mut on_path, &mut budget);
        on_path[start] = false;
        if found != Search::Clean {
            return found;
        }
    }
    Search::Clean
}

fn walk(
    start: usize,
    node: usize,
    eager: usize,
    adjacency: &[Vec<DependencyEdge>],
    on_path: &mut [bool],
    budget: &mut usize,
) -> Search {
    for edge in &adjacency[node] {
        if *budget == 0 {
            return Search::Exhausted;
        }
        *budget -= 1;

        let eager = eager + usize::from(!edge.lazy);
        if edge.to == start {
            if eager >= 2 {
                return Search::Found;
            }
            continue;
        }
        if edge.to < start || on_path[edge.to] {
            continue;
        }
        if eager >= 2 {
            if returns_to(start, edge.to, adjacency, on_path) {
                return Search::Found;
            }
            continue;
        }

        on_path[edge.to] = true;
        let result = walk(start, edge.to, eager, adjacency, on_path, budget);
        on_path[edge.to] = false;
        if result != Search::Clean {
            return result;
        }
    }
    Search::Clean
}

/// 不经过路径上其他节点、且不经过编号小于起点的节点，能否从 `from` 回到 `start`
fn returns_to(start: usize, from: usize, adjacency: &[Vec<DependencyEdge>], on_path: &[bool]) -> bool {
    let mut visited = vec![false; adjacency.len()];
    visited[from] = true;
    let mut pending = vec![from];
    while let Some(node) = pending.pop() {
        for edge in &adjacency[node] {
            if edge.to == start {
                return true;
            }
            if edge.to < start || on_path[edge.to] || visited[edge.to] {
                continue;
            }
            visited[edge.to] = true;
            pending.push(edge.to);
        }
    }
    false
}
