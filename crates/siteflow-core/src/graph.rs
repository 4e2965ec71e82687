//! 参照グラフ
//!
//! リソース間の参照（`${type.name.attr}` と depends-on）から依存グラフを構築し、
//! 未解決の参照と循環参照を検出します。

use crate::error::{Result, SiteError};
use crate::model::{ResourceId, Site};
use std::collections::{BTreeMap, BTreeSet};

/// リソースの依存グラフ
///
/// 辺は「依存元 → 依存先」。依存先は依存元より先に作成されます。
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl ResourceGraph {
    /// Siteから依存グラフを構築
    ///
    /// リソースとoutputの参照先がすべて存在し、循環がないことを検証します。
    pub fn build(site: &Site) -> Result<Self> {
        let mut edges = BTreeMap::new();

        for (id, resource) in &site.resources {
            let deps = resource.dependencies();
            for target in &deps {
                if !site.resources.contains_key(target) {
                    return Err(SiteError::UnresolvedReference {
                        from: id.to_string(),
                        target: target.to_string(),
                    });
                }
            }
            edges.insert(id.clone(), deps);
        }

        for (name, output) in &site.outputs {
            for reference in output.value.references() {
                if !site.resources.contains_key(&reference.target) {
                    return Err(SiteError::UnresolvedReference {
                        from: format!("output.{}", name),
                        target: reference.target.to_string(),
                    });
                }
            }
        }

        let graph = Self::from_edges(edges);
        graph.check_cycles()?;
        Ok(graph)
    }

    /// 記録済みの依存関係から構築（状態スナップショット用）
    ///
    /// 存在しないノードへの辺は無視します。循環は検出されます。
    pub fn from_dependencies(
        dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    ) -> Result<Self> {
        let nodes: BTreeSet<ResourceId> = dependencies.keys().cloned().collect();
        let edges = dependencies
            .into_iter()
            .map(|(id, deps)| {
                let deps = deps.into_iter().filter(|d| nodes.contains(d)).collect();
                (id, deps)
            })
            .collect();

        let graph = Self::from_edges(edges);
        graph.check_cycles()?;
        Ok(graph)
    }

    fn from_edges(edges: BTreeMap<ResourceId, BTreeSet<ResourceId>>) -> Self {
        let mut dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>> = edges
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for (id, deps) in &edges {
            for dep in deps {
                dependents.entry(dep.clone()).or_default().insert(id.clone());
            }
        }
        Self {
            dependencies: edges,
            dependents,
        }
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.dependencies.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceId> {
        self.dependencies.keys()
    }

    /// 直接の依存先
    pub fn dependencies<'a>(
        &'a self,
        id: &ResourceId,
    ) -> impl Iterator<Item = &'a ResourceId> + use<'a> {
        self.dependencies.get(id).into_iter().flatten()
    }

    /// 直接の依存元
    pub fn dependents<'a>(
        &'a self,
        id: &ResourceId,
    ) -> impl Iterator<Item = &'a ResourceId> + use<'a> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// 推移的な依存元（id が失敗したときに実行できなくなるリソース）
    pub fn transitive_dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&ResourceId> = self.dependents(id).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependents(next));
            }
        }
        seen
    }

    /// 作成順のレベル分け
    ///
    /// レベル n のリソースは n 未満のレベルにのみ依存します。
    /// 同じレベル内のリソースは並列に処理できます。
    pub fn levels(&self) -> Vec<Vec<ResourceId>> {
        layer(&self.dependencies)
    }

    /// 削除順のレベル分け（依存元が先）
    pub fn reverse_levels(&self) -> Vec<Vec<ResourceId>> {
        layer(&self.dependents)
    }

    /// トポロジカル順序（作成順）
    pub fn order(&self) -> Vec<ResourceId> {
        self.levels().into_iter().flatten().collect()
    }

    /// 深さ優先探索で循環を検出
    fn check_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            id: &'a ResourceId,
            graph: &'a ResourceGraph,
            marks: &mut BTreeMap<&'a ResourceId, Mark>,
            path: &mut Vec<&'a ResourceId>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|p| *p == id).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|p| p.to_string()).collect();
                    cycle.push(id.to_string());
                    return Err(SiteError::CycleDetected(cycle.join(" -> ")));
                }
                None => {}
            }

            marks.insert(id, Mark::Visiting);
            path.push(id);
            for dep in graph.dependencies(id) {
                visit(dep, graph, marks, path)?;
            }
            path.pop();
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        let mut path = Vec::new();
        for id in self.dependencies.keys() {
            visit(id, self, &mut marks, &mut path)?;
        }
        Ok(())
    }
}

/// Kahn法によるレベル分け（`edges[n]` がすべて配置済みになったら n を配置）
fn layer(edges: &BTreeMap<ResourceId, BTreeSet<ResourceId>>) -> Vec<Vec<ResourceId>> {
    let mut placed: BTreeSet<&ResourceId> = BTreeSet::new();
    let mut remaining: BTreeSet<&ResourceId> = edges.keys().collect();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<&ResourceId> = remaining
            .iter()
            .copied()
            .filter(|id| edges[*id].iter().all(|d| placed.contains(d)))
            .collect();

        // 循環は構築時に排除済み
        if ready.is_empty() {
            break;
        }

        for id in &ready {
            remaining.remove(id);
        }
        placed.extend(ready.iter().copied());
        levels.push(ready.into_iter().cloned().collect());
    }

    levels
}
