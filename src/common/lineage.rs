//! Lineage classification trees.
//!
//! A lineage definition file is a YAML mapping
//! `lineage_name -> {parents: [...], aliases: [...]}`. Names and aliases are
//! interned into one [`Dictionary`]; edges are dense ids, so the graph
//! cannot form ownership cycles by construction. Logical cycles in the
//! declared parent relation are still rejected with the offending path.
//!
//! A node with two or more parents is a recombinant. Whether a traversal
//! crosses the edges into a recombinant is decided per query:
//!
//! ```text
//!        A
//!     /     \
//!   A.1     A.2
//!     \     /
//!       XBB          (recombinant, clade ancestor = A)
//!
//!  subtree(A.1, DoNotFollow)                 = {A.1}
//!  subtree(A.1, AlwaysFollow)                = {A.1, XBB}
//!  subtree(A.1, FollowIfFullyContainedInClade) = {A.1}
//!  subtree(A,   FollowIfFullyContainedInClade) = {A, A.1, A.2, XBB}
//! ```

use crate::common::dictionary::{Dictionary, Idx};
use crate::error::{PreprocessingError, PreprocessingResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Query-time policy for edges into recombinant (multi-parent) nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecombinantFollowingMode {
    DoNotFollow,
    FollowIfFullyContainedInClade,
    AlwaysFollow,
}

pub const ALL_RECOMBINANT_FOLLOWING_MODES: [RecombinantFollowingMode; 3] = [
    RecombinantFollowingMode::DoNotFollow,
    RecombinantFollowingMode::FollowIfFullyContainedInClade,
    RecombinantFollowingMode::AlwaysFollow,
];

/// The parent relation of a lineage classification, over dense ids.
///
/// The graph is allowed to be disconnected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineageTree {
    /// Canonical node id -> parent ids. Recombinants have two or more.
    parents: Vec<Vec<Idx>>,
    /// Alias id -> canonical id. Canonical ids map to themselves implicitly.
    alias_mapping: HashMap<Idx, Idx>,
    /// For each recombinant, the least-common-ancestor of its parents.
    /// Cached because every FollowIfFullyContainedInClade traversal needs it.
    recombinant_clade_ancestors: HashMap<Idx, Option<Idx>>,
    /// Longest edge distance from a root, per canonical node.
    depths: Vec<u32>,
}

impl LineageTree {
    /// Number of canonical (non-alias) nodes.
    pub fn node_count(&self) -> usize {
        self.parents.len()
    }

    pub fn resolve_alias(&self, id: Idx) -> Idx {
        self.alias_mapping.get(&id).copied().unwrap_or(id)
    }

    pub fn is_recombinant(&self, id: Idx) -> bool {
        self.parents
            .get(id as usize)
            .is_some_and(|parents| parents.len() >= 2)
    }

    /// The cached clade ancestor of a recombinant, if one exists.
    pub fn clade_ancestor(&self, id: Idx) -> Option<Idx> {
        self.recombinant_clade_ancestors.get(&id).copied().flatten()
    }

    /// All ancestors of `id` including itself, under the given recombinant
    /// edge policy. `id` may be an alias.
    pub fn ancestors(&self, id: Idx, mode: RecombinantFollowingMode) -> HashSet<Idx> {
        let start = self.resolve_alias(id);
        let mut visited = HashSet::new();
        let mut queue = vec![start];
        while let Some(node) = queue.pop() {
            if !visited.insert(node) {
                continue;
            }
            // Ids unknown to the tree (values never declared as lineages)
            // behave like isolated leaves.
            let upward: Vec<Idx> = if self.is_recombinant(node) {
                match mode {
                    RecombinantFollowingMode::DoNotFollow => Vec::new(),
                    RecombinantFollowingMode::AlwaysFollow => self.parents[node as usize].clone(),
                    RecombinantFollowingMode::FollowIfFullyContainedInClade => {
                        self.clade_ancestor(node).into_iter().collect()
                    }
                }
            } else {
                self.parents.get(node as usize).cloned().unwrap_or_default()
            };
            queue.extend(upward);
        }
        visited
    }

    fn compute_depths(parents: &[Vec<Idx>]) -> Vec<u32> {
        // The graph is acyclic at this point, so memoized recursion terminates.
        fn depth_of(node: usize, parents: &[Vec<Idx>], memo: &mut [Option<u32>]) -> u32 {
            if let Some(depth) = memo[node] {
                return depth;
            }
            let depth = parents[node]
                .iter()
                .map(|&parent| depth_of(parent as usize, parents, memo) + 1)
                .max()
                .unwrap_or(0);
            memo[node] = Some(depth);
            depth
        }
        let mut memo = vec![None; parents.len()];
        (0..parents.len())
            .map(|node| depth_of(node, parents, &mut memo))
            .collect()
    }

    fn compute_recombinant_clade_ancestors(
        parents: &[Vec<Idx>],
        depths: &[u32],
    ) -> HashMap<Idx, Option<Idx>> {
        let tree = LineageTree {
            parents: parents.to_vec(),
            alias_mapping: HashMap::new(),
            recombinant_clade_ancestors: HashMap::new(),
            depths: depths.to_vec(),
        };
        let mut result = HashMap::new();
        for (node, node_parents) in parents.iter().enumerate() {
            if node_parents.len() < 2 {
                continue;
            }
            let mut common: Option<HashSet<Idx>> = None;
            for &parent in node_parents {
                let ancestors = tree.ancestors(parent, RecombinantFollowingMode::DoNotFollow);
                common = Some(match common {
                    None => ancestors,
                    Some(previous) => previous.intersection(&ancestors).copied().collect(),
                });
            }
            let clade_ancestor = common
                .unwrap_or_default()
                .into_iter()
                .max_by_key(|&ancestor| depths[ancestor as usize]);
            result.insert(node as Idx, clade_ancestor);
        }
        result
    }

    /// Assemble a tree from resolved edges. `n_nodes` counts canonical nodes;
    /// alias ids must all be >= `n_nodes` is *not* required, only that they
    /// appear in `alias_mapping`.
    pub fn from_edges(
        n_nodes: usize,
        edges: &[(Idx, Idx)],
        alias_mapping: HashMap<Idx, Idx>,
        lookup: &Dictionary,
    ) -> PreprocessingResult<LineageTree> {
        let mut parents = vec![Vec::new(); n_nodes];
        for &(child, parent) in edges {
            parents[child as usize].push(parent);
        }
        if let Some(cycle) = find_cycle(n_nodes, &parents) {
            return Err(PreprocessingError::LineageCycle(
                cycle
                    .into_iter()
                    .map(|id| lookup.value_of(id).to_string())
                    .collect(),
            ));
        }
        let depths = Self::compute_depths(&parents);
        let recombinant_clade_ancestors =
            Self::compute_recombinant_clade_ancestors(&parents, &depths);
        Ok(LineageTree {
            parents,
            alias_mapping,
            recombinant_clade_ancestors,
            depths,
        })
    }
}

/// Returns a cyclic path `v0 -> v1 -> ... -> v0` if one exists in the
/// child-to-parent relation.
fn find_cycle(n_nodes: usize, parents: &[Vec<Idx>]) -> Option<Vec<Idx>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut colors = vec![Color::White; n_nodes];
    let mut path: Vec<Idx> = Vec::new();

    fn visit(
        node: Idx,
        parents: &[Vec<Idx>],
        colors: &mut [Color],
        path: &mut Vec<Idx>,
    ) -> Option<Vec<Idx>> {
        colors[node as usize] = Color::Gray;
        path.push(node);
        for &parent in &parents[node as usize] {
            match colors[parent as usize] {
                Color::Gray => {
                    let start = path.iter().position(|&n| n == parent).unwrap_or(0);
                    let mut cycle: Vec<Idx> = path[start..].to_vec();
                    cycle.push(parent);
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = visit(parent, parents, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }
        path.pop();
        colors[node as usize] = Color::Black;
        None
    }

    for node in 0..n_nodes as Idx {
        if colors[node as usize] == Color::White {
            if let Some(cycle) = visit(node, parents, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// One entry of the YAML lineage definition file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LineageDefinitionEntry {
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// A lineage tree together with the dictionary its ids live in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineageTreeAndIdMap {
    pub tree: LineageTree,
    pub lookup: Dictionary,
}

impl LineageTreeAndIdMap {
    /// Parse a lineage definition from YAML text.
    pub fn from_yaml(yaml: &str) -> PreprocessingResult<LineageTreeAndIdMap> {
        let document: serde_yaml::Mapping = serde_yaml::from_str(yaml).map_err(|error| {
            PreprocessingError::InvalidLineageDefinition(format!("not a YAML mapping: {error}"))
        })?;

        let mut lookup = Dictionary::new();
        let mut entries: Vec<(Idx, LineageDefinitionEntry)> = Vec::new();
        let mut declared: HashSet<Idx> = HashSet::new();

        // First pass: canonical names. YAML mappings silently drop duplicate
        // keys in some emitters, so duplicates are checked against the
        // dictionary, not the mapping.
        for (key, value) in &document {
            let name = key.as_str().ok_or_else(|| {
                PreprocessingError::InvalidLineageDefinition(format!(
                    "lineage name is not a string: {key:?}"
                ))
            })?;
            if lookup.id_of(name).is_some() {
                return Err(PreprocessingError::InvalidLineageDefinition(format!(
                    "duplicate lineage name '{name}'"
                )));
            }
            let id = lookup.get_or_create_id(name);
            declared.insert(id);
            let entry: LineageDefinitionEntry = match value {
                serde_yaml::Value::Null => LineageDefinitionEntry::default(),
                other => serde_yaml::from_value(other.clone()).map_err(|error| {
                    PreprocessingError::InvalidLineageDefinition(format!(
                        "invalid entry for lineage '{name}': {error}"
                    ))
                })?,
            };
            entries.push((id, entry));
        }
        let n_nodes = lookup.len();

        // Second pass: aliases. An alias may collide neither with a lineage
        // name nor with any other alias.
        let mut alias_mapping: HashMap<Idx, Idx> = HashMap::new();
        for (canonical, entry) in &entries {
            for alias in &entry.aliases {
                if lookup.id_of(alias).is_some() {
                    return Err(PreprocessingError::InvalidLineageDefinition(format!(
                        "duplicate alias '{alias}'"
                    )));
                }
                let alias_id = lookup.get_or_create_id(alias);
                alias_mapping.insert(alias_id, *canonical);
            }
        }

        // Third pass: parents, resolved through aliases.
        let mut edges: Vec<(Idx, Idx)> = Vec::new();
        for (child, entry) in &entries {
            for parent_name in &entry.parents {
                let parent_id = lookup.id_of(parent_name).ok_or_else(|| {
                    PreprocessingError::InvalidLineageDefinition(format!(
                        "parent '{}' of lineage '{}' is not declared",
                        parent_name,
                        lookup.value_of(*child)
                    ))
                })?;
                let parent_canonical = alias_mapping.get(&parent_id).copied().unwrap_or(parent_id);
                if !declared.contains(&parent_canonical) {
                    return Err(PreprocessingError::InvalidLineageDefinition(format!(
                        "parent '{parent_name}' is not a lineage"
                    )));
                }
                edges.push((*child, parent_canonical));
            }
        }

        let tree = LineageTree::from_edges(n_nodes, &edges, alias_mapping, &lookup)?;
        Ok(LineageTreeAndIdMap { tree, lookup })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIAMOND: &str = "\
A:
A.1:
  parents: [A]
A.2:
  parents: [A]
XBB:
  parents: [A.1, A.2]
";

    fn id(map: &LineageTreeAndIdMap, name: &str) -> Idx {
        map.lookup.id_of(name).unwrap()
    }

    #[test]
    fn parses_the_diamond() {
        let map = LineageTreeAndIdMap::from_yaml(DIAMOND).unwrap();
        assert_eq!(map.tree.node_count(), 4);
        assert!(map.tree.is_recombinant(id(&map, "XBB")));
        assert!(!map.tree.is_recombinant(id(&map, "A.1")));
        assert_eq!(
            map.tree.clade_ancestor(id(&map, "XBB")),
            Some(id(&map, "A"))
        );
    }

    #[test]
    fn ancestors_respect_the_following_mode() {
        let map = LineageTreeAndIdMap::from_yaml(DIAMOND).unwrap();
        let xbb = id(&map, "XBB");
        let a = id(&map, "A");
        let a1 = id(&map, "A.1");
        let a2 = id(&map, "A.2");

        let do_not = map
            .tree
            .ancestors(xbb, RecombinantFollowingMode::DoNotFollow);
        assert_eq!(do_not, HashSet::from([xbb]));

        let always = map
            .tree
            .ancestors(xbb, RecombinantFollowingMode::AlwaysFollow);
        assert_eq!(always, HashSet::from([xbb, a1, a2, a]));

        let contained = map
            .tree
            .ancestors(xbb, RecombinantFollowingMode::FollowIfFullyContainedInClade);
        assert_eq!(contained, HashSet::from([xbb, a]));
    }

    #[test]
    fn aliases_resolve_to_their_canonical_lineage() {
        let yaml = "\
B.1.1.529:
  aliases: [BA]
BA.1:
  parents: [B.1.1.529]
";
        let map = LineageTreeAndIdMap::from_yaml(yaml).unwrap();
        let alias = id(&map, "BA");
        let canonical = id(&map, "B.1.1.529");
        assert_eq!(map.tree.resolve_alias(alias), canonical);
        let ancestors = map
            .tree
            .ancestors(id(&map, "BA.1"), RecombinantFollowingMode::DoNotFollow);
        assert!(ancestors.contains(&canonical));
    }

    #[test]
    fn cycles_are_reported_as_a_path() {
        let yaml = "\
A:
  parents: [B]
B:
  parents: [A]
";
        let error = LineageTreeAndIdMap::from_yaml(yaml).unwrap_err();
        match error {
            PreprocessingError::LineageCycle(path) => {
                assert!(path.len() >= 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected a cycle error, got {other}"),
        }
    }

    #[test]
    fn duplicate_aliases_are_rejected() {
        let yaml = "\
A:
  aliases: [X]
B:
  aliases: [X]
";
        assert!(matches!(
            LineageTreeAndIdMap::from_yaml(yaml),
            Err(PreprocessingError::InvalidLineageDefinition(_))
        ));
    }

    #[test]
    fn undeclared_parents_are_rejected() {
        let yaml = "\
A.1:
  parents: [A]
";
        assert!(matches!(
            LineageTreeAndIdMap::from_yaml(yaml),
            Err(PreprocessingError::InvalidLineageDefinition(_))
        ));
    }

    #[test]
    fn sibling_modes_are_nested() {
        // descendants under DoNotFollow ⊆ FollowIfContained ⊆ AlwaysFollow,
        // checked here through the dual ancestor sets.
        let map = LineageTreeAndIdMap::from_yaml(DIAMOND).unwrap();
        for name in ["A", "A.1", "A.2", "XBB"] {
            let node = id(&map, name);
            let do_not = map
                .tree
                .ancestors(node, RecombinantFollowingMode::DoNotFollow);
            let contained = map
                .tree
                .ancestors(node, RecombinantFollowingMode::FollowIfFullyContainedInClade);
            let always = map
                .tree
                .ancestors(node, RecombinantFollowingMode::AlwaysFollow);
            assert!(do_not.is_subset(&contained));
            assert!(contained.is_subset(&always));
        }
    }
}
