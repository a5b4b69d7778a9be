//! Phylogenetic trees, loaded from Newick or Auspice JSON.
//!
//! Nodes live in an arena and refer to each other by dense index; the
//! node's stable identity for queries is its string label. `descendants`
//! enumerates the subtree below a label, which the filter layer turns into
//! a row bitmap via the column dictionary.

use crate::error::{PreprocessingError, PreprocessingResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhyloNode {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub depth: u32,
}

/// An immutable rooted tree with string-labelled nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhyloTree {
    nodes: Vec<PhyloNode>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
    root: usize,
}

impl PhyloTree {
    fn from_arena(nodes: Vec<PhyloNode>, root: usize, path: &str) -> PreprocessingResult<Self> {
        let mut by_name = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            if node.name.is_empty() {
                continue;
            }
            if by_name.insert(node.name.clone(), index).is_some() {
                return Err(PreprocessingError::InvalidPhyloTree {
                    path: path.to_string(),
                    reason: format!("duplicate node label '{}'", node.name),
                });
            }
        }
        Ok(PhyloTree {
            nodes,
            by_name,
            root,
        })
    }

    /// Rebuilds the label lookup after deserialization.
    pub fn rebuild_lookup(&mut self) {
        self.by_name = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.name.is_empty())
            .map(|(index, node)| (node.name.clone(), index))
            .collect();
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Labels of all nodes in the subtree of `label`, including itself.
    /// `None` when the label is unknown.
    pub fn descendants(&self, label: &str) -> Option<Vec<&str>> {
        let &start = self.by_name.get(label)?;
        let mut result = Vec::new();
        let mut queue = vec![start];
        while let Some(index) = queue.pop() {
            let node = &self.nodes[index];
            if !node.name.is_empty() {
                result.push(node.name.as_str());
            }
            queue.extend(&node.children);
        }
        Some(result)
    }

    /// Parse a Newick string such as `((A:0.1,B:0.2)AB:0.3,C)root;`.
    /// Branch lengths are accepted and discarded.
    pub fn from_newick(text: &str, path: &str) -> PreprocessingResult<Self> {
        let mut parser = NewickParser {
            input: text.trim().as_bytes(),
            position: 0,
            nodes: Vec::new(),
            path,
        };
        let root = parser.parse_subtree(None, 0)?;
        parser.skip_whitespace();
        if parser.peek() == Some(b';') {
            parser.position += 1;
        }
        parser.skip_whitespace();
        if parser.position != parser.input.len() {
            return Err(parser.error("trailing characters after the tree"));
        }
        Self::from_arena(parser.nodes, root, path)
    }

    /// Parse an Auspice JSON export. Only the `tree` hierarchy with `name`
    /// and `children` entries is consumed.
    pub fn from_auspice_json(text: &str, path: &str) -> PreprocessingResult<Self> {
        let document: serde_json::Value =
            serde_json::from_str(text).map_err(|error| PreprocessingError::InvalidPhyloTree {
                path: path.to_string(),
                reason: format!("not valid JSON: {error}"),
            })?;
        let tree = document
            .get("tree")
            .ok_or_else(|| PreprocessingError::InvalidPhyloTree {
                path: path.to_string(),
                reason: "missing 'tree' entry".to_string(),
            })?;
        let mut nodes = Vec::new();
        let root = Self::parse_auspice_node(tree, None, 0, &mut nodes, path)?;
        Self::from_arena(nodes, root, path)
    }

    fn parse_auspice_node(
        value: &serde_json::Value,
        parent: Option<usize>,
        depth: u32,
        nodes: &mut Vec<PhyloNode>,
        path: &str,
    ) -> PreprocessingResult<usize> {
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| PreprocessingError::InvalidPhyloTree {
                path: path.to_string(),
                reason: "node without a 'name' entry".to_string(),
            })?;
        let index = nodes.len();
        nodes.push(PhyloNode {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            depth,
        });
        if let Some(children) = value.get("children").and_then(serde_json::Value::as_array) {
            for child in children {
                let child_index =
                    Self::parse_auspice_node(child, Some(index), depth + 1, nodes, path)?;
                nodes[index].children.push(child_index);
            }
        }
        Ok(index)
    }
}

struct NewickParser<'a> {
    input: &'a [u8],
    position: usize,
    nodes: Vec<PhyloNode>,
    path: &'a str,
}

impl NewickParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.position).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|byte| byte.is_ascii_whitespace()) {
            self.position += 1;
        }
    }

    fn error(&self, reason: &str) -> PreprocessingError {
        PreprocessingError::InvalidPhyloTree {
            path: self.path.to_string(),
            reason: format!("{reason} (at byte {})", self.position),
        }
    }

    fn is_label_byte(byte: u8) -> bool {
        byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.' || byte == b'-' || byte == b'/'
    }

    fn parse_label(&mut self) -> String {
        let start = self.position;
        while self.peek().is_some_and(Self::is_label_byte) {
            self.position += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.position]).into_owned()
    }

    fn skip_branch_length(&mut self) {
        if self.peek() == Some(b':') {
            self.position += 1;
            while self
                .peek()
                .is_some_and(|byte| byte.is_ascii_digit() || matches!(byte, b'.' | b'-' | b'+' | b'e' | b'E'))
            {
                self.position += 1;
            }
        }
    }

    fn parse_subtree(&mut self, parent: Option<usize>, depth: u32) -> PreprocessingResult<usize> {
        self.skip_whitespace();
        let index = self.nodes.len();
        self.nodes.push(PhyloNode {
            name: String::new(),
            parent,
            children: Vec::new(),
            depth,
        });
        if self.peek() == Some(b'(') {
            self.position += 1;
            loop {
                let child = self.parse_subtree(Some(index), depth + 1)?;
                self.nodes[index].children.push(child);
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => {
                        self.position += 1;
                    }
                    Some(b')') => {
                        self.position += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }
        self.skip_whitespace();
        self.nodes[index].name = self.parse_label();
        self.skip_branch_length();
        Ok(index)
    }
}
