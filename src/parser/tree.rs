//! Arena-backed token tree
//!
//! Nodes live in one `Vec` and refer to their children by index. Every
//! node's children are sorted, don't overlap, and cover the node exactly:
//! stretches no rule matched are filled with scopeless text leaves. Zero
//! length nodes are never stored.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::grammar::{Grammar, PatternId};
use crate::region::Region;
use crate::regex::CompiledRegex;

pub type NodeId = usize;

/// What a begin/end node needs to resume parsing inside it
#[derive(Debug, Clone)]
pub struct BlockState {
    /// Grammar the rule belongs to
    pub grammar: Arc<Grammar>,
    pub rule: PatternId,
    /// End pattern with begin captures substituted
    pub end: Option<Arc<CompiledRegex>>,
    /// Text between the begin and end matches
    pub content: Region,
    pub content_scope: Option<String>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Root,
    /// Text no rule matched
    Text,
    Match,
    Capture,
    /// The `contentName` scope of a block
    Content,
    Block(Box<BlockState>),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub scope: Option<String>,
    pub region: Region,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text)
    }

    pub fn block(&self) -> Option<&BlockState> {
        match &self.kind {
            NodeKind::Block(state) => Some(state),
            _ => None,
        }
    }
}

/// A leaf and the scopes of every node above it, outermost first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub region: Region,
    pub scopes: Vec<String>,
}

impl Leaf {
    pub fn scope_path(&self) -> String {
        self.scopes.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct TokenTree {
    nodes: Vec<Node>,
    root: NodeId,
    grammar: Arc<Grammar>,
    len: usize,
    compact_at: usize,
}

const MIN_COMPACT: usize = 1024;

impl TokenTree {
    pub(crate) fn new(grammar: Arc<Grammar>) -> Self {
        Self {
            nodes: Vec::new(),
            root: 0,
            grammar,
            len: 0,
            compact_at: MIN_COMPACT,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    /// Length in bytes of the text this tree was parsed from
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the arena, including nodes no longer reachable
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn set_root(&mut self, root: NodeId, len: usize) {
        self.root = root;
        self.len = len;
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Fill the gaps between `children` with text leaves so they cover
    /// `region`. Empty children are dropped.
    pub(crate) fn seal(&mut self, children: Vec<NodeId>, region: Region) -> Vec<NodeId> {
        let mut sealed = Vec::with_capacity(children.len() * 2 + 1);
        let mut pos = region.start;
        for child in children {
            let r = self.nodes[child].region;
            if r.is_empty() {
                continue;
            }
            if r.start > pos {
                sealed.push(self.text(Region::new(pos, r.start)));
            }
            sealed.push(child);
            pos = r.end;
        }
        if pos < region.end {
            sealed.push(self.text(Region::new(pos, region.end)));
        }
        sealed
    }

    fn text(&mut self, region: Region) -> NodeId {
        self.push(Node {
            scope: None,
            region,
            children: Vec::new(),
            kind: NodeKind::Text,
        })
    }

    /// Move a subtree by `delta` bytes
    pub(crate) fn shift_subtree(&mut self, id: NodeId, delta: isize) {
        if delta == 0 {
            return;
        }
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id];
            node.region = node.region.shifted(delta);
            if let NodeKind::Block(state) = &mut node.kind {
                state.content = state.content.shifted(delta);
            }
            stack.extend(node.children.iter().copied());
        }
    }

    /// Ids of all leaves in document order
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.is_leaf() {
                leaves.push(id);
            } else {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        leaves
    }

    /// Call `f` with every leaf intersecting `region` and its scope path
    pub fn visit_leaves(&self, region: Region, mut f: impl FnMut(NodeId, &Node, &[&str])) {
        let mut scopes: Vec<&str> = Vec::new();
        self.visit(self.root, region, &mut scopes, &mut f);
    }

    fn visit<'a>(
        &'a self,
        id: NodeId,
        region: Region,
        scopes: &mut Vec<&'a str>,
        f: &mut impl FnMut(NodeId, &Node, &[&str]),
    ) {
        let node = &self.nodes[id];
        let pushed = node.scope.as_deref().map(|s| scopes.push(s)).is_some();
        if node.is_leaf() {
            f(id, node, scopes);
        } else {
            let first = node
                .children
                .partition_point(|&c| self.nodes[c].region.end <= region.start);
            for &child in &node.children[first..] {
                if self.nodes[child].region.start >= region.end {
                    break;
                }
                self.visit(child, region, scopes, f);
            }
        }
        if pushed {
            scopes.pop();
        }
    }

    /// Every leaf with its scopes, in document order
    pub fn leaf_list(&self) -> Vec<Leaf> {
        let mut leaves = Vec::new();
        self.visit_leaves(Region::new(0, self.len), |_, node, scopes| {
            leaves.push(Leaf {
                region: node.region,
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
            });
        });
        leaves
    }

    /// Nodes covering `pos`, outermost first
    pub fn path_at(&self, pos: usize) -> Vec<NodeId> {
        let mut path = vec![self.root];
        let mut id = self.root;
        loop {
            let children = &self.nodes[id].children;
            let i = children.partition_point(|&c| self.nodes[c].region.end <= pos);
            match children.get(i) {
                Some(&child) if self.nodes[child].region.contains(pos) => {
                    path.push(child);
                    id = child;
                }
                _ => return path,
            }
        }
    }

    /// Scopes of the nodes covering `pos`, outermost first
    pub fn scopes_at(&self, pos: usize) -> Vec<&str> {
        self.path_at(pos)
            .into_iter()
            .filter_map(|id| self.nodes[id].scope.as_deref())
            .collect()
    }

    /// The deepest scoped node covering `pos`
    pub fn innermost_scoped_at(&self, pos: usize) -> NodeId {
        self.path_at(pos)
            .into_iter()
            .rev()
            .find(|&id| self.nodes[id].scope.is_some())
            .unwrap_or(self.root)
    }

    /// Number of nodes reachable from the root
    pub fn live_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            count += 1;
            stack.extend(self.nodes[id].children.iter().copied());
        }
        count
    }

    pub(crate) fn needs_compaction(&self) -> bool {
        self.nodes.len() > self.compact_at
    }

    /// Drop unreachable nodes, renumbering the rest
    pub(crate) fn compact(&mut self) {
        let mut nodes = Vec::with_capacity(self.live_count());
        let root = self.copy_into(self.root, &mut nodes);
        tracing::debug!(before = self.nodes.len(), after = nodes.len(), "compacted token tree");
        self.nodes = nodes;
        self.root = root;
        self.compact_at = (self.nodes.len() * 2).max(MIN_COMPACT);
    }

    fn copy_into(&self, id: NodeId, nodes: &mut Vec<Node>) -> NodeId {
        let mut node = self.nodes[id].clone();
        node.children = node
            .children
            .iter()
            .map(|&child| self.copy_into(child, nodes))
            .collect();
        nodes.push(node);
        nodes.len() - 1
    }

    /// Indented dump of the tree, one node per line
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root, 0)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id];
            let label = match (&node.kind, node.scope.as_deref()) {
                (NodeKind::Text, _) => "(text)",
                (_, Some(scope)) => scope,
                (_, None) => "(unnamed)",
            };
            let _ = writeln!(out, "{:indent$}{} {}", "", label, node.region, indent = depth * 2);
            stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tree: &mut TokenTree, scope: &str, region: Region) -> NodeId {
        tree.push(Node {
            scope: Some(scope.to_string()),
            region,
            children: Vec::new(),
            kind: NodeKind::Match,
        })
    }

    fn sample() -> TokenTree {
        let mut tree = TokenTree::new(Arc::new(Grammar::plain_text()));
        let a = leaf(&mut tree, "a", Region::new(2, 4));
        let b = leaf(&mut tree, "b", Region::new(4, 4));
        let c = leaf(&mut tree, "c", Region::new(6, 8));
        let children = tree.seal(vec![a, b, c], Region::new(0, 10));
        let root = tree.push(Node {
            scope: Some("text.plain".to_string()),
            region: Region::new(0, 10),
            children,
            kind: NodeKind::Root,
        });
        tree.set_root(root, 10);
        tree
    }

    #[test]
    fn seal_fills_gaps_and_drops_empty_nodes() {
        let tree = sample();
        let regions: Vec<Region> = tree
            .node(tree.root())
            .children
            .iter()
            .map(|&c| tree.node(c).region)
            .collect();
        assert_eq!(
            regions,
            vec![
                Region::new(0, 2),
                Region::new(2, 4),
                Region::new(4, 6),
                Region::new(6, 8),
                Region::new(8, 10)
            ]
        );
    }

    #[test]
    fn leaf_list_carries_scopes() {
        let tree = sample();
        let leaves = tree.leaf_list();
        assert_eq!(leaves.len(), 5);
        assert_eq!(leaves[0].scope_path(), "text.plain");
        assert_eq!(leaves[1].scope_path(), "text.plain a");
        assert_eq!(leaves[3].scope_path(), "text.plain c");
    }

    #[test]
    fn visit_leaves_limits_to_region() {
        let tree = sample();
        let mut seen = Vec::new();
        tree.visit_leaves(Region::new(3, 7), |_, node, _| seen.push(node.region));
        assert_eq!(
            seen,
            vec![Region::new(2, 4), Region::new(4, 6), Region::new(6, 8)]
        );
    }

    #[test]
    fn scopes_and_innermost() {
        let tree = sample();
        assert_eq!(tree.scopes_at(3), vec!["text.plain", "a"]);
        assert_eq!(tree.scopes_at(5), vec!["text.plain"]);
        assert_eq!(tree.node(tree.innermost_scoped_at(7)).region, Region::new(6, 8));
        assert_eq!(tree.innermost_scoped_at(5), tree.root());
    }

    #[test]
    fn shift_and_compact() {
        let mut tree = sample();
        let c = tree.node(tree.root()).children[3];
        tree.shift_subtree(c, 2);
        assert_eq!(tree.node(c).region, Region::new(8, 10));

        let before = tree.leaf_list();
        let arena = tree.arena_len();
        tree.compact();
        assert!(tree.arena_len() < arena);
        assert_eq!(tree.arena_len(), tree.live_count());
        assert_eq!(tree.leaf_list(), before);
    }

    #[test]
    fn dump_indents_children() {
        let tree = sample();
        let dump = tree.dump();
        let mut lines = dump.lines();
        assert_eq!(lines.next(), Some("text.plain [0, 10)"));
        assert_eq!(lines.next(), Some("  (text) [0, 2)"));
        assert_eq!(lines.next(), Some("  a [2, 4)"));
    }
}
