//! FILENAME: core/facet-engine/src/header.rs
//! Header Tree Builder - Turns grouped composite keys into nested headers.
//!
//! Algorithm:
//! 1. Parse each composite key into its per-level values
//! 2. Collapse paths deeper than `max_depth` (head levels, one marker, tail levels)
//! 3. Insert every distinct prefix into an arena keyed by axis + level + path
//! 4. If the arena exceeds `max_headers`, keep nodes breadth-first (parents
//!    before descendants) and drop the rest
//! 5. Walk the surviving arena depth-first to assign spans, start indexes and
//!    the ordered leaf list
//!
//! The arena is addressed by generated string keys, so deduplication and
//! truncation-by-level are map operations rather than tree surgery. Nested
//! `HeaderNode`s are only materialized at the end.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::settings::TreeLimits;
use crate::source::{GroupedRow, RowValues};

/// Reserved separator between the values of an encoded composite key.
pub const KEY_DELIMITER: char = '\u{1F}';

/// Prefix of the identity of a synthetic collapsed segment. Never produced by
/// a real value.
const COLLAPSED_MARKER: char = '\u{1E}';

// ============================================================================
// COMPOSITE KEYS
// ============================================================================

/// Ordered tuple of per-level values identifying a grouped row or a header
/// path, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey(RowValues);

impl CompositeKey {
    pub fn new<I: IntoIterator<Item = String>>(values: I) -> Self {
        CompositeKey(values.into_iter().collect())
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn encode(&self) -> String {
        let mut encoded = String::new();
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                encoded.push(KEY_DELIMITER);
            }
            encoded.push_str(value);
        }
        encoded
    }

    /// Splits an encoded key. The empty string decodes to a single empty
    /// value, the same key a one-level row with an empty value has. The
    /// zero-depth key encodes to `""` too and does not survive a round trip.
    pub fn decode(encoded: &str) -> Self {
        CompositeKey(encoded.split(KEY_DELIMITER).map(str::to_string).collect())
    }
}

impl AsRef<[String]> for CompositeKey {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}

// ============================================================================
// HEADER TREE
// ============================================================================

/// Which header tree a node belongs to. Trees for different axes never share
/// nodes; the axis is part of every node key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderAxis {
    Row,
    Column,
}

impl HeaderAxis {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderAxis::Row => "row",
            HeaderAxis::Column => "col",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderNode {
    /// Unique across both trees: axis, level and path.
    pub key: String,
    /// Display label. For collapsed nodes, a placeholder naming the elided
    /// level count.
    pub value: String,
    pub level: usize,
    /// Number of leaves under this node.
    pub span: usize,
    /// Position of the first descendant leaf among all leaves.
    pub start_index: usize,
    pub parent_key: Option<String>,
    pub is_collapsed: bool,
    pub children: Vec<HeaderNode>,
}

impl HeaderNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderLeaf {
    /// Display labels from the root to the leaf.
    pub path: Vec<String>,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderTree {
    pub axis: HeaderAxis,
    pub roots: Vec<HeaderNode>,
    pub leaves: Vec<HeaderLeaf>,
    pub leaf_count: usize,
    /// Length of the longest visible path.
    pub max_depth: usize,
    /// Set when nodes were dropped to respect `max_headers`.
    pub truncated: bool,
    pub hidden_nodes: usize,
}

impl HeaderTree {
    pub fn empty(axis: HeaderAxis) -> Self {
        HeaderTree {
            axis,
            roots: Vec::new(),
            leaves: Vec::new(),
            leaf_count: 0,
            max_depth: 0,
            truncated: false,
            hidden_nodes: 0,
        }
    }

    /// True when there was nothing to group. Hosts render an explicit
    /// "no data" state for this rather than an empty grid.
    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// All nodes in display (pre-)order.
    pub fn nodes(&self) -> Vec<&HeaderNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&HeaderNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn node_count(&self) -> usize {
        self.nodes().len()
    }

    pub fn find(&self, key: &str) -> Option<&HeaderNode> {
        self.nodes().into_iter().find(|n| n.key == key)
    }

    pub fn nodes_at_level(&self, level: usize) -> Vec<&HeaderNode> {
        self.nodes().into_iter().filter(|n| n.level == level).collect()
    }
}

// ============================================================================
// ARENA
// ============================================================================

/// One visible level of a (possibly collapsed) path.
struct Segment {
    identity: String,
    label: String,
    collapsed: bool,
}

impl Segment {
    fn plain(value: &str) -> Self {
        Segment {
            identity: value.to_string(),
            label: value.to_string(),
            collapsed: false,
        }
    }
}

/// Placeholder label for a collapsed run of levels.
pub fn collapsed_label(levels: usize) -> String {
    format!("\u{2026} {} levels", levels)
}

struct ArenaNode {
    key: String,
    label: String,
    level: usize,
    children: Vec<usize>,
    collapsed: bool,
}

#[derive(Default)]
struct Arena {
    nodes: Vec<ArenaNode>,
    index: FxHashMap<String, usize>,
    roots: Vec<usize>,
}

impl Arena {
    fn insert_path(&mut self, axis: HeaderAxis, segments: &[Segment]) {
        let mut parent: Option<usize> = None;
        let mut prefix = String::new();
        for (level, segment) in segments.iter().enumerate() {
            if level > 0 {
                prefix.push(KEY_DELIMITER);
            }
            prefix.push_str(&segment.identity);
            let key = format!("{}:{}:{}", axis.as_str(), level, prefix);

            let idx = match self.index.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = self.nodes.len();
                    self.nodes.push(ArenaNode {
                        key: key.clone(),
                        label: segment.label.clone(),
                        level,
                        children: Vec::new(),
                        collapsed: segment.collapsed,
                    });
                    self.index.insert(key, idx);
                    match parent {
                        Some(p) => self.nodes[p].children.push(idx),
                        None => self.roots.push(idx),
                    }
                    idx
                }
            };
            parent = Some(idx);
        }
    }

    /// Node indexes level by level, each level in display order.
    fn breadth_first(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue: VecDeque<usize> = self.roots.iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            queue.extend(self.nodes[idx].children.iter().copied());
        }
        order
    }

    fn materialize(
        &self,
        idx: usize,
        kept: &[bool],
        parent_key: Option<&str>,
        path: &mut Vec<String>,
        leaves: &mut Vec<HeaderLeaf>,
    ) -> HeaderNode {
        let node = &self.nodes[idx];
        path.push(node.label.clone());
        let start_index = leaves.len();

        let children: Vec<HeaderNode> = node
            .children
            .iter()
            .copied()
            .filter(|&child| kept[child])
            .map(|child| self.materialize(child, kept, Some(&node.key), path, leaves))
            .collect();

        let span = if children.is_empty() {
            leaves.push(HeaderLeaf {
                path: path.clone(),
                key: node.key.clone(),
            });
            1
        } else {
            children.iter().map(|c| c.span).sum()
        };
        path.pop();

        HeaderNode {
            key: node.key.clone(),
            value: node.label.clone(),
            level: node.level,
            span,
            start_index,
            parent_key: parent_key.map(str::to_string),
            is_collapsed: node.collapsed,
            children,
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builds one axis' HeaderTree. Pure: the output depends only on the keys,
/// their order and the limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderTreeBuilder {
    axis: HeaderAxis,
    limits: TreeLimits,
}

impl HeaderTreeBuilder {
    pub fn new(axis: HeaderAxis, limits: TreeLimits) -> Self {
        HeaderTreeBuilder { axis, limits }
    }

    pub fn axis(&self) -> HeaderAxis {
        self.axis
    }

    /// Visible segments of one path. Paths deeper than `max_depth` keep their
    /// head and tail levels around a single collapsed marker whose identity
    /// still encodes the elided values, so distinct deep paths stay distinct.
    fn segments(&self, path: &[String]) -> Vec<Segment> {
        if path.len() <= self.limits.max_depth() {
            return path.iter().map(|v| Segment::plain(v)).collect();
        }
        let head = self.limits.head_levels();
        let tail = self.limits.tail_levels();
        let elided = &path[head..path.len() - tail];

        let mut identity = String::new();
        identity.push(COLLAPSED_MARKER);
        for (i, value) in elided.iter().enumerate() {
            if i > 0 {
                identity.push(KEY_DELIMITER);
            }
            identity.push_str(value);
        }

        let mut segments: Vec<Segment> = path[..head].iter().map(|v| Segment::plain(v)).collect();
        segments.push(Segment {
            identity,
            label: collapsed_label(elided.len()),
            collapsed: true,
        });
        segments.extend(path[path.len() - tail..].iter().map(|v| Segment::plain(v)));
        segments
    }

    /// Builds a tree from keys in display order. Input order is leaf order:
    /// siblings appear in the order their first key appears. A key that is a
    /// strict prefix of another key becomes an interior node, not a leaf.
    pub fn build<I, K>(&self, keys: I) -> HeaderTree
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[String]>,
    {
        let mut arena = Arena::default();
        for key in keys {
            let path = key.as_ref();
            if path.is_empty() {
                continue;
            }
            arena.insert_path(self.axis, &self.segments(path));
        }
        if arena.nodes.is_empty() {
            return HeaderTree::empty(self.axis);
        }

        let total = arena.nodes.len();
        let mut kept = vec![true; total];
        let mut hidden_nodes = 0;
        if total > self.limits.max_headers() {
            kept = vec![false; total];
            for idx in arena.breadth_first().into_iter().take(self.limits.max_headers()) {
                kept[idx] = true;
            }
            hidden_nodes = total - self.limits.max_headers();
            log::warn!(
                target: "HEADER",
                "{} axis: {} header nodes exceed limit {}, hiding {}",
                self.axis.as_str(),
                total,
                self.limits.max_headers(),
                hidden_nodes
            );
        }

        let mut leaves = Vec::new();
        let mut path = Vec::with_capacity(self.limits.max_depth());
        let roots: Vec<HeaderNode> = arena
            .roots
            .iter()
            .copied()
            .filter(|&idx| kept[idx])
            .map(|idx| arena.materialize(idx, &kept, None, &mut path, &mut leaves))
            .collect();

        let max_depth = leaves.iter().map(|l| l.path.len()).max().unwrap_or(0);
        log::debug!(
            target: "HEADER",
            "{} axis: {} roots, {} leaves, depth {}",
            self.axis.as_str(),
            roots.len(),
            leaves.len(),
            max_depth
        );

        HeaderTree {
            axis: self.axis,
            roots,
            leaf_count: leaves.len(),
            leaves,
            max_depth,
            truncated: hidden_nodes > 0,
            hidden_nodes,
        }
    }

    /// Builds from keys encoded with `KEY_DELIMITER`.
    pub fn build_encoded<I, S>(&self, keys: I) -> HeaderTree
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let decoded: Vec<CompositeKey> = keys
            .into_iter()
            .map(|k| CompositeKey::decode(k.as_ref()))
            .collect();
        self.build(&decoded)
    }

    pub fn build_rows(&self, rows: &[GroupedRow]) -> HeaderTree {
        self.build(rows.iter().map(|r| r.values.as_slice()))
    }
}
