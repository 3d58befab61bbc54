//! Include Graph
//!
//! Per-header traversal state for the depth-first include walk. A header is
//! entered once; re-entering a header that is still on the stack is a cycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Processing state of a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Unvisited,
    InProgress,
    Done,
}

/// A header in the include graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderNode {
    pub path: PathBuf,
    pub state: HeaderState,
    /// Directly included headers, in directive order
    pub includes: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct IncludeGraph {
    nodes: HashMap<PathBuf, HeaderNode>,
    stack: Vec<PathBuf>,
}

impl IncludeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, path: &Path) -> HeaderState {
        self.nodes
            .get(path)
            .map_or(HeaderState::Unvisited, |n| n.state)
    }

    /// Mark a header as in progress and push it on the traversal stack
    pub fn enter(&mut self, path: &Path) {
        self.nodes.insert(
            path.to_path_buf(),
            HeaderNode {
                path: path.to_path_buf(),
                state: HeaderState::InProgress,
                includes: Vec::new(),
            },
        );
        self.stack.push(path.to_path_buf());
    }

    /// Mark the header on top of the stack as done
    pub fn finish(&mut self, path: &Path) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.state = HeaderState::Done;
        }
        if self.stack.last().map(PathBuf::as_path) == Some(path) {
            self.stack.pop();
        }
    }

    /// Record `from` including `to`
    pub fn add_edge(&mut self, from: &Path, to: &Path) {
        if let Some(node) = self.nodes.get_mut(from) {
            if !node.includes.iter().any(|p| p == to) {
                node.includes.push(to.to_path_buf());
            }
        }
    }

    /// The stack segment forming a cycle back to `path`
    pub fn cycle_through(&self, path: &Path) -> Vec<PathBuf> {
        match self.stack.iter().position(|p| p == path) {
            Some(start) => {
                let mut cycle = self.stack[start..].to_vec();
                cycle.push(path.to_path_buf());
                cycle
            }
            None => Vec::new(),
        }
    }

    pub fn node(&self, path: &Path) -> Option<&HeaderNode> {
        self.nodes.get(path)
    }
}
