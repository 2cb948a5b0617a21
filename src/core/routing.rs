//! Handoff topology for agentmesh.
//!
//! A topology is declared as comma-separated fragments:
//! - `a -> b`  : `a` may hand off to `b`
//! - `a <-> b` : `a` and `b` may hand off to each other
//!
//! Whitespace is insignificant and names are bare identifiers.

use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

const FRAGMENT_PATTERN: &str = r"^\s*(\w+)\s*(<->|->)\s*(\w+)\s*$";

/// Validated (or not yet validated) directed graph of permitted handoffs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyGraph {
    /// Every node, in first-declared order.
    nodes: Vec<String>,
    /// Sources, in first-declared order.
    sources: Vec<String>,
    edges: HashMap<String, Vec<String>>,
}

impl TopologyGraph {
    /// Parse a topology declaration.
    ///
    /// # Examples
    ///
    /// ```
    /// use agentmesh::TopologyGraph;
    ///
    /// let graph = TopologyGraph::parse("planner -> coder, coder <-> reviewer").unwrap();
    /// assert_eq!(graph.destinations("coder"), ["reviewer".to_string()]);
    /// assert_eq!(graph.entry_point(), "planner");
    /// ```
    pub fn parse(declaration: &str) -> Result<Self> {
        let re = Regex::new(FRAGMENT_PATTERN)
            .map_err(|e| Error::Parse(format!("invalid fragment pattern: {}", e)))?;

        let mut graph = TopologyGraph {
            nodes: Vec::new(),
            sources: Vec::new(),
            edges: HashMap::new(),
        };

        for fragment in declaration.split(',') {
            let caps = re
                .captures(fragment)
                .ok_or_else(|| Error::Parse(fragment.trim().to_string()))?;
            let src = &caps[1];
            let dst = &caps[3];

            graph.add_edge(src, dst);
            if &caps[2] == "<->" {
                graph.add_edge(dst, src);
            }
        }

        tracing::debug!(
            nodes = graph.nodes.len(),
            sources = graph.sources.len(),
            "parsed topology"
        );
        Ok(graph)
    }

    fn add_edge(&mut self, src: &str, dst: &str) {
        for name in [src, dst] {
            if !self.nodes.iter().any(|n| n == name) {
                self.nodes.push(name.to_string());
            }
        }

        if !self.edges.contains_key(src) {
            self.sources.push(src.to_string());
        }
        let targets = self.edges.entry(src.to_string()).or_default();
        if !targets.iter().any(|t| t == dst) {
            targets.push(dst.to_string());
        }
    }

    /// Check the graph against the registered agent names.
    pub fn validate<S: AsRef<str>>(&self, agents: &[S]) -> Result<()> {
        let mut seen = HashSet::new();
        for agent in agents {
            let name = agent.as_ref();
            if !seen.insert(name) {
                return Err(Error::DuplicateAgent(name.to_string()));
            }
            if !self.contains(name) {
                return Err(Error::topology(format!(
                    "unregistered agent '{}': it does not appear in the topology",
                    name
                )));
            }
        }

        if self.nodes.len() != agents.len() {
            let missing: Vec<&str> = self
                .nodes
                .iter()
                .map(String::as_str)
                .filter(|n| !seen.contains(n))
                .collect();
            return Err(Error::topology(format!(
                "unregistered node(s) {:?}: the topology names agents that were not provided",
                missing
            )));
        }

        let exempt = self.smallest_root();
        let orphans: Vec<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|n| !self.is_destination(n) && Some(*n) != exempt)
            .collect();
        if !orphans.is_empty() {
            return Err(Error::topology(format!(
                "agent must receive a handoff: {:?} never appear as a destination",
                orphans
            )));
        }

        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n == name)
    }

    /// Ordered destinations reachable from `name`; empty for sinks.
    pub fn destinations(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Nodes with at least one outgoing edge, in first-declared order.
    pub fn sources(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.sources
            .iter()
            .map(move |s| (s.as_str(), self.destinations(s)))
    }

    fn is_destination(&self, name: &str) -> bool {
        self.edges.values().any(|targets| targets.iter().any(|t| t == name))
    }

    /// Nodes never appearing as a destination, in declaration order.
    pub fn entry_points(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .map(String::as_str)
            .filter(|n| !self.is_destination(n))
            .collect()
    }

    fn smallest_root(&self) -> Option<&str> {
        self.entry_points().into_iter().min()
    }

    /// The agent that receives external input.
    ///
    /// This is the lexicographically smallest node that is never a
    /// destination, or the first declared node when every node is one.
    pub fn entry_point(&self) -> &str {
        self.smallest_root()
            .or_else(|| self.nodes.first().map(String::as_str))
            .unwrap_or_default()
    }

    /// Draw the graph as a tree, starting from its roots.
    ///
    /// Revisited nodes are marked with `(↺)` and not expanded again.
    pub fn render_tree(&self) -> String {
        let mut roots = self.entry_points();
        if roots.is_empty() {
            roots = self.sources.iter().map(String::as_str).collect();
        }

        let mut out = String::new();
        let mut visited = HashSet::new();
        for (i, root) in roots.iter().enumerate() {
            let last = i == roots.len() - 1;
            self.render_node(root, "", last, &mut visited, &mut out);
            if !last {
                out.push('\n');
            }
        }
        out
    }

    fn render_node<'a>(
        &'a self,
        node: &'a str,
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<&'a str>,
        out: &mut String,
    ) {
        let looped = visited.contains(node);
        let branch = if is_last { "└── " } else { "├── " };
        out.push_str(prefix);
        out.push_str(branch);
        out.push_str(node);
        if looped {
            out.push_str(" (↺)");
        }
        out.push('\n');
        if looped {
            return;
        }
        visited.insert(node);

        let children = self.destinations(node);
        let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
        for (i, child) in children.iter().enumerate() {
            self.render_node(child, &child_prefix, i == children.len() - 1, visited, out);
        }
    }
}
