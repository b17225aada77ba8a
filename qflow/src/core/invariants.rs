//! Semantic invariants of a node list not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::types::DagNode;

/// Check ordering invariants the Driver relies on:
/// - `index` equals the node's position in the list
/// - every dependency points to an earlier node
/// - no dependency is listed twice
///
/// The Driver does not sort; a list that passes here can be walked by index.
pub fn validate_dag(nodes: &[DagNode]) -> Vec<String> {
    let mut errors = Vec::new();
    for (position, node) in nodes.iter().enumerate() {
        if node.index != position {
            errors.push(format!(
                "node at position {position} has index {}",
                node.index
            ));
        }

        let mut seen = HashSet::new();
        for &dep in &node.depends_on {
            if !seen.insert(dep) {
                errors.push(format!("node {position}: duplicate dependency {dep}"));
            }
            if dep >= position {
                errors.push(format!(
                    "node {position}: dependency {dep} is not an earlier node"
                ));
            }
        }

        if node.source.trim().is_empty() {
            errors.push(format!("node {position}: source must not be empty"));
        }
    }
    errors
}
