//! Character co-occurrence graph built from per-unit analysis results
//!
//! Each analyzed unit may list the characters appearing in it under `characters`.
//! Characters become nodes sized by the number of units they appear in; two characters
//! sharing a unit are joined by an edge whose weight counts the shared units.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// A character
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GraphNode {
    /// Trimmed character name
    pub id: String,
    /// Display label (same as `id`)
    pub label: String,
    /// Number of units the character appears in
    pub size: u32,
}

/// Two characters sharing at least one unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GraphEdge {
    /// Character seen first
    pub source: String,
    /// Character seen later
    pub target: String,
    /// Number of shared units
    pub weight: u32,
}

/// Undirected character graph of one job
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CharacterGraph {
    /// Nodes in order of first appearance
    pub nodes: Vec<GraphNode>,
    /// Edges in order of first co-occurrence
    pub edges: Vec<GraphEdge>,
}

/// Build the graph from `(unit_index, result)` pairs
///
/// Results without a usable `characters` list are skipped. Having no results at all is
/// an error: the graph stage only runs once every unit is analyzed.
pub fn build_character_graph(results: &[(i64, serde_json::Value)]) -> Result<CharacterGraph> {
    if results.is_empty() {
        return Err(Error::Validation(
            "no analyzed units to build a graph from".into(),
        ));
    }

    let mut graph = CharacterGraph::default();
    let mut node_index: HashMap<String, usize> = HashMap::new();
    let mut edge_index: HashMap<(usize, usize), usize> = HashMap::new();

    for (unit_index, result) in results {
        let Some(characters) = result.get("characters").and_then(|c| c.as_array()) else {
            tracing::debug!(unit_index, "No character list in unit result");
            continue;
        };

        // Distinct, trimmed names in order of appearance within the unit
        let mut present: Vec<usize> = Vec::with_capacity(characters.len());
        for name in characters {
            let Some(name) = name.as_str().map(str::trim).filter(|n| !n.is_empty()) else {
                tracing::warn!(unit_index, character = %name, "Skipping invalid character name");
                continue;
            };

            let idx = *node_index.entry(name.to_string()).or_insert_with(|| {
                graph.nodes.push(GraphNode {
                    id: name.to_string(),
                    label: name.to_string(),
                    size: 0,
                });
                graph.nodes.len() - 1
            });
            if !present.contains(&idx) {
                present.push(idx);
            }
        }

        for &idx in &present {
            graph.nodes[idx].size += 1;
        }

        for (i, &a) in present.iter().enumerate() {
            for &b in &present[i + 1..] {
                let key = (a.min(b), a.max(b));
                match edge_index.get(&key) {
                    Some(&edge) => graph.edges[edge].weight += 1,
                    None => {
                        edge_index.insert(key, graph.edges.len());
                        graph.edges.push(GraphEdge {
                            source: graph.nodes[key.0].id.clone(),
                            target: graph.nodes[key.1].id.clone(),
                            weight: 1,
                        });
                    }
                }
            }
        }
    }

    tracing::info!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        units = results.len(),
        "Built character graph"
    );
    Ok(graph)
}
