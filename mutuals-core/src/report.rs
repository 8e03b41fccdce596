// Render payload and exports for a scanned graph

use crate::index::{EdgeSet, GraphIndexBuilder};
use crate::model::{Entity, Graph};
use petgraph::dot::{Config, Dot};
use petgraph::graph::UnGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const TOP_CONNECTED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Text,
    Json,
    Dot,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ExportFormat::Text),
            "json" => Some(ExportFormat::Json),
            "dot" | "graphviz" => Some(ExportFormat::Dot),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Json => "json",
            ExportFormat::Dot => "dot",
            ExportFormat::Csv => "csv",
        }
    }
}

pub fn format_connection_count(count: usize) -> String {
    format!("{} connection{}", count, if count == 1 { "" } else { "s" })
}

/// Node label; empty while names are hidden.
pub fn node_label(entity: &Entity, hide_names: bool) -> String {
    if hide_names {
        String::new()
    } else {
        entity.name().to_string()
    }
}

/// Hover text for a node.
pub fn node_title(entity: &Entity, connections: usize, hide_names: bool) -> String {
    if hide_names {
        format_connection_count(connections)
    } else {
        format!("{} - {}", entity.name(), format_connection_count(connections))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderNode {
    pub id: String,
    pub image: String,
    pub label: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderEdge {
    pub from: String,
    pub to: String,
}

/// Node and edge lists for an external graph renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPayload {
    pub nodes: Vec<RenderNode>,
    pub edges: Vec<RenderEdge>,
}

impl RenderPayload {
    pub fn build(graph: &Graph, edges: &EdgeSet, hide_names: bool) -> Self {
        let nodes = graph
            .iter()
            .map(|entity| RenderNode {
                id: entity.id.clone(),
                image: entity.avatar_url.clone(),
                label: node_label(entity, hide_names),
                title: node_title(entity, graph.connection_count(&entity.id), hide_names),
            })
            .collect();

        let edges = edges
            .iter()
            .map(|edge| RenderEdge {
                from: edge.a.clone(),
                to: edge.b.clone(),
            })
            .collect();

        Self { nodes, edges }
    }

    pub fn from_graph(graph: &Graph, hide_names: bool) -> Self {
        Self::build(graph, &GraphIndexBuilder::build_edges(graph), hide_names)
    }
}

pub fn generate_json_export(payload: &RenderPayload) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(payload)
}

pub fn generate_dot_export(graph: &Graph, edges: &EdgeSet) -> String {
    let mut dot_graph: UnGraph<String, ()> = UnGraph::new_undirected();
    let mut indices = HashMap::with_capacity(graph.len());

    for entity in graph.iter() {
        let index = dot_graph.add_node(entity.name().to_string());
        indices.insert(entity.id.as_str(), index);
    }
    for edge in edges.iter() {
        if let (Some(&a), Some(&b)) = (indices.get(edge.a.as_str()), indices.get(edge.b.as_str())) {
            dot_graph.add_edge(a, b, ());
        }
    }

    format!("{:?}", Dot::with_config(&dot_graph, &[Config::EdgeNoLabel]))
}

pub fn generate_csv_export(graph: &Graph, edges: &EdgeSet) -> String {
    let mut csv = String::from("source_id,source_name,target_id,target_name\n");
    for edge in edges.iter() {
        let source = graph.get(&edge.a).map(Entity::name).unwrap_or_default();
        let target = graph.get(&edge.b).map(Entity::name).unwrap_or_default();
        csv.push_str(&format!(
            "{},{},{},{}\n",
            edge.a,
            csv_field(source),
            edge.b,
            csv_field(target)
        ));
    }
    csv
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Summary counts for the text report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub entities: usize,
    pub edges: usize,
    /// `(name, connections)`, most connected first.
    pub top_connected: Vec<(String, usize)>,
    pub isolated: Vec<String>,
}

impl GraphSummary {
    pub fn build(graph: &Graph, edges: &EdgeSet) -> Self {
        let mut counts: Vec<(String, usize)> = graph
            .iter()
            .map(|entity| (entity.name().to_string(), graph.connection_count(&entity.id)))
            .collect();

        let isolated = counts
            .iter()
            .filter(|(_, count)| *count == 0)
            .map(|(name, _)| name.clone())
            .collect();

        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.retain(|(_, count)| *count > 0);
        counts.truncate(TOP_CONNECTED);

        Self {
            entities: graph.len(),
            edges: edges.len(),
            top_connected: counts,
            isolated,
        }
    }
}

pub fn generate_text_report(summary: &GraphSummary) -> String {
    let mut report = String::new();

    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    report.push_str("                          MUTUALS FRIEND GRAPH\n");
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    report.push_str(&format!("Generated:    {}\n", chrono::Utc::now().to_rfc3339()));
    report.push_str(&format!("Friends:      {}\n", summary.entities));
    report.push_str(&format!("Connections:  {}\n", summary.edges));
    report.push_str(&format!("Isolated:     {}\n\n", summary.isolated.len()));

    if !summary.top_connected.is_empty() {
        report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        report.push_str("MOST CONNECTED\n");
        report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
        for (idx, (name, count)) in summary.top_connected.iter().enumerate() {
            report.push_str(&format!(
                "  {:>2}. {:<40} {}\n",
                idx + 1,
                name,
                format_connection_count(*count)
            ));
        }
        report.push('\n');
    }

    if !summary.isolated.is_empty() {
        report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        report.push_str("NO MUTUAL CONNECTIONS\n");
        report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
        for name in &summary.isolated {
            report.push_str(&format!("  - {}\n", name));
        }
        report.push('\n');
    }

    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    report.push_str("\nGenerated by Mutuals\n\n");

    report
}

/// Renders `graph` in `format`.
pub fn export(graph: &Graph, format: ExportFormat, hide_names: bool) -> Result<String, serde_json::Error> {
    let edges = GraphIndexBuilder::build_edges(graph);
    match format {
        ExportFormat::Json => generate_json_export(&RenderPayload::build(graph, &edges, hide_names)),
        ExportFormat::Dot => Ok(generate_dot_export(graph, &edges)),
        ExportFormat::Csv => Ok(generate_csv_export(graph, &edges)),
        ExportFormat::Text => Ok(generate_text_report(&GraphSummary::build(graph, &edges))),
    }
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
