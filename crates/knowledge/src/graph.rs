use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexSet;
use repair_qa_common::{QaError, Result, Triple};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

const NODE_SYMBOL_SIZE: u32 = 40;
const REPULSION: u32 = 2000;

/// Triples matched for a set of keywords
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphLookup {
    /// Records drawn in the chart, capped per keyword
    pub chart_records: Vec<Triple>,
    /// Every matching record, duplicates removed in first-seen order
    pub triples: Vec<Triple>,
}

/// In-memory store of `{head, relation, tail}` records
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    triples: Vec<Triple>,
}

impl KnowledgeGraph {
    pub fn from_triples(triples: Vec<Triple>) -> Self {
        Self { triples }
    }

    /// Load a newline-delimited JSON file of triples. Blank lines are ignored.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QaError::KnowledgeGraph(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut triples = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let triple: Triple = serde_json::from_str(line).map_err(|e| {
                QaError::KnowledgeGraph(format!("line {}: {}", number + 1, e))
            })?;
            triples.push(triple);
        }

        info!(triples = triples.len(), "Knowledge graph loaded");
        Ok(Self { triples })
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Records whose head or tail contains `keyword`, in file order
    pub fn extract_relevant(&self, keyword: &str, limit: Option<usize>) -> Vec<Triple> {
        let matches = self.triples.iter().filter(|t| t.mentions(keyword)).cloned();
        match limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        }
    }

    /// All matches per keyword; the first `per_keyword_limit` of each go to the chart
    pub fn lookup(&self, keywords: &[String], per_keyword_limit: usize) -> GraphLookup {
        let mut chart_records = Vec::new();
        let mut seen = HashSet::new();
        let mut triples = Vec::new();

        for keyword in keywords.iter().filter(|k| !k.is_empty()) {
            let records = self.extract_relevant(keyword, None);
            debug!(keyword = %keyword, matches = records.len(), "Keyword lookup");

            chart_records.extend(records.iter().take(per_keyword_limit).cloned());
            for record in records {
                if seen.insert(record.clone()) {
                    triples.push(record);
                }
            }
        }

        GraphLookup {
            chart_records,
            triples,
        }
    }
}

/// Force-layout graph chart option for `records`
pub fn build_chart(records: &[Triple], title: &str) -> Value {
    let nodes: IndexSet<&str> = records
        .iter()
        .flat_map(|t| [t.head.as_str(), t.tail.as_str()])
        .collect();

    let data: Vec<Value> = nodes
        .iter()
        .map(|name| json!({"name": name, "symbolSize": NODE_SYMBOL_SIZE}))
        .collect();
    let links: Vec<Value> = records
        .iter()
        .map(|t| json!({"source": t.head, "target": t.tail, "value": t.relation}))
        .collect();

    json!({
        "title": [{
            "text": title,
            "textStyle": {"fontFamily": "SimHei"}
        }],
        "tooltip": {"show": true, "trigger": "item"},
        "legend": [{"data": [""], "selected": {}}],
        "series": [{
            "type": "graph",
            "name": "",
            "layout": "force",
            "roam": true,
            "draggable": false,
            "force": {"repulsion": REPULSION, "edgeLength": 50, "gravity": 0.2},
            "label": {
                "show": true,
                "fontFamily": "Times New Roman, SimSun, serif"
            },
            "edgeLabel": {
                "show": true,
                "position": "middle",
                "formatter": "{c}",
                "fontFamily": "Times New Roman, SimSun, serif"
            },
            "data": data,
            "links": links
        }]
    })
}
