use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use repair_qa_common::{ChannelRoute, EventKind, RoutingConfig};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{RelayError, Result};

/// Shape of the JSON message config: `{"messages": {"<channel>": ["<selector>", ...]}}`
#[derive(Debug, Deserialize)]
struct MessageConfig {
    messages: IndexMap<String, Vec<String>>,
}

/// Maps upstream node selectors to output channels.
///
/// When a selector is listed under several channels the first channel in
/// declaration order wins.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    by_selector: HashMap<String, EventKind>,
    channels: Vec<String>,
}

impl RoutingTable {
    pub fn from_config(config: &RoutingConfig) -> Result<Self> {
        let mut table = match &config.table_path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        for route in &config.channels {
            table.insert(&route.name, &route.selectors);
        }

        if table.is_empty() {
            warn!("Routing table is empty, no upstream message will be forwarded");
        }
        Ok(table)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let table = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            channels = table.channels.len(),
            selectors = table.by_selector.len(),
            "Loaded routing table"
        );
        Ok(table)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: MessageConfig = serde_json::from_str(content)?;
        let mut table = Self::default();
        for (channel, selectors) in &config.messages {
            table.insert(channel, selectors);
        }
        Ok(table)
    }

    pub fn from_routes(routes: &[ChannelRoute]) -> Self {
        let mut table = Self::default();
        for route in routes {
            table.insert(&route.name, &route.selectors);
        }
        table
    }

    fn insert(&mut self, channel: &str, selectors: &[String]) {
        if !self.channels.iter().any(|c| c == channel) {
            self.channels.push(channel.to_string());
        }
        let kind = EventKind::from(channel);
        for selector in selectors {
            self.by_selector
                .entry(selector.clone())
                .or_insert_with(|| kind.clone());
        }
    }

    pub fn lookup(&self, selector: &str) -> Option<&EventKind> {
        self.by_selector.get(selector)
    }

    /// Channel names in declaration order
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.by_selector.is_empty()
    }
}
