//! Block range queries routed through pluggable engines
//!
//! Every engine estimates how long it would take to answer a query; the
//! [`QueryManager`] picks the cheapest one, runs it, then lets every engine
//! see the result so caching engines can warm up.

use crate::chain::{BlockId, Provider};
use crate::error::{ProviderError, ProviderResult};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// One projected block
pub type Row = Map<String, Value>;

/// Name of the engine every manager starts with
pub const DEFAULT_ENGINE: &str = "__default__";

/// Columns a block row can be projected onto
pub const BLOCK_COLUMNS: [&str; 10] = [
    "base_fee",
    "difficulty",
    "gas_limit",
    "gas_used",
    "hash",
    "number",
    "parent_hash",
    "size",
    "timestamp",
    "total_difficulty",
];

/// Blocks `start_block..stop_block`, projected onto `columns`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockQuery {
    start_block: u64,
    stop_block: u64,
    columns: Vec<String>,
}

impl BlockQuery {
    /// `"*"` selects every column
    pub fn new<I, S>(start_block: u64, stop_block: u64, columns: I) -> ProviderResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if stop_block < start_block {
            return Err(ProviderError::InvalidArgument(format!(
                "stop block {} is before start block {}",
                stop_block, start_block
            )));
        }

        let mut selected: Vec<String> = Vec::new();
        for column in columns.into_iter().map(Into::into) {
            if column == "*" {
                for column in BLOCK_COLUMNS {
                    if !selected.iter().any(|c| c == column) {
                        selected.push(column.to_string());
                    }
                }
            } else if BLOCK_COLUMNS.contains(&column.as_str()) {
                if !selected.contains(&column) {
                    selected.push(column);
                }
            } else {
                return Err(ProviderError::InvalidArgument(format!(
                    "unknown block column {:?}",
                    column
                )));
            }
        }

        if selected.is_empty() {
            return Err(ProviderError::InvalidArgument(
                "a block query needs at least one column".to_string(),
            ));
        }

        Ok(Self {
            start_block,
            stop_block,
            columns: selected,
        })
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    pub fn stop_block(&self) -> u64 {
        self.stop_block
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> u64 {
        self.stop_block - self.start_block
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Estimated milliseconds to answer `query`, `None` when it cannot
    fn estimate_query(&self, query: &BlockQuery) -> Option<u64>;

    async fn perform_query(
        &self,
        provider: &dyn Provider,
        query: &BlockQuery,
    ) -> ProviderResult<Vec<Row>>;

    /// Observe the result of a query answered by any engine
    fn update_cache(&self, _query: &BlockQuery, _rows: &[Row]) {}
}

/// Fetches each block from the provider
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQueryEngine;

impl DefaultQueryEngine {
    const MS_PER_BLOCK: u64 = 100;
    /// Rows reserved up front; longer ranges grow as blocks arrive
    const MAX_RESERVED_ROWS: u64 = 1_024;
}

#[async_trait]
impl QueryEngine for DefaultQueryEngine {
    fn estimate_query(&self, query: &BlockQuery) -> Option<u64> {
        Some(query.len().saturating_mul(Self::MS_PER_BLOCK))
    }

    async fn perform_query(
        &self,
        provider: &dyn Provider,
        query: &BlockQuery,
    ) -> ProviderResult<Vec<Row>> {
        let reserved = query.len().min(Self::MAX_RESERVED_ROWS) as usize;
        let mut rows = Vec::with_capacity(reserved);

        for number in query.start_block..query.stop_block {
            let block = provider.get_block(BlockId::Number(number)).await?;
            let full = match serde_json::to_value(&block) {
                Ok(Value::Object(fields)) => fields,
                Ok(other) => {
                    return Err(ProviderError::Internal(format!(
                        "block {} serialized to {}",
                        number, other
                    )))
                }
                Err(e) => return Err(ProviderError::Internal(e.to_string())),
            };

            let row = query
                .columns()
                .iter()
                .map(|column| {
                    let value = full.get(column).cloned().unwrap_or(Value::Null);
                    (column.clone(), value)
                })
                .collect();
            rows.push(row);
        }

        Ok(rows)
    }
}

/// Named query engines; always holds [`DEFAULT_ENGINE`]
pub struct QueryManager {
    engines: DashMap<String, Arc<dyn QueryEngine>>,
}

impl Default for QueryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryManager {
    pub fn new() -> Self {
        let engines: DashMap<String, Arc<dyn QueryEngine>> = DashMap::new();
        engines.insert(DEFAULT_ENGINE.to_string(), Arc::new(DefaultQueryEngine));
        Self { engines }
    }

    pub fn register(&self, name: impl Into<String>, engine: Arc<dyn QueryEngine>) {
        let name = name.into();
        debug!("Registered query engine {}", name);
        self.engines.insert(name, engine);
    }

    pub fn engine_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Pick the engine with the lowest estimate; ties go to the first name
    fn select(&self, query: &BlockQuery) -> ProviderResult<(String, Arc<dyn QueryEngine>)> {
        self.engines
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .estimate_query(query)
                    .map(|estimate| (estimate, entry.key().clone(), entry.value().clone()))
            })
            .min_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)))
            .map(|(_, name, engine)| (name, engine))
            .ok_or_else(|| ProviderError::QueryEngine("No query engines are available".to_string()))
    }

    /// Run `query`, on `engine` when given, otherwise on the cheapest engine
    pub async fn query(
        &self,
        provider: &dyn Provider,
        query: &BlockQuery,
        engine: Option<&str>,
    ) -> ProviderResult<Vec<Row>> {
        let (name, chosen) = match engine {
            Some(name) => {
                let chosen = self
                    .engines
                    .get(name)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| {
                        ProviderError::QueryEngine(format!("Query engine `{}` not found", name))
                    })?;
                (name.to_string(), chosen)
            }
            None => self.select(query)?,
        };

        info!(
            "Querying blocks {}..{} with engine {}",
            query.start_block(),
            query.stop_block(),
            name
        );
        let rows = chosen.perform_query(provider, query).await?;

        let engines: Vec<Arc<dyn QueryEngine>> =
            self.engines.iter().map(|e| e.value().clone()).collect();
        for engine in engines {
            engine.update_cache(query, &rows);
        }

        Ok(rows)
    }
}
