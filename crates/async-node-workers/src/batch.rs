//! Batch Component
//!
//! Applies a function to every item of the `items` list input. Progress is
//! reported after each item and the token is checked between items, so a
//! cancelled batch stops at the next item boundary.

use std::sync::Arc;
use std::time::Duration;

use async_node::{
    AsyncComponent, CancellationToken, DataAccess, NodeError, ProgressReporter, Result, Worker,
};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Per-item transformation
pub type ItemFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Component creating one [`BatchWorker`] per attempt
pub struct BatchComponent {
    name: String,
    item_fn: ItemFn,
    item_delay: Duration,
}

impl BatchComponent {
    /// Port ID for the list input
    pub const PORT_ITEMS: &'static str = "items";
    /// Port ID for the transformed list
    pub const PORT_RESULTS: &'static str = "results";
    /// Port ID for the processed item count
    pub const PORT_COUNT: &'static str = "count";

    pub fn new(name: impl Into<String>, item_fn: ItemFn) -> Self {
        Self {
            name: name.into(),
            item_fn,
            item_delay: Duration::ZERO,
        }
    }

    /// Pause between items, yielding the runtime
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }
}

impl AsyncComponent for BatchComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_worker(&self) -> Box<dyn Worker> {
        Box::new(BatchWorker::new(Arc::clone(&self.item_fn), self.item_delay))
    }
}

/// Processes one snapshot of the input list
pub struct BatchWorker {
    item_fn: ItemFn,
    item_delay: Duration,
    items: Vec<Value>,
    results: Vec<Value>,
}

impl BatchWorker {
    pub fn new(item_fn: ItemFn, item_delay: Duration) -> Self {
        Self {
            item_fn,
            item_delay,
            items: Vec::new(),
            results: Vec::new(),
        }
    }
}

#[async_trait]
impl Worker for BatchWorker {
    fn gather_input(&mut self, ctx: &dyn DataAccess) -> Result<()> {
        self.items = match ctx.input(BatchComponent::PORT_ITEMS) {
            None | Some(Value::Null) => {
                return Err(NodeError::MissingInput(BatchComponent::PORT_ITEMS.to_string()))
            }
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(NodeError::InvalidInputType {
                    port: BatchComponent::PORT_ITEMS.to_string(),
                    expected: "array".to_string(),
                })
            }
        };
        self.results.clear();
        Ok(())
    }

    async fn do_work(&mut self, token: CancellationToken, progress: ProgressReporter) -> Result<()> {
        let total = self.items.len() as u64;
        let mut results = Vec::with_capacity(self.items.len());

        for (index, item) in self.items.iter().enumerate() {
            if token.is_cancelled() {
                log::debug!("BatchWorker: cancelled after {} of {} items", index, total);
                return Err(NodeError::Cancelled);
            }

            results.push((self.item_fn)(item)?);
            progress.report(index as u64 + 1, total);

            if !self.item_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(NodeError::Cancelled),
                    _ = tokio::time::sleep(self.item_delay) => {}
                }
            }
        }

        self.results = results;
        Ok(())
    }

    fn set_output(&mut self, ctx: &mut dyn DataAccess) -> Result<Option<String>> {
        let results = std::mem::take(&mut self.results);
        let count = results.len();
        ctx.set_output(BatchComponent::PORT_RESULTS, Value::Array(results));
        ctx.set_output(BatchComponent::PORT_COUNT, json!(count));
        Ok(Some(format!("{} items", count)))
    }
}
