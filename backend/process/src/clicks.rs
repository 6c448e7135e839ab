//! Counts clicks per search and copies the count onto the search's analytics
//! document.
//!
//! The counter only moves the first time a given click entry is seen, and
//! the document is always overwritten with the counter's current value, so
//! redelivery converges instead of double counting. A click that arrives
//! before its query is stored on the document and survives the later query
//! write.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ledger::{AnalyticsIndex, RankedStore, SearchClick, StreamEntry, TypedEvent, keys};
use tracing::debug;

use crate::consumer::{HandleError, Handler};

pub const TTL: Duration = Duration::from_secs(60 * 60);

pub struct ClickCounter {
    store: Arc<dyn RankedStore>,
    index: Arc<dyn AnalyticsIndex>,
}

impl ClickCounter {
    pub fn new(store: Arc<dyn RankedStore>, index: Arc<dyn AnalyticsIndex>) -> Self {
        Self { store, index }
    }
}

#[async_trait]
impl Handler for ClickCounter {
    async fn handle(&self, entry: &StreamEntry) -> Result<(), HandleError> {
        let click = SearchClick::from_fields(&entry.fields)?;
        let key = keys::clicks(&click.search_id);

        let clicks = self
            .store
            .increment_once(&key, &entry.position.to_string(), TTL)
            .await?;
        self.index.set_clicks(&click.search_id, clicks).await?;

        debug!("Search {} has {clicks} clicks", click.search_id);
        Ok(())
    }
}
