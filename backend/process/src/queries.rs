//! Turns each search query event into its analytics document.
use std::sync::Arc;

use async_trait::async_trait;
use ledger::{AnalyticsDocument, AnalyticsIndex, SearchQuery, StreamEntry, TypedEvent};
use tracing::debug;

use crate::consumer::{HandleError, Handler};

pub struct QueryIngest {
    index: Arc<dyn AnalyticsIndex>,
}

impl QueryIngest {
    pub fn new(index: Arc<dyn AnalyticsIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Handler for QueryIngest {
    async fn handle(&self, entry: &StreamEntry) -> Result<(), HandleError> {
        let query = SearchQuery::from_fields(&entry.fields)?;
        let document = AnalyticsDocument::from_query(entry.position, query);

        self.index.upsert_query(&document).await?;

        debug!(
            "Indexed search {} for {:?} ({} results)",
            document.search_id, document.term_normalized, document.results_total
        );
        Ok(())
    }
}
