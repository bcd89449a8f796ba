// Append-only rating history for one ladder variant.

use uuid::Uuid;

use crate::error::LadderError;
use crate::model::HistoryEntryDoc;
use crate::store::{Cursor, Page, Query, Store};
use crate::variant::LadderVariant;

/// Writes and reads the audit trail. Entries are never updated or deleted;
/// correlated entries for one match all carry the same server timestamp so
/// they can be grouped later.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Store,
    variant: LadderVariant,
}

impl HistoryRecorder {
    pub fn new(store: Store, variant: LadderVariant) -> Self {
        HistoryRecorder { store, variant }
    }

    /// Appends one entry under a fresh id.
    pub async fn record(&self, entry: &HistoryEntryDoc) -> Result<(), LadderError> {
        let id = Uuid::new_v4().to_string();
        self.store
            .create(&self.variant.history_collection, &id, entry)
            .await?;
        Ok(())
    }

    /// A player's timeline, newest first.
    pub async fn timeline(
        &self,
        username: &str,
        limit: u32,
        cursor: Option<Cursor>,
    ) -> Result<Page<HistoryEntryDoc>, LadderError> {
        let page = self
            .store
            .query(
                Query::new(self.variant.history_collection.as_str())
                    .filter_eq("username", username)
                    .order_desc("recordedAt")
                    .limit(limit)
                    .after(cursor),
            )
            .await?;
        Ok(page)
    }

    /// Every entry written for one match, across both participants.
    pub async fn entries_for_match(
        &self,
        match_id: &str,
    ) -> Result<Vec<HistoryEntryDoc>, LadderError> {
        let page: Page<HistoryEntryDoc> = self
            .store
            .query(
                Query::new(self.variant.history_collection.as_str()).filter_eq("matchId", match_id),
            )
            .await?;
        Ok(page.items.into_iter().map(|doc| doc.data).collect())
    }
}
