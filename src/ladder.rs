// Ladder service: registration, match reporting, reads, admin override.
// Match approval and rejection live in `approval`; ribbon evaluation in
// `ribbons`.

use uuid::Uuid;

use crate::config::Config;
use crate::error::LadderError;
use crate::history::HistoryRecorder;
use crate::metrics;
use crate::model::{
    ApprovedMatchDoc, PendingMatchDoc, PlayerDoc, RejectedMatchDoc, RibbonSheetDoc,
};
use crate::ribbons::RibbonEvaluator;
use crate::store::{Cursor, Document, Page, Query, Store};
use crate::variant::{self, LadderVariant};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 30;

/// The acting account, as resolved by the embedding identity layer. The id
/// is opaque to the ladder; only the `admin` flag carries privilege.
#[derive(Debug, Clone)]
pub struct Actor {
    pub account_id: String,
    pub admin: bool,
}

impl Actor {
    pub fn user(account_id: &str) -> Self {
        Actor {
            account_id: account_id.to_string(),
            admin: false,
        }
    }

    pub fn admin(account_id: &str) -> Self {
        Actor {
            account_id: account_id.to_string(),
            admin: true,
        }
    }
}

/// A loss report as submitted by the losing side.
#[derive(Debug, Clone)]
pub struct MatchReport {
    pub winner_username: String,
    pub loser_username: String,
    pub map: String,
    pub loser_score: i32,
    pub loser_suicides: i32,
    pub loser_comment: Option<String>,
}

#[derive(Clone)]
pub struct Ladder {
    pub(crate) store: Store,
    pub(crate) variant: LadderVariant,
    pub(crate) history: HistoryRecorder,
    pub(crate) ribbons: RibbonEvaluator,
}

impl Ladder {
    pub fn new(store: Store, variant: LadderVariant) -> Self {
        let history = HistoryRecorder::new(store.clone(), variant.clone());
        let ribbons = RibbonEvaluator::new(store.clone(), variant.clone());
        Ladder {
            store,
            variant,
            history,
            ribbons,
        }
    }

    /// Connects to the configured database and runs the configured variant.
    pub async fn from_config(config: &Config) -> Result<Self, LadderError> {
        let store = Store::connect(&config.database_url).await?;
        let variant = variant::find_variant(&config.default_variant).ok_or_else(|| {
            LadderError::Validation(format!(
                "unknown ladder variant '{}'",
                config.default_variant
            ))
        })?;
        Ok(Ladder::new(store, variant))
    }

    pub fn variant(&self) -> &LadderVariant {
        &self.variant
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn ribbons(&self) -> &RibbonEvaluator {
        &self.ribbons
    }

    /// Registers the acting account under `username`, appended at the
    /// bottom of the ladder with the variant's starting rating.
    pub async fn register_player(
        &self,
        actor: &Actor,
        username: &str,
    ) -> Result<Document<PlayerDoc>, LadderError> {
        let username = username.trim();
        if username.len() < USERNAME_MIN || username.len() > USERNAME_MAX {
            return Err(LadderError::Validation(format!(
                "username must be {USERNAME_MIN}-{USERNAME_MAX} characters"
            )));
        }
        if self
            .store
            .exists(&self.variant.players_collection, &actor.account_id)
            .await?
        {
            return Err(LadderError::Validation(
                "account already has a player on this ladder".to_string(),
            ));
        }
        if find_player(&self.store, &self.variant, username)
            .await?
            .is_some()
        {
            return Err(LadderError::Validation(format!(
                "username '{username}' is taken"
            )));
        }

        let roster = self.store.count(&self.variant.players_collection).await?;
        let player = PlayerDoc {
            username: username.to_string(),
            rating: self.variant.default_rating,
            position: roster as u32 + 1,
            wins: 0,
            losses: 0,
            last_match_id: None,
            last_match_date: None,
            registered_at: self.store.server_now().await?,
            version: 0,
        };
        self.store
            .create(&self.variant.players_collection, &actor.account_id, &player)
            .await?;
        metrics::PLAYERS_REGISTERED_TOTAL
            .with_label_values(&[&self.variant.id])
            .inc();
        tracing::info!(username, position = player.position, "player registered");
        Ok(Document {
            id: actor.account_id.clone(),
            data: player,
        })
    }

    /// Records a pending match. Only the losing side (or an admin) may
    /// report; the declared winner later approves or rejects it.
    pub async fn report_match(
        &self,
        actor: &Actor,
        report: MatchReport,
    ) -> Result<String, LadderError> {
        if report.map.trim().is_empty() {
            return Err(LadderError::Validation("map name is required".to_string()));
        }
        if report.loser_score < 0 || report.loser_suicides < 0 {
            return Err(LadderError::Validation(
                "scores cannot be negative".to_string(),
            ));
        }
        if report.winner_username == report.loser_username {
            return Err(LadderError::Validation(
                "a player cannot play themselves".to_string(),
            ));
        }

        let winner = require_player(&self.store, &self.variant, &report.winner_username).await?;
        let loser = require_player(&self.store, &self.variant, &report.loser_username).await?;

        if !actor.admin && loser.id != actor.account_id {
            return Err(LadderError::Unauthorized(
                "matches are reported by the losing player".to_string(),
            ));
        }

        let match_id = Uuid::new_v4().to_string();
        let pending = PendingMatchDoc {
            winner_username: winner.data.username.clone(),
            loser_username: loser.data.username.clone(),
            map: report.map.trim().to_string(),
            loser_score: report.loser_score,
            loser_suicides: report.loser_suicides,
            loser_comment: report.loser_comment,
            reported_by: actor.account_id.clone(),
            reported_at: self.store.server_now().await?,
            approved: false,
            winner_rating_before: winner.data.rating,
            loser_rating_before: loser.data.rating,
        };
        self.store
            .create(&self.variant.pending_collection, &match_id, &pending)
            .await?;
        metrics::MATCHES_REPORTED_TOTAL
            .with_label_values(&[&self.variant.id])
            .inc();
        tracing::info!(
            match_id,
            winner = %pending.winner_username,
            loser = %pending.loser_username,
            map = %pending.map,
            "match reported"
        );
        Ok(match_id)
    }

    /// One leaderboard page, best position first.
    pub async fn leaderboard(
        &self,
        limit: u32,
        cursor: Option<Cursor>,
    ) -> Result<Page<PlayerDoc>, LadderError> {
        let page = self
            .store
            .query(
                Query::new(self.variant.players_collection.as_str())
                    .order_asc("position")
                    .limit(limit)
                    .after(cursor),
            )
            .await?;
        Ok(page)
    }

    pub async fn player(&self, username: &str) -> Result<Option<Document<PlayerDoc>>, LadderError> {
        find_player(&self.store, &self.variant, username).await
    }

    /// Reports awaiting this winner's decision, newest first.
    pub async fn pending_for_winner(
        &self,
        winner_username: &str,
        limit: u32,
        cursor: Option<Cursor>,
    ) -> Result<Page<PendingMatchDoc>, LadderError> {
        let page = self
            .store
            .query(
                Query::new(self.variant.pending_collection.as_str())
                    .filter_eq("winnerUsername", winner_username)
                    .order_desc("reportedAt")
                    .limit(limit)
                    .after(cursor),
            )
            .await?;
        Ok(page)
    }

    pub async fn approved_match(
        &self,
        match_id: &str,
    ) -> Result<Option<ApprovedMatchDoc>, LadderError> {
        Ok(self
            .store
            .get(&self.variant.approved_collection, match_id)
            .await?)
    }

    pub async fn rejected_match(
        &self,
        match_id: &str,
    ) -> Result<Option<RejectedMatchDoc>, LadderError> {
        Ok(self
            .store
            .get(&self.variant.rejected_collection, match_id)
            .await?)
    }

    /// Recently approved matches, newest first.
    pub async fn recent_matches(
        &self,
        limit: u32,
        cursor: Option<Cursor>,
    ) -> Result<Page<ApprovedMatchDoc>, LadderError> {
        let page = self
            .store
            .query(
                Query::new(self.variant.approved_collection.as_str())
                    .order_desc("approvedAt")
                    .limit(limit)
                    .after(cursor),
            )
            .await?;
        Ok(page)
    }

    pub async fn ribbon_sheet(
        &self,
        username: &str,
    ) -> Result<Option<RibbonSheetDoc>, LadderError> {
        let player = require_player(&self.store, &self.variant, username).await?;
        Ok(self
            .store
            .get(&self.variant.ribbons_collection, &player.id)
            .await?)
    }

    /// Admin override for a player's rating. Positions are left alone; the
    /// next approved match reconciles them.
    pub async fn admin_set_rating(
        &self,
        actor: &Actor,
        username: &str,
        rating: i32,
    ) -> Result<(), LadderError> {
        if !actor.admin {
            return Err(LadderError::Unauthorized(
                "rating override is admin only".to_string(),
            ));
        }
        let player = require_player(&self.store, &self.variant, username).await?;
        self.store
            .merge(
                &self.variant.players_collection,
                &player.id,
                &serde_json::json!({ "rating": rating }),
            )
            .await?;
        tracing::info!(
            username,
            rating,
            old_rating = player.data.rating,
            "rating set by admin"
        );
        Ok(())
    }
}

pub(crate) async fn find_player(
    store: &Store,
    variant: &LadderVariant,
    username: &str,
) -> Result<Option<Document<PlayerDoc>>, LadderError> {
    let mut page: Page<PlayerDoc> = store
        .query(
            Query::new(variant.players_collection.as_str())
                .filter_eq("username", username)
                .limit(1),
        )
        .await?;
    Ok(page.items.pop())
}

pub(crate) async fn require_player(
    store: &Store,
    variant: &LadderVariant,
    username: &str,
) -> Result<Document<PlayerDoc>, LadderError> {
    find_player(store, variant, username)
        .await?
        .ok_or_else(|| LadderError::PlayerNotFound(username.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::find_variant;

    async fn test_ladder() -> Ladder {
        let store = Store::memory().await.unwrap();
        Ladder::new(store, find_variant("1v1").unwrap())
    }

    fn report(winner: &str, loser: &str) -> MatchReport {
        MatchReport {
            winner_username: winner.to_string(),
            loser_username: loser.to_string(),
            map: "te_nordic".to_string(),
            loser_score: 5,
            loser_suicides: 0,
            loser_comment: None,
        }
    }

    #[tokio::test]
    async fn test_registration_appends_dense_positions() {
        let ladder = test_ladder().await;
        for (i, name) in ["alice", "bob", "carol"].iter().enumerate() {
            let doc = ladder
                .register_player(&Actor::user(&format!("acct-{name}")), name)
                .await
                .unwrap();
            assert_eq!(doc.data.position, i as u32 + 1);
            assert_eq!(doc.data.rating, 1200);
        }
        let page = ladder.leaderboard(10, None).await.unwrap();
        let positions: Vec<u32> = page.items.iter().map(|p| p.data.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_registration_rejects_duplicates_and_bad_names() {
        let ladder = test_ladder().await;
        ladder
            .register_player(&Actor::user("acct-1"), "alice")
            .await
            .unwrap();

        // username taken
        let err = ladder
            .register_player(&Actor::user("acct-2"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, LadderError::Validation(_)));

        // account already registered
        let err = ladder
            .register_player(&Actor::user("acct-1"), "someone")
            .await
            .unwrap_err();
        assert!(matches!(err, LadderError::Validation(_)));

        // too short
        let err = ladder
            .register_player(&Actor::user("acct-3"), "ab")
            .await
            .unwrap_err();
        assert!(matches!(err, LadderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_report_requires_losing_player() {
        let ladder = test_ladder().await;
        ladder
            .register_player(&Actor::user("acct-alice"), "alice")
            .await
            .unwrap();
        ladder
            .register_player(&Actor::user("acct-bob"), "bob")
            .await
            .unwrap();

        // the winner cannot file it
        let err = ladder
            .report_match(&Actor::user("acct-alice"), report("alice", "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, LadderError::Unauthorized(_)));

        // the loser can
        let id = ladder
            .report_match(&Actor::user("acct-bob"), report("alice", "bob"))
            .await
            .unwrap();
        assert!(!id.is_empty());

        // and so can an admin
        ladder
            .report_match(&Actor::admin("acct-ops"), report("alice", "bob"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_report_validation() {
        let ladder = test_ladder().await;
        ladder
            .register_player(&Actor::user("acct-alice"), "alice")
            .await
            .unwrap();
        ladder
            .register_player(&Actor::user("acct-bob"), "bob")
            .await
            .unwrap();
        let bob = Actor::user("acct-bob");

        let mut no_map = report("alice", "bob");
        no_map.map = "   ".to_string();
        let err = ladder.report_match(&bob, no_map).await.unwrap_err();
        assert!(matches!(err, LadderError::Validation(_)));

        let mut negative = report("alice", "bob");
        negative.loser_score = -1;
        let err = ladder.report_match(&bob, negative).await.unwrap_err();
        assert!(matches!(err, LadderError::Validation(_)));

        let err = ladder
            .report_match(&bob, report("bob", "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, LadderError::Validation(_)));

        let err = ladder
            .report_match(&bob, report("nobody", "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, LadderError::PlayerNotFound(_)));
    }

    #[tokio::test]
    async fn test_pending_inbox_is_scoped_to_winner() {
        let ladder = test_ladder().await;
        for name in ["alice", "bob", "carol"] {
            ladder
                .register_player(&Actor::user(&format!("acct-{name}")), name)
                .await
                .unwrap();
        }
        ladder
            .report_match(&Actor::user("acct-bob"), report("alice", "bob"))
            .await
            .unwrap();
        ladder
            .report_match(&Actor::user("acct-carol"), report("bob", "carol"))
            .await
            .unwrap();

        let inbox = ladder.pending_for_winner("alice", 10, None).await.unwrap();
        assert_eq!(inbox.items.len(), 1);
        assert_eq!(inbox.items[0].data.loser_username, "bob");
    }

    #[tokio::test]
    async fn test_admin_set_rating() {
        let ladder = test_ladder().await;
        ladder
            .register_player(&Actor::user("acct-alice"), "alice")
            .await
            .unwrap();

        let err = ladder
            .admin_set_rating(&Actor::user("acct-alice"), "alice", 1500)
            .await
            .unwrap_err();
        assert!(matches!(err, LadderError::Unauthorized(_)));

        ladder
            .admin_set_rating(&Actor::admin("acct-ops"), "alice", 1500)
            .await
            .unwrap();
        let player = ladder.player("alice").await.unwrap().unwrap();
        assert_eq!(player.data.rating, 1500);
        assert_eq!(player.data.position, 1);
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            default_variant: "ffa".to_string(),
        };
        let ladder = Ladder::from_config(&config).await.unwrap();
        assert_eq!(ladder.variant().default_rating, 200);

        let bad = Config {
            database_url: "sqlite::memory:".to_string(),
            default_variant: "3v3".to_string(),
        };
        assert!(Ladder::from_config(&bad).await.is_err());
    }
}
