// Match approval and rejection: the only writers of ratings and positions.
//
// Approving moves the pending report into the approved archive first, then
// applies ratings, positions, counters, and the enrichment fields in one
// version-checked batch, then appends history. Any failure after the
// archive move surfaces as `PartialApproval`; `resume_approval` replays the
// remaining steps from the approved record alone.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::elo;
use crate::error::LadderError;
use crate::ladder::{require_player, Actor, Ladder};
use crate::metrics;
use crate::model::{
    ApprovedMatchDoc, HistoryEntryDoc, HistoryKind, PendingMatchDoc, PlayerDoc, RejectedMatchDoc,
};
use crate::positions::{self, PositionShift, ShiftRange};
use crate::rank;
use crate::store::{Batch, Document, Page, Query, StoreError};

const MAX_BATCH_ATTEMPTS: u32 = 3;

/// What an approval changed, for the caller's confirmation screen.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub match_id: String,
    pub winner_username: String,
    pub loser_username: String,
    pub winner_rating_before: i32,
    pub winner_rating_after: i32,
    pub loser_rating_before: i32,
    pub loser_rating_after: i32,
}

/// Everything the post-archive steps need, pinned to the attempt that
/// actually landed. `winner`/`loser` hold the pre-match snapshots.
struct MatchFacts {
    winner: Document<PlayerDoc>,
    loser: Document<PlayerDoc>,
    ratings: elo::RatingPair,
    shift: PositionShift,
}

impl Ladder {
    /// Approves a pending match, merging in the winner's side of the
    /// scoreline. Only the declared winner or an admin may call this.
    pub async fn approve_match(
        &self,
        match_id: &str,
        actor: &Actor,
        winner_score: i32,
        winner_suicides: i32,
        winner_comment: Option<String>,
    ) -> Result<ApprovalOutcome, LadderError> {
        let started = Instant::now();
        if winner_score < 0 || winner_suicides < 0 {
            return Err(LadderError::Validation(
                "scores cannot be negative".to_string(),
            ));
        }

        let pending: PendingMatchDoc = self
            .store
            .get(&self.variant.pending_collection, match_id)
            .await?
            .ok_or_else(|| LadderError::NotFound(format!("no pending match {match_id}")))?;
        self.authorize_approver(actor, &pending.winner_username).await?;

        let approved = ApprovedMatchDoc {
            winner_username: pending.winner_username.clone(),
            loser_username: pending.loser_username.clone(),
            map: pending.map.clone(),
            winner_score,
            winner_suicides,
            winner_comment,
            loser_score: pending.loser_score,
            loser_suicides: pending.loser_suicides,
            loser_comment: pending.loser_comment.clone(),
            reported_by: pending.reported_by.clone(),
            reported_at: pending.reported_at,
            approved: true,
            approved_by: actor.account_id.clone(),
            approved_at: self.store.server_now().await?,
            winner_rating_before: pending.winner_rating_before,
            loser_rating_before: pending.loser_rating_before,
            enriched: false,
            winner_rating_after: None,
            loser_rating_after: None,
            winner_rating_delta: None,
            loser_rating_delta: None,
            winner_match_count_before: None,
            loser_match_count_before: None,
            winner_win_rate_before: None,
            loser_win_rate_before: None,
            winner_position_before: None,
            winner_position_after: None,
            loser_position_before: None,
            loser_position_after: None,
        };

        // Commit point. Once the approved record exists the approval is in
        // flight and every later failure is resumable rather than fatal.
        match self
            .store
            .create(&self.variant.approved_collection, match_id, &approved)
            .await
        {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                // an earlier attempt got past this point; finish its work
                tracing::info!(match_id, "match already in approved archive, resuming");
                return self.resume_approval(match_id).await;
            }
            Err(err) => return Err(err.into()),
        }

        let outcome = self.finish_approval(match_id, &approved).await?;
        metrics::MATCHES_APPROVED_TOTAL
            .with_label_values(&[&self.variant.id])
            .inc();
        metrics::APPROVAL_DURATION_SECONDS
            .with_label_values(&[&self.variant.id])
            .observe(started.elapsed().as_secs_f64());
        tracing::info!(
            match_id,
            winner = %outcome.winner_username,
            loser = %outcome.loser_username,
            winner_rating = outcome.winner_rating_after,
            loser_rating = outcome.loser_rating_after,
            "match approved"
        );
        Ok(outcome)
    }

    /// Rejects a pending match with a reason. The report moves verbatim to
    /// the rejected archive; ratings and positions never move.
    pub async fn reject_match(
        &self,
        match_id: &str,
        actor: &Actor,
        reason: &str,
    ) -> Result<(), LadderError> {
        let pending: PendingMatchDoc = self
            .store
            .get(&self.variant.pending_collection, match_id)
            .await?
            .ok_or_else(|| LadderError::NotFound(format!("no pending match {match_id}")))?;
        self.authorize_approver(actor, &pending.winner_username).await?;

        let rejected = RejectedMatchDoc {
            report: pending,
            rejected_by: actor.account_id.clone(),
            rejected_at: self.store.server_now().await?,
            reason: reason.to_string(),
        };
        match self
            .store
            .create(&self.variant.rejected_collection, match_id, &rejected)
            .await
        {
            Ok(()) => {}
            // an earlier attempt archived it; just finish the cleanup
            Err(StoreError::AlreadyExists { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        self.store
            .delete(&self.variant.pending_collection, match_id)
            .await?;
        metrics::MATCHES_REJECTED_TOTAL
            .with_label_values(&[&self.variant.id])
            .inc();
        tracing::info!(
            match_id,
            winner = %rejected.report.winner_username,
            loser = %rejected.report.loser_username,
            reason,
            "match rejected"
        );
        Ok(())
    }

    /// Replays the unfinished steps of an approval that failed partway.
    /// Safe to call on a completed match: every step first checks whether
    /// its work already happened.
    pub async fn resume_approval(&self, match_id: &str) -> Result<ApprovalOutcome, LadderError> {
        let approved: ApprovedMatchDoc = self
            .store
            .get(&self.variant.approved_collection, match_id)
            .await?
            .ok_or_else(|| LadderError::NotFound(format!("no approved match {match_id}")))?;
        let outcome = self.finish_approval(match_id, &approved).await?;
        metrics::MATCHES_APPROVED_TOTAL
            .with_label_values(&[&self.variant.id])
            .inc();
        tracing::info!(match_id, winner = %outcome.winner_username, "approval resumed to completion");
        Ok(outcome)
    }

    async fn authorize_approver(
        &self,
        actor: &Actor,
        winner_username: &str,
    ) -> Result<(), LadderError> {
        if actor.admin {
            return Ok(());
        }
        let approver: Option<PlayerDoc> = self
            .store
            .get(&self.variant.players_collection, &actor.account_id)
            .await?;
        match approver {
            Some(player) if player.username == winner_username => Ok(()),
            _ => Err(LadderError::Unauthorized(
                "only the declared winner may decide a reported match".to_string(),
            )),
        }
    }

    /// Steps after the archive move. Failures come back as
    /// `PartialApproval` so callers know to retry, except a missing player
    /// record, which no retry can fix.
    async fn finish_approval(
        &self,
        match_id: &str,
        approved: &ApprovedMatchDoc,
    ) -> Result<ApprovalOutcome, LadderError> {
        match self.finish_approval_inner(match_id, approved).await {
            Ok(outcome) => Ok(outcome),
            Err(err @ LadderError::PlayerNotFound(_)) => Err(err),
            Err(err) => {
                metrics::PARTIAL_APPROVALS_TOTAL
                    .with_label_values(&[&self.variant.id])
                    .inc();
                tracing::error!(match_id, error = %err, "approval left incomplete");
                Err(LadderError::partial(match_id, err))
            }
        }
    }

    async fn finish_approval_inner(
        &self,
        match_id: &str,
        approved: &ApprovedMatchDoc,
    ) -> Result<ApprovalOutcome, LadderError> {
        // clear a leftover pending record; a no-op when already gone
        self.store
            .delete(&self.variant.pending_collection, match_id)
            .await?;

        let facts = if approved.enriched {
            self.rebuild_facts(approved).await?
        } else {
            self.apply_rating_batch(match_id, approved).await?
        };
        self.ensure_history(match_id, approved, &facts).await?;

        // best-effort: a failed ribbon check never undoes a finished approval
        if let Err(err) = self.ribbons.check_top_rank(&facts.winner.data.username).await {
            tracing::warn!(match_id, error = %err, "top rank check failed after approval");
        }

        Ok(ApprovalOutcome {
            match_id: match_id.to_string(),
            winner_username: facts.winner.data.username.clone(),
            loser_username: facts.loser.data.username.clone(),
            winner_rating_before: facts.winner.data.rating,
            winner_rating_after: facts.ratings.new_winner_rating,
            loser_rating_before: facts.loser.data.rating,
            loser_rating_after: facts.ratings.new_loser_rating,
        })
    }

    /// Computes and applies the rating batch, retrying on version conflicts
    /// with freshly read players. Everything below is derived again per
    /// attempt, since a concurrent approval may have moved either player.
    async fn apply_rating_batch(
        &self,
        match_id: &str,
        approved: &ApprovedMatchDoc,
    ) -> Result<MatchFacts, LadderError> {
        let mut winner =
            require_player(&self.store, &self.variant, &approved.winner_username).await?;
        let mut loser =
            require_player(&self.store, &self.variant, &approved.loser_username).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let ratings = elo::compute_ratings(
                winner.data.rating,
                loser.data.rating,
                self.variant.k_factor,
            );
            let shift = positions::reconcile(winner.data.position, loser.data.position);
            let bystanders = self.players_between(&shift.shifted).await?;
            let batch =
                self.build_rating_batch(match_id, approved, &winner, &loser, &bystanders, ratings, shift);

            match self.store.apply_batch(batch).await {
                Ok(()) => {
                    return Ok(MatchFacts {
                        winner,
                        loser,
                        ratings,
                        shift,
                    })
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_BATCH_ATTEMPTS => {
                    metrics::APPROVAL_CONFLICT_RETRIES_TOTAL
                        .with_label_values(&[&self.variant.id])
                        .inc();
                    tracing::warn!(match_id, attempt, "version conflict in rating batch, retrying");
                    winner =
                        require_player(&self.store, &self.variant, &approved.winner_username)
                            .await?;
                    loser = require_player(&self.store, &self.variant, &approved.loser_username)
                        .await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// One transaction: both participants, every player sliding down one
    /// slot, and the enrichment merge on the approved record. The version
    /// checks make sure no player moved between read and write, and the
    /// enrichment flag flips in the same batch so "enriched" exactly means
    /// "the batch landed".
    fn build_rating_batch(
        &self,
        match_id: &str,
        approved: &ApprovedMatchDoc,
        winner: &Document<PlayerDoc>,
        loser: &Document<PlayerDoc>,
        bystanders: &[Document<PlayerDoc>],
        ratings: elo::RatingPair,
        shift: PositionShift,
    ) -> Batch {
        let players = self.variant.players_collection.as_str();
        let mut batch = Batch::new()
            .merge_checked(
                players,
                &winner.id,
                serde_json::json!({
                    "rating": ratings.new_winner_rating,
                    "position": shift.new_winner_pos,
                    "wins": winner.data.wins + 1,
                    "lastMatchId": match_id,
                    "lastMatchDate": approved.approved_at,
                }),
                winner.data.version,
            )
            .merge_checked(
                players,
                &loser.id,
                serde_json::json!({
                    "rating": ratings.new_loser_rating,
                    "position": shift.new_loser_pos,
                    "losses": loser.data.losses + 1,
                    "lastMatchId": match_id,
                    "lastMatchDate": approved.approved_at,
                }),
                loser.data.version,
            );
        for bystander in bystanders {
            batch = batch.merge_checked(
                players,
                &bystander.id,
                serde_json::json!({ "position": bystander.data.position + 1 }),
                bystander.data.version,
            );
        }
        batch.merge(
            &self.variant.approved_collection,
            match_id,
            serde_json::json!({
                "enriched": true,
                "winnerRatingBefore": winner.data.rating,
                "winnerRatingAfter": ratings.new_winner_rating,
                "winnerRatingDelta": ratings.new_winner_rating - winner.data.rating,
                "loserRatingBefore": loser.data.rating,
                "loserRatingAfter": ratings.new_loser_rating,
                "loserRatingDelta": ratings.new_loser_rating - loser.data.rating,
                "winnerMatchCountBefore": winner.data.match_count(),
                "loserMatchCountBefore": loser.data.match_count(),
                "winnerWinRateBefore": winner.data.win_rate(),
                "loserWinRateBefore": loser.data.win_rate(),
                "winnerPositionBefore": winner.data.position,
                "winnerPositionAfter": shift.new_winner_pos,
                "loserPositionBefore": loser.data.position,
                "loserPositionAfter": shift.new_loser_pos,
            }),
        )
    }

    /// Players strictly inside the shifted range, best position first.
    async fn players_between(
        &self,
        range: &ShiftRange,
    ) -> Result<Vec<Document<PlayerDoc>>, LadderError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let page: Page<PlayerDoc> = self
            .store
            .query(
                Query::new(self.variant.players_collection.as_str())
                    .filter_gt("position", range.low_exclusive)
                    .filter_lt("position", range.high_exclusive)
                    .order_asc("position"),
            )
            .await?;
        Ok(page.items)
    }

    /// Rebuilds `MatchFacts` for a match whose batch already landed, from
    /// the enrichment snapshot on the approved record plus current player
    /// docs. The reconcile call reproduces the original shift because it is
    /// a pure function of the recorded pre-match positions.
    async fn rebuild_facts(&self, approved: &ApprovedMatchDoc) -> Result<MatchFacts, LadderError> {
        let mut winner =
            require_player(&self.store, &self.variant, &approved.winner_username).await?;
        let mut loser =
            require_player(&self.store, &self.variant, &approved.loser_username).await?;

        let ratings = elo::RatingPair {
            new_winner_rating: approved.winner_rating_after.unwrap_or(winner.data.rating),
            new_loser_rating: approved.loser_rating_after.unwrap_or(loser.data.rating),
        };
        let shift = positions::reconcile(
            approved
                .winner_position_before
                .unwrap_or(winner.data.position),
            approved
                .loser_position_before
                .unwrap_or(loser.data.position),
        );

        // roll the docs back to their recorded pre-match state
        winner.data.rating = approved.winner_rating_before;
        winner.data.position = approved
            .winner_position_before
            .unwrap_or(winner.data.position);
        winner.data.wins = winner.data.wins.saturating_sub(1);
        loser.data.rating = approved.loser_rating_before;
        loser.data.position = approved
            .loser_position_before
            .unwrap_or(loser.data.position);
        loser.data.losses = loser.data.losses.saturating_sub(1);

        Ok(MatchFacts {
            winner,
            loser,
            ratings,
            shift,
        })
    }

    /// Appends the audit entries for this match, skipping any that already
    /// exist so replays never duplicate. All entries share the approval
    /// timestamp.
    async fn ensure_history(
        &self,
        match_id: &str,
        approved: &ApprovedMatchDoc,
        facts: &MatchFacts,
    ) -> Result<(), LadderError> {
        let existing = self.history.entries_for_match(match_id).await?;
        let already = |kind: HistoryKind, account_id: &str| {
            existing
                .iter()
                .any(|e| e.kind == kind && e.account_id == account_id)
        };

        let winner_wins = facts.winner.data.wins + 1;
        let winner_total = winner_wins + facts.winner.data.losses;
        let winner_tier = rank::classify(
            facts.ratings.new_winner_rating,
            Some(winner_total),
            Some(f64::from(winner_wins) * 100.0 / f64::from(winner_total)),
            &self.variant.tiers,
        );
        let loser_total = facts.loser.data.wins + facts.loser.data.losses + 1;
        let loser_tier = rank::classify(
            facts.ratings.new_loser_rating,
            Some(loser_total),
            Some(f64::from(facts.loser.data.wins) * 100.0 / f64::from(loser_total)),
            &self.variant.tiers,
        );
        let recorded_at = approved.approved_at;

        if !already(HistoryKind::Match, &facts.winner.id) {
            self.history
                .record(&history_entry(
                    HistoryKind::Match,
                    match_id,
                    &facts.winner,
                    &facts.loser,
                    true,
                    facts.ratings.new_winner_rating,
                    facts.shift.new_winner_pos,
                    winner_tier,
                    recorded_at,
                ))
                .await?;
        }
        if !already(HistoryKind::Match, &facts.loser.id) {
            self.history
                .record(&history_entry(
                    HistoryKind::Match,
                    match_id,
                    &facts.loser,
                    &facts.winner,
                    false,
                    facts.ratings.new_loser_rating,
                    facts.shift.new_loser_pos,
                    loser_tier,
                    recorded_at,
                ))
                .await?;
        }

        if facts.shift.new_winner_pos != facts.winner.data.position {
            if !already(HistoryKind::Promotion, &facts.winner.id) {
                self.history
                    .record(&history_entry(
                        HistoryKind::Promotion,
                        match_id,
                        &facts.winner,
                        &facts.loser,
                        true,
                        facts.ratings.new_winner_rating,
                        facts.shift.new_winner_pos,
                        winner_tier,
                        recorded_at,
                    ))
                    .await?;
                metrics::PROMOTIONS_TOTAL
                    .with_label_values(&[&self.variant.id])
                    .inc();
            }
            if !already(HistoryKind::Demotion, &facts.loser.id) {
                self.history
                    .record(&history_entry(
                        HistoryKind::Demotion,
                        match_id,
                        &facts.loser,
                        &facts.winner,
                        false,
                        facts.ratings.new_loser_rating,
                        facts.shift.new_loser_pos,
                        loser_tier,
                        recorded_at,
                    ))
                    .await?;
                metrics::DEMOTIONS_TOTAL
                    .with_label_values(&[&self.variant.id])
                    .inc();
            }
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn history_entry(
    kind: HistoryKind,
    match_id: &str,
    player: &Document<PlayerDoc>,
    opponent: &Document<PlayerDoc>,
    won: bool,
    rating_after: i32,
    position_after: u32,
    tier: rank::RankTier,
    recorded_at: DateTime<Utc>,
) -> HistoryEntryDoc {
    HistoryEntryDoc {
        kind,
        account_id: player.id.clone(),
        username: player.data.username.clone(),
        opponent_account_id: opponent.id.clone(),
        opponent_username: opponent.data.username.clone(),
        won,
        rating_before: player.data.rating,
        rating_after,
        position_before: player.data.position,
        position_after,
        rank_name: tier.to_string(),
        match_id: match_id.to_string(),
        recorded_at,
    }
}
