// Persisted document shapes. Stored as JSON with camelCase keys; the
// document id (player account id, match id) is the store key and is not
// repeated inside the document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDoc {
    pub username: String,
    pub rating: i32,
    /// Ladder position, 1 = best. Unique and contiguous across the variant.
    pub position: u32,
    pub wins: u32,
    pub losses: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_match_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_match_date: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    /// Bumped by every version-checked write; guards concurrent approvals.
    pub version: i64,
}

impl PlayerDoc {
    pub fn match_count(&self) -> u32 {
        self.wins + self.losses
    }

    /// Win rate as a percentage, `None` before the first match.
    pub fn win_rate(&self) -> Option<f64> {
        let total = self.match_count();
        if total == 0 {
            return None;
        }
        Some(f64::from(self.wins) * 100.0 / f64::from(total))
    }
}

/// A match reported by the losing side, waiting for the winner's approval.
/// The rating fields are display-only snapshots from report time; the
/// authoritative pre-match ratings are taken again at approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMatchDoc {
    pub winner_username: String,
    pub loser_username: String,
    pub map: String,
    pub loser_score: i32,
    pub loser_suicides: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_comment: Option<String>,
    pub reported_by: String,
    pub reported_at: DateTime<Utc>,
    pub approved: bool,
    pub winner_rating_before: i32,
    pub loser_rating_before: i32,
}

/// An approved match. Immutable once the approval transaction has finished;
/// the rating fields below `enriched` are filled in by that transaction and
/// stay `None` only while an approval is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedMatchDoc {
    pub winner_username: String,
    pub loser_username: String,
    pub map: String,
    pub winner_score: i32,
    pub winner_suicides: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_comment: Option<String>,
    pub loser_score: i32,
    pub loser_suicides: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_comment: Option<String>,
    pub reported_by: String,
    pub reported_at: DateTime<Utc>,
    pub approved: bool,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub winner_rating_before: i32,
    pub loser_rating_before: i32,
    /// Set once the rating batch has landed. The fields below are only
    /// trustworthy when this is true.
    pub enriched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_rating_after: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_rating_after: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_rating_delta: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_rating_delta: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_match_count_before: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_match_count_before: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_win_rate_before: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_win_rate_before: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_position_before: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_position_after: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_position_before: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser_position_after: Option<u32>,
}

/// A rejected match: the pending report kept verbatim plus rejection
/// metadata. Terminal; never affects ratings or positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedMatchDoc {
    #[serde(flatten)]
    pub report: PendingMatchDoc,
    pub rejected_by: String,
    pub rejected_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Match,
    Promotion,
    Demotion,
}

/// One append-only audit record. Usernames are denormalized alongside ids at
/// write time so the timeline renders without further lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryDoc {
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub account_id: String,
    pub username: String,
    pub opponent_account_id: String,
    pub opponent_username: String,
    pub won: bool,
    pub rating_before: i32,
    pub rating_after: i32,
    pub position_before: u32,
    pub position_after: u32,
    /// Rank tier name held after this event.
    pub rank_name: String,
    pub match_id: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RibbonAward {
    pub level: u32,
    pub awarded_at: DateTime<Utc>,
}

/// All ribbons a player has earned, keyed by ribbon name. Levels only ever
/// go up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RibbonSheetDoc {
    pub username: String,
    pub ribbons: BTreeMap<String, RibbonAward>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_win_rate() {
        let mut player = PlayerDoc {
            username: "alice".to_string(),
            rating: 1200,
            position: 1,
            wins: 0,
            losses: 0,
            last_match_id: None,
            last_match_date: None,
            registered_at: Utc::now(),
            version: 0,
        };
        assert_eq!(player.win_rate(), None);

        player.wins = 3;
        player.losses = 1;
        assert_eq!(player.match_count(), 4);
        assert_eq!(player.win_rate(), Some(75.0));
    }

    #[test]
    fn test_documents_use_camel_case_keys() {
        let player = PlayerDoc {
            username: "alice".to_string(),
            rating: 1200,
            position: 3,
            wins: 2,
            losses: 0,
            last_match_id: Some("m1".to_string()),
            last_match_date: None,
            registered_at: Utc::now(),
            version: 4,
        };
        let json = serde_json::to_value(&player).unwrap();
        assert_eq!(json["lastMatchId"], "m1");
        assert_eq!(json["registeredAt"].is_string(), true);
        assert!(json.get("last_match_id").is_none());
    }

    #[test]
    fn test_rejected_match_keeps_report_fields_flat() {
        let report = PendingMatchDoc {
            winner_username: "alice".to_string(),
            loser_username: "bob".to_string(),
            map: "te_valley".to_string(),
            loser_score: 12,
            loser_suicides: 1,
            loser_comment: None,
            reported_by: "acct-bob".to_string(),
            reported_at: Utc::now(),
            approved: false,
            winner_rating_before: 1200,
            loser_rating_before: 1200,
        };
        let rejected = RejectedMatchDoc {
            report,
            rejected_by: "acct-alice".to_string(),
            rejected_at: Utc::now(),
            reason: "never played this".to_string(),
        };
        let json = serde_json::to_value(&rejected).unwrap();
        assert_eq!(json["winnerUsername"], "alice");
        assert_eq!(json["reason"], "never played this");
        assert!(json.get("report").is_none());
    }

    #[test]
    fn test_history_kind_serializes_as_type() {
        let entry = HistoryEntryDoc {
            kind: HistoryKind::Promotion,
            account_id: "acct-alice".to_string(),
            username: "alice".to_string(),
            opponent_account_id: "acct-bob".to_string(),
            opponent_username: "bob".to_string(),
            won: true,
            rating_before: 1200,
            rating_after: 1216,
            position_before: 5,
            position_after: 2,
            rank_name: "Unranked".to_string(),
            match_id: "m1".to_string(),
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "promotion");
        assert_eq!(json["positionAfter"], 2);
    }
}
