// Rank classification. A tier comes from rating plus activity stats, not
// rating alone: fresh accounts stay Unranked through placement, and the top
// tier demands a proven record on top of the rating.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::PlayerDoc;
use crate::variant::TierThresholds;

/// Matches a player must complete before leaving Unranked.
pub const PLACEMENT_MATCHES: u32 = 5;

/// Emerald requires at least this many matches...
pub const EMERALD_MIN_MATCHES: u32 = 20;
/// ...and at least this win rate, in percent.
pub const EMERALD_MIN_WIN_RATE: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankTier {
    Unranked,
    Bronze,
    Silver,
    Gold,
    Emerald,
}

impl fmt::Display for RankTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RankTier::Unranked => "Unranked",
            RankTier::Bronze => "Bronze",
            RankTier::Silver => "Silver",
            RankTier::Gold => "Gold",
            RankTier::Emerald => "Emerald",
        };
        write!(f, "{name}")
    }
}

/// Classify from rating and (when known) activity stats.
///
/// `match_count`/`win_rate` are `None` for records that predate stat
/// tracking; those fall back to thresholds alone and never reach Emerald.
pub fn classify(
    rating: i32,
    match_count: Option<u32>,
    win_rate: Option<f64>,
    tiers: &TierThresholds,
) -> RankTier {
    let count = match match_count {
        Some(count) => count,
        None => {
            if rating <= 0 {
                return RankTier::Unranked;
            }
            return tier_for_rating(rating, tiers).min(RankTier::Gold);
        }
    };

    if count < PLACEMENT_MATCHES {
        return RankTier::Unranked;
    }
    // past placement nobody sits below Bronze, whatever the rating says
    if rating < tiers.bronze {
        return RankTier::Bronze;
    }
    let by_rating = tier_for_rating(rating, tiers);
    if by_rating == RankTier::Emerald {
        let proven = count >= EMERALD_MIN_MATCHES
            && win_rate.is_some_and(|rate| rate >= EMERALD_MIN_WIN_RATE);
        if !proven {
            return RankTier::Gold;
        }
    }
    by_rating
}

/// Classify a live player document.
pub fn classify_player(player: &PlayerDoc, tiers: &TierThresholds) -> RankTier {
    classify(
        player.rating,
        Some(player.match_count()),
        player.win_rate(),
        tiers,
    )
}

fn tier_for_rating(rating: i32, tiers: &TierThresholds) -> RankTier {
    if rating >= tiers.emerald {
        RankTier::Emerald
    } else if rating >= tiers.gold {
        RankTier::Gold
    } else if rating >= tiers.silver {
        RankTier::Silver
    } else if rating >= tiers.bronze {
        RankTier::Bronze
    } else {
        RankTier::Unranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duel() -> TierThresholds {
        TierThresholds {
            bronze: 1400,
            silver: 1600,
            gold: 1800,
            emerald: 2000,
        }
    }

    fn ffa() -> TierThresholds {
        TierThresholds {
            bronze: 200,
            silver: 500,
            gold: 700,
            emerald: 1000,
        }
    }

    #[test]
    fn test_placement_matches_stay_unranked() {
        // rating is irrelevant until five matches are in
        assert_eq!(classify(2500, Some(0), None, &duel()), RankTier::Unranked);
        assert_eq!(
            classify(2500, Some(4), Some(100.0), &duel()),
            RankTier::Unranked
        );
        assert_eq!(
            classify(1450, Some(5), Some(60.0), &duel()),
            RankTier::Bronze
        );
    }

    #[test]
    fn test_bronze_floor_after_placement() {
        // below the Bronze threshold but past placement: still Bronze
        assert_eq!(classify(1100, Some(8), Some(25.0), &duel()), RankTier::Bronze);
        assert_eq!(classify(-40, Some(30), Some(10.0), &ffa()), RankTier::Bronze);
    }

    #[test]
    fn test_threshold_bands() {
        let tiers = duel();
        assert_eq!(classify(1599, Some(10), Some(50.0), &tiers), RankTier::Bronze);
        assert_eq!(classify(1600, Some(10), Some(50.0), &tiers), RankTier::Silver);
        assert_eq!(classify(1799, Some(10), Some(50.0), &tiers), RankTier::Silver);
        assert_eq!(classify(1800, Some(10), Some(50.0), &tiers), RankTier::Gold);
    }

    #[test]
    fn test_emerald_needs_the_record_not_just_rating() {
        let tiers = ffa();
        // rating qualifies, record doesn't: held at Gold
        assert_eq!(classify(1500, Some(10), Some(90.0), &tiers), RankTier::Gold);
        assert_eq!(classify(1500, Some(40), Some(79.9), &tiers), RankTier::Gold);
        // both the match count and the win rate are there
        assert_eq!(classify(1500, Some(20), Some(80.0), &tiers), RankTier::Emerald);
        assert_eq!(classify(1001, Some(25), Some(92.0), &tiers), RankTier::Emerald);
    }

    #[test]
    fn test_legacy_records_without_stats() {
        let tiers = ffa();
        assert_eq!(classify(0, None, None, &tiers), RankTier::Unranked);
        assert_eq!(classify(-5, None, None, &tiers), RankTier::Unranked);
        assert_eq!(classify(150, None, None, &tiers), RankTier::Unranked);
        assert_eq!(classify(550, None, None, &tiers), RankTier::Silver);
        // capped below Emerald no matter the rating
        assert_eq!(classify(2400, None, None, &tiers), RankTier::Gold);
    }

    #[test]
    fn test_rating_monotonic_for_fixed_stats() {
        let tiers = duel();
        let mut previous = RankTier::Unranked;
        for rating in (1300..2200).step_by(50) {
            let tier = classify(rating, Some(30), Some(85.0), &tiers);
            assert!(tier >= previous, "tier dropped at rating {rating}");
            previous = tier;
        }
    }

    #[test]
    fn test_tier_ordering_and_names() {
        assert!(RankTier::Unranked < RankTier::Bronze);
        assert!(RankTier::Bronze < RankTier::Silver);
        assert!(RankTier::Silver < RankTier::Gold);
        assert!(RankTier::Gold < RankTier::Emerald);
        assert_eq!(RankTier::Emerald.to_string(), "Emerald");
        assert_eq!(RankTier::Unranked.to_string(), "Unranked");
    }

    #[test]
    fn test_classify_player_uses_live_counters() {
        let player = PlayerDoc {
            username: "alice".to_string(),
            rating: 1500,
            position: 1,
            wins: 3,
            losses: 0,
            last_match_id: None,
            last_match_date: None,
            registered_at: chrono::Utc::now(),
            version: 0,
        };
        // three matches: still in placement
        assert_eq!(classify_player(&player, &duel()), RankTier::Unranked);
    }
}
