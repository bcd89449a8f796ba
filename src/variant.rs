// Ladder variants. Each variant is an independent ladder with its own
// document collections, starting rating, and rank thresholds; the same
// service code runs against any of them.

use crate::elo;

/// Minimum rating for each named tier. Everything below `bronze` is
/// Unranked territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierThresholds {
    pub bronze: i32,
    pub silver: i32,
    pub gold: i32,
    pub emerald: i32,
}

#[derive(Debug, Clone)]
pub struct LadderVariant {
    pub id: String,
    pub default_rating: i32,
    pub k_factor: f64,
    pub tiers: TierThresholds,
    pub players_collection: String,
    pub pending_collection: String,
    pub approved_collection: String,
    pub rejected_collection: String,
    pub history_collection: String,
    pub ribbons_collection: String,
}

impl LadderVariant {
    pub fn new(id: &str, default_rating: i32, k_factor: f64, tiers: TierThresholds) -> Self {
        LadderVariant {
            id: id.to_string(),
            default_rating,
            k_factor,
            tiers,
            players_collection: format!("{id}_players"),
            pending_collection: format!("{id}_pending_matches"),
            approved_collection: format!("{id}_approved_matches"),
            rejected_collection: format!("{id}_rejected_matches"),
            history_collection: format!("{id}_history"),
            ribbons_collection: format!("{id}_ribbons"),
        }
    }
}

/// The ladders this deployment runs.
pub fn builtin_variants() -> Vec<LadderVariant> {
    vec![
        LadderVariant::new(
            "1v1",
            1200,
            elo::DEFAULT_K_FACTOR,
            TierThresholds {
                bronze: 1400,
                silver: 1600,
                gold: 1800,
                emerald: 2000,
            },
        ),
        LadderVariant::new(
            "ffa",
            200,
            elo::DEFAULT_K_FACTOR,
            TierThresholds {
                bronze: 200,
                silver: 500,
                gold: 700,
                emerald: 1000,
            },
        ),
    ]
}

pub fn find_variant(id: &str) -> Option<LadderVariant> {
    builtin_variants().into_iter().find(|v| v.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_variants() {
        let variants = builtin_variants();
        let ids: Vec<&str> = variants.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["1v1", "ffa"]);

        let duel = find_variant("1v1").unwrap();
        assert_eq!(duel.default_rating, 1200);
        assert_eq!(duel.tiers.bronze, 1400);

        let ffa = find_variant("ffa").unwrap();
        assert_eq!(ffa.default_rating, 200);
        assert_eq!(ffa.tiers.emerald, 1000);

        assert!(find_variant("2v2").is_none());
    }

    #[test]
    fn test_collections_are_prefixed_by_variant() {
        let variant = find_variant("ffa").unwrap();
        assert_eq!(variant.players_collection, "ffa_players");
        assert_eq!(variant.pending_collection, "ffa_pending_matches");
        assert_eq!(variant.approved_collection, "ffa_approved_matches");
        assert_eq!(variant.rejected_collection, "ffa_rejected_matches");
        assert_eq!(variant.history_collection, "ffa_history");
        assert_eq!(variant.ribbons_collection, "ffa_ribbons");
    }
}
