// Ribbon evaluation: long-horizon achievements computed from the approved
// match archive.
//
// Levels only ever go up. `evaluate` recomputes a player's counters from
// their full match record and persists ribbons that are new or have reached
// a higher level. `check_top_rank` runs after an approval and covers the
// one ribbon judged against the live ladder instead of the archive.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::LadderError;
use crate::ladder::require_player;
use crate::metrics;
use crate::model::{ApprovedMatchDoc, PlayerDoc, RibbonAward, RibbonSheetDoc};
use crate::rank::{self, RankTier};
use crate::store::{Document, Page, Query, Store, StoreError};
use crate::variant::LadderVariant;

pub const VETERAN: &str = "veteran";
pub const CARTOGRAPHER: &str = "cartographer";
pub const CHALLENGER: &str = "challenger";
pub const GIANT_SLAYER: &str = "giant_slayer";
pub const SHARPSHOOTER: &str = "sharpshooter";
pub const TOP_RANK: &str = "top_rank";

const VETERAN_LEVELS: [u32; 5] = [5, 25, 50, 100, 250];
const CARTOGRAPHER_LEVELS: [u32; 4] = [3, 5, 10, 15];
const CHALLENGER_LEVELS: [u32; 4] = [5, 10, 25, 50];
const GIANT_SLAYER_LEVELS: [u32; 4] = [1, 5, 10, 25];
const SHARPSHOOTER_MIN_MATCHES: u32 = 25;
const SHARPSHOOTER_MIN_WIN_RATE: f64 = 75.0;

const SCAN_PAGE_SIZE: u32 = 100;

/// Counters accumulated over a player's entire approved match record.
#[derive(Debug, Clone, Default)]
struct MatchCounters {
    total: u32,
    wins: u32,
    maps: HashSet<String>,
    opponents: HashSet<String>,
    underdog_wins: u32,
}

/// Cached counters stay valid until the player's match count moves.
#[derive(Debug, Clone)]
struct CachedCounters {
    at_match_count: u32,
    counters: MatchCounters,
}

#[derive(Clone)]
pub struct RibbonEvaluator {
    store: Store,
    variant: LadderVariant,
    cache: Arc<Mutex<HashMap<String, CachedCounters>>>,
}

impl RibbonEvaluator {
    pub fn new(store: Store, variant: LadderVariant) -> Self {
        RibbonEvaluator {
            store,
            variant,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Recomputes `username`'s ribbons and persists anything new or
    /// upgraded. Returns only the changes; an empty map means the sheet
    /// was already up to date.
    pub async fn evaluate(
        &self,
        username: &str,
    ) -> Result<BTreeMap<String, RibbonAward>, LadderError> {
        let player = require_player(&self.store, &self.variant, username).await?;
        let counters = self.counters_for(&player).await?;

        let mut reached: Vec<(&str, u32)> = vec![
            (VETERAN, level_reached(&VETERAN_LEVELS, counters.total)),
            (
                CARTOGRAPHER,
                level_reached(&CARTOGRAPHER_LEVELS, counters.maps.len() as u32),
            ),
            (
                CHALLENGER,
                level_reached(&CHALLENGER_LEVELS, counters.opponents.len() as u32),
            ),
            (
                GIANT_SLAYER,
                level_reached(&GIANT_SLAYER_LEVELS, counters.underdog_wins),
            ),
        ];
        if counters.total >= SHARPSHOOTER_MIN_MATCHES
            && f64::from(counters.wins) * 100.0 / f64::from(counters.total)
                >= SHARPSHOOTER_MIN_WIN_RATE
        {
            reached.push((SHARPSHOOTER, 1));
        }

        let sheet: Option<RibbonSheetDoc> = self
            .store
            .get(&self.variant.ribbons_collection, &player.id)
            .await?;
        let sheet_exists = sheet.is_some();
        let held = sheet.map(|s| s.ribbons).unwrap_or_default();

        let upgraded: Vec<(&str, u32)> = reached
            .into_iter()
            .filter(|(name, level)| {
                *level > held.get(*name).map(|award| award.level).unwrap_or(0)
            })
            .collect();
        if upgraded.is_empty() {
            return Ok(BTreeMap::new());
        }

        let awarded_at = self.store.server_now().await?;
        let changed: BTreeMap<String, RibbonAward> = upgraded
            .into_iter()
            .map(|(name, level)| (name.to_string(), RibbonAward { level, awarded_at }))
            .collect();
        self.persist(&player, sheet_exists, &changed).await?;
        for name in changed.keys() {
            metrics::RIBBONS_AWARDED_TOTAL
                .with_label_values(&[&self.variant.id, name])
                .inc();
        }
        tracing::info!(username, ribbons = ?changed.keys().collect::<Vec<_>>(), "ribbons awarded");
        Ok(changed)
    }

    /// Awards the top rank ribbon when `username` currently holds the best
    /// ladder position of their tier. Single level, permanent once earned.
    /// Unranked players never qualify.
    pub async fn check_top_rank(
        &self,
        username: &str,
    ) -> Result<Option<RibbonAward>, LadderError> {
        let player = require_player(&self.store, &self.variant, username).await?;
        let tier = rank::classify_player(&player.data, &self.variant.tiers);
        if tier == RankTier::Unranked {
            return Ok(None);
        }

        let sheet: Option<RibbonSheetDoc> = self
            .store
            .get(&self.variant.ribbons_collection, &player.id)
            .await?;
        if sheet
            .as_ref()
            .is_some_and(|s| s.ribbons.contains_key(TOP_RANK))
        {
            return Ok(None);
        }
        if self.best_of_tier(tier).await?.as_deref() != Some(username) {
            return Ok(None);
        }

        let award = RibbonAward {
            level: 1,
            awarded_at: self.store.server_now().await?,
        };
        let changed = BTreeMap::from([(TOP_RANK.to_string(), award.clone())]);
        self.persist(&player, sheet.is_some(), &changed).await?;
        metrics::RIBBONS_AWARDED_TOTAL
            .with_label_values(&[&self.variant.id, TOP_RANK])
            .inc();
        tracing::info!(username, tier = %tier, "top rank ribbon awarded");
        Ok(Some(award))
    }

    async fn counters_for(
        &self,
        player: &Document<PlayerDoc>,
    ) -> Result<MatchCounters, LadderError> {
        let match_count = player.data.match_count();
        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&player.data.username) {
                if entry.at_match_count == match_count {
                    return Ok(entry.counters.clone());
                }
            }
        }
        // not held across the scan; a racing fill writes the same data
        let counters = self.scan_matches(&player.data.username).await?;
        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            player.data.username.clone(),
            CachedCounters {
                at_match_count: match_count,
                counters: counters.clone(),
            },
        );
        Ok(counters)
    }

    /// Walks the player's approved record, win side then loss side.
    async fn scan_matches(&self, username: &str) -> Result<MatchCounters, LadderError> {
        let mut counters = MatchCounters::default();

        let mut cursor = None;
        loop {
            let page: Page<ApprovedMatchDoc> = self
                .store
                .query(
                    Query::new(self.variant.approved_collection.as_str())
                        .filter_eq("winnerUsername", username)
                        .order_asc("approvedAt")
                        .limit(SCAN_PAGE_SIZE)
                        .after(cursor),
                )
                .await?;
            for doc in &page.items {
                counters.total += 1;
                counters.wins += 1;
                counters.maps.insert(doc.data.map.clone());
                counters.opponents.insert(doc.data.loser_username.clone());
                if won_as_underdog(&doc.data, &self.variant) {
                    counters.underdog_wins += 1;
                }
            }
            cursor = page.next;
            if cursor.is_none() {
                break;
            }
        }

        let mut cursor = None;
        loop {
            let page: Page<ApprovedMatchDoc> = self
                .store
                .query(
                    Query::new(self.variant.approved_collection.as_str())
                        .filter_eq("loserUsername", username)
                        .order_asc("approvedAt")
                        .limit(SCAN_PAGE_SIZE)
                        .after(cursor),
                )
                .await?;
            for doc in &page.items {
                counters.total += 1;
                counters.maps.insert(doc.data.map.clone());
                counters.opponents.insert(doc.data.winner_username.clone());
            }
            cursor = page.next;
            if cursor.is_none() {
                break;
            }
        }

        Ok(counters)
    }

    /// Username of the best positioned player currently in `tier`.
    async fn best_of_tier(&self, tier: RankTier) -> Result<Option<String>, LadderError> {
        let mut cursor = None;
        loop {
            let page: Page<PlayerDoc> = self
                .store
                .query(
                    Query::new(self.variant.players_collection.as_str())
                        .order_asc("position")
                        .limit(SCAN_PAGE_SIZE)
                        .after(cursor),
                )
                .await?;
            for doc in &page.items {
                if rank::classify_player(&doc.data, &self.variant.tiers) == tier {
                    return Ok(Some(doc.data.username.clone()));
                }
            }
            cursor = page.next;
            if cursor.is_none() {
                return Ok(None);
            }
        }
    }

    /// Writes the changed ribbons without touching the rest of the sheet.
    async fn persist(
        &self,
        player: &Document<PlayerDoc>,
        sheet_exists: bool,
        changed: &BTreeMap<String, RibbonAward>,
    ) -> Result<(), LadderError> {
        let patch = serde_json::json!({ "ribbons": changed });
        if sheet_exists {
            self.store
                .merge(&self.variant.ribbons_collection, &player.id, &patch)
                .await?;
            return Ok(());
        }
        let sheet = RibbonSheetDoc {
            username: player.data.username.clone(),
            ribbons: changed.clone(),
        };
        match self
            .store
            .create(&self.variant.ribbons_collection, &player.id, &sheet)
            .await
        {
            Ok(()) => Ok(()),
            // lost a race with another evaluation; fold ours in instead
            Err(StoreError::AlreadyExists { .. }) => {
                self.store
                    .merge(&self.variant.ribbons_collection, &player.id, &patch)
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Number of thresholds `value` has met, which is the ribbon level.
fn level_reached(levels: &[u32], value: u32) -> u32 {
    levels.iter().filter(|&&threshold| value >= threshold).count() as u32
}

/// A win counts for giant slayer when the winner went in ranked strictly
/// below the loser, judged from the pre-match snapshots on the record.
fn won_as_underdog(m: &ApprovedMatchDoc, variant: &LadderVariant) -> bool {
    let winner_tier = rank::classify(
        m.winner_rating_before,
        m.winner_match_count_before,
        m.winner_win_rate_before,
        &variant.tiers,
    );
    let loser_tier = rank::classify(
        m.loser_rating_before,
        m.loser_match_count_before,
        m.loser_win_rate_before,
        &variant.tiers,
    );
    winner_tier < loser_tier
}
