// Competitive ladder backend: ELO ratings, rank tiers, position
// reconciliation, match approval, history, and ribbons over a JSON
// document store.

pub mod approval;
pub mod config;
pub mod elo;
pub mod error;
pub mod history;
pub mod ladder;
pub mod metrics;
pub mod model;
pub mod positions;
pub mod rank;
pub mod ribbons;
pub mod store;
pub mod variant;

pub use approval::ApprovalOutcome;
pub use config::Config;
pub use error::LadderError;
pub use ladder::{Actor, Ladder, MatchReport};
pub use rank::RankTier;
pub use store::{Batch, Cursor, Document, Page, Query, Store};
pub use variant::{builtin_variants, find_variant, LadderVariant, TierThresholds};
