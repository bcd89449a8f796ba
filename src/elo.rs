// Elo rating calculation.
//
// Both new ratings come out of one call so winner and loser always move
// together. No draws: the ladder only records decisive results.

/// K-factor used when a variant does not configure its own.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// New ratings after a decisive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingPair {
    pub new_winner_rating: i32,
    pub new_loser_rating: i32,
}

/// Expected score for player A against player B.
pub fn expected_score(rating_a: i32, rating_b: i32) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rating_b - rating_a) as f64 / 400.0))
}

/// Apply a win of `winner_rating` over `loser_rating`. Ratings round half
/// up and carry no floor, so a long losing streak can drift below zero.
pub fn compute_ratings(winner_rating: i32, loser_rating: i32, k_factor: f64) -> RatingPair {
    let expected_winner = expected_score(winner_rating, loser_rating);
    let expected_loser = expected_score(loser_rating, winner_rating);
    RatingPair {
        new_winner_rating: round_half_up(winner_rating as f64 + k_factor * (1.0 - expected_winner)),
        new_loser_rating: round_half_up(loser_rating as f64 + k_factor * (0.0 - expected_loser)),
    }
}

/// Round with ties toward positive infinity: 15.5 -> 16, -0.5 -> 0.
fn round_half_up(value: f64) -> i32 {
    (value + 0.5).floor() as i32
}
