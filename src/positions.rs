// Ladder position reconciliation. A win over a better-placed player means
// the winner takes the loser's slot and everyone between them slides down
// one; a win over a worse-placed player moves nobody.

/// Positions strictly between the two bounds slide down one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftRange {
    pub low_exclusive: u32,
    pub high_exclusive: u32,
}

impl ShiftRange {
    pub fn is_empty(&self) -> bool {
        self.high_exclusive <= self.low_exclusive + 1
    }

    pub fn contains(&self, position: u32) -> bool {
        position > self.low_exclusive && position < self.high_exclusive
    }
}

/// The minimal reshuffle for a finished match. Applying it keeps the set of
/// occupied positions exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionShift {
    pub new_winner_pos: u32,
    pub new_loser_pos: u32,
    pub shifted: ShiftRange,
}

pub fn reconcile(winner_pos: u32, loser_pos: u32) -> PositionShift {
    if winner_pos <= loser_pos {
        // winner already placed better (or equal): nothing moves
        return PositionShift {
            new_winner_pos: winner_pos,
            new_loser_pos: loser_pos,
            shifted: ShiftRange {
                low_exclusive: loser_pos,
                high_exclusive: loser_pos,
            },
        };
    }
    PositionShift {
        new_winner_pos: loser_pos,
        new_loser_pos: loser_pos + 1,
        shifted: ShiftRange {
            low_exclusive: loser_pos,
            high_exclusive: winner_pos,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_winner_takes_losers_slot() {
        let shift = reconcile(9, 4);
        assert_eq!(shift.new_winner_pos, 4);
        assert_eq!(shift.new_loser_pos, 5);
        assert_eq!(shift.shifted.low_exclusive, 4);
        assert_eq!(shift.shifted.high_exclusive, 9);
        assert!(!shift.shifted.is_empty());
        // bounds are exclusive on both ends
        assert!(!shift.shifted.contains(4));
        assert!(shift.shifted.contains(5));
        assert!(shift.shifted.contains(8));
        assert!(!shift.shifted.contains(9));
    }

    #[test]
    fn test_win_over_worse_placed_is_noop() {
        let shift = reconcile(2, 5);
        assert_eq!(shift.new_winner_pos, 2);
        assert_eq!(shift.new_loser_pos, 5);
        assert!(shift.shifted.is_empty());
    }

    #[test]
    fn test_adjacent_positions_swap() {
        let shift = reconcile(3, 2);
        assert_eq!(shift.new_winner_pos, 2);
        assert_eq!(shift.new_loser_pos, 3);
        assert!(shift.shifted.is_empty());
    }

    #[test]
    fn test_equal_positions_move_nobody() {
        // can't happen with unique positions, but must not corrupt anything
        let shift = reconcile(4, 4);
        assert_eq!(shift.new_winner_pos, 4);
        assert_eq!(shift.new_loser_pos, 4);
        assert!(shift.shifted.is_empty());
    }

    #[test]
    fn test_positions_stay_a_permutation() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let size: u32 = rng.gen_range(2..=30);
            let mut positions: Vec<u32> = (1..=size).collect();
            let winner_idx = rng.gen_range(0..size as usize);
            let mut loser_idx = rng.gen_range(0..size as usize);
            while loser_idx == winner_idx {
                loser_idx = rng.gen_range(0..size as usize);
            }
            let winner_pos = positions[winner_idx];
            let loser_pos = positions[loser_idx];

            let shift = reconcile(winner_pos, loser_pos);
            for pos in positions.iter_mut() {
                if *pos == winner_pos {
                    *pos = shift.new_winner_pos;
                } else if *pos == loser_pos {
                    *pos = shift.new_loser_pos;
                } else if shift.shifted.contains(*pos) {
                    *pos += 1;
                }
            }

            let mut sorted = positions;
            sorted.sort_unstable();
            let expected: Vec<u32> = (1..=size).collect();
            assert_eq!(sorted, expected, "winner {winner_pos} loser {loser_pos}");
        }
    }

    #[test]
    fn test_only_players_between_move() {
        let shift = reconcile(6, 3);
        // 1 and 2 are above the range, 7 below it
        for outside in [1, 2, 7, 8] {
            assert!(!shift.shifted.contains(outside));
        }
        for inside in [4, 5] {
            assert!(shift.shifted.contains(inside));
        }
    }
}
