//! Property tests for the Glicko-2 rating update

use debate_arena::config::RatingConfig;
use debate_arena::rating::{Glicko2RatingCalculator, RatingCalculator};
use debate_arena::types::PlayerRating;
use proptest::prelude::*;

fn rating_strategy() -> impl Strategy<Value = PlayerRating> {
    (800.0f64..2400.0, 30.0f64..350.0, 0.03f64..0.1).prop_map(|(rating, deviation, volatility)| {
        PlayerRating {
            rating,
            deviation,
            volatility,
        }
    })
}

#[test]
fn test_fresh_participants_move_apart_on_a_win() {
    let calculator = Glicko2RatingCalculator::default();
    let initial = calculator.initial_rating();
    assert_eq!(initial.rating, 1500.0);
    assert_eq!(initial.deviation, 350.0);

    let update = calculator.apply_result(&initial, &initial, 1.0).unwrap();
    assert!(update.a.rating > 1500.0);
    assert!(update.b.rating < 1500.0);
    // Equal starting points move by the same amount
    assert!(((update.a.rating - 1500.0) + (update.b.rating - 1500.0)).abs() < 1e-6);
    assert!(update.a.deviation < 350.0);
}

proptest! {
    #[test]
    fn prop_winner_never_loses_rating(a in rating_strategy(), b in rating_strategy()) {
        let calculator = Glicko2RatingCalculator::default();
        let update = calculator.apply_result(&a, &b, 1.0).unwrap();
        prop_assert!(update.a.rating >= a.rating);
        prop_assert!(update.b.rating <= b.rating);
    }

    #[test]
    fn prop_deviation_respects_floor(a in rating_strategy(), b in rating_strategy(), score in prop::sample::select(vec![0.0, 0.5, 1.0])) {
        let config = RatingConfig::default();
        let calculator = Glicko2RatingCalculator::new(&config).unwrap();
        let update = calculator.apply_result(&a, &b, score).unwrap();
        prop_assert!(update.a.deviation >= config.deviation_floor);
        prop_assert!(update.b.deviation >= config.deviation_floor);
        prop_assert!(update.a.rating.is_finite() && update.b.rating.is_finite());
    }

    #[test]
    fn prop_swapping_sides_mirrors_the_update(a in rating_strategy(), b in rating_strategy()) {
        let calculator = Glicko2RatingCalculator::default();
        let forward = calculator.apply_result(&a, &b, 1.0).unwrap();
        let mirrored = calculator.apply_result(&b, &a, 0.0).unwrap();
        prop_assert!((forward.a.rating - mirrored.b.rating).abs() < 1e-9);
        prop_assert!((forward.b.rating - mirrored.a.rating).abs() < 1e-9);
    }
}
