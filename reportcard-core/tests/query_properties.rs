use proptest::prelude::*;
use reportcard_core::query::{self, SortPolicy};
use reportcard_core::{PeriodField, ReportCard};
use serde_json::json;
use std::cmp::Ordering;

const ACCOUNTS: [&str; 3] = ["Birch", "Cedar", "Maple"];
const TYPES: [&str; 4] = ["narrative", "standard", "standards_based", "unknown"];
const MONTHS: [&str; 4] = ["2023-05", "2024-11", "2025-01", "2025-02"];

fn build_cards(shapes: &[(usize, usize, usize)]) -> Vec<ReportCard> {
    shapes
        .iter()
        .enumerate()
        .map(|(position, (account, kind, month))| {
            ReportCard::from_value(json!({
                "uuid": format!("card-{position}"),
                "account_name": ACCOUNTS[*account],
                "report_card_type": TYPES[*kind],
                "month_year": MONTHS[*month],
            }))
            .expect("valid card")
        })
        .collect()
}

fn keys(cards: &[&ReportCard]) -> Vec<(String, String, String)> {
    cards
        .iter()
        .map(|card| {
            (
                card.account_name().to_string(),
                card.report_card_type().to_string(),
                card.month_year().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

fn position(card: &ReportCard) -> usize {
    card.id()
        .trim_start_matches("card-")
        .parse()
        .expect("numeric suffix")
}

fn shape_strategy() -> impl Strategy<Value = Vec<(usize, usize, usize)>> {
    prop::collection::vec((0..ACCOUNTS.len(), 0..TYPES.len(), 0..MONTHS.len()), 0..24)
}

proptest! {
    #[test]
    fn sort_output_is_ordered_and_stable(shapes in shape_strategy()) {
        let cards = build_cards(&shapes);
        for policy in SortPolicy::ALL {
            let sorted = query::sort(&cards, policy, PeriodField::MonthYear);
            prop_assert_eq!(sorted.len(), cards.len());
            for pair in sorted.windows(2) {
                let ordering = policy.compare(pair[0], pair[1], PeriodField::MonthYear);
                prop_assert_ne!(ordering, Ordering::Greater);
                if ordering == Ordering::Equal {
                    prop_assert!(position(pair[0]) < position(pair[1]));
                }
            }
        }
    }

    #[test]
    fn sort_is_permutation_invariant(
        (shapes, shuffled) in shape_strategy().prop_flat_map(|shapes| {
            let shuffled = Just(shapes.clone()).prop_shuffle();
            (Just(shapes), shuffled)
        })
    ) {
        let original = build_cards(&shapes);
        let permuted = build_cards(&shuffled);
        for policy in SortPolicy::ALL {
            let left = query::sort(&original, policy, PeriodField::MonthYear);
            let right = query::sort(&permuted, policy, PeriodField::MonthYear);
            prop_assert_eq!(keys(&left), keys(&right));
        }
    }

    #[test]
    fn available_periods_cover_every_card(shapes in shape_strategy()) {
        let cards = build_cards(&shapes);
        let periods = query::available_periods(&cards, PeriodField::MonthYear);
        for pair in periods.windows(2) {
            prop_assert!(pair[0] > pair[1]);
        }
        for card in &cards {
            prop_assert!(periods.contains(&card.month_year().expect("month")));
        }
        for period in &periods {
            prop_assert!(cards.iter().any(|card| card.month_year() == Some(*period)));
        }
        prop_assert_eq!(query::default_period(&cards, PeriodField::MonthYear), periods.first().copied());
    }

    #[test]
    fn filtering_is_idempotent(shapes in shape_strategy(), month in 0..MONTHS.len()) {
        let cards = build_cards(&shapes);
        let key = Some(MONTHS[month]);
        let once = query::filter_by_period(&cards, PeriodField::MonthYear, key);
        let twice = query::filter_by_period(once.iter().copied(), PeriodField::MonthYear, key);
        prop_assert_eq!(keys(&once), keys(&twice));
        prop_assert!(once.iter().all(|card| card.month_year() == key));

        let everything = query::filter_by_period(&cards, PeriodField::MonthYear, Some(""));
        prop_assert_eq!(everything.len(), cards.len());
    }
}
