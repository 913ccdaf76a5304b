//! Stateless queries over any collection of report cards.
//!
//! Every function takes an iterator of borrowed cards so that the output of
//! one query (a filtered or sorted view) can feed the next one.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use reportcard_sdk::{PeriodField, ReportCard};

/// Named ordering for catalog listings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortPolicy {
    /// Account, then type, then most recent period.
    #[default]
    Default,
    /// Most recent period, then account, then type.
    ByDate,
    /// Type, then account, then most recent period.
    ByType,
}

impl SortPolicy {
    pub const ALL: [SortPolicy; 3] = [SortPolicy::Default, SortPolicy::ByDate, SortPolicy::ByType];

    /// Parses a raw request token; anything unrecognized sorts as `default`.
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "by_date" => SortPolicy::ByDate,
            "by_type" => SortPolicy::ByType,
            _ => SortPolicy::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortPolicy::Default => "default",
            SortPolicy::ByDate => "by_date",
            SortPolicy::ByType => "by_type",
        }
    }

    pub fn compare(&self, a: &ReportCard, b: &ReportCard, field: PeriodField) -> Ordering {
        let account = || a.account_name().cmp(b.account_name());
        let kind = || a.report_card_type().cmp(b.report_card_type());
        let recent_first = || period_key(b, field).cmp(period_key(a, field));

        match self {
            SortPolicy::Default => account().then_with(kind).then_with(recent_first),
            SortPolicy::ByDate => recent_first().then_with(account).then_with(kind),
            SortPolicy::ByType => kind().then_with(account).then_with(recent_first),
        }
    }
}

impl fmt::Display for SortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn period_key(card: &ReportCard, field: PeriodField) -> &str {
    card.period(field).unwrap_or("")
}

/// Cards whose period equals `key` exactly. A missing or empty key selects everything.
pub fn filter_by_period<'a, I>(cards: I, field: PeriodField, key: Option<&str>) -> Vec<&'a ReportCard>
where
    I: IntoIterator<Item = &'a ReportCard>,
{
    match key.filter(|key| !key.is_empty()) {
        Some(key) => cards
            .into_iter()
            .filter(|card| card.period(field) == Some(key))
            .collect(),
        None => cards.into_iter().collect(),
    }
}

/// Distinct periods present in `cards`, most recent first.
pub fn available_periods<'a, I>(cards: I, field: PeriodField) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a ReportCard>,
{
    let periods: BTreeSet<&'a str> = cards
        .into_iter()
        .filter_map(|card| card.period(field))
        .collect();
    periods.into_iter().rev().collect()
}

/// Most recent period, or `None` for an empty collection.
pub fn default_period<'a, I>(cards: I, field: PeriodField) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a ReportCard>,
{
    cards.into_iter().filter_map(|card| card.period(field)).max()
}

/// Stable sort under `policy`; cards equal on every key keep their input order.
pub fn sort<'a, I>(cards: I, policy: SortPolicy, field: PeriodField) -> Vec<&'a ReportCard>
where
    I: IntoIterator<Item = &'a ReportCard>,
{
    let mut sorted: Vec<&'a ReportCard> = cards.into_iter().collect();
    sorted.sort_by(|a, b| policy.compare(a, b, field));
    sorted
}

pub fn find_by_id<'a, I>(cards: I, id: &str) -> Option<&'a ReportCard>
where
    I: IntoIterator<Item = &'a ReportCard>,
{
    cards.into_iter().find(|card| card.id() == id)
}

pub fn filter_by_account<'a, I>(cards: I, account_name: &str) -> Vec<&'a ReportCard>
where
    I: IntoIterator<Item = &'a ReportCard>,
{
    cards
        .into_iter()
        .filter(|card| card.account_name() == account_name)
        .collect()
}

/// Cards carrying the raw `report_card_type` tag, including unrecognized tags.
pub fn filter_by_type<'a, I>(cards: I, tag: &str) -> Vec<&'a ReportCard>
where
    I: IntoIterator<Item = &'a ReportCard>,
{
    cards
        .into_iter()
        .filter(|card| card.report_card_type() == tag)
        .collect()
}
