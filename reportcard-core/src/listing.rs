use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};

use crate::query::{self, SortPolicy};
use reportcard_sdk::{PeriodField, ReportCard};

/// Parameters of a catalog listing request, as received from a caller.
#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    field: PeriodField,
    period: Option<String>,
    sort: SortPolicy,
}

impl ListingQuery {
    pub fn new(field: PeriodField) -> Self {
        Self {
            field,
            ..Self::default()
        }
    }

    /// `None` selects the most recent period; an empty key lists every period.
    pub fn with_period<S: Into<String>>(mut self, period: Option<S>) -> Self {
        self.period = period.map(Into::into);
        self
    }

    pub fn with_sort(mut self, sort: SortPolicy) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_sort_token(self, token: &str) -> Self {
        self.with_sort(SortPolicy::from_token(token))
    }

    pub fn field(&self) -> PeriodField {
        self.field
    }

    pub fn sort(&self) -> SortPolicy {
        self.sort
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodOption {
    pub key: String,
    pub label: String,
    pub selected: bool,
}

/// Everything an index view needs: period choices plus the matching cards.
#[derive(Debug)]
pub struct Listing<'a> {
    pub field: PeriodField,
    pub sort: SortPolicy,
    pub periods: Vec<PeriodOption>,
    pub selected_period: Option<String>,
    pub cards: Vec<&'a ReportCard>,
}

impl<'a> Listing<'a> {
    pub fn build(cards: &'a [ReportCard], request: &ListingQuery) -> Self {
        let field = request.field;
        let selected_period = match request.period.as_deref() {
            Some("") => None,
            Some(key) => Some(key.to_string()),
            None => query::default_period(cards, field).map(str::to_string),
        };

        let periods = query::available_periods(cards, field)
            .into_iter()
            .map(|key| PeriodOption {
                key: key.to_string(),
                label: period_label(key),
                selected: selected_period.as_deref() == Some(key),
            })
            .collect();

        let filtered = query::filter_by_period(cards, field, selected_period.as_deref());
        let cards = query::sort(filtered, request.sort, field);

        Self {
            field,
            sort: request.sort,
            periods,
            selected_period,
            cards,
        }
    }

    pub fn total_count(&self) -> usize {
        self.cards.len()
    }

    pub fn selected_label(&self) -> String {
        self.selected_period
            .as_deref()
            .map(period_label)
            .unwrap_or_else(|| "All periods".to_string())
    }

    pub fn to_json_value(&self) -> Value {
        let cards: Vec<Value> = self.cards.iter().map(|card| card.to_json_value()).collect();
        json!({
            "period_field": self.field,
            "sort": self.sort,
            "selected_period": self.selected_period,
            "available_periods": self.periods,
            "total_count": self.total_count(),
            "report_cards": cards,
        })
    }
}

/// Human label for a period key: `2025-02` reads as `February 2025`.
pub fn period_label(key: &str) -> String {
    if let Ok(date) = NaiveDate::parse_from_str(key, "%Y-%m-%d") {
        return date.format("%B %-d, %Y").to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d") {
        return date.format("%B %Y").to_string();
    }
    key.to_string()
}
