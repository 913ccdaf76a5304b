use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

pub mod listing;
pub mod query;
pub mod schema;

pub use audit::{AuditDigest, AuditFinding, AuditThresholds, Severity, audit_catalog};
pub use listing::{Listing, ListingQuery, PeriodOption, period_label};
pub use query::SortPolicy;
pub use render::{
    render_audit_markdown, render_card_html, render_card_markdown, render_listing_html,
    render_listing_markdown,
};
pub use reportcard_sdk::{
    CardKind, CardSource, CatalogError, FileSource, InlineSource, NarrativeAssessment,
    PeriodField, RecordError, ReportCard, StandardAssessment, Subject,
};

pub const DEFAULT_SOURCE_PATH: &str = "config/report_cards.json";

/// Settings shared by every consumer of the catalog.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub source: PathBuf,
    pub period: PeriodField,
    pub sort: SortPolicy,
    pub audit: AuditThresholds,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from(DEFAULT_SOURCE_PATH),
            period: PeriodField::default(),
            sort: SortPolicy::default(),
            audit: AuditThresholds::default(),
        }
    }
}

impl CatalogConfig {
    pub fn new<P: Into<PathBuf>>(source: P) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(anyhow!("source path must not be empty"));
        }
        self.audit.validate()
    }

    pub fn repository(&self) -> Repository {
        Repository::new(FileSource::new(self.source.clone()))
    }
}

struct Catalog {
    cards: Vec<ReportCard>,
    index: HashMap<String, usize>,
}

impl Catalog {
    fn parse(document: &str) -> Result<Self, CatalogError> {
        let cards = parse_catalog(document)?;
        let mut index = HashMap::with_capacity(cards.len());
        for (position, card) in cards.iter().enumerate() {
            if index.insert(card.id().to_string(), position).is_some() {
                return Err(CatalogError::malformed_source(format!(
                    "duplicate report card id `{}`",
                    card.id()
                )));
            }
        }
        Ok(Self { cards, index })
    }
}

/// Parses a catalog document into cards, in source order.
///
/// Accepts a top-level array or an object holding a `report_cards` array. A
/// single malformed entry rejects the whole document.
pub fn parse_catalog(document: &str) -> Result<Vec<ReportCard>, CatalogError> {
    let value: Value = serde_json::from_str(document)
        .map_err(|error| CatalogError::malformed_source(format!("invalid JSON: {error}")))?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("report_cards") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(CatalogError::malformed_source(
                    "expected a `report_cards` array",
                ));
            }
        },
        _ => {
            return Err(CatalogError::malformed_source(
                "expected a JSON array of report cards",
            ));
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            ReportCard::from_value(entry)
                .map_err(|source| CatalogError::MalformedRecord { index, source })
        })
        .collect()
}

/// Read-only access to the catalog, parsed once on first use.
///
/// Callers that queue behind a failing load receive that load's error; the
/// first call after the failure has been reported attempts a fresh load.
pub struct Repository {
    source: Box<dyn CardSource>,
    catalog: OnceCell<Catalog>,
    loading: Mutex<Option<CatalogError>>,
    failures: AtomicU64,
    loads: AtomicUsize,
}

impl Repository {
    pub fn new<S: CardSource>(source: S) -> Self {
        Self {
            source: Box::new(source),
            catalog: OnceCell::new(),
            loading: Mutex::new(None),
            failures: AtomicU64::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(FileSource::new(path))
    }

    pub fn source(&self) -> String {
        self.source.describe()
    }

    pub fn is_loaded(&self) -> bool {
        self.catalog.get().is_some()
    }

    /// Number of successful parses; never exceeds one.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Acquire)
    }

    fn catalog(&self) -> Result<&Catalog, CatalogError> {
        if let Some(catalog) = self.catalog.get() {
            return Ok(catalog);
        }

        let observed = self.failures.load(Ordering::Acquire);
        let mut last_failure = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(catalog) = self.catalog.get() {
            return Ok(catalog);
        }
        if self.failures.load(Ordering::Acquire) != observed {
            if let Some(error) = last_failure.as_ref() {
                debug!(source = %self.source.describe(), "sharing failed load with waiting caller");
                return Err(error.clone());
            }
        }

        let source = self.source.describe();
        debug!(%source, "loading report card catalog");
        match self.source.read().and_then(|document| Catalog::parse(&document)) {
            Ok(catalog) => {
                *last_failure = None;
                self.loads.fetch_add(1, Ordering::AcqRel);
                info!(%source, cards = catalog.cards.len(), "report card catalog loaded");
                Ok(self.catalog.get_or_init(|| catalog))
            }
            Err(error) => {
                warn!(%source, %error, "report card catalog failed to load");
                *last_failure = Some(error.clone());
                self.failures.fetch_add(1, Ordering::AcqRel);
                Err(error)
            }
        }
    }

    /// Every card in source order.
    pub fn all(&self) -> Result<&[ReportCard], CatalogError> {
        Ok(&self.catalog()?.cards)
    }

    /// `Ok(None)` when no card carries `id`.
    pub fn find_by_id(&self, id: &str) -> Result<Option<&ReportCard>, CatalogError> {
        let catalog = self.catalog()?;
        Ok(catalog
            .index
            .get(id)
            .and_then(|position| catalog.cards.get(*position)))
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("source", &self.source.describe())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

mod audit {
    use anyhow::{Result, anyhow};
    use chrono::{Months, NaiveDate};
    use serde::Serialize;
    use std::collections::{BTreeMap, BTreeSet};

    use reportcard_sdk::{CardKind, PeriodField, ReportCard};

    #[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Default)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        #[default]
        Info,
        Warning,
        Critical,
    }

    impl Severity {
        pub fn as_str(&self) -> &'static str {
            match self {
                Severity::Info => "info",
                Severity::Warning => "warning",
                Severity::Critical => "critical",
            }
        }

        pub fn display_label(&self) -> &'static str {
            match self {
                Severity::Info => "Info",
                Severity::Warning => "Warning",
                Severity::Critical => "Critical",
            }
        }
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct AuditFinding {
        pub check: &'static str,
        pub severity: Severity,
        pub message: String,
    }

    impl AuditFinding {
        fn new(check: &'static str, severity: Severity, message: String) -> Self {
            Self {
                check,
                severity,
                message,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Default)]
    pub struct AuditDigest {
        pub overall: Severity,
        pub total_cards: usize,
        pub accounts: usize,
        pub periods: usize,
        pub findings: Vec<AuditFinding>,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct AuditThresholds {
        /// Fewer distinct accounts than this is critical; zero disables the check.
        pub min_accounts: usize,
        /// Type tag every account must file in every period.
        pub required_type: Option<String>,
    }

    impl Default for AuditThresholds {
        fn default() -> Self {
            Self {
                min_accounts: 1,
                required_type: None,
            }
        }
    }

    impl AuditThresholds {
        pub fn validate(&self) -> Result<()> {
            if let Some(tag) = &self.required_type {
                if tag.trim().is_empty() {
                    return Err(anyhow!("required_type must not be blank"));
                }
            }
            Ok(())
        }
    }

    pub fn audit_catalog(
        cards: &[ReportCard],
        field: PeriodField,
        thresholds: &AuditThresholds,
    ) -> AuditDigest {
        let mut findings = Vec::new();

        let accounts: BTreeSet<&str> = cards
            .iter()
            .map(ReportCard::account_name)
            .filter(|name| !name.is_empty())
            .collect();
        let periods: BTreeSet<&str> = cards.iter().filter_map(|card| card.period(field)).collect();

        check_missing_periods(cards, field, &mut findings);
        check_unrecognized_types(cards, &mut findings);
        check_month_gaps(cards, &mut findings);

        if accounts.len() < thresholds.min_accounts {
            findings.push(AuditFinding::new(
                "accounts",
                Severity::Critical,
                format!(
                    "Only {} distinct accounts (expected at least {})",
                    accounts.len(),
                    thresholds.min_accounts
                ),
            ));
        }

        if let Some(required) = thresholds.required_type.as_deref() {
            check_required_type(cards, field, required, &accounts, &periods, &mut findings);
        }

        let overall = findings
            .iter()
            .map(|finding| finding.severity)
            .max()
            .unwrap_or(Severity::Info);

        AuditDigest {
            overall,
            total_cards: cards.len(),
            accounts: accounts.len(),
            periods: periods.len(),
            findings,
        }
    }

    fn check_missing_periods(
        cards: &[ReportCard],
        field: PeriodField,
        findings: &mut Vec<AuditFinding>,
    ) {
        let missing: Vec<&str> = cards
            .iter()
            .filter(|card| card.period(field).is_none())
            .map(ReportCard::id)
            .collect();

        if missing.is_empty() {
            return;
        }

        let sample: Vec<&str> = missing.iter().take(5).copied().collect();
        findings.push(AuditFinding::new(
            "period",
            Severity::Warning,
            format!(
                "{} report cards have no {} ({})",
                missing.len(),
                field,
                sample.join(", ")
            ),
        ));
    }

    fn check_unrecognized_types(cards: &[ReportCard], findings: &mut Vec<AuditFinding>) {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for card in cards {
            if let CardKind::Unrecognized { tag } = card.kind() {
                *counts.entry(tag.as_str()).or_default() += 1;
            }
        }

        for (tag, count) in counts {
            findings.push(AuditFinding::new(
                "report_card_type",
                Severity::Warning,
                format!("{count} report cards use unrecognized type `{tag}`"),
            ));
        }
    }

    fn check_month_gaps(cards: &[ReportCard], findings: &mut Vec<AuditFinding>) {
        let months: BTreeSet<NaiveDate> = cards
            .iter()
            .filter_map(ReportCard::month_year)
            .filter_map(|month| NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d").ok())
            .collect();

        let (Some(first), Some(last)) = (months.first().copied(), months.last().copied()) else {
            return;
        };

        let mut missing = Vec::new();
        let mut cursor = first;
        while cursor < last {
            if !months.contains(&cursor) {
                missing.push(cursor.format("%Y-%m").to_string());
            }
            let Some(next) = cursor.checked_add_months(Months::new(1)) else {
                break;
            };
            cursor = next;
        }

        if !missing.is_empty() {
            findings.push(AuditFinding::new(
                "period_gaps",
                Severity::Warning,
                format!("No report cards filed for {}", missing.join(", ")),
            ));
        }
    }

    fn check_required_type(
        cards: &[ReportCard],
        field: PeriodField,
        required: &str,
        accounts: &BTreeSet<&str>,
        periods: &BTreeSet<&str>,
        findings: &mut Vec<AuditFinding>,
    ) {
        let filed: BTreeSet<(&str, &str)> = cards
            .iter()
            .filter(|card| card.report_card_type() == required)
            .filter_map(|card| Some((card.account_name(), card.period(field)?)))
            .collect();

        for account in accounts {
            let missing: Vec<&str> = periods
                .iter()
                .rev()
                .filter(|period| !filed.contains(&(*account, **period)))
                .copied()
                .collect();
            if !missing.is_empty() {
                findings.push(AuditFinding::new(
                    "required_type",
                    Severity::Warning,
                    format!(
                        "{account} has no `{required}` report card for {}",
                        missing.join(", ")
                    ),
                ));
            }
        }
    }
}

mod render {
    use anyhow::Result;
    use askama::Template;
    use serde_json::Value;

    use super::{AuditDigest, Listing, PeriodField, period_label};
    use reportcard_sdk::{CardKind, ReportCard};

    #[derive(Template)]
    #[template(path = "listing.md", escape = "none")]
    struct ListingMarkdown {
        view: ListingView,
    }

    #[derive(Template)]
    #[template(path = "listing.html")]
    struct ListingHtml {
        view: ListingView,
    }

    #[derive(Template)]
    #[template(path = "card.md", escape = "none")]
    struct CardMarkdown {
        view: CardView,
    }

    #[derive(Template)]
    #[template(path = "card.html")]
    struct CardHtml {
        view: CardView,
    }

    #[derive(Template)]
    #[template(path = "audit.md", escape = "none")]
    struct AuditMarkdown {
        view: AuditView,
    }

    pub fn render_listing_markdown(listing: &Listing<'_>) -> Result<String> {
        let view = ListingView::new(listing);
        ListingMarkdown { view }.render().map_err(Into::into)
    }

    pub fn render_listing_html(listing: &Listing<'_>) -> Result<String> {
        let view = ListingView::new(listing);
        ListingHtml { view }.render().map_err(Into::into)
    }

    pub fn render_card_markdown(card: &ReportCard, field: PeriodField) -> Result<String> {
        let view = CardView::new(card, field);
        CardMarkdown { view }.render().map_err(Into::into)
    }

    pub fn render_card_html(card: &ReportCard, field: PeriodField) -> Result<String> {
        let view = CardView::new(card, field);
        CardHtml { view }.render().map_err(Into::into)
    }

    pub fn render_audit_markdown(digest: &AuditDigest) -> Result<String> {
        let view = AuditView::new(digest);
        AuditMarkdown { view }.render().map_err(Into::into)
    }

    #[derive(Debug)]
    struct PeriodView {
        key: String,
        label: String,
        selected: bool,
    }

    #[derive(Debug)]
    struct CardRow {
        id: String,
        student_name: String,
        account_name: String,
        kind_label: String,
        grade_level: String,
        period: String,
    }

    #[derive(Debug)]
    struct ListingView {
        selected_label: String,
        sort: &'static str,
        total: usize,
        periods: Vec<PeriodView>,
        rows: Vec<CardRow>,
        has_rows: bool,
    }

    impl ListingView {
        fn new(listing: &Listing<'_>) -> Self {
            let rows: Vec<CardRow> = listing
                .cards
                .iter()
                .map(|card| CardRow {
                    id: card.id().to_string(),
                    student_name: card.student_name().to_string(),
                    account_name: card.account_name().to_string(),
                    kind_label: card.kind().display_label().to_string(),
                    grade_level: card.grade_level().unwrap_or("-").to_string(),
                    period: card
                        .period(listing.field)
                        .map(period_label)
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();

            Self {
                selected_label: listing.selected_label(),
                sort: listing.sort.as_str(),
                total: listing.total_count(),
                periods: listing
                    .periods
                    .iter()
                    .map(|period| PeriodView {
                        key: period.key.clone(),
                        label: period.label.clone(),
                        selected: period.selected,
                    })
                    .collect(),
                has_rows: !rows.is_empty(),
                rows,
            }
        }
    }

    #[derive(Debug)]
    struct KeyValue {
        key: String,
        value: String,
    }

    #[derive(Debug)]
    struct TableView {
        title: String,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    }

    #[derive(Debug)]
    struct ListView {
        title: String,
        items: Vec<String>,
    }

    #[derive(Debug)]
    struct CardView {
        id: String,
        student_name: String,
        kind_label: String,
        kind_class: String,
        key_values: Vec<KeyValue>,
        tables: Vec<TableView>,
        lists: Vec<ListView>,
        paragraph: String,
        notice: String,
        has_paragraph: bool,
        has_notice: bool,
    }

    impl CardView {
        fn new(card: &ReportCard, field: PeriodField) -> Self {
            let mut view = Self {
                id: card.id().to_string(),
                student_name: card.student_name().to_string(),
                kind_label: card.kind().display_label().to_string(),
                kind_class: card.kind().tag().replace('_', "-"),
                key_values: Vec::new(),
                tables: Vec::new(),
                lists: Vec::new(),
                paragraph: String::new(),
                notice: String::new(),
                has_paragraph: false,
                has_notice: false,
            };

            if !card.account_name().is_empty() {
                view.add_kv("Account", card.account_name());
            }
            if let Some(grade) = card.grade_level() {
                view.add_kv("Grade Level", grade);
            }
            if let Some(period) = card.period(field) {
                view.add_kv("Period", period_label(period));
            }

            populate_kind(&mut view, card);
            populate_details(&mut view, card);
            view.finalize();
            view
        }

        fn add_kv<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
            self.key_values.push(KeyValue {
                key: key.into(),
                value: value.into(),
            });
        }

        fn add_table(&mut self, table: TableView) {
            if !table.rows.is_empty() {
                self.tables.push(table);
            }
        }

        fn add_list<T: Into<String>>(&mut self, title: T, items: &[String]) {
            if !items.is_empty() {
                self.lists.push(ListView {
                    title: title.into(),
                    items: items.to_vec(),
                });
            }
        }

        fn finalize(&mut self) {
            self.has_paragraph = !self.paragraph.is_empty();
            self.has_notice = !self.notice.is_empty();
        }
    }

    fn populate_kind(view: &mut CardView, card: &ReportCard) {
        match card.kind() {
            CardKind::Standard { subjects } => {
                view.add_table(TableView {
                    title: "Subjects".to_string(),
                    headers: vec!["Subject".to_string(), "Grade".to_string()],
                    rows: subjects
                        .iter()
                        .map(|subject| {
                            vec![
                                subject.name.clone(),
                                subject.grade.clone().unwrap_or_else(|| "-".to_string()),
                            ]
                        })
                        .collect(),
                });
            }
            CardKind::Narrative(narrative) => {
                if let Some(teacher) = &narrative.teacher_name {
                    view.add_kv("Teacher", teacher.as_str());
                }
                if let Some(assessment) = &narrative.assessment {
                    view.paragraph = assessment.clone();
                }
                view.add_list("Areas of Strength", &narrative.areas_of_strength);
                view.add_list("Areas for Growth", &narrative.areas_for_growth);
            }
            CardKind::StandardsBased { standards } => {
                view.add_table(TableView {
                    title: "Standards".to_string(),
                    headers: vec![
                        "Standard".to_string(),
                        "Rating".to_string(),
                        "Comment".to_string(),
                    ],
                    rows: standards
                        .iter()
                        .map(|standard| {
                            vec![
                                standard.name.clone(),
                                standard.rating.clone().unwrap_or_else(|| "-".to_string()),
                                standard.comment.clone().unwrap_or_default(),
                            ]
                        })
                        .collect(),
                });
            }
            CardKind::Unrecognized { tag } => {
                view.notice = format!("Report card type `{tag}` cannot be displayed");
            }
        }
    }

    fn populate_details(view: &mut CardView, card: &ReportCard) {
        if card.teacher_name().is_none() {
            if let Some(teacher) = card.teacher() {
                view.add_kv("Teacher", summarize_value(teacher));
            }
        }

        let scalars = [
            ("GPA", card.gpa()),
            ("Weighted GPA", card.weighted_gpa()),
            ("Attendance", card.attendance()),
            ("Conduct", card.conduct()),
        ];
        for (label, value) in scalars {
            if let Some(value) = value {
                view.add_kv(label, summarize_value(value));
            }
        }

        match (card.class_rank(), card.class_size()) {
            (Some(rank), Some(size)) => view.add_kv(
                "Class Rank",
                format!("{} of {}", summarize_value(rank), summarize_value(size)),
            ),
            (Some(rank), None) => view.add_kv("Class Rank", summarize_value(rank)),
            _ => {}
        }

        for (title, value) in [
            ("Courses", card.courses()),
            ("Test Scores", card.test_scores()),
            ("Sections", card.sections()),
        ] {
            if let Some(table) = value.and_then(|value| table_from_objects(title, value)) {
                view.add_table(table);
            }
        }

        for (label, value) in [
            ("Overall Comments", card.overall_comments()),
            ("Principal Comments", card.principal_comments()),
            ("Counselor Comments", card.counselor_comments()),
        ] {
            if let Some(value) = value {
                view.add_kv(label, summarize_value(value));
            }
        }
    }

    fn table_from_objects(title: &str, value: &Value) -> Option<TableView> {
        let items = value.as_array()?;
        let headers: Vec<String> = items.first()?.as_object()?.keys().cloned().collect();
        let rows = items
            .iter()
            .filter_map(Value::as_object)
            .map(|item| {
                headers
                    .iter()
                    .map(|header| item.get(header).map(summarize_value).unwrap_or_default())
                    .collect()
            })
            .collect();

        Some(TableView {
            title: title.to_string(),
            headers: headers.iter().map(|header| humanize(header)).collect(),
            rows,
        })
    }

    #[derive(Debug)]
    struct FindingRow {
        severity: &'static str,
        check: &'static str,
        message: String,
    }

    #[derive(Debug)]
    struct AuditView {
        overall: &'static str,
        total: usize,
        accounts: usize,
        periods: usize,
        findings: Vec<FindingRow>,
        has_findings: bool,
    }

    impl AuditView {
        fn new(digest: &AuditDigest) -> Self {
            let findings: Vec<FindingRow> = digest
                .findings
                .iter()
                .map(|finding| FindingRow {
                    severity: finding.severity.display_label(),
                    check: finding.check,
                    message: finding.message.clone(),
                })
                .collect();
            Self {
                overall: digest.overall.display_label(),
                total: digest.total_cards,
                accounts: digest.accounts,
                periods: digest.periods,
                has_findings: !findings.is_empty(),
                findings,
            }
        }
    }

    fn humanize(key: &str) -> String {
        key.split('_')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }

    fn summarize_value(value: &Value) -> String {
        match value {
            Value::Null => "n/a".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(num) => num.to_string(),
            Value::String(text) => truncate(text),
            Value::Array(arr) => format!("{} entries", arr.len()),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| format!("{}: {}", humanize(key), summarize_value(value)))
                .collect::<Vec<String>>()
                .join(", "),
        }
    }

    fn truncate(input: &str) -> String {
        if input.chars().count() > 240 {
            let head: String = input.chars().take(237).collect();
            format!("{head}…")
        } else {
            input.to_string()
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Barrier, Mutex};
    use std::time::Duration;

    const FIXTURE: &str = include_str!("../tests/fixtures/report_cards.json");

    struct CountingSource {
        reads: AtomicUsize,
        delay: Duration,
        responses: Mutex<Vec<Result<String, String>>>,
    }

    impl CountingSource {
        fn new(responses: Vec<Result<String, String>>) -> Self {
            Self::slow(Duration::ZERO, responses)
        }

        fn slow(delay: Duration, responses: Vec<Result<String, String>>) -> Self {
            Self {
                reads: AtomicUsize::new(0),
                delay,
                responses: Mutex::new(responses),
            }
        }
    }

    impl CardSource for &'static CountingSource {
        fn describe(&self) -> String {
            "counting".to_string()
        }

        fn read(&self) -> Result<String, CatalogError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            let mut responses = self.responses.lock().expect("responses lock");
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            };
            next.map_err(CatalogError::malformed_source)
        }
    }

    fn leak(source: CountingSource) -> &'static CountingSource {
        Box::leak(Box::new(source))
    }

    fn fixture_repository() -> Repository {
        Repository::new(InlineSource::labeled("fixture", FIXTURE))
    }

    #[test]
    fn all_returns_every_entry_in_source_order() {
        let repository = fixture_repository();
        let cards = repository.all().expect("catalog");
        let raw: Vec<Value> = serde_json::from_str(FIXTURE).expect("fixture json");
        assert_eq!(cards.len(), raw.len());
        for (card, entry) in cards.iter().zip(&raw) {
            assert_eq!(Some(card.id()), entry["uuid"].as_str());
        }
    }

    #[test]
    fn catalog_is_parsed_once() {
        let source = leak(CountingSource::new(vec![Ok(FIXTURE.to_string())]));
        let repository = Repository::new(source);
        assert!(!repository.is_loaded());

        let first = repository.all().expect("first").as_ptr();
        let second = repository.all().expect("second").as_ptr();
        assert!(std::ptr::eq(first, second));
        assert!(repository.find_by_id("ABC12").expect("lookup").is_some());
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert_eq!(repository.load_count(), 1);
        assert!(repository.is_loaded());
    }

    #[test]
    fn concurrent_first_access_parses_once() {
        let source = leak(CountingSource::new(vec![Ok(FIXTURE.to_string())]));
        let repository = Repository::new(source);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let cards = repository.all().expect("catalog");
                    assert_eq!(cards.len(), 7);
                });
            }
        });

        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert_eq!(repository.load_count(), 1);
    }

    #[test]
    fn concurrent_callers_share_one_failed_load() {
        let source = leak(CountingSource::slow(
            Duration::from_millis(200),
            vec![Err("disk hiccup".to_string()), Ok(FIXTURE.to_string())],
        ));
        let repository = Repository::new(source);
        let barrier = Barrier::new(8);

        let errors: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        repository.all().map(<[ReportCard]>::len)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .expect("caller thread")
                        .expect_err("load fails for every waiting caller")
                        .to_string()
                })
                .collect()
        });

        assert_eq!(errors.len(), 8);
        assert!(errors.iter().all(|error| error.contains("disk hiccup")));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert!(!repository.is_loaded());

        assert_eq!(repository.all().expect("fresh load after failure").len(), 7);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
        assert_eq!(repository.load_count(), 1);
    }

    #[test]
    fn failed_load_is_retried_on_next_access() {
        let source = leak(CountingSource::new(vec![
            Err("disk hiccup".to_string()),
            Ok(FIXTURE.to_string()),
        ]));
        let repository = Repository::new(source);

        let error = repository.all().expect_err("first load fails");
        assert!(error.to_string().contains("disk hiccup"));
        assert!(!repository.is_loaded());

        assert_eq!(repository.all().expect("second load").len(), 7);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
        assert_eq!(repository.load_count(), 1);
    }

    #[test]
    fn find_by_id_returns_matching_card() {
        let repository = fixture_repository();
        let card = repository
            .find_by_id("ABC12")
            .expect("catalog")
            .expect("card present");
        assert_eq!(card.student_name(), "John Doe");
        assert!(repository.find_by_id("NONEXISTENT").expect("catalog").is_none());
    }

    #[test]
    fn every_id_round_trips() {
        let repository = fixture_repository();
        for card in repository.all().expect("catalog") {
            let found = repository
                .find_by_id(card.id())
                .expect("catalog")
                .expect("present");
            assert_eq!(found, card);
        }
    }

    #[test]
    fn fixture_scenario_periods() {
        let repository = fixture_repository();
        let cards = repository.all().expect("catalog");
        let field = PeriodField::MonthYear;
        assert_eq!(
            query::available_periods(cards, field),
            vec!["2025-02", "2024-11", "2023-05"]
        );
        assert_eq!(query::default_period(cards, field), Some("2025-02"));

        let november = query::filter_by_period(cards, field, Some("2024-11"));
        let names: Vec<&str> = november.iter().map(|card| card.student_name()).collect();
        assert_eq!(names, ["John Doe", "Emily Brown"]);
    }

    #[test]
    fn wrapped_document_is_accepted() {
        let document = json!({
            "report_cards": [
                { "uuid": "A", "report_card_type": "standard", "reference_date": "2025-01-01" }
            ]
        })
        .to_string();
        let cards = parse_catalog(&document).expect("wrapped document");
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].month_year(), Some("2025-01"));
    }

    #[test]
    fn invalid_json_is_malformed_source() {
        let repository = Repository::new(InlineSource::new("[{"));
        let error = repository.all().expect_err("invalid json");
        assert!(matches!(error, CatalogError::MalformedSource { .. }));

        let error = parse_catalog("42").expect_err("scalar document");
        assert!(matches!(error, CatalogError::MalformedSource { .. }));
    }

    #[test]
    fn malformed_entry_fails_whole_load() {
        let document = json!([
            { "uuid": "A", "report_card_type": "standard" },
            { "uuid": "B" }
        ])
        .to_string();
        let error = parse_catalog(&document).expect_err("missing type");
        match error {
            CatalogError::MalformedRecord { index, source } => {
                assert_eq!(index, 1);
                assert_eq!(source, RecordError::MissingField("report_card_type"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let document = json!([
            { "uuid": "A", "report_card_type": "standard" },
            { "uuid": "A", "report_card_type": "narrative" }
        ])
        .to_string();
        let repository = Repository::new(InlineSource::new(document));
        let error = repository.all().expect_err("duplicate id");
        assert!(error.to_string().contains("duplicate report card id `A`"));
    }

    #[test]
    fn file_backed_repository_loads_fixture() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("report_cards.json");
        std::fs::write(&path, FIXTURE).expect("write fixture");

        let repository = CatalogConfig::new(&path).repository();
        assert_eq!(repository.source(), path.display().to_string());
        assert_eq!(repository.all().expect("catalog").len(), 7);
    }

    #[test]
    fn missing_file_is_source_unavailable() {
        let repository = Repository::from_path("/nonexistent/report_cards.json");
        let error = repository.all().expect_err("missing file");
        assert!(matches!(error, CatalogError::SourceUnavailable { .. }));
    }

    #[test]
    fn config_validation() {
        let config = CatalogConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.source, PathBuf::from(DEFAULT_SOURCE_PATH));

        let empty = CatalogConfig::new("");
        assert!(empty.validate().is_err());

        let blank_type = CatalogConfig {
            audit: AuditThresholds {
                required_type: Some("  ".to_string()),
                ..AuditThresholds::default()
            },
            ..CatalogConfig::default()
        };
        assert!(blank_type.validate().is_err());
    }

    #[test]
    fn audit_of_fixture_flags_month_gaps() {
        let repository = fixture_repository();
        let cards = repository.all().expect("catalog");
        let digest = audit_catalog(cards, PeriodField::MonthYear, &AuditThresholds::default());
        assert_eq!(digest.total_cards, 7);
        assert_eq!(digest.accounts, 2);
        assert_eq!(digest.periods, 3);
        assert_eq!(digest.overall, Severity::Warning);
        let gap = digest
            .findings
            .iter()
            .find(|finding| finding.check == "period_gaps")
            .expect("gap finding");
        assert!(gap.message.contains("2023-06"));
        assert!(gap.message.contains("2025-01"));
        assert!(!gap.message.contains("2024-11"));
    }

    #[test]
    fn audit_flags_unrecognized_types_and_missing_required_type() {
        let cards = parse_catalog(
            &json!([
                { "uuid": "A", "account_name": "Maple", "report_card_type": "standard", "month_year": "2025-01" },
                { "uuid": "B", "account_name": "Cedar", "report_card_type": "unknown", "month_year": "2025-01" },
                { "uuid": "C", "account_name": "Cedar", "report_card_type": "standard", "month_year": "2025-02" },
                { "uuid": "D", "account_name": "Maple", "report_card_type": "standard" }
            ])
            .to_string(),
        )
        .expect("catalog");

        let thresholds = AuditThresholds {
            min_accounts: 3,
            required_type: Some("standard".to_string()),
        };
        let digest = audit_catalog(&cards, PeriodField::MonthYear, &thresholds);

        assert_eq!(digest.overall, Severity::Critical);
        let checks: Vec<&str> = digest.findings.iter().map(|f| f.check).collect();
        assert!(checks.contains(&"report_card_type"));
        assert!(checks.contains(&"period"));
        assert!(checks.contains(&"accounts"));
        assert!(
            digest
                .findings
                .iter()
                .any(|f| f.check == "required_type" && f.message.starts_with("Maple"))
        );
        assert!(
            digest
                .findings
                .iter()
                .any(|f| f.check == "required_type" && f.message.contains("Cedar has no `standard` report card for 2025-01"))
        );
    }

    #[test]
    fn clean_catalog_audits_as_info() {
        let cards = parse_catalog(
            &json!([
                { "uuid": "A", "account_name": "Maple", "report_card_type": "standard", "month_year": "2025-01" },
                { "uuid": "B", "account_name": "Maple", "report_card_type": "narrative", "month_year": "2025-02" }
            ])
            .to_string(),
        )
        .expect("catalog");
        let digest = audit_catalog(&cards, PeriodField::MonthYear, &AuditThresholds::default());
        assert_eq!(digest.overall, Severity::Info);
        assert!(digest.findings.is_empty());
    }

    #[test]
    fn listing_markdown_contains_rows() {
        let repository = fixture_repository();
        let cards = repository.all().expect("catalog");
        let listing = Listing::build(cards, &ListingQuery::new(PeriodField::MonthYear));
        let md = render_listing_markdown(&listing).expect("markdown render");
        assert!(md.contains("# Report Cards"));
        assert!(md.contains("February 2025"));
        assert!(md.contains("Alice Johnson"));
        assert!(!md.contains("John Doe"));
    }

    #[test]
    fn listing_html_marks_selected_period() {
        let repository = fixture_repository();
        let cards = repository.all().expect("catalog");
        let request = ListingQuery::new(PeriodField::MonthYear).with_period(Some("2024-11"));
        let listing = Listing::build(cards, &request);
        let html = render_listing_html(&listing).expect("html render");
        assert!(html.contains("<!DOCTYPE html>"));
        assert!(html.contains("<option value=\"2024-11\" selected>November 2024</option>"));
        assert!(html.contains("<h3>John Doe</h3>"));
        assert!(html.contains("<h3>Emily Brown</h3>"));
    }

    #[test]
    fn card_markdown_renders_each_variant() {
        let repository = fixture_repository();
        let field = PeriodField::MonthYear;

        let standard = repository.find_by_id("ABC12").expect("catalog").expect("card");
        let md = render_card_markdown(standard, field).expect("markdown");
        assert!(md.contains("# John Doe"));
        assert!(md.contains("Algebra I"));
        assert!(md.contains("12 of 240"));

        let narrative = repository.find_by_id("PQR56").expect("catalog").expect("card");
        let md = render_card_markdown(narrative, field).expect("markdown");
        assert!(md.contains("confident storyteller"));
        assert!(md.contains("Areas for Growth"));
        assert!(md.contains("Letter formation"));

        let based = repository.find_by_id("STU78").expect("catalog").expect("card");
        let md = render_card_markdown(based, field).expect("markdown");
        assert!(md.contains("Adds and subtracts within 100"));
        assert!(md.contains("Exceeds"));
    }

    #[test]
    fn unrecognized_card_renders_notice() {
        let card = ReportCard::from_value(json!({
            "uuid": "X1",
            "student_name": "Mystery Student",
            "report_card_type": "unknown"
        }))
        .expect("card");
        let html = render_card_html(&card, PeriodField::MonthYear).expect("html");
        assert!(html.contains("Mystery Student"));
        assert!(html.contains("cannot be displayed"));
    }

    #[test]
    fn narrative_teacher_is_shown_once() {
        let card = ReportCard::from_value(json!({
            "uuid": "N1",
            "student_name": "Ada Park",
            "report_card_type": "narrative",
            "teacher_name": "Ms. Rivera",
            "teacher": "Mr. Stone"
        }))
        .expect("card");
        let md = render_card_markdown(&card, PeriodField::MonthYear).expect("markdown");
        assert_eq!(md.matches("**Teacher:**").count(), 1);
        assert!(md.contains("Ms. Rivera"));
        assert!(!md.contains("Mr. Stone"));

        let standard = ReportCard::from_value(json!({
            "uuid": "S1",
            "report_card_type": "standard",
            "teacher": "Mr. Stone"
        }))
        .expect("card");
        let md = render_card_markdown(&standard, PeriodField::MonthYear).expect("markdown");
        assert!(md.contains("- **Teacher:** Mr. Stone"));
    }

    #[test]
    fn audit_markdown_lists_findings() {
        let repository = fixture_repository();
        let cards = repository.all().expect("catalog");
        let digest = audit_catalog(cards, PeriodField::MonthYear, &AuditThresholds::default());
        let md = render_audit_markdown(&digest).expect("markdown");
        assert!(md.contains("# Catalog Audit"));
        assert!(md.contains("Warning"));
        assert!(md.contains("period_gaps"));
    }
}
