//! In-memory, non-identifying usage counters.
//!
//! Nothing here stores query text or caller identity: only keyword
//! counts, citation titles, response times, per-day totals and feedback
//! tallies. Counters live for the life of the process.

use chrono::{Duration, Local, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use askbot_core::models::SourceRef;

const MAX_RESPONSE_TIMES: usize = 1000;
const KEYWORDS_PER_QUERY: usize = 5;
const TOP_N: usize = 10;
const WINDOW_DAYS: i64 = 7;
/// Keyword and source maps are pruned once they hold more distinct keys
/// than this.
const MAX_TRACKED_KEYS: usize = 2000;
/// Keys kept (highest counts) after a prune.
const PRUNED_KEYS: usize = 1000;

const STOP_WORDS: &[&str] = &[
    "what", "when", "where", "who", "why", "how", "the", "and", "or", "but", "for", "with",
    "from", "this", "that", "these", "those",
];

/// Pull up to five keywords out of a query: lowercase ASCII words of at
/// least four letters that are not stop words, in query order.
pub fn extract_keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|w| w.len() >= 4 && w.chars().all(|c| c.is_ascii_lowercase()))
        .filter(|w| !STOP_WORDS.contains(w))
        .take(KEYWORDS_PER_QUERY)
        .map(str::to_string)
        .collect()
}

/// A user's verdict on an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackRating {
    Helpful,
    NotHelpful,
}

impl FeedbackRating {
    /// Case-insensitive parse of `helpful` / `not_helpful`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "helpful" => Some(FeedbackRating::Helpful),
            "not_helpful" => Some(FeedbackRating::NotHelpful),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Counters {
    total_requests: u64,
    blocked_requests: u64,
    response_times: VecDeque<f64>,
    keywords: HashMap<String, u64>,
    source_hits: HashMap<String, u64>,
    per_day: BTreeMap<NaiveDate, u64>,
    helpful: u64,
    not_helpful: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceCount {
    pub source: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayCount {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedbackCounts {
    pub helpful: u64,
    pub not_helpful: u64,
}

/// Response body of `GET /api/chat/analytics/summary`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalyticsSummary {
    pub total_requests: u64,
    pub total_requests_last_7_days: u64,
    pub blocked_requests_count: u64,
    pub avg_response_time_ms: f64,
    pub top_queries_by_keyword: Vec<KeywordCount>,
    pub top_sources_hit: Vec<SourceCount>,
    pub requests_last_7_days: Vec<DayCount>,
    pub feedback: FeedbackCounts,
}

/// Process-wide analytics, shared by `Arc`.
#[derive(Default)]
pub struct Analytics {
    counters: Mutex<Counters>,
}

impl Analytics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_blocked(&self) {
        self.lock().blocked_requests += 1;
    }

    pub fn record_answer(&self, query: &str, sources: &[SourceRef], response_time_ms: f64) {
        self.record_answer_on(query, sources, response_time_ms, Local::now().date_naive());
    }

    /// Count one answered query on `day`.
    pub fn record_answer_on(
        &self,
        query: &str,
        sources: &[SourceRef],
        response_time_ms: f64,
        day: NaiveDate,
    ) {
        let keywords = extract_keywords(query);
        let mut c = self.lock();

        c.total_requests += 1;
        c.response_times.push_back(response_time_ms);
        while c.response_times.len() > MAX_RESPONSE_TIMES {
            c.response_times.pop_front();
        }
        for keyword in keywords {
            *c.keywords.entry(keyword).or_insert(0) += 1;
        }
        for source in sources {
            *c.source_hits.entry(source.title.clone()).or_insert(0) += 1;
        }
        prune_counts(&mut c.keywords);
        prune_counts(&mut c.source_hits);
        *c.per_day.entry(day).or_insert(0) += 1;

        let cutoff = day - Duration::days(WINDOW_DAYS);
        c.per_day.retain(|d, _| *d > cutoff);
    }

    pub fn record_feedback(&self, rating: FeedbackRating) {
        let mut c = self.lock();
        match rating {
            FeedbackRating::Helpful => c.helpful += 1,
            FeedbackRating::NotHelpful => c.not_helpful += 1,
        }
    }

    pub fn summary(&self) -> AnalyticsSummary {
        self.summary_on(Local::now().date_naive())
    }

    /// Summarize as of `today`. The daily series is oldest first.
    pub fn summary_on(&self, today: NaiveDate) -> AnalyticsSummary {
        let c = self.lock();

        let avg = if c.response_times.is_empty() {
            0.0
        } else {
            c.response_times.iter().sum::<f64>() / c.response_times.len() as f64
        };

        let requests_last_7_days: Vec<DayCount> = (0..WINDOW_DAYS)
            .rev()
            .map(|offset| {
                let day = today - Duration::days(offset);
                DayCount {
                    date: day.format("%Y-%m-%d").to_string(),
                    count: c.per_day.get(&day).copied().unwrap_or(0),
                }
            })
            .collect();

        AnalyticsSummary {
            total_requests: c.total_requests,
            total_requests_last_7_days: requests_last_7_days.iter().map(|d| d.count).sum(),
            blocked_requests_count: c.blocked_requests,
            avg_response_time_ms: (avg * 100.0).round() / 100.0,
            top_queries_by_keyword: top_n(&c.keywords)
                .into_iter()
                .map(|(keyword, count)| KeywordCount { keyword, count })
                .collect(),
            top_sources_hit: top_n(&c.source_hits)
                .into_iter()
                .map(|(source, count)| SourceCount { source, count })
                .collect(),
            requests_last_7_days,
            feedback: FeedbackCounts {
                helpful: c.helpful,
                not_helpful: c.not_helpful,
            },
        }
    }
}

/// Highest counts first, ties broken alphabetically.
fn ranked(counts: &HashMap<String, u64>, limit: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(limit);
    entries
}

fn top_n(counts: &HashMap<String, u64>) -> Vec<(String, u64)> {
    ranked(counts, TOP_N)
}

/// Cut `counts` back to its [`PRUNED_KEYS`] largest entries once it grows
/// past [`MAX_TRACKED_KEYS`].
fn prune_counts(counts: &mut HashMap<String, u64>) {
    if counts.len() <= MAX_TRACKED_KEYS {
        return;
    }
    *counts = ranked(counts, PRUNED_KEYS).into_iter().collect();
}
