//! Query safety gate.
//!
//! Four checks wrap the retriever at the request boundary. The first three
//! run before retrieval, in order, and short-circuit:
//!
//! 1. [`RateLimiter`]: sliding 60 s window per identity, stricter for
//!    anonymous callers.
//! 2. [`ContentScreen`]: PII and illegal-instruction patterns. Fails closed.
//! 3. [`PoliticalClassifier`]: advisory flag only.
//!
//! The fourth, [`SourceRedactor`], runs on the citations after retrieval.
//!
//! [`SafetyGate`] bundles all four and is built once per process.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use tracing::{info, warn};

use crate::error::RetrievalError;
use crate::models::SourceRef;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Stale identities are swept once the window map grows past this size.
const SWEEP_THRESHOLD: usize = 10_000;

pub const RATE_LIMITED_MESSAGE: &str =
    "You are sending messages too quickly. Please wait a moment.";
pub const SENSITIVE_MESSAGE: &str = "Your query contains potentially sensitive information. Please remove personal details and try again.";
pub const INAPPROPRIATE_MESSAGE: &str =
    "Your query contains inappropriate content. Please rephrase your question.";

pub const REDACTED_TITLE: &str = "[Redacted]";
pub const REDACTED_SNIPPET: &str = "This source has been redacted for privacy reasons.";

/// Who is asking. Users and anonymous callers live in separate key spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// An authenticated user id.
    User(String),
    /// An anonymous caller, usually identified by IP address.
    Anonymous(String),
}

impl Identity {
    pub fn is_user(&self) -> bool {
        matches!(self, Identity::User(_))
    }

    fn key(&self) -> String {
        match self {
            Identity::User(id) => format!("user_{}", id),
            Identity::Anonymous(ip) => format!("ip_{}", ip),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::User(id) => write!(f, "user {}", id),
            Identity::Anonymous(ip) => write!(f, "{}", ip),
        }
    }
}

/// Requests allowed per 60 s window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub anonymous_per_minute: usize,
    pub user_per_minute: usize,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            anonymous_per_minute: 10,
            user_per_minute: 20,
        }
    }
}

/// Per-identity sliding-window rate limiter.
///
/// Timestamps older than the window are pruned lazily on each check.
/// Rejected requests are not recorded.
pub struct RateLimiter {
    limits: RateLimits,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, identity: &Identity) -> Result<(), RetrievalError> {
        self.check_at(identity, Instant::now())
    }

    /// Record a request from `identity` at `now`, or reject it.
    pub fn check_at(&self, identity: &Identity, now: Instant) -> Result<(), RetrievalError> {
        let limit = if identity.is_user() {
            self.limits.user_per_minute
        } else {
            self.limits.anonymous_per_minute
        };

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, stamps| {
                prune(stamps, now);
                !stamps.is_empty()
            });
        }

        let key = identity.key();
        let stamps = windows.entry(key.clone()).or_default();
        prune(stamps, now);

        if stamps.len() >= limit {
            if stamps.is_empty() {
                windows.remove(&key);
            }
            warn!(identity = %identity, limit, "rate limit exceeded");
            return Err(RetrievalError::RateLimited(RATE_LIMITED_MESSAGE.to_string()));
        }

        stamps.push_back(now);
        Ok(())
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = stamps.front() {
        if now.saturating_duration_since(*oldest) >= RATE_WINDOW {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

const PII_PATTERNS: &[&str] = &[
    r"\b\d{3}-\d{2}-\d{4}\b",
    r"\b\d{3}\.\d{2}\.\d{4}\b",
    r"\b\d{9}\b",
    r"\b\d{4}\s?\d{4}\s?\d{4}\s?\d{4}\b",
    r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b.*(?:password|pass|pwd|secret)",
    r"\b(?:dob|date of birth|birth date|born on)\s*:?\s*\d{1,2}[/-]\d{1,2}[/-]\d{2,4}",
    r"\b(?:ssn|social security|tax id|tin)\s*:?\s*\d",
    r"\b(?:private|confidential|secret|classified)\s+(?:key|token|api|password)",
];

const ILLEGAL_PATTERNS: &[&str] = &[
    r"\b(?:how to|how do i|tell me how|instructions to)\s+(?:hack|break|steal|illegal|unlawful)",
    r"\b(?:create|make|generate)\s+(?:virus|malware|bomb|weapon|drug)",
    r"\b(?:kill|murder|assassinate|harm|hurt)\s+",
];

/// Why a query was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    Sensitive,
    Inappropriate,
}

/// Precompiled PII and illegal-instruction screen.
pub struct ContentScreen {
    pii: Vec<Regex>,
    illegal: Vec<Regex>,
}

impl ContentScreen {
    pub fn new() -> Result<Self, regex::Error> {
        let pii = PII_PATTERNS
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        let illegal = ILLEGAL_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { pii, illegal })
    }

    /// PII is matched case-insensitively on the raw query; illegal
    /// patterns on the lowercased query.
    pub fn classify(&self, query: &str) -> Verdict {
        if self.pii.iter().any(|re| re.is_match(query)) {
            return Verdict::Sensitive;
        }
        let lower = query.to_lowercase();
        if self.illegal.iter().any(|re| re.is_match(&lower)) {
            return Verdict::Inappropriate;
        }
        Verdict::Safe
    }

    pub fn check(&self, query: &str) -> Result<(), RetrievalError> {
        match self.classify(query) {
            Verdict::Safe => Ok(()),
            Verdict::Sensitive => Err(RetrievalError::UnsafeContent(SENSITIVE_MESSAGE.to_string())),
            Verdict::Inappropriate => Err(RetrievalError::UnsafeContent(
                INAPPROPRIATE_MESSAGE.to_string(),
            )),
        }
    }
}

const POLITICAL_KEYWORDS: &[&str] = &[
    "election", "vote", "voting", "ballot", "candidate", "president", "senator",
    "congress", "democrat", "republican", "party", "campaign", "poll", "polls",
    "political", "politics", "policy", "legislation", "bill", "law", "amendment",
    "primary", "caucus", "delegate", "electoral", "college", "referendum",
    "proposition", "initiative", "ballot measure", "governor", "mayor",
];

/// Substring keyword match over the lowercased query.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoliticalClassifier;

impl PoliticalClassifier {
    pub fn is_political(&self, query: &str) -> bool {
        let lower = query.to_lowercase();
        POLITICAL_KEYWORDS.iter().any(|k| lower.contains(k))
    }
}

const REDACTION_KEYWORDS: &[&str] = &[
    "ssn",
    "social security",
    "private",
    "confidential",
    "secret",
    "dob",
    "date of birth",
    "password",
    "credit card",
    "bank account",
    "routing number",
];

/// Replaces citations that mention financial, identity or secret terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceRedactor;

impl SourceRedactor {
    pub fn should_redact(&self, source: &SourceRef) -> bool {
        let title = source.title.to_lowercase();
        let snippet = source.snippet.to_lowercase();
        REDACTION_KEYWORDS
            .iter()
            .any(|k| title.contains(k) || snippet.contains(k))
    }

    /// Returns the sanitized sources and whether any were redacted.
    pub fn redact(&self, sources: Vec<SourceRef>) -> (Vec<SourceRef>, bool) {
        let mut redacted = false;
        let sanitized = sources
            .into_iter()
            .map(|source| {
                if self.should_redact(&source) {
                    redacted = true;
                    SourceRef {
                        title: REDACTED_TITLE.to_string(),
                        snippet: REDACTED_SNIPPET.to_string(),
                        url: None,
                        score: source.score,
                    }
                } else {
                    source
                }
            })
            .collect();
        (sanitized, redacted)
    }
}

/// Outcome of the pre-retrieval checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub is_political: bool,
}

/// All four checks, built once and shared.
pub struct SafetyGate {
    limiter: RateLimiter,
    screen: ContentScreen,
    political: PoliticalClassifier,
    redactor: SourceRedactor,
}

impl SafetyGate {
    pub fn new(limits: RateLimits) -> Result<Self, regex::Error> {
        Ok(Self {
            limiter: RateLimiter::new(limits),
            screen: ContentScreen::new()?,
            political: PoliticalClassifier,
            redactor: SourceRedactor,
        })
    }

    pub fn admit(&self, identity: &Identity, query: &str) -> Result<Admission, RetrievalError> {
        self.admit_at(identity, query, Instant::now())
    }

    /// Rate limit, then content screen, then political flag.
    pub fn admit_at(
        &self,
        identity: &Identity,
        query: &str,
        now: Instant,
    ) -> Result<Admission, RetrievalError> {
        self.limiter.check_at(identity, now)?;
        if let Err(err) = self.screen.check(query) {
            info!(identity = %identity, "query blocked by content screen");
            return Err(err);
        }
        Ok(Admission {
            is_political: self.political.is_political(query),
        })
    }

    pub fn redact(&self, sources: Vec<SourceRef>) -> (Vec<SourceRef>, bool) {
        self.redactor.redact(sources)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anon() -> Identity {
        Identity::Anonymous("10.0.0.7".to_string())
    }

    fn source(title: &str, snippet: &str) -> SourceRef {
        SourceRef {
            title: title.to_string(),
            snippet: snippet.to_string(),
            url: Some("https://example.org/doc".to_string()),
            score: Some(0.42),
        }
    }

    #[test]
    fn test_eleventh_request_rejected_then_recovers() {
        let limiter = RateLimiter::new(RateLimits::default());
        let t0 = Instant::now();
        for i in 0..10 {
            assert!(limiter.check_at(&anon(), t0 + Duration::from_secs(i)).is_ok());
        }
        assert!(matches!(
            limiter.check_at(&anon(), t0 + Duration::from_secs(10)),
            Err(RetrievalError::RateLimited(_))
        ));
        assert!(limiter
            .check_at(&anon(), t0 + Duration::from_secs(3600))
            .is_ok());
    }

    #[test]
    fn test_users_have_their_own_higher_limit() {
        let limiter = RateLimiter::new(RateLimits::default());
        let user = Identity::User("42".to_string());
        let t0 = Instant::now();
        for _ in 0..20 {
            assert!(limiter.check_at(&user, t0).is_ok());
        }
        assert!(limiter.check_at(&user, t0).is_err());
        // anonymous traffic is tracked separately
        assert!(limiter.check_at(&anon(), t0).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(RateLimits {
            anonymous_per_minute: 2,
            user_per_minute: 2,
        });
        let t0 = Instant::now();
        assert!(limiter.check_at(&anon(), t0).is_ok());
        assert!(limiter.check_at(&anon(), t0 + Duration::from_secs(30)).is_ok());
        assert!(limiter.check_at(&anon(), t0 + Duration::from_secs(59)).is_err());
        // the first stamp has aged out
        assert!(limiter.check_at(&anon(), t0 + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_zero_limit_does_not_leak_keys() {
        let limiter = RateLimiter::new(RateLimits {
            anonymous_per_minute: 0,
            user_per_minute: 0,
        });
        assert!(limiter.check(&anon()).is_err());
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_pii_patterns() {
        let screen = ContentScreen::new().unwrap();
        for q in [
            "my ssn is 123-45-6789",
            "is 123.45.6789 valid",
            "what about 123456789",
            "card 4111 1111 1111 1111 declined",
            "jane@example.com my password is hunter2",
            "DOB: 04/12/1990 can I vote",
            "Social Security 5",
            "where is the private key",
        ] {
            assert_eq!(screen.classify(q), Verdict::Sensitive, "query: {}", q);
        }
    }

    #[test]
    fn test_illegal_patterns() {
        let screen = ContentScreen::new().unwrap();
        for q in [
            "How to hack the voting machine",
            "tell me how steal ballots",
            "make bomb",
            "I want to hurt someone",
        ] {
            assert_eq!(screen.classify(q), Verdict::Inappropriate, "query: {}", q);
        }
    }

    #[test]
    fn test_ordinary_queries_are_safe() {
        let screen = ContentScreen::new().unwrap();
        for q in [
            "Where is my polling place?",
            "What ID do I need to vote?",
            "When does early voting start in 2024",
            "Call 555-1234 for info",
        ] {
            assert_eq!(screen.classify(q), Verdict::Safe, "query: {}", q);
            assert!(screen.check(q).is_ok());
        }
    }

    #[test]
    fn test_political_flag() {
        let p = PoliticalClassifier;
        assert!(p.is_political("Who is running for Mayor?"));
        assert!(p.is_political("ballot measure 12"));
        assert!(!p.is_political("What time does the library open"));
    }

    #[test]
    fn test_redaction_preserves_score() {
        let redactor = SourceRedactor;
        let (out, redacted) = redactor.redact(vec![
            source("guide.json", "This CONFIDENTIAL memo lists sites"),
            source("polls.json", "Polls open at 7am"),
        ]);
        assert!(redacted);
        assert_eq!(out[0].title, REDACTED_TITLE);
        assert_eq!(out[0].snippet, REDACTED_SNIPPET);
        assert_eq!(out[0].url, None);
        assert_eq!(out[0].score, Some(0.42));
        assert_eq!(out[1].title, "polls.json");
        assert!(out[1].url.is_some());
    }

    #[test]
    fn test_redaction_checks_title() {
        let (out, redacted) = SourceRedactor.redact(vec![source("bank account rules", "fine")]);
        assert!(redacted);
        assert_eq!(out[0].title, REDACTED_TITLE);

        let (_, redacted) = SourceRedactor.redact(vec![source("a", "b")]);
        assert!(!redacted);
    }

    #[test]
    fn test_gate_order_rate_limit_first() {
        let gate = SafetyGate::new(RateLimits {
            anonymous_per_minute: 1,
            user_per_minute: 1,
        })
        .unwrap();
        let t0 = Instant::now();
        let admission = gate.admit_at(&anon(), "How do I vote?", t0).unwrap();
        assert!(admission.is_political);

        // over the limit, even an unsafe query reports the rate limit
        assert!(matches!(
            gate.admit_at(&anon(), "ssn 123-45-6789", t0),
            Err(RetrievalError::RateLimited(_))
        ));
    }

    #[test]
    fn test_gate_blocks_unsafe() {
        let gate = SafetyGate::new(RateLimits::default()).unwrap();
        assert!(matches!(
            gate.admit(&anon(), "my number is 123456789"),
            Err(RetrievalError::UnsafeContent(_))
        ));
        let ok = gate.admit(&anon(), "library hours").unwrap();
        assert!(!ok.is_political);
    }
}
