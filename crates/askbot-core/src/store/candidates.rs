//! Candidate fetching for brute-force retrieval.
//!
//! [`fetch_candidates`] turns a query into a finite, lazily-consumed stream
//! of embedded chunks drawn from a [`DocumentStore`]. When the query
//! mentions a topic from one of the curated [`TopicLexicon`]s, the stream
//! is biased: up to half of the document budget comes from chunks whose
//! text matches the lexicon, followed by up to half from chunks that do
//! not. Otherwise it is one plain scan over the whole budget.
//!
//! The bias is a recall booster for small budgets over large corpora. It
//! never changes scores, only which documents get scored, and can be
//! switched off with [`CandidateOptions::topic_prefetch`].

use futures_util::stream::{BoxStream, StreamExt};
use tracing::debug;

use crate::error::StoreError;
use crate::models::DocumentChunk;

use super::{DocumentStore, ScanFilter};

/// A curated topic vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct TopicLexicon {
    pub name: &'static str,
    /// Query words that select this lexicon.
    pub triggers: &'static [&'static str],
    /// Substrings that mark a chunk as on-topic.
    pub text_terms: &'static [&'static str],
}

pub const VOTING_LEXICON: TopicLexicon = TopicLexicon {
    name: "voting",
    triggers: &["vote", "voting", "ballot", "election", "poll"],
    text_terms: &["vote", "voting", "ballot", "poll"],
};

pub const IDENTIFICATION_LEXICON: TopicLexicon = TopicLexicon {
    name: "identification",
    triggers: &["id", "identification", "proof", "document", "license"],
    text_terms: &["id", "identification", "proof", "document", "license"],
};

/// Lexicons in priority order; the first triggered one wins.
pub const TOPIC_LEXICONS: &[TopicLexicon] = &[VOTING_LEXICON, IDENTIFICATION_LEXICON];

/// Budget and behaviour of a candidate fetch.
#[derive(Debug, Clone)]
pub struct CandidateOptions {
    /// Hard cap on documents yielded.
    pub max_docs: usize,
    /// Backend page size.
    pub batch_size: usize,
    pub topic_prefetch: bool,
}

impl Default for CandidateOptions {
    fn default() -> Self {
        Self {
            max_docs: 1500,
            batch_size: 150,
            topic_prefetch: true,
        }
    }
}

/// How the candidate stream will be assembled for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidatePlan {
    Plain,
    Biased { lexicon: &'static str, terms: Vec<String> },
}

impl CandidatePlan {
    pub fn for_query(query: &str, topic_prefetch: bool) -> Self {
        if !topic_prefetch {
            return CandidatePlan::Plain;
        }
        match triggered_lexicon(query) {
            Some(lexicon) => CandidatePlan::Biased {
                lexicon: lexicon.name,
                terms: lexicon.text_terms.iter().map(|t| t.to_string()).collect(),
            },
            None => CandidatePlan::Plain,
        }
    }
}

/// Return the first lexicon with a trigger among the query's words.
pub fn triggered_lexicon(query: &str) -> Option<&'static TopicLexicon> {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    TOPIC_LEXICONS
        .iter()
        .find(|lex| lex.triggers.iter().any(|t| words.contains(t)))
}

/// Stream embedded candidate chunks for `query` from `store`.
pub fn fetch_candidates<'a>(
    store: &'a dyn DocumentStore,
    query: &str,
    opts: &CandidateOptions,
) -> BoxStream<'a, Result<DocumentChunk, StoreError>> {
    let plan = CandidatePlan::for_query(query, opts.topic_prefetch);
    let stream = match plan {
        CandidatePlan::Plain => store.scan(ScanFilter::All, opts.max_docs, opts.batch_size),
        CandidatePlan::Biased { lexicon, terms } => {
            debug!(lexicon, "biasing candidate fetch toward topic lexicon");
            let half = opts.max_docs / 2;
            let on_topic = store.scan(ScanFilter::Matching(terms.clone()), half, opts.batch_size);
            let off_topic = store.scan(ScanFilter::Excluding(terms), half, opts.batch_size);
            on_topic.chain(off_topic).boxed()
        }
    };
    stream.take(opts.max_docs).boxed()
}
