//! Prompt context assembly.
//!
//! Each retrieved chunk becomes a block with a provenance header:
//!
//! ```text
//! [source: polls.json chunk: polls_0 score:0.9123]
//! Polling places open at 7am.
//! ```
//!
//! Blocks are joined with [`BLOCK_SEPARATOR`]. No truncation happens here.

use crate::models::ScoredChunk;

pub const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// Concatenate scored chunks into one context string, in the given order.
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|s| {
            format!(
                "[source: {} chunk: {} score:{:.4}]\n{}",
                s.chunk.source, s.chunk.id, s.score, s.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentChunk;

    fn scored(id: &str, source: &str, text: &str, score: f64) -> ScoredChunk {
        ScoredChunk {
            chunk: DocumentChunk {
                id: id.to_string(),
                source: source.to_string(),
                text: text.to_string(),
                embedding: vec![1.0],
                chunk_index: 0,
                total_chunks: 1,
            },
            score,
        }
    }

    #[test]
    fn test_empty_context() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn test_headers_and_separator() {
        let ctx = build_context(&[
            scored("polls_0", "polls.json", "Polls open at 7am.", 0.91234),
            scored("id_2", "id.json", "Bring photo ID.", 0.5),
        ]);
        assert_eq!(
            ctx,
            "[source: polls.json chunk: polls_0 score:0.9123]\nPolls open at 7am.\
             \n\n---\n\n\
             [source: id.json chunk: id_2 score:0.5000]\nBring photo ID."
        );
    }

    #[test]
    fn test_negative_score_formatting() {
        let ctx = build_context(&[scored("x", "x.json", "t", -0.25)]);
        assert!(ctx.starts_with("[source: x.json chunk: x score:-0.2500]"));
    }
}
