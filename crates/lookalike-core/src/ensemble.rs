//! Composition of independent single-model matches.

use crate::matcher::MatchResult;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleResult {
    /// Identity chosen by the most models.
    pub identity_key: String,
    pub votes: usize,
    /// Mean similarity over every supplied result, agreeing or not.
    pub mean_similarity: f32,
    pub models: Vec<String>,
}

/// Majority vote over per-model best matches. A tie in votes goes to the
/// identity that appears first in `results`.
pub fn combine(results: &[MatchResult]) -> Option<EnsembleResult> {
    if results.is_empty() {
        return None;
    }

    // (identity, votes) in first-appearance order
    let mut tally: Vec<(&str, usize)> = Vec::new();
    for r in results {
        match tally.iter_mut().find(|(key, _)| *key == r.identity_key) {
            Some((_, votes)) => *votes += 1,
            None => tally.push((r.identity_key.as_str(), 1)),
        }
    }

    let (identity_key, votes) = tally
        .iter()
        .fold(None, |best: Option<(&str, usize)>, &(key, votes)| match best {
            Some((_, v)) if v >= votes => best,
            _ => Some((key, votes)),
        })?;

    let mean_similarity = results.iter().map(|r| r.similarity).sum::<f32>() / results.len() as f32;

    Some(EnsembleResult {
        identity_key: identity_key.to_string(),
        votes,
        mean_similarity,
        models: results.iter().map(|r| r.model_id.clone()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn result(key: &str, model: &str, similarity: f32) -> MatchResult {
        MatchResult {
            query_id: Uuid::nil(),
            identity_key: key.into(),
            image_file: "1.jpg".into(),
            distance: 1.0 - similarity / 100.0,
            similarity,
            rank: 0,
            model_id: model.into(),
        }
    }

    #[test]
    fn test_majority_wins() {
        let combined = combine(&[
            result("a", "facenet512", 80.0),
            result("b", "vgg-face", 60.0),
            result("b", "arcface", 70.0),
        ])
        .unwrap();
        assert_eq!(combined.identity_key, "b");
        assert_eq!(combined.votes, 2);
        assert!((combined.mean_similarity - 70.0).abs() < 1e-4);
        assert_eq!(combined.models, ["facenet512", "vgg-face", "arcface"]);
    }

    #[test]
    fn test_vote_tie_goes_to_first_seen() {
        let combined = combine(&[result("x", "m1", 50.0), result("y", "m2", 90.0)]).unwrap();
        assert_eq!(combined.identity_key, "x");
        assert_eq!(combined.votes, 1);
    }

    #[test]
    fn test_empty() {
        assert!(combine(&[]).is_none());
    }

    #[test]
    fn test_single_model_passthrough() {
        let combined = combine(&[result("only", "m", 42.5)]).unwrap();
        assert_eq!(combined.identity_key, "only");
        assert!((combined.mean_similarity - 42.5).abs() < 1e-6);
    }
}
