//! Fuzzy ranking of command names for "did you mean" responses.

use serde::{Deserialize, Serialize};

/// Weight of edit-distance similarity in the combined score
const DISTANCE_WEIGHT: f64 = 0.7;

/// Bonus when one string contains the other
const CONTAINMENT_BONUS: f64 = 0.3;

/// Candidates scoring below this are not offered
pub const MIN_SCORE: f64 = 0.35;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Canonical command name, without prefix
    pub name: String,
    pub score: f64,
    pub distance: usize,
}

/// Score `candidate` against `query`, returning (score, edit distance)
pub fn similarity(query: &str, candidate: &str) -> (f64, usize) {
    let distance = levenshtein(query, candidate);
    let longest = query.chars().count().max(candidate.chars().count());
    let closeness = if longest == 0 {
        1.0
    } else {
        1.0 - distance as f64 / longest as f64
    };
    let contains = !query.is_empty()
        && !candidate.is_empty()
        && (candidate.contains(query) || query.contains(candidate));

    let mut score = DISTANCE_WEIGHT * closeness;
    if contains {
        score += CONTAINMENT_BONUS;
    }
    (score, distance)
}

/// Rank `(matched_name, canonical_name)` candidates. Aliases map back to their
/// canonical command and only its best score is kept.
pub fn rank<'a, I>(query: &str, candidates: I, limit: usize) -> Vec<Suggestion>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut best: Vec<Suggestion> = Vec::new();
    for (matched, canonical) in candidates {
        let (score, distance) = similarity(query, matched);
        if score < MIN_SCORE {
            continue;
        }
        match best.iter_mut().find(|s| s.name == canonical) {
            Some(existing) => {
                if score > existing.score
                    || (score == existing.score && distance < existing.distance)
                {
                    existing.score = score;
                    existing.distance = distance;
                }
            }
            None => best.push(Suggestion {
                name: canonical.to_string(),
                score,
                distance,
            }),
        }
    }

    best.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.distance.cmp(&b.distance))
            .then_with(|| a.name.cmp(&b.name))
    });
    best.truncate(limit);
    best
}

/// Edit distance with a single rolling row
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, ac) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, bc) in b_chars.iter().enumerate() {
            let cost = usize::from(ac != bc);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}
