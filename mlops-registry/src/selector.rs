//! Champion Selector
//!
//! A single linear scan keeps the best and second-best score holders.
//!
//! - Scores are compared strictly, so on a tie the earliest-seen candidate
//!   keeps its place (first wins).
//! - Any real score competes, negative ones included.
//! - A candidate without a score (or with NaN) never becomes champion or
//!   challenger; where a missing score must be shown it reads `-1.0`.
//! - An empty or all-unscored input yields a selection with no champion.
//!
//! The selector knows nothing about registries or metrics; callers provide
//! the scoring function.

use mlops_common::model::MISSING_SCORE;

/// A candidate together with its score
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub score: f64,
}

impl<T> Scored<T> {
    pub fn new(item: T, score: f64) -> Self {
        Self { item, score }
    }
}

/// Outcome of ranking a candidate set
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<T> {
    pub champion: Option<Scored<T>>,
    pub challenger: Option<Scored<T>>,
}

impl<T> Selection<T> {
    pub fn has_champion(&self) -> bool {
        self.champion.is_some()
    }
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self {
            champion: None,
            challenger: None,
        }
    }
}

/// Rank candidates using `score`; `None` and NaN mean "no score"
pub fn select_by<T, I, F>(candidates: I, mut score: F) -> Selection<T>
where
    I: IntoIterator<Item = T>,
    F: FnMut(&T) -> Option<f64>,
{
    let mut best: Option<Scored<T>> = None;
    let mut second: Option<Scored<T>> = None;

    for candidate in candidates {
        let Some(s) = score(&candidate).filter(|s| !s.is_nan()) else {
            continue;
        };
        let beats = |holder: &Option<Scored<T>>| holder.as_ref().map_or(true, |h| s > h.score);

        if beats(&best) {
            second = best.take();
            best = Some(Scored::new(candidate, s));
        } else if beats(&second) {
            second = Some(Scored::new(candidate, s));
        }
    }

    Selection {
        champion: best,
        challenger: second,
    }
}

/// Rank a plain `(identifier, score)` stream
pub fn select<T, I>(candidates: I) -> Selection<T>
where
    I: IntoIterator<Item = (T, f64)>,
{
    select_scored(candidates.into_iter().map(|(item, s)| (item, Some(s))))
}

/// Rank `(identifier, optional score)` pairs; unscored entries never win
pub fn select_scored<T, I>(candidates: I) -> Selection<T>
where
    I: IntoIterator<Item = (T, Option<f64>)>,
{
    let selection = select_by(candidates, |(_, s)| *s);
    Selection {
        champion: selection.champion.map(|c| Scored::new(c.item.0, c.score)),
        challenger: selection.challenger.map(|c| Scored::new(c.item.0, c.score)),
    }
}

/// Result of pitting the best fresh candidate against the running champion
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeOutcome<T> {
    /// Challenger strictly beats the champion (or there is no champion)
    Promote {
        challenger: Scored<T>,
        defending: Option<Scored<T>>,
    },
    /// Champion holds; the losing challenger, if any, is reported
    Retain {
        champion: Scored<T>,
        challenger: Option<Scored<T>>,
    },
    /// Neither a champion nor an eligible challenger exists
    NoCandidates,
}

/// Promote only if the challenger's score strictly exceeds the champion's
///
/// Without a running champion any scored challenger is promoted. A champion
/// whose metric is missing defends with `-1.0`.
pub fn challenge<T>(current: Option<Scored<T>>, challenger: Option<Scored<T>>) -> ChallengeOutcome<T> {
    match (current, challenger) {
        (None, Some(challenger)) => ChallengeOutcome::Promote {
            challenger,
            defending: None,
        },
        (Some(champion), Some(challenger)) if challenger.score > defending_score(&champion) => {
            ChallengeOutcome::Promote {
                challenger,
                defending: Some(champion),
            }
        }
        (Some(champion), challenger) => ChallengeOutcome::Retain { champion, challenger },
        (None, None) => ChallengeOutcome::NoCandidates,
    }
}

fn defending_score<T>(champion: &Scored<T>) -> f64 {
    if champion.score.is_nan() {
        MISSING_SCORE
    } else {
        champion.score
    }
}
