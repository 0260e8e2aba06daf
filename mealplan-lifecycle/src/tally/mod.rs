//! Vote tally engine
//!
//! Pure and deterministic: given the options of one meal-plan event and the
//! ballots cast on them, pick a winning option or report a tie. Identical
//! inputs always produce identical outputs; no map iteration order leaks
//! into the result.

pub mod instant_runoff;
pub mod schulze;

use std::collections::{BTreeMap, BTreeSet};

use mealplan_common::db::{ElectionMethod, MealPlanOptionVote};
use mealplan_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// One user's ranked preference over the options of one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: String,
    /// option id -> rank (0 = favorite); abstained options are absent
    pub rankings: BTreeMap<String, u32>,
}

impl Ballot {
    pub fn new(voter: impl Into<String>) -> Self {
        Self {
            voter: voter.into(),
            rankings: BTreeMap::new(),
        }
    }

    /// Builder used by tests and fixtures: `Ballot::ranked("u1", &["a", "b"])`
    /// ranks `a` first, `b` second
    pub fn ranked(voter: impl Into<String>, order: &[&str]) -> Self {
        let mut ballot = Self::new(voter);
        for (rank, option) in order.iter().enumerate() {
            ballot.rankings.insert(option.to_string(), rank as u32);
        }
        ballot
    }

    /// A ballot whose every vote abstained
    pub fn is_abstaining(&self) -> bool {
        self.rankings.is_empty()
    }

    /// Whether this ballot prefers `a` over `b`; a ranked option beats an unranked one
    pub fn prefers(&self, a: &str, b: &str) -> bool {
        match (self.rankings.get(a), self.rankings.get(b)) {
            (Some(rank_a), Some(rank_b)) => rank_a < rank_b,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Highest-ranked option among `live`, if any remain on this ballot
    pub fn top_choice<'a>(&'a self, live: &BTreeSet<String>) -> Option<&'a str> {
        self.rankings
            .iter()
            .filter(|(option, _)| live.contains(*option))
            .min_by(|(id_a, rank_a), (id_b, rank_b)| rank_a.cmp(rank_b).then(id_a.cmp(id_b)))
            .map(|(option, _)| option.as_str())
    }
}

/// Group stored votes into one ballot per user, ordered by voter
///
/// Abstain votes are dropped from the rankings; a user who abstained on
/// everything yields an abstaining ballot.
pub fn ballots_from_votes<'a>(votes: impl IntoIterator<Item = &'a MealPlanOptionVote>) -> Vec<Ballot> {
    let mut by_user: BTreeMap<&str, Ballot> = BTreeMap::new();

    for vote in votes {
        let ballot = by_user
            .entry(vote.by_user.as_str())
            .or_insert_with(|| Ballot::new(vote.by_user.clone()));
        if !vote.abstain {
            ballot
                .rankings
                .insert(vote.belongs_to_meal_plan_option.clone(), vote.rank);
        }
    }

    by_user.into_values().collect()
}

/// Result of a tally before tie resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TallyOutcome {
    Winner { option_id: String, tie_broken: bool },
    Tie { tied_options: Vec<String> },
}

/// Final pick for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub option_id: String,
    pub tie_broken: bool,
}

impl TallyOutcome {
    /// Collapse a tie to its lexicographically smallest member with `tie_broken`
    pub fn resolve(self) -> Result<Verdict> {
        match self {
            TallyOutcome::Winner {
                option_id,
                tie_broken,
            } => Ok(Verdict {
                option_id,
                tie_broken,
            }),
            TallyOutcome::Tie { tied_options } => tied_options
                .into_iter()
                .min()
                .map(|option_id| Verdict {
                    option_id,
                    tie_broken: true,
                })
                .ok_or_else(|| Error::Internal("tie reported with no tied options".to_string())),
        }
    }

    pub fn is_tie(&self) -> bool {
        matches!(self, TallyOutcome::Tie { .. })
    }
}

/// Run `method` over `ballots` for the given options
///
/// Fails with `InvalidInput` for an empty option list, duplicate option ids
/// or a ballot naming an option outside the list.
pub fn tally(method: ElectionMethod, options: &[String], ballots: &[Ballot]) -> Result<TallyOutcome> {
    let candidates = validate(options, ballots)?;

    let outcome = match method {
        ElectionMethod::Schulze => schulze::tally(&candidates, ballots),
        ElectionMethod::InstantRunoff => instant_runoff::tally(&candidates, ballots),
    };

    tracing::trace!(
        method = method.as_str(),
        option_count = candidates.len(),
        ballot_count = ballots.len(),
        tie = outcome.is_tie(),
        "Tallied event"
    );

    Ok(outcome)
}

/// Tally and resolve any tie to a tie-broken verdict
pub fn decide(method: ElectionMethod, options: &[String], ballots: &[Ballot]) -> Result<Verdict> {
    tally(method, options, ballots)?.resolve()
}

/// Sorted, de-duplicated candidate list
fn validate(options: &[String], ballots: &[Ballot]) -> Result<Vec<String>> {
    if options.is_empty() {
        return Err(Error::InvalidInput("tally requires at least one option".to_string()));
    }

    let candidates: BTreeSet<&String> = options.iter().collect();
    if candidates.len() != options.len() {
        return Err(Error::InvalidInput("duplicate option ids in tally".to_string()));
    }

    for ballot in ballots {
        if let Some(unknown) = ballot
            .rankings
            .keys()
            .find(|option| !candidates.contains(option))
        {
            return Err(Error::InvalidInput(format!(
                "ballot by {} references unknown option {}",
                ballot.voter, unknown
            )));
        }
    }

    Ok(candidates.into_iter().cloned().collect())
}
