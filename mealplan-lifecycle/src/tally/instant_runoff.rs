//! Instant-runoff voting
//!
//! Each round counts first preferences among the live options. An option
//! holding a strict majority of the non-abstaining ballots wins. Otherwise
//! the option with the fewest first preferences is eliminated and its
//! ballots flow to their next live choice. When every live option holds the
//! same count the survivors are tied.
//!
//! Among several options sharing the lowest count, the lexicographically
//! greatest id is eliminated first, so eliminations never depend on input
//! order.

use std::collections::{BTreeMap, BTreeSet};

use super::{Ballot, TallyOutcome};

/// Tally over sorted, validated candidates
pub(crate) fn tally(candidates: &[String], ballots: &[Ballot]) -> TallyOutcome {
    let voting: Vec<&Ballot> = ballots.iter().filter(|b| !b.is_abstaining()).collect();
    let total = voting.len();
    let mut live: BTreeSet<String> = candidates.iter().cloned().collect();
    let mut round = 0u32;

    loop {
        round += 1;

        if live.len() == 1 {
            if let Some(option_id) = live.into_iter().next() {
                return TallyOutcome::Winner {
                    option_id,
                    tie_broken: false,
                };
            }
            break;
        }

        let counts = first_preferences(&live, &voting);

        if let Some((leader, votes)) = counts
            .iter()
            .max_by(|(id_a, a), (id_b, b)| a.cmp(b).then(id_b.cmp(id_a)))
        {
            if votes * 2 > total {
                tracing::trace!(round, option_id = %leader, votes, total, "Instant-runoff majority");
                return TallyOutcome::Winner {
                    option_id: leader.to_string(),
                    tie_broken: false,
                };
            }
        }

        let lowest = counts.values().copied().min().unwrap_or(0);
        let highest = counts.values().copied().max().unwrap_or(0);
        if lowest == highest {
            return TallyOutcome::Tie {
                tied_options: live.into_iter().collect(),
            };
        }

        let eliminated = counts
            .iter()
            .filter(|(_, votes)| **votes == lowest)
            .map(|(id, _)| id.to_string())
            .next_back();

        match eliminated {
            Some(id) => {
                tracing::trace!(round, option_id = %id, votes = lowest, "Instant-runoff elimination");
                live.remove(&id);
            }
            None => break,
        }
    }

    TallyOutcome::Tie {
        tied_options: candidates.to_vec(),
    }
}

/// First-preference count for every live option, ascending by id
///
/// Exhausted ballots (no live option ranked) count for nobody.
fn first_preferences<'a>(live: &'a BTreeSet<String>, ballots: &[&Ballot]) -> BTreeMap<&'a str, usize> {
    let mut counts: BTreeMap<&str, usize> = live.iter().map(|id| (id.as_str(), 0)).collect();

    for ballot in ballots {
        if let Some(top) = ballot.top_choice(live) {
            if let Some(count) = counts.get_mut(top) {
                *count += 1;
            }
        }
    }

    counts
}
