//! Schulze method
//!
//! Pairwise preferences `d[a][b]` count the ballots ranking a above b. The
//! strongest-path matrix `p` is computed with the Floyd-Warshall widest-path
//! recurrence; a beats b when `p[a][b] > p[b][a]`. An option beating every
//! other wins outright; otherwise the Smith set is reported as a tie.

use super::{Ballot, TallyOutcome};

/// Tally over sorted, validated candidates
pub(crate) fn tally(candidates: &[String], ballots: &[Ballot]) -> TallyOutcome {
    let d = pairwise_preferences(candidates, ballots);
    let p = strongest_paths(&d);
    let n = candidates.len();

    let winners: Vec<usize> = (0..n)
        .filter(|&a| (0..n).all(|b| a == b || p[a][b] > p[b][a]))
        .collect();

    if let [winner] = winners.as_slice() {
        return TallyOutcome::Winner {
            option_id: candidates[*winner].clone(),
            tie_broken: false,
        };
    }

    TallyOutcome::Tie {
        tied_options: smith_set(&d)
            .into_iter()
            .map(|i| candidates[i].clone())
            .collect(),
    }
}

/// `d[a][b]` = number of ballots preferring a over b
pub(crate) fn pairwise_preferences(candidates: &[String], ballots: &[Ballot]) -> Vec<Vec<u32>> {
    let n = candidates.len();
    let mut d = vec![vec![0u32; n]; n];

    for ballot in ballots.iter().filter(|b| !b.is_abstaining()) {
        for (i, a) in candidates.iter().enumerate() {
            for (j, b) in candidates.iter().enumerate() {
                if i != j && ballot.prefers(a, b) {
                    d[i][j] += 1;
                }
            }
        }
    }

    d
}

/// Widest-path strengths over the strict-majority links of `d`
pub(crate) fn strongest_paths(d: &[Vec<u32>]) -> Vec<Vec<u32>> {
    let n = d.len();
    let mut p = vec![vec![0u32; n]; n];

    for i in 0..n {
        for j in 0..n {
            if i != j && d[i][j] > d[j][i] {
                p[i][j] = d[i][j];
            }
        }
    }

    for k in 0..n {
        for i in 0..n {
            if i == k {
                continue;
            }
            for j in 0..n {
                if j == i || j == k {
                    continue;
                }
                p[i][j] = p[i][j].max(p[i][k].min(p[k][j]));
            }
        }
    }

    p
}

/// Indices of the Smith set, ascending
///
/// A member reaches every option through chains of pairwise wins or ties;
/// anything outside is beaten by every member.
fn smith_set(d: &[Vec<u32>]) -> Vec<usize> {
    let n = d.len();
    let mut reach: Vec<Vec<bool>> = (0..n)
        .map(|i| (0..n).map(|j| i == j || d[i][j] >= d[j][i]).collect())
        .collect();

    for k in 0..n {
        for i in 0..n {
            if !reach[i][k] {
                continue;
            }
            for j in 0..n {
                if reach[k][j] {
                    reach[i][j] = true;
                }
            }
        }
    }

    (0..n).filter(|&i| reach[i].iter().all(|r| *r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::{decide, tally as run_tally};
    use mealplan_common::db::ElectionMethod;

    fn candidates(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_unanimous_ballot_wins() {
        let ballots = vec![Ballot::ranked("u1", &["a", "b", "c"])];
        let outcome = tally(&candidates(&["a", "b", "c"]), &ballots);
        assert_eq!(
            outcome,
            TallyOutcome::Winner {
                option_id: "a".to_string(),
                tie_broken: false
            }
        );
    }

    #[test]
    fn test_three_way_cycle_reports_smith_set() {
        let ballots = vec![
            Ballot::ranked("u1", &["a", "b", "c"]),
            Ballot::ranked("u2", &["b", "c", "a"]),
            Ballot::ranked("u3", &["c", "a", "b"]),
        ];
        let opts = candidates(&["a", "b", "c"]);

        let d = pairwise_preferences(&opts, &ballots);
        assert_eq!(d[0][1], 2);
        assert_eq!(d[1][0], 1);

        let p = strongest_paths(&d);
        assert!(p.iter().enumerate().all(|(i, row)| row
            .iter()
            .enumerate()
            .all(|(j, v)| i == j || *v == 2)));

        assert_eq!(
            tally(&opts, &ballots),
            TallyOutcome::Tie {
                tied_options: candidates(&["a", "b", "c"])
            }
        );

        let verdict = decide(ElectionMethod::Schulze, &opts, &ballots).unwrap();
        assert_eq!(verdict.option_id, "a");
        assert!(verdict.tie_broken);
    }

    #[test]
    fn test_condorcet_winner_beats_cycle_below_it() {
        // d beats everyone; a, b, c cycle beneath it
        let ballots = vec![
            Ballot::ranked("u1", &["d", "a", "b", "c"]),
            Ballot::ranked("u2", &["d", "b", "c", "a"]),
            Ballot::ranked("u3", &["c", "a", "b", "d"]),
        ];
        let outcome = tally(&candidates(&["a", "b", "c", "d"]), &ballots);
        assert_eq!(
            outcome,
            TallyOutcome::Winner {
                option_id: "d".to_string(),
                tie_broken: false
            }
        );
    }

    #[test]
    fn test_smith_set_excludes_dominated_option() {
        // a, b, c cycle; every voter puts z last
        let ballots = vec![
            Ballot::ranked("u1", &["a", "b", "c", "z"]),
            Ballot::ranked("u2", &["b", "c", "a", "z"]),
            Ballot::ranked("u3", &["c", "a", "b", "z"]),
        ];
        let outcome = tally(&candidates(&["a", "b", "c", "z"]), &ballots);
        assert_eq!(
            outcome,
            TallyOutcome::Tie {
                tied_options: candidates(&["a", "b", "c"])
            }
        );
    }

    #[test]
    fn test_even_split_is_tie() {
        let ballots = vec![
            Ballot::ranked("u1", &["a", "b"]),
            Ballot::ranked("u2", &["b", "a"]),
        ];
        assert!(tally(&candidates(&["a", "b"]), &ballots).is_tie());
    }

    #[test]
    fn test_abstaining_ballots_are_ignored() {
        let ballots = vec![Ballot::ranked("u1", &["b"]), Ballot::new("u2")];
        let verdict = decide(ElectionMethod::Schulze, &candidates(&["a", "b"]), &ballots).unwrap();
        assert_eq!(verdict.option_id, "b");
        assert!(!verdict.tie_broken);
    }

    #[test]
    fn test_deterministic_for_any_input_order() {
        let ballots = vec![
            Ballot::ranked("u1", &["a", "b", "c"]),
            Ballot::ranked("u2", &["b", "c", "a"]),
            Ballot::ranked("u3", &["c", "a", "b"]),
            Ballot::ranked("u4", &["b", "a", "c"]),
        ];
        let forward = run_tally(ElectionMethod::Schulze, &candidates(&["a", "b", "c"]), &ballots).unwrap();

        let mut reversed_ballots = ballots.clone();
        reversed_ballots.reverse();
        let backward =
            run_tally(ElectionMethod::Schulze, &candidates(&["c", "b", "a"]), &reversed_ballots).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(
            serde_json::to_string(&forward).unwrap(),
            serde_json::to_string(&backward).unwrap()
        );
    }
}
