//! Relevance ranking over mission history.
//!
//! Scores combine outcome, shared failure signals, and keyword overlap between
//! the current mission and each historical record.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::signals::Signal;
use crate::core::types::{Classification, MissionLogRecord, MissionStatus};

const COMPLETED_BONUS: f64 = 5.0;
const SIGNAL_FACTOR: f64 = 2.0;
const PROMPT_FACTOR: f64 = 10.0;
const OBJECTIVE_FACTOR: f64 = 5.0;
const CRITERIA_FACTOR: f64 = 8.0;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]{3,}").expect("token pattern should be valid"));

/// What the current mission looks like, for ranking history against.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub classification: Option<Classification>,
    pub signals: BTreeSet<Signal>,
    pub prompt: String,
    pub success_criteria: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord<'a> {
    pub index: usize,
    pub score: f64,
    pub record: &'a MissionLogRecord,
}

/// Rank history by relevance, highest first; ties favor later records.
///
/// When the query has a classification, records with a different
/// classification are dropped unless they completed.
pub fn rank_records<'a>(
    history: &'a [MissionLogRecord],
    query: &MemoryQuery,
) -> Vec<ScoredRecord<'a>> {
    let mut scored = history
        .iter()
        .enumerate()
        .filter(|(_, record)| is_candidate(record, query))
        .map(|(index, record)| ScoredRecord {
            index,
            score: relevance_score(record, query),
            record,
        })
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.index.cmp(&a.index))
    });
    scored
}

/// Lessons from the `limit` most relevant records that carry one.
pub fn top_lessons(history: &[MissionLogRecord], query: &MemoryQuery, limit: usize) -> Vec<String> {
    rank_records(history, query)
        .into_iter()
        .filter_map(|scored| scored.record.lessons().map(str::to_string))
        .take(limit)
        .collect()
}

fn is_candidate(record: &MissionLogRecord, query: &MemoryQuery) -> bool {
    match query.classification {
        None => true,
        Some(target) => {
            record.status == MissionStatus::Completed || record.classification == Some(target)
        }
    }
}

pub fn relevance_score(record: &MissionLogRecord, query: &MemoryQuery) -> f64 {
    let mut score = 0.0;
    if record.status == MissionStatus::Completed {
        score += COMPLETED_BONUS;
    }

    if let Some(signals) = &record.signals {
        let shared: u32 = signals
            .intersection(&query.signals)
            .map(Signal::weight)
            .sum();
        score += f64::from(shared) * SIGNAL_FACTOR;
    }

    score += keyword_overlap(&query.prompt, &record.agent_prompt) * PROMPT_FACTOR;
    score += keyword_overlap(&query.prompt, &record.objectives.join(" ")) * OBJECTIVE_FACTOR;
    score += keyword_overlap(
        &query.success_criteria.join(" "),
        &record.success_criteria.join(" "),
    ) * CRITERIA_FACTOR;
    score
}

/// Fraction of the query's keywords that also appear in the candidate.
pub fn keyword_overlap(query: &str, candidate: &str) -> f64 {
    let query_tokens = tokens(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let candidate_tokens = tokens(candidate);
    let shared = query_tokens.intersection(&candidate_tokens).count();
    shared as f64 / query_tokens.len() as f64
}

fn tokens(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|found| found.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        classification: Option<Classification>,
        status: MissionStatus,
        signals: &[Signal],
        lesson: &str,
    ) -> MissionLogRecord {
        MissionLogRecord {
            classification,
            status,
            signals: Some(signals.iter().cloned().collect()),
            lessons_learned: Some(lesson.to_string()),
            ..MissionLogRecord::default()
        }
    }

    fn query(classification: Option<Classification>, signals: &[Signal]) -> MemoryQuery {
        MemoryQuery {
            classification,
            signals: signals.iter().cloned().collect(),
            ..MemoryQuery::default()
        }
    }

    #[test]
    fn shared_high_weight_signals_rank_first() {
        let history = vec![
            record(Some(Classification::Logic), MissionStatus::Failed, &[Signal::Timeout], "timeout"),
            record(
                Some(Classification::Logic),
                MissionStatus::Failed,
                &[Signal::TestFailure, Signal::SyntaxError],
                "tests",
            ),
            record(
                Some(Classification::Logic),
                MissionStatus::Failed,
                &[Signal::CommandNotFound],
                "command",
            ),
        ];
        let ranked = rank_records(
            &history,
            &query(Some(Classification::Logic), &[Signal::TestFailure, Signal::Timeout]),
        );
        assert_eq!(ranked[0].index, 1);
        assert_eq!(ranked[0].score, 20.0);
        assert_eq!(ranked[1].index, 0);
        assert_eq!(ranked[1].score, 6.0);
        assert_eq!(ranked[2].score, 0.0);
    }

    #[test]
    fn signal_query_selects_matching_record() {
        let history = vec![
            record(Some(Classification::Logic), MissionStatus::Failed, &[Signal::TestFailure], "A"),
            record(
                Some(Classification::Logic),
                MissionStatus::Failed,
                &[Signal::DependencyMissing, Signal::TestFailure],
                "B",
            ),
            record(Some(Classification::Logic), MissionStatus::Failed, &[Signal::SyntaxError], "C"),
        ];
        let lessons = top_lessons(
            &history,
            &query(
                Some(Classification::Logic),
                &[Signal::DependencyMissing, Signal::TestFailure],
            ),
            1,
        );
        assert_eq!(lessons, vec!["B".to_string()]);

        let lessons = top_lessons(
            &history,
            &query(Some(Classification::Logic), &[Signal::SyntaxError]),
            1,
        );
        assert_eq!(lessons, vec!["C".to_string()]);
    }

    #[test]
    fn classification_filter_keeps_completed_records() {
        let history = vec![
            record(Some(Classification::Logic), MissionStatus::Failed, &[], "Lesson 1"),
            record(Some(Classification::Tooling), MissionStatus::Failed, &[], "Lesson T"),
            record(Some(Classification::Logic), MissionStatus::Failed, &[], "Lesson 2"),
            record(Some(Classification::Tooling), MissionStatus::Completed, &[], "Done"),
        ];
        let lessons = top_lessons(&history, &query(Some(Classification::Logic), &[]), 5);
        assert_eq!(
            lessons,
            vec!["Done".to_string(), "Lesson 2".to_string(), "Lesson 1".to_string()]
        );
    }

    #[test]
    fn no_classification_includes_everything() {
        let history = vec![
            record(Some(Classification::Logic), MissionStatus::Failed, &[], "L"),
            record(Some(Classification::Tooling), MissionStatus::Failed, &[], "T"),
        ];
        assert_eq!(rank_records(&history, &query(None, &[])).len(), 2);
    }

    #[test]
    fn ties_favor_recent_records() {
        let history = vec![
            record(None, MissionStatus::Failed, &[], "old"),
            record(None, MissionStatus::Failed, &[], "new"),
        ];
        let lessons = top_lessons(&history, &query(None, &[]), 2);
        assert_eq!(lessons, vec!["new".to_string(), "old".to_string()]);
    }

    #[test]
    fn records_without_lessons_are_skipped() {
        let mut silent = record(None, MissionStatus::Completed, &[], "");
        silent.lessons_learned = None;
        let history = vec![record(None, MissionStatus::Failed, &[], "kept"), silent];
        assert_eq!(top_lessons(&history, &query(None, &[]), 3), vec!["kept".to_string()]);
    }

    #[test]
    fn keyword_overlap_uses_query_denominator() {
        assert_eq!(keyword_overlap("fix login tests", "login page tests"), 2.0 / 3.0);
        assert_eq!(keyword_overlap("", "anything"), 0.0);
        assert_eq!(keyword_overlap("a an of", "a an of"), 0.0);
        assert_eq!(keyword_overlap("README", "readme.md"), 1.0);
    }

    #[test]
    fn prompt_and_criteria_similarity_contribute() {
        let history = vec![MissionLogRecord {
            agent_prompt: "Add a README file".to_string(),
            objectives: vec!["Document the README".to_string()],
            success_criteria: vec!["exists:README.md".to_string()],
            ..MissionLogRecord::default()
        }];
        let query = MemoryQuery {
            prompt: "README".to_string(),
            success_criteria: vec!["exists:README.md".to_string()],
            ..MemoryQuery::default()
        };
        let score = relevance_score(&history[0], &query);
        assert_eq!(score, PROMPT_FACTOR + OBJECTIVE_FACTOR + CRITERIA_FACTOR);
    }
}
