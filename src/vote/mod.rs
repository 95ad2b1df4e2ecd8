//! Vote ingestion pipeline.
//!
//! A submission is checked and assembled on the request path, then handed to
//! the [`VoteQueue`]. A single [`DurableWriter`] drains the queue and replaces
//! the participant's stored votes inside one transaction, retrying failed jobs
//! with a linear backoff.

mod assemble;
pub mod queue;
pub mod quota;
pub mod store;
pub mod submission;
pub mod writer;

pub use assemble::assemble;
pub use queue::{QueueReceiver, VoteQueue, WriteJob};
pub use quota::{merge_tally, OptionTally};
pub use store::{committed_tally, SeaOrmStore, VoteStore};
pub use submission::{AnswerKey, Submission};
pub use writer::{DurableWriter, FailureReason, JobOutcome, RetryPolicy, VotePipeline};

use crate::survey::SurveyDef;
use serde::{Deserialize, Serialize};

/// Everything the writer needs to replace one participant's answers to one survey.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBatch {
    pub participant_id: i32,
    pub survey_id: i32,
    /// `(question_id, option)`
    pub single_choice_entries: Vec<(i32, String)>,
    /// `(question_id, respondent_id, option)`
    pub grid_entries: Vec<(i32, i32, String)>,
    pub free_text: Option<String>,
    /// Letters of the standard answers, held against option caps while the
    /// batch is waiting to be written.
    pub standard_tally: OptionTally,
}

impl VoteBatch {
    pub fn entry_count(&self) -> usize {
        self.single_choice_entries.len() + self.grid_entries.len()
    }
}

/// Why a submission was turned away. Both kinds are for the participant to fix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    Incomplete,
    QuotaExceeded { option: String, cap: u32 },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Incomplete => {
                write!(f, "Please answer every question before submitting.")
            }
            ValidationError::QuotaExceeded { option, cap } => write!(
                f,
                "Option {} was chosen more often than its limit of {}.",
                option, cap
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Checks a submission and, if it passes, assembles the batch to persist.
///
/// `committed` holds the standard-question counts already stored for other
/// participants of this survey; pass an empty tally to judge the submission
/// on its own.
pub fn validate_and_assemble(
    survey: &SurveyDef,
    participant_id: i32,
    submission: &Submission,
    committed: &OptionTally,
) -> Result<VoteBatch, ValidationError> {
    quota::check(survey, submission, committed)?;
    Ok(assemble(survey, participant_id, submission))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::surveys::SurveyKind;
    use crate::survey::test_support::*;

    #[test]
    fn test_single_choice_produces_one_entry_per_question() {
        let def = (1..=5).fold(survey(SurveyKind::SingleChoice, &[]), with_question);
        let submission = (1..=5).fold(Submission::new(), |s, q| {
            s.with_answer(AnswerKey::Question(q), "B")
        });

        let batch = validate_and_assemble(&def, 9, &submission, &OptionTally::new()).unwrap();
        assert_eq!(batch.single_choice_entries.len(), 5);
        assert!(batch.grid_entries.is_empty());
    }

    #[test]
    fn test_table_produces_grid_and_custom_entries() {
        let mut def = survey(SurveyKind::Table, &[]);
        for q in 1..=2 {
            def = with_question(def, q);
        }
        for r in 10..=12 {
            def = with_respondent(def, r);
        }
        def = with_custom(def, 3, &["Z", "Y", "X"]);

        let mut submission = Submission::new().with_answer(AnswerKey::Question(3), "X");
        for q in 1..=2 {
            for r in 10..=12 {
                submission.insert(
                    AnswerKey::Cell {
                        question_id: q,
                        respondent_id: r,
                    },
                    "A",
                );
            }
        }

        let batch = validate_and_assemble(&def, 9, &submission, &OptionTally::new()).unwrap();
        assert_eq!(batch.grid_entries.len(), 2 * 3);
        assert_eq!(batch.single_choice_entries.len(), 1);
    }

    #[test]
    fn test_table_missing_cell_is_incomplete() {
        let def = with_respondent(
            with_respondent(with_question(survey(SurveyKind::Table, &[]), 1), 1),
            2,
        );
        let submission = Submission::new().with_answer(
            AnswerKey::Cell {
                question_id: 1,
                respondent_id: 1,
            },
            "A",
        );

        assert_eq!(
            validate_and_assemble(&def, 9, &submission, &OptionTally::new()),
            Err(ValidationError::Incomplete)
        );
    }

    #[test]
    fn test_quota_message_names_option_and_cap() {
        let err = ValidationError::QuotaExceeded {
            option: "A".to_string(),
            cap: 1,
        };
        let message = err.to_string();
        assert!(message.contains('A'));
        assert!(message.contains('1'));
    }
}
