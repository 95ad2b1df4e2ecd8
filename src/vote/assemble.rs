use super::quota::{required_keys, tally_standard};
use super::submission::{AnswerKey, Submission};
use super::VoteBatch;
use crate::survey::SurveyDef;

/// Turns a validated submission into a batch ready for the writer.
///
/// Slots are read in display order. Free text is kept, trimmed, only when the
/// survey has a prompt for it.
pub fn assemble(survey: &SurveyDef, participant_id: i32, submission: &Submission) -> VoteBatch {
    let mut batch = VoteBatch {
        participant_id,
        survey_id: survey.id(),
        single_choice_entries: Vec::new(),
        grid_entries: Vec::new(),
        free_text: None,
        standard_tally: tally_standard(survey, submission),
    };

    for key in required_keys(survey) {
        let choice = match submission.answered(&key) {
            Some(choice) => choice.to_string(),
            None => continue,
        };
        match key {
            AnswerKey::Question(question_id) => {
                batch.single_choice_entries.push((question_id, choice));
            }
            AnswerKey::Cell {
                question_id,
                respondent_id,
            } => {
                batch.grid_entries.push((question_id, respondent_id, choice));
            }
        }
    }

    if survey.has_free_text_prompt() {
        batch.free_text = submission
            .free_text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
    }

    batch
}
