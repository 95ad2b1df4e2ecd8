//! Completeness and option-cap checks for a submission.
//!
//! Only standard questions count toward caps. The tally is the number of
//! standard answers per letter in this submission plus the `committed` counts
//! already stored for other participants.

use super::submission::{AnswerKey, Submission};
use super::ValidationError;
use crate::orm::surveys::SurveyKind;
use crate::survey::SurveyDef;
use std::collections::BTreeMap;

/// Option letter to number of standard answers choosing it.
pub type OptionTally = BTreeMap<String, u32>;

/// Runs the completeness check, then the cap check.
pub fn check(
    survey: &SurveyDef,
    submission: &Submission,
    committed: &OptionTally,
) -> Result<(), ValidationError> {
    check_complete(survey, submission)?;
    check_limits(survey, submission, committed)
}

/// Every slot the survey defines must carry a non-blank answer.
pub fn check_complete(survey: &SurveyDef, submission: &Submission) -> Result<(), ValidationError> {
    let missing = required_keys(survey).find(|key| submission.answered(key).is_none());
    match missing {
        Some(key) => {
            log::debug!(
                "Survey {} submission incomplete, first missing field {}",
                survey.id(),
                key.field_name()
            );
            Err(ValidationError::Incomplete)
        }
        None => Ok(()),
    }
}

/// Rejects the first letter, in letter order, whose tally exceeds its cap.
pub fn check_limits(
    survey: &SurveyDef,
    submission: &Submission,
    committed: &OptionTally,
) -> Result<(), ValidationError> {
    let limits = survey.option_limits();
    if limits.is_empty() {
        return Ok(());
    }

    let mut tally = tally_standard(survey, submission);
    merge_tally(&mut tally, committed);

    for (letter, count) in &tally {
        if let Some(&cap) = limits.get(letter) {
            if *count > cap {
                return Err(ValidationError::QuotaExceeded {
                    option: letter.clone(),
                    cap,
                });
            }
        }
    }

    Ok(())
}

/// Adds every count of `other` into `into`.
pub fn merge_tally(into: &mut OptionTally, other: &OptionTally) {
    for (letter, count) in other {
        *into.entry(letter.clone()).or_insert(0) += count;
    }
}

/// Counts the standard answers of a submission per letter.
pub fn tally_standard(survey: &SurveyDef, submission: &Submission) -> OptionTally {
    let mut tally = OptionTally::new();
    for key in standard_keys(survey) {
        if let Some(letter) = submission.answered(&key) {
            *tally.entry(letter.to_string()).or_insert(0) += 1;
        }
    }
    tally
}

/// Every answer slot of the survey in display order.
pub(super) fn required_keys(survey: &SurveyDef) -> impl Iterator<Item = AnswerKey> + '_ {
    let kind = survey.kind();
    survey.questions.iter().flat_map(move |q| {
        let custom = crate::survey::is_custom(q);
        slot_keys(survey, kind, q.id, custom)
    })
}

fn standard_keys(survey: &SurveyDef) -> impl Iterator<Item = AnswerKey> + '_ {
    let kind = survey.kind();
    survey
        .standard_questions()
        .flat_map(move |q| slot_keys(survey, kind, q.id, false))
}

/// A table survey asks standard questions once per respondent row.
fn slot_keys(survey: &SurveyDef, kind: SurveyKind, question_id: i32, custom: bool) -> Vec<AnswerKey> {
    if kind == SurveyKind::Table && !custom {
        survey
            .respondents
            .iter()
            .map(|r| AnswerKey::Cell {
                question_id,
                respondent_id: r.id,
            })
            .collect()
    } else {
        vec![AnswerKey::Question(question_id)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::test_support::*;

    fn single_choice(limits: &[(&str, u32)], questions: i32) -> SurveyDef {
        (1..=questions).fold(survey(SurveyKind::SingleChoice, limits), with_question)
    }

    fn answers(pairs: &[(i32, &str)]) -> Submission {
        pairs.iter().fold(Submission::new(), |s, (q, v)| {
            s.with_answer(AnswerKey::Question(*q), v)
        })
    }

    #[test]
    fn test_complete_single_choice_passes() {
        let def = single_choice(&[], 2);
        assert_eq!(check(&def, &answers(&[(1, "A"), (2, "B")]), &OptionTally::new()), Ok(()));
    }

    #[test]
    fn test_missing_answer_is_incomplete() {
        let def = single_choice(&[], 2);
        assert_eq!(
            check(&def, &answers(&[(1, "A")]), &OptionTally::new()),
            Err(ValidationError::Incomplete)
        );
        assert_eq!(
            check(&def, &answers(&[(1, "A"), (2, "")]), &OptionTally::new()),
            Err(ValidationError::Incomplete)
        );
    }

    #[test]
    fn test_table_requires_every_cell_and_custom() {
        let def = with_custom(
            with_respondent(with_respondent(with_question(survey(SurveyKind::Table, &[]), 1), 10), 11),
            2,
            &["Z", "Y"],
        );
        let cell = |r| AnswerKey::Cell {
            question_id: 1,
            respondent_id: r,
        };

        let partial = Submission::new()
            .with_answer(cell(10), "A")
            .with_answer(AnswerKey::Question(2), "Z");
        assert_eq!(check_complete(&def, &partial), Err(ValidationError::Incomplete));

        let full = partial.with_answer(cell(11), "B");
        assert_eq!(check_complete(&def, &full), Ok(()));
    }

    #[test]
    fn test_cap_reached_exactly_is_accepted() {
        let def = single_choice(&[("A", 2)], 3);
        let submission = answers(&[(1, "A"), (2, "A"), (3, "B")]);
        assert_eq!(check(&def, &submission, &OptionTally::new()), Ok(()));
    }

    #[test]
    fn test_cap_exceeded_within_submission() {
        let def = single_choice(&[("A", 1)], 2);
        assert_eq!(
            check(&def, &answers(&[(1, "A"), (2, "A")]), &OptionTally::new()),
            Err(ValidationError::QuotaExceeded {
                option: "A".to_string(),
                cap: 1
            })
        );
    }

    #[test]
    fn test_committed_counts_push_over_cap() {
        let def = single_choice(&[("A", 7)], 4);
        let committed: OptionTally = [("A".to_string(), 5)].into_iter().collect();

        let result = check(&def, &answers(&[(1, "A"), (2, "A"), (3, "A"), (4, "B")]), &committed);
        assert_eq!(
            result,
            Err(ValidationError::QuotaExceeded {
                option: "A".to_string(),
                cap: 7
            })
        );
    }

    #[test]
    fn test_custom_answers_do_not_count() {
        let def = with_custom(single_choice(&[("Z", 0), ("A", 1)], 1), 2, &["Z"]);
        let submission = answers(&[(1, "A"), (2, "Z")]);
        assert_eq!(check(&def, &submission, &OptionTally::new()), Ok(()));
    }

    #[test]
    fn test_first_offending_letter_in_order_is_reported() {
        let def = single_choice(&[("A", 0), ("B", 0)], 2);
        assert_eq!(
            check(&def, &answers(&[(1, "B"), (2, "A")]), &OptionTally::new()),
            Err(ValidationError::QuotaExceeded {
                option: "A".to_string(),
                cap: 0
            })
        );
    }

    #[test]
    fn test_incomplete_reported_before_quota() {
        let def = single_choice(&[("A", 0)], 2);
        assert_eq!(
            check(&def, &answers(&[(1, "A")]), &OptionTally::new()),
            Err(ValidationError::Incomplete)
        );
    }

    #[test]
    fn test_table_cells_count_per_respondent() {
        let def = with_respondent(
            with_respondent(with_question(survey(SurveyKind::Table, &[("A", 1)]), 1), 10),
            11,
        );
        let submission = Submission::new()
            .with_answer(
                AnswerKey::Cell {
                    question_id: 1,
                    respondent_id: 10,
                },
                "A",
            )
            .with_answer(
                AnswerKey::Cell {
                    question_id: 1,
                    respondent_id: 11,
                },
                "A",
            );
        assert_eq!(tally_standard(&def, &submission).get("A"), Some(&2));
        assert!(matches!(
            check(&def, &submission, &OptionTally::new()),
            Err(ValidationError::QuotaExceeded { .. })
        ));
    }
}
