//! Result listings and per-option tallies for the admin.

use crate::orm::surveys::SurveyKind;
use crate::orm::{free_text_answers, participants, votes};
use crate::survey::{custom_options, is_custom, SurveyDef};
use chrono::NaiveDateTime;
use sea_orm::{entity::*, query::*, ConnectionTrait, DatabaseConnection, DbErr, PaginatorTrait};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VoteRow {
    pub participant: String,
    pub question: String,
    pub respondent: Option<String>,
    pub choice: String,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FreeTextRow {
    pub participant: String,
    pub content: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Option counts for one question, or one grid cell column when `respondent`
/// is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TallyRow {
    pub question_id: i32,
    pub question: String,
    pub respondent: Option<String>,
    pub counts: BTreeMap<String, u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SurveyResults {
    pub survey_id: i32,
    pub name: String,
    pub kind: SurveyKind,
    pub total_votes: usize,
    pub unique_participants: usize,
    pub unique_respondents: usize,
    pub total_questions: usize,
    pub total_free_text: usize,
    pub tallies: Vec<TallyRow>,
    /// Newest first.
    pub votes: Vec<VoteRow>,
    /// Newest first.
    pub free_text: Vec<FreeTextRow>,
}

/// Counts shown next to each survey in the admin list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SurveyCounts {
    pub votes: u64,
    pub free_text: u64,
}

/// Tallies stored votes per question, and per respondent for grid questions.
///
/// Every option a question can take is listed, zero or not. Rows follow the
/// survey's display order.
pub fn tally(survey: &SurveyDef, stored: &[votes::Model]) -> Vec<TallyRow> {
    let mut counts: HashMap<(i32, Option<i32>), BTreeMap<String, u32>> = HashMap::new();
    for vote in stored {
        *counts
            .entry((vote.question_id, vote.respondent_id))
            .or_default()
            .entry(vote.choice.clone())
            .or_insert(0) += 1;
    }

    // Single-choice questions list every letter seen anywhere in the survey.
    let seen: BTreeSet<String> = stored.iter().map(|v| v.choice.clone()).collect();

    let mut rows = Vec::new();
    for question in &survey.questions {
        let custom = is_custom(question);
        let letters: Vec<String> = if custom {
            custom_options(question).into_keys().collect()
        } else if survey.kind() == SurveyKind::Table {
            survey.option_letters().iter().map(|l| l.to_string()).collect()
        } else {
            seen.iter().cloned().collect()
        };

        let axis: Vec<Option<&crate::orm::respondents::Model>> =
            if survey.kind() == SurveyKind::Table && !custom {
                survey.respondents.iter().map(Some).collect()
            } else {
                vec![None]
            };

        for respondent in axis {
            let key = (question.id, respondent.map(|r| r.id));
            let mut row: BTreeMap<String, u32> =
                letters.iter().map(|l| (l.clone(), 0)).collect();
            if let Some(found) = counts.get(&key) {
                for (letter, n) in found {
                    *row.entry(letter.clone()).or_insert(0) += n;
                }
            }
            rows.push(TallyRow {
                question_id: question.id,
                question: question.content.clone(),
                respondent: respondent.map(|r| r.name.clone()),
                counts: row,
            });
        }
    }
    rows
}

async fn survey_votes<C: ConnectionTrait>(
    db: &C,
    survey: &SurveyDef,
) -> Result<Vec<votes::Model>, DbErr> {
    let question_ids: Vec<i32> = survey.questions.iter().map(|q| q.id).collect();
    if question_ids.is_empty() {
        return Ok(Vec::new());
    }
    votes::Entity::find()
        .filter(votes::Column::QuestionId.is_in(question_ids))
        .order_by_desc(votes::Column::CreatedAt)
        .order_by_desc(votes::Column::Id)
        .all(db)
        .await
}

/// Full results for the admin results page.
pub async fn survey_results(
    db: &DatabaseConnection,
    survey: &SurveyDef,
) -> Result<SurveyResults, DbErr> {
    let stored = survey_votes(db, survey).await?;
    let answers = free_text_answers::Entity::find()
        .filter(free_text_answers::Column::SurveyId.eq(survey.id()))
        .order_by_desc(free_text_answers::Column::CreatedAt)
        .all(db)
        .await?;

    let participant_ids: BTreeSet<i32> = stored
        .iter()
        .map(|v| v.participant_id)
        .chain(answers.iter().map(|a| a.participant_id))
        .collect();
    let names: HashMap<i32, String> = if participant_ids.is_empty() {
        HashMap::new()
    } else {
        participants::Entity::find()
            .filter(participants::Column::Id.is_in(participant_ids.iter().copied()))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect()
    };
    let name_of = |id: i32| {
        names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("participant {}", id))
    };

    let questions: HashMap<i32, &str> = survey
        .questions
        .iter()
        .map(|q| (q.id, q.content.as_str()))
        .collect();
    let respondents: HashMap<i32, &str> = survey
        .respondents
        .iter()
        .map(|r| (r.id, r.name.as_str()))
        .collect();

    let vote_rows: Vec<VoteRow> = stored
        .iter()
        .map(|v| VoteRow {
            participant: name_of(v.participant_id),
            question: questions
                .get(&v.question_id)
                .map(|q| q.to_string())
                .unwrap_or_default(),
            respondent: v
                .respondent_id
                .and_then(|r| respondents.get(&r).map(|n| n.to_string())),
            choice: v.choice.clone(),
            created_at: v.created_at,
        })
        .collect();

    let free_text: Vec<FreeTextRow> = answers
        .iter()
        .map(|a| FreeTextRow {
            participant: name_of(a.participant_id),
            content: a.content.clone(),
            created_at: a.created_at,
        })
        .collect();

    let unique_participants = stored
        .iter()
        .map(|v| v.participant_id)
        .collect::<BTreeSet<_>>()
        .len();
    let unique_respondents = stored
        .iter()
        .filter_map(|v| v.respondent_id)
        .collect::<BTreeSet<_>>()
        .len();

    Ok(SurveyResults {
        survey_id: survey.id(),
        name: survey.survey.name.clone(),
        kind: survey.kind(),
        total_votes: stored.len(),
        unique_participants,
        unique_respondents,
        total_questions: survey.questions.len(),
        total_free_text: answers.iter().filter(|a| a.content.is_some()).count(),
        tallies: tally(survey, &stored),
        votes: vote_rows,
        free_text,
    })
}

/// Vote and free-text counts for one survey.
pub async fn survey_counts(
    db: &DatabaseConnection,
    survey: &SurveyDef,
) -> Result<SurveyCounts, DbErr> {
    let question_ids: Vec<i32> = survey.questions.iter().map(|q| q.id).collect();
    let votes = if question_ids.is_empty() {
        0
    } else {
        votes::Entity::find()
            .filter(votes::Column::QuestionId.is_in(question_ids))
            .count(db)
            .await? as u64
    };
    let free_text = free_text_answers::Entity::find()
        .filter(free_text_answers::Column::SurveyId.eq(survey.id()))
        .count(db)
        .await? as u64;
    Ok(SurveyCounts { votes, free_text })
}

/// Deletes all votes and free-text answers of a survey. Returns rows removed.
pub async fn delete_results(db: &DatabaseConnection, survey_id: i32) -> Result<u64, DbErr> {
    let removed = crate::editor::delete_survey_votes(db, survey_id).await?;
    log::info!("Deleted {} result rows of survey {}", removed, survey_id);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::test_support::*;

    fn vote(participant_id: i32, question_id: i32, respondent_id: Option<i32>, choice: &str) -> votes::Model {
        votes::Model {
            id: 0,
            participant_id,
            question_id,
            respondent_id,
            choice: choice.to_string(),
            created_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn test_single_choice_tally_lists_seen_letters() {
        let def = with_question(with_question(survey(SurveyKind::SingleChoice, &[]), 1), 2);
        let stored = vec![
            vote(1, 1, None, "A"),
            vote(2, 1, None, "A"),
            vote(1, 2, None, "C"),
        ];

        let rows = tally(&def, &stored);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].counts.get("A"), Some(&2));
        assert_eq!(rows[0].counts.get("C"), Some(&0));
        assert_eq!(rows[1].counts.get("C"), Some(&1));
    }

    #[test]
    fn test_table_tally_has_row_per_respondent() {
        let def = with_custom(
            with_respondent(with_respondent(with_question(survey(SurveyKind::Table, &[]), 1), 10), 11),
            2,
            &["Z", "Y"],
        );
        let stored = vec![
            vote(1, 1, Some(10), "B"),
            vote(1, 1, Some(11), "A"),
            vote(1, 2, None, "Y"),
        ];

        let rows = tally(&def, &stored);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].respondent.as_deref(), Some("Respondent 10"));
        assert_eq!(rows[0].counts.len(), 3);
        assert_eq!(rows[0].counts.get("B"), Some(&1));
        assert_eq!(rows[2].respondent, None);
        assert_eq!(rows[2].counts.get("Y"), Some(&1));
        assert_eq!(rows[2].counts.get("Z"), Some(&0));
    }
}
