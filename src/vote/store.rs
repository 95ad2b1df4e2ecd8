//! Persistence seam for the vote writer.

use super::quota::OptionTally;
use super::VoteBatch;
use crate::orm::surveys::{self, SurveyKind};
use crate::orm::{free_text_answers, questions, votes};
use crate::survey::SurveyDef;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    entity::*, query::*, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    TransactionTrait,
};

/// Storage operations the [`super::DurableWriter`] depends on.
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Kind of the survey, or `None` when it no longer exists.
    async fn survey_kind(&self, survey_id: i32) -> Result<Option<SurveyKind>, DbErr>;

    /// Replaces every vote and the free-text answer the participant holds for
    /// the survey with the contents of `batch`, all or nothing.
    async fn replace_votes(&self, kind: SurveyKind, batch: &VoteBatch) -> Result<(), DbErr>;
}

/// [`VoteStore`] backed by the application database.
#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VoteStore for SeaOrmStore {
    async fn survey_kind(&self, survey_id: i32) -> Result<Option<SurveyKind>, DbErr> {
        Ok(surveys::Entity::find_by_id(survey_id)
            .one(&self.db)
            .await?
            .map(|s| s.kind))
    }

    async fn replace_votes(&self, kind: SurveyKind, batch: &VoteBatch) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;

        let written = write_batch(&txn, kind, batch).await;
        match written {
            Ok(()) => txn.commit().await,
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    log::warn!(
                        "Rollback failed for participant_id={}, survey_id={}: {}",
                        batch.participant_id,
                        batch.survey_id,
                        rollback_err
                    );
                }
                Err(e)
            }
        }
    }
}

async fn write_batch(
    txn: &DatabaseTransaction,
    kind: SurveyKind,
    batch: &VoteBatch,
) -> Result<(), DbErr> {
    let question_ids: Vec<i32> = questions::Entity::find()
        .filter(questions::Column::SurveyId.eq(batch.survey_id))
        .all(txn)
        .await?
        .into_iter()
        .map(|q| q.id)
        .collect();

    if !question_ids.is_empty() {
        votes::Entity::delete_many()
            .filter(votes::Column::ParticipantId.eq(batch.participant_id))
            .filter(votes::Column::QuestionId.is_in(question_ids))
            .exec(txn)
            .await?;
    }

    free_text_answers::Entity::delete_many()
        .filter(free_text_answers::Column::ParticipantId.eq(batch.participant_id))
        .filter(free_text_answers::Column::SurveyId.eq(batch.survey_id))
        .exec(txn)
        .await?;

    let now = Utc::now().naive_utc();

    for (question_id, choice) in &batch.single_choice_entries {
        votes::ActiveModel {
            participant_id: Set(batch.participant_id),
            question_id: Set(*question_id),
            respondent_id: Set(None),
            choice: Set(choice.clone()),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await?;
    }

    // Single-choice surveys have no respondent axis.
    if kind == SurveyKind::Table {
        for (question_id, respondent_id, choice) in &batch.grid_entries {
            votes::ActiveModel {
                participant_id: Set(batch.participant_id),
                question_id: Set(*question_id),
                respondent_id: Set(Some(*respondent_id)),
                choice: Set(choice.clone()),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(txn)
            .await?;
        }
    } else if !batch.grid_entries.is_empty() {
        log::warn!(
            "Ignoring {} grid entries for single-choice survey {}",
            batch.grid_entries.len(),
            batch.survey_id
        );
    }

    if let Some(content) = &batch.free_text {
        free_text_answers::ActiveModel {
            participant_id: Set(batch.participant_id),
            survey_id: Set(batch.survey_id),
            content: Set(Some(content.clone())),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await?;
    }

    Ok(())
}

/// Standard-question votes already stored for the survey, counted per
/// letter, leaving out `participant_id` whose votes a resubmission replaces.
pub async fn committed_tally<C>(
    db: &C,
    survey: &SurveyDef,
    participant_id: i32,
) -> Result<OptionTally, DbErr>
where
    C: ConnectionTrait,
{
    let mut tally = OptionTally::new();
    let standard_ids: Vec<i32> = survey.standard_questions().map(|q| q.id).collect();
    if standard_ids.is_empty() {
        return Ok(tally);
    }

    let stored = votes::Entity::find()
        .filter(votes::Column::QuestionId.is_in(standard_ids))
        .filter(votes::Column::ParticipantId.ne(participant_id))
        .all(db)
        .await?;

    for vote in stored {
        *tally.entry(vote.choice).or_insert(0) += 1;
    }
    Ok(tally)
}
