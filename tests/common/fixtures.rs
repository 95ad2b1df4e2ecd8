//! Test fixtures for creating test data
#![allow(dead_code)]

use sea_orm::{DatabaseConnection, DbErr};
use std::collections::BTreeMap;
use votesite::editor::{self, EditError, NewSurvey};
use votesite::orm::surveys::SurveyKind;
use votesite::survey::{load_survey, SurveyDef};

fn db_err(e: EditError) -> DbErr {
    match e {
        EditError::Db(e) => e,
        other => DbErr::Custom(other.to_string()),
    }
}

/// Single-choice survey with `questions` questions and the given caps.
pub async fn create_single_choice_survey(
    db: &DatabaseConnection,
    questions: usize,
    limits: &[(&str, u32)],
) -> Result<SurveyDef, DbErr> {
    let survey = editor::create_survey(db, NewSurvey::new("Single choice", SurveyKind::SingleChoice))
        .await
        .map_err(db_err)?;
    let text: Vec<String> = (1..=questions).map(|i| format!("Question {}", i)).collect();
    editor::import_questions(db, survey.id, &text.join("\n"), None)
        .await
        .map_err(db_err)?;
    set_limits(db, survey.id, limits).await?;
    reload(db, survey.id).await
}

/// Table survey with standard questions, respondents and optional custom components.
pub async fn create_table_survey(
    db: &DatabaseConnection,
    questions: usize,
    respondents: usize,
    custom: &[&[&str]],
    limits: &[(&str, u32)],
) -> Result<SurveyDef, DbErr> {
    let survey = editor::create_survey(db, NewSurvey::new("Table", SurveyKind::Table))
        .await
        .map_err(db_err)?;

    let text: Vec<String> = (1..=questions).map(|i| format!("Question {}", i)).collect();
    editor::import_questions(db, survey.id, &text.join("\n"), None)
        .await
        .map_err(db_err)?;

    let names: Vec<String> = (1..=respondents).map(|i| format!("Respondent {}", i)).collect();
    editor::import_respondents(db, survey.id, &names.join("\n"))
        .await
        .map_err(db_err)?;

    for (i, letters) in custom.iter().enumerate() {
        let options: BTreeMap<String, String> = letters
            .iter()
            .map(|l| (l.to_string(), format!("Label {}", l)))
            .collect();
        editor::add_custom_component(db, survey.id, &format!("Custom {}", i + 1), options)
            .await
            .map_err(db_err)?;
    }

    set_limits(db, survey.id, limits).await?;
    reload(db, survey.id).await
}

async fn set_limits(db: &DatabaseConnection, survey_id: i32, limits: &[(&str, u32)]) -> Result<(), DbErr> {
    if limits.is_empty() {
        return Ok(());
    }
    let limits = limits.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    editor::set_option_limits(db, survey_id, &limits)
        .await
        .map_err(db_err)
}

pub async fn reload(db: &DatabaseConnection, survey_id: i32) -> Result<SurveyDef, DbErr> {
    load_survey(db, survey_id)
        .await?
        .ok_or_else(|| DbErr::Custom(format!("survey {} vanished", survey_id)))
}

/// Mints a token and signs it in, returning the participant id.
pub async fn create_participant(db: &DatabaseConnection, survey_id: i32) -> Result<i32, DbErr> {
    let tokens = votesite::access::mint_tokens(db, survey_id, 1).await?;
    let login = votesite::access::login_with_token(db, &tokens[0])
        .await?
        .ok_or_else(|| DbErr::Custom("fresh token was rejected".to_string()))?;
    Ok(login.participant_id)
}
