//! Survey aggregate: a survey with its ordered questions and respondent rows.

use crate::orm::questions::{self, ComponentType};
use crate::orm::surveys::{self, SurveyKind};
use crate::orm::respondents;
use sea_orm::{entity::*, query::*, ConnectionTrait, DbErr};
use std::collections::BTreeMap;

/// Option letters available to standard questions, in display order.
pub const OPTION_LETTERS: [&str; 5] = ["A", "B", "C", "D", "E"];

/// Letters offered to custom components, listed from `Z` down to `A`.
pub fn custom_letters() -> impl Iterator<Item = char> {
    ('A'..='Z').rev()
}

/// Option letter to maximum selection count.
pub type OptionLimits = BTreeMap<String, u32>;

/// Option letter to display label for a custom component.
pub type CustomOptions = BTreeMap<String, String>;

/// A survey loaded together with everything needed to render and validate it.
#[derive(Clone, Debug)]
pub struct SurveyDef {
    pub survey: surveys::Model,
    /// Sorted by `(order_index, id)`.
    pub questions: Vec<questions::Model>,
    /// Sorted by id.
    pub respondents: Vec<respondents::Model>,
}

impl SurveyDef {
    pub fn id(&self) -> i32 {
        self.survey.id
    }

    pub fn kind(&self) -> SurveyKind {
        self.survey.kind
    }

    /// Caps configured for this survey. An unreadable value counts as no caps.
    pub fn option_limits(&self) -> OptionLimits {
        parse_limits_json(self.survey.option_limits.as_deref()).unwrap_or_else(|e| {
            log::warn!(
                "Survey {} has unreadable option limits, ignoring them: {}",
                self.survey.id,
                e
            );
            OptionLimits::new()
        })
    }

    pub fn has_free_text_prompt(&self) -> bool {
        self.survey
            .free_text_prompt
            .as_deref()
            .map_or(false, |p| !p.trim().is_empty())
    }

    /// Questions whose answers count toward option caps.
    pub fn standard_questions(&self) -> impl Iterator<Item = &questions::Model> {
        self.questions.iter().filter(|q| !is_custom(q))
    }

    pub fn custom_questions(&self) -> impl Iterator<Item = &questions::Model> {
        self.questions.iter().filter(|q| is_custom(q))
    }

    /// Letters a standard answer may take.
    pub fn option_letters(&self) -> &'static [&'static str] {
        match self.survey.kind {
            SurveyKind::Table => table_letters(self.survey.table_option_count),
            SurveyKind::SingleChoice => &OPTION_LETTERS,
        }
    }
}

/// First `count` option letters, clamped to the available range.
pub fn table_letters(count: i32) -> &'static [&'static str] {
    let count = count.clamp(1, OPTION_LETTERS.len() as i32) as usize;
    &OPTION_LETTERS[..count]
}

/// A question is custom if it is typed so or carries its own option labels.
pub fn is_custom(question: &questions::Model) -> bool {
    question.component_type == ComponentType::CustomSingleChoice
        || !custom_options(question).is_empty()
}

/// Custom option labels of a question. Unreadable JSON yields no labels.
pub fn custom_options(question: &questions::Model) -> CustomOptions {
    match question.custom_options.as_deref() {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).unwrap_or_else(|e| {
            log::warn!(
                "Question {} has unreadable custom options: {}",
                question.id,
                e
            );
            CustomOptions::new()
        }),
        _ => CustomOptions::new(),
    }
}

pub fn parse_limits_json(raw: Option<&str>) -> Result<OptionLimits, serde_json::Error> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw),
        _ => Ok(OptionLimits::new()),
    }
}

/// Loads a survey with its questions in display order, or `None` if it does not exist.
pub async fn load_survey<C>(db: &C, survey_id: i32) -> Result<Option<SurveyDef>, DbErr>
where
    C: ConnectionTrait,
{
    let survey = match surveys::Entity::find_by_id(survey_id).one(db).await? {
        Some(survey) => survey,
        None => return Ok(None),
    };

    let questions = questions::Entity::find()
        .filter(questions::Column::SurveyId.eq(survey_id))
        .order_by_asc(questions::Column::OrderIndex)
        .order_by_asc(questions::Column::Id)
        .all(db)
        .await?;

    let respondents = respondents::Entity::find()
        .filter(respondents::Column::SurveyId.eq(survey_id))
        .order_by_asc(respondents::Column::Id)
        .all(db)
        .await?;

    Ok(Some(SurveyDef {
        survey,
        questions,
        respondents,
    }))
}

/// Surveys open for voting, newest first.
pub async fn active_surveys<C>(db: &C) -> Result<Vec<surveys::Model>, DbErr>
where
    C: ConnectionTrait,
{
    surveys::Entity::find()
        .filter(surveys::Column::IsActive.eq(true))
        .order_by_desc(surveys::Column::CreatedAt)
        .all(db)
        .await
}
