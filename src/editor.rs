//! Admin mutations on surveys, questions and respondents.

use crate::orm::questions::{self, ComponentType};
use crate::orm::surveys::{self, SurveyKind};
use crate::orm::{access_tokens, free_text_answers, respondents, votes};
use crate::survey::{self, CustomOptions, OptionLimits};
use chrono::Utc;
use sea_orm::{
    entity::*, query::*, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    TransactionTrait,
};
use std::collections::HashMap;
use std::str::FromStr;

/// Default option count for imported single-choice questions.
pub const DEFAULT_OPTION_COUNT: i32 = 4;

/// Appended to the name of a copied survey.
pub const COPY_SUFFIX: &str = " (copy)";

#[derive(Debug)]
pub enum EditError {
    /// The named thing does not exist.
    NotFound(&'static str),
    /// The request makes no sense for the target; the message is user-facing.
    Invalid(String),
    Db(DbErr),
}

impl std::fmt::Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditError::NotFound(what) => write!(f, "{} not found", what),
            EditError::Invalid(msg) => write!(f, "{}", msg),
            EditError::Db(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for EditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EditError::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbErr> for EditError {
    fn from(e: DbErr) -> Self {
        EditError::Db(e)
    }
}

/// A quota form field that is not a positive whole number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionLimitError {
    pub option: String,
    pub value: String,
}

impl std::fmt::Display for OptionLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Limit for option {} must be a positive whole number, got {:?}",
            self.option, self.value
        )
    }
}

impl std::error::Error for OptionLimitError {}

/// Fields for a new survey.
#[derive(Clone, Debug)]
pub struct NewSurvey {
    pub name: String,
    pub kind: SurveyKind,
    pub introduction: Option<String>,
    pub free_text_prompt: Option<String>,
    pub table_option_count: i32,
    pub enable_quick_fill: bool,
}

impl NewSurvey {
    pub fn new(name: &str, kind: SurveyKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            introduction: None,
            free_text_prompt: None,
            table_option_count: 3,
            enable_quick_fill: true,
        }
    }
}

/// Editable survey settings.
#[derive(Clone, Debug)]
pub struct SurveyInfo {
    pub name: String,
    pub introduction: Option<String>,
    pub free_text_prompt: Option<String>,
    pub enable_quick_fill: bool,
    /// Only applied to table surveys.
    pub table_option_count: Option<i32>,
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn require_name(name: &str) -> Result<String, EditError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EditError::Invalid("Survey name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

pub async fn create_survey(
    db: &DatabaseConnection,
    new: NewSurvey,
) -> Result<surveys::Model, EditError> {
    let survey = surveys::ActiveModel {
        name: Set(require_name(&new.name)?),
        kind: Set(new.kind),
        introduction: Set(non_blank(new.introduction)),
        free_text_prompt: Set(non_blank(new.free_text_prompt)),
        option_limits: Set(None),
        table_option_count: Set(new.table_option_count.clamp(1, 5)),
        enable_quick_fill: Set(new.enable_quick_fill),
        is_active: Set(true),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    log::info!("Created {:?} survey {} ({})", survey.kind, survey.id, survey.name);
    Ok(survey)
}

async fn find_survey<C: ConnectionTrait>(db: &C, survey_id: i32) -> Result<surveys::Model, EditError> {
    surveys::Entity::find_by_id(survey_id)
        .one(db)
        .await?
        .ok_or(EditError::NotFound("Survey"))
}

pub async fn update_survey_info(
    db: &DatabaseConnection,
    survey_id: i32,
    info: SurveyInfo,
) -> Result<surveys::Model, EditError> {
    let survey = find_survey(db, survey_id).await?;
    let kind = survey.kind;

    let mut active: surveys::ActiveModel = survey.into();
    active.name = Set(require_name(&info.name)?);
    active.introduction = Set(non_blank(info.introduction));
    active.free_text_prompt = Set(non_blank(info.free_text_prompt));
    active.enable_quick_fill = Set(info.enable_quick_fill);
    if let (SurveyKind::Table, Some(count)) = (kind, info.table_option_count) {
        active.table_option_count = Set(count.clamp(1, 5));
    }

    Ok(active.update(db).await?)
}

async fn next_order_index<C: ConnectionTrait>(db: &C, survey_id: i32) -> Result<i32, DbErr> {
    let last = questions::Entity::find()
        .filter(questions::Column::SurveyId.eq(survey_id))
        .order_by_desc(questions::Column::OrderIndex)
        .one(db)
        .await?;
    Ok(last.map_or(1, |q| q.order_index + 1))
}

/// Adds one standard question per non-blank line, after the existing ones.
pub async fn import_questions(
    db: &DatabaseConnection,
    survey_id: i32,
    text: &str,
    option_count: Option<i32>,
) -> Result<usize, EditError> {
    let survey = find_survey(db, survey_id).await?;
    let option_count = match survey.kind {
        SurveyKind::SingleChoice => Some(option_count.unwrap_or(DEFAULT_OPTION_COUNT).clamp(2, 5)),
        SurveyKind::Table => None,
    };

    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return Err(EditError::Invalid("No questions given".to_string()));
    }

    let txn = db.begin().await?;
    let mut order_index = next_order_index(&txn, survey_id).await?;
    let now = Utc::now().naive_utc();
    for line in &lines {
        questions::ActiveModel {
            survey_id: Set(survey_id),
            content: Set(line.to_string()),
            option_count: Set(option_count),
            component_type: Set(ComponentType::Standard),
            custom_options: Set(None),
            order_index: Set(order_index),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        order_index += 1;
    }
    txn.commit().await?;

    log::info!("Imported {} questions into survey {}", lines.len(), survey_id);
    Ok(lines.len())
}

/// Adds a single-choice component with its own labelled options.
pub async fn add_custom_component(
    db: &DatabaseConnection,
    survey_id: i32,
    content: &str,
    options: CustomOptions,
) -> Result<questions::Model, EditError> {
    find_survey(db, survey_id).await?;

    let content = content.trim();
    if content.is_empty() {
        return Err(EditError::Invalid("Component text must not be empty".to_string()));
    }
    let options: CustomOptions = options
        .into_iter()
        .map(|(k, v)| (k, v.trim().to_string()))
        .filter(|(_, v)| !v.is_empty())
        .collect();
    if options.is_empty() {
        return Err(EditError::Invalid("At least one option is required".to_string()));
    }

    let encoded = serde_json::to_string(&options)
        .map_err(|e| EditError::Invalid(format!("Unusable options: {}", e)))?;
    let question = questions::ActiveModel {
        survey_id: Set(survey_id),
        content: Set(content.to_string()),
        option_count: Set(Some(options.len() as i32)),
        component_type: Set(ComponentType::CustomSingleChoice),
        custom_options: Set(Some(encoded)),
        order_index: Set(next_order_index(db, survey_id).await?),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(question)
}

/// Collects `option_Z` .. `option_A` form fields into a custom option map.
pub fn custom_options_from_form(fields: &HashMap<String, String>) -> CustomOptions {
    survey::custom_letters()
        .filter_map(|letter| {
            fields
                .get(&format!("option_{}", letter))
                .map(|label| label.trim())
                .filter(|label| !label.is_empty())
                .map(|label| (letter.to_string(), label.to_string()))
        })
        .collect()
}

pub async fn update_question(
    db: &DatabaseConnection,
    question_id: i32,
    content: &str,
) -> Result<questions::Model, EditError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(EditError::Invalid("Question text must not be empty".to_string()));
    }
    let question = questions::Entity::find_by_id(question_id)
        .one(db)
        .await?
        .ok_or(EditError::NotFound("Question"))?;

    let mut active: questions::ActiveModel = question.into();
    active.content = Set(content.to_string());
    Ok(active.update(db).await?)
}

/// Adds one respondent per non-blank line. Table surveys only.
pub async fn import_respondents(
    db: &DatabaseConnection,
    survey_id: i32,
    text: &str,
) -> Result<usize, EditError> {
    let survey = find_survey(db, survey_id).await?;
    if survey.kind != SurveyKind::Table {
        return Err(EditError::Invalid(
            "Respondents only apply to table surveys".to_string(),
        ));
    }

    let names: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let txn = db.begin().await?;
    let now = Utc::now().naive_utc();
    for name in &names {
        respondents::ActiveModel {
            survey_id: Set(survey_id),
            name: Set(name.to_string()),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }
    txn.commit().await?;
    Ok(names.len())
}

/// Deletes a question and its votes, returning the owning survey id.
pub async fn delete_question(db: &DatabaseConnection, question_id: i32) -> Result<i32, EditError> {
    let question = questions::Entity::find_by_id(question_id)
        .one(db)
        .await?
        .ok_or(EditError::NotFound("Question"))?;

    let txn = db.begin().await?;
    votes::Entity::delete_many()
        .filter(votes::Column::QuestionId.eq(question_id))
        .exec(&txn)
        .await?;
    questions::Entity::delete_by_id(question_id).exec(&txn).await?;
    txn.commit().await?;

    Ok(question.survey_id)
}

/// Deletes several questions of one survey and their votes together.
///
/// Every id must exist and belong to `survey_id`; otherwise nothing is
/// deleted. Returns the number of questions removed.
pub async fn delete_questions(
    db: &DatabaseConnection,
    survey_id: i32,
    question_ids: &[i32],
) -> Result<usize, EditError> {
    let mut ids = question_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Err(EditError::Invalid("Select the questions to delete".to_string()));
    }

    let txn = db.begin().await?;
    let found = questions::Entity::find()
        .filter(questions::Column::Id.is_in(ids.clone()))
        .all(&txn)
        .await?;
    if found.len() != ids.len() {
        return Err(EditError::NotFound("Question"));
    }
    if found.iter().any(|q| q.survey_id != survey_id) {
        return Err(EditError::Invalid(
            "Questions from different surveys cannot be deleted together".to_string(),
        ));
    }

    votes::Entity::delete_many()
        .filter(votes::Column::QuestionId.is_in(ids.clone()))
        .exec(&txn)
        .await?;
    questions::Entity::delete_many()
        .filter(questions::Column::Id.is_in(ids.clone()))
        .exec(&txn)
        .await?;
    txn.commit().await?;

    log::info!("Deleted {} questions from survey {}", ids.len(), survey_id);
    Ok(ids.len())
}

/// Deletes a respondent and its votes, returning the owning survey id.
pub async fn delete_respondent(
    db: &DatabaseConnection,
    respondent_id: i32,
) -> Result<i32, EditError> {
    let respondent = respondents::Entity::find_by_id(respondent_id)
        .one(db)
        .await?
        .ok_or(EditError::NotFound("Respondent"))?;

    let txn = db.begin().await?;
    votes::Entity::delete_many()
        .filter(votes::Column::RespondentId.eq(respondent_id))
        .exec(&txn)
        .await?;
    respondents::Entity::delete_by_id(respondent_id)
        .exec(&txn)
        .await?;
    txn.commit().await?;

    Ok(respondent.survey_id)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
    Top,
    Bottom,
}

impl FromStr for MoveDirection {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(MoveDirection::Up),
            "down" => Ok(MoveDirection::Down),
            "top" => Ok(MoveDirection::Top),
            "bottom" => Ok(MoveDirection::Bottom),
            other => Err(EditError::Invalid(format!("Unknown direction {:?}", other))),
        }
    }
}

/// New position of the item at `from` in a list of `len`, or `None` when it
/// cannot move that way.
pub fn move_target(from: usize, len: usize, direction: MoveDirection) -> Option<usize> {
    match direction {
        MoveDirection::Up | MoveDirection::Top if from == 0 => None,
        MoveDirection::Down | MoveDirection::Bottom if from + 1 >= len => None,
        MoveDirection::Up => Some(from - 1),
        MoveDirection::Down => Some(from + 1),
        MoveDirection::Top => Some(0),
        MoveDirection::Bottom => Some(len - 1),
    }
}

/// Moves a question within its survey and renumbers the survey's questions
/// `1..=n` in their new order.
pub async fn move_question(
    db: &DatabaseConnection,
    question_id: i32,
    direction: MoveDirection,
) -> Result<(), EditError> {
    let question = questions::Entity::find_by_id(question_id)
        .one(db)
        .await?
        .ok_or(EditError::NotFound("Question"))?;

    let txn = db.begin().await?;
    let mut ordered = questions::Entity::find()
        .filter(questions::Column::SurveyId.eq(question.survey_id))
        .order_by_asc(questions::Column::OrderIndex)
        .order_by_asc(questions::Column::Id)
        .all(&txn)
        .await?;

    let from = ordered
        .iter()
        .position(|q| q.id == question_id)
        .ok_or(EditError::NotFound("Question"))?;
    let to = move_target(from, ordered.len(), direction)
        .ok_or_else(|| EditError::Invalid("Question cannot move any further".to_string()))?;

    let moved = ordered.remove(from);
    ordered.insert(to, moved);
    renumber(&txn, ordered).await?;
    txn.commit().await?;
    Ok(())
}

async fn renumber(txn: &DatabaseTransaction, ordered: Vec<questions::Model>) -> Result<(), DbErr> {
    for (position, question) in ordered.into_iter().enumerate() {
        let order_index = position as i32 + 1;
        if question.order_index != order_index {
            let mut active: questions::ActiveModel = question.into();
            active.order_index = Set(order_index);
            active.update(txn).await?;
        }
    }
    Ok(())
}

/// Reads `limit_{letter}` fields for the letters this survey offers.
///
/// Blank fields and non-positive numbers leave the letter uncapped.
pub fn parse_option_limits(
    survey: &surveys::Model,
    fields: &HashMap<String, String>,
) -> Result<OptionLimits, OptionLimitError> {
    let letters: &[&str] = match survey.kind {
        SurveyKind::Table => crate::survey::table_letters(survey.table_option_count),
        SurveyKind::SingleChoice => &crate::survey::OPTION_LETTERS,
    };

    let mut limits = OptionLimits::new();
    for letter in letters {
        let raw = match fields.get(&format!("limit_{}", letter)) {
            Some(raw) if !raw.trim().is_empty() => raw.trim(),
            _ => continue,
        };
        let value: i64 = raw.parse().map_err(|_| OptionLimitError {
            option: letter.to_string(),
            value: raw.to_string(),
        })?;
        if value > 0 {
            limits.insert(letter.to_string(), value.min(u32::MAX as i64) as u32);
        }
    }
    Ok(limits)
}

pub async fn set_option_limits(
    db: &DatabaseConnection,
    survey_id: i32,
    limits: &OptionLimits,
) -> Result<(), EditError> {
    let survey = find_survey(db, survey_id).await?;
    let encoded = if limits.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(limits)
                .map_err(|e| EditError::Invalid(format!("Unusable limits: {}", e)))?,
        )
    };

    let mut active: surveys::ActiveModel = survey.into();
    active.option_limits = Set(encoded);
    active.update(db).await?;
    log::info!("Survey {} option limits set to {:?}", survey_id, limits);
    Ok(())
}

/// Copies a survey with its settings, questions and respondents. Votes and
/// tokens stay behind.
pub async fn copy_survey(
    db: &DatabaseConnection,
    survey_id: i32,
) -> Result<surveys::Model, EditError> {
    let source = survey::load_survey(db, survey_id)
        .await?
        .ok_or(EditError::NotFound("Survey"))?;

    let txn = db.begin().await?;
    let now = Utc::now().naive_utc();
    let copy = surveys::ActiveModel {
        name: Set(format!("{}{}", source.survey.name, COPY_SUFFIX)),
        kind: Set(source.survey.kind),
        introduction: Set(source.survey.introduction.clone()),
        free_text_prompt: Set(source.survey.free_text_prompt.clone()),
        option_limits: Set(source.survey.option_limits.clone()),
        table_option_count: Set(source.survey.table_option_count),
        enable_quick_fill: Set(source.survey.enable_quick_fill),
        is_active: Set(source.survey.is_active),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    for question in &source.questions {
        questions::ActiveModel {
            survey_id: Set(copy.id),
            content: Set(question.content.clone()),
            option_count: Set(question.option_count),
            component_type: Set(question.component_type),
            custom_options: Set(question.custom_options.clone()),
            order_index: Set(question.order_index),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    for respondent in &source.respondents {
        respondents::ActiveModel {
            survey_id: Set(copy.id),
            name: Set(respondent.name.clone()),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;
    log::info!("Copied survey {} to {}", survey_id, copy.id);
    Ok(copy)
}

/// Deletes a survey and everything it owns.
pub async fn delete_survey(db: &DatabaseConnection, survey_id: i32) -> Result<(), EditError> {
    find_survey(db, survey_id).await?;

    let txn = db.begin().await?;
    delete_survey_votes(&txn, survey_id).await?;
    questions::Entity::delete_many()
        .filter(questions::Column::SurveyId.eq(survey_id))
        .exec(&txn)
        .await?;
    respondents::Entity::delete_many()
        .filter(respondents::Column::SurveyId.eq(survey_id))
        .exec(&txn)
        .await?;
    access_tokens::Entity::delete_many()
        .filter(access_tokens::Column::SurveyId.eq(survey_id))
        .exec(&txn)
        .await?;
    surveys::Entity::delete_by_id(survey_id).exec(&txn).await?;
    txn.commit().await?;

    log::info!("Deleted survey {}", survey_id);
    Ok(())
}

/// Removes every vote and free-text answer of a survey. Returns rows removed.
pub(crate) async fn delete_survey_votes<C: ConnectionTrait>(
    db: &C,
    survey_id: i32,
) -> Result<u64, DbErr> {
    let question_ids: Vec<i32> = questions::Entity::find()
        .filter(questions::Column::SurveyId.eq(survey_id))
        .all(db)
        .await?
        .into_iter()
        .map(|q| q.id)
        .collect();

    let mut removed = 0;
    if !question_ids.is_empty() {
        removed += votes::Entity::delete_many()
            .filter(votes::Column::QuestionId.is_in(question_ids))
            .exec(db)
            .await?
            .rows_affected;
    }
    removed += free_text_answers::Entity::delete_many()
        .filter(free_text_answers::Column::SurveyId.eq(survey_id))
        .exec(db)
        .await?
        .rows_affected;
    Ok(removed)
}
