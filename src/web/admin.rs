//! Administration routes, gated by a shared key.

use super::flash::{redirect, redirect_with, take_flash, Flash, FlashLevel};
use super::vote::find_survey;
use crate::access;
use crate::app_config;
use crate::editor::{self, EditError, MoveDirection, NewSurvey, SurveyInfo};
use crate::orm::surveys::{self, SurveyKind};
use crate::results::{self, SurveyCounts};
use crate::survey;
use actix_session::Session;
use actix_web::{error, get, post, web, Error, HttpResponse, Responder};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

pub const ADMIN_KEY: &str = "is_admin";

/// Tokens minted by one request.
pub const MAX_TOKENS_PER_REQUEST: u32 = 1000;

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(view_admin_login)
        .service(view_admin)
        .service(create_survey)
        .service(view_survey)
        .service(update_survey_info)
        .service(import_questions)
        .service(delete_questions)
        .service(add_custom_component)
        .service(import_respondents)
        .service(set_option_limits)
        .service(mint_tokens)
        .service(copy_survey)
        .service(delete_survey)
        .service(view_results)
        .service(delete_results)
        .service(update_question)
        .service(delete_question)
        .service(move_question)
        .service(delete_respondent);
}

/// Bounces anyone without an admin session to the thank-you page.
pub fn require_admin(session: &Session) -> Result<(), Error> {
    match session.get::<bool>(ADMIN_KEY) {
        Ok(Some(true)) => Ok(()),
        Ok(_) => Err(error::InternalError::from_response(
            "Admin session required",
            redirect("/thank_you"),
        )
        .into()),
        Err(e) => {
            log::error!("require_admin: session.get() {}", e);
            Err(error::ErrorForbidden("Admin session required"))
        }
    }
}

fn edit_page(survey_id: i32) -> String {
    format!("/admin/surveys/{}", survey_id)
}

/// Turns an editor failure into a flash on the survey page, or a server error.
fn edit_failed(session: &Session, survey_id: i32, e: EditError) -> Result<HttpResponse, Error> {
    match e {
        EditError::Db(e) => {
            log::error!("admin edit on survey {}: {}", survey_id, e);
            Err(error::ErrorInternalServerError("Database error."))
        }
        EditError::NotFound(what) => Err(error::ErrorNotFound(format!("{} not found.", what))),
        EditError::Invalid(message) => Ok(redirect_with(
            session,
            edit_page(survey_id),
            FlashLevel::Danger,
            message,
        )),
    }
}

fn db_error(context: &'static str) -> impl Fn(sea_orm::DbErr) -> Error {
    move |e| {
        log::error!("{}: {}", context, e);
        error::ErrorInternalServerError("Database error.")
    }
}

#[derive(Deserialize)]
pub struct AdminLoginQuery {
    #[serde(default)]
    k: String,
}

#[get("/admin_login")]
pub async fn view_admin_login(
    session: Session,
    query: web::Query<AdminLoginQuery>,
) -> Result<HttpResponse, Error> {
    let gate = app_config::admin();
    if query.k.is_empty() || query.k != gate.gate_key {
        log::warn!("view_admin_login: rejected admin key");
        return Ok(redirect_with(
            &session,
            "/thank_you",
            FlashLevel::Danger,
            "Access denied.",
        ));
    }

    session
        .insert(ADMIN_KEY, true)
        .map_err(|_| error::ErrorInternalServerError("Failed to start session."))?;
    Ok(redirect("/admin"))
}

#[derive(Serialize)]
struct SurveyListing {
    #[serde(flatten)]
    survey: surveys::Model,
    counts: SurveyCounts,
}

#[derive(Serialize)]
struct AdminPage {
    surveys: Vec<SurveyListing>,
    flash: Option<Flash>,
}

#[get("/admin")]
pub async fn view_admin(
    db: web::Data<DatabaseConnection>,
    session: Session,
) -> Result<impl Responder, Error> {
    require_admin(&session)?;
    let db = db.get_ref();

    let active = survey::active_surveys(db)
        .await
        .map_err(db_error("view_admin: active_surveys()"))?;

    let mut listings = Vec::with_capacity(active.len());
    for model in active {
        let def = find_survey(db, model.id).await?;
        let counts = results::survey_counts(db, &def)
            .await
            .map_err(db_error("view_admin: survey_counts()"))?;
        listings.push(SurveyListing {
            survey: model,
            counts,
        });
    }

    Ok(HttpResponse::Ok().json(AdminPage {
        surveys: listings,
        flash: take_flash(&session),
    }))
}

fn checkbox(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("on") | Some("true") | Some("1"))
}

#[derive(Deserialize, Validate)]
pub struct CreateSurveyForm {
    #[validate(length(min = 1, max = 200))]
    survey_name: String,
    survey_type: SurveyKind,
    survey_introduction: Option<String>,
    subjective_question_prompt: Option<String>,
    #[validate(range(min = 1, max = 5))]
    table_option_count: Option<i32>,
    enable_quick_fill: Option<String>,
}

#[post("/admin/surveys")]
pub async fn create_survey(
    db: web::Data<DatabaseConnection>,
    session: Session,
    form: web::Form<CreateSurveyForm>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    form.validate().map_err(|e| {
        log::debug!("create_survey: validation failed: {}", e);
        error::ErrorBadRequest("Invalid survey data")
    })?;

    let form = form.into_inner();
    let new = NewSurvey {
        name: form.survey_name,
        kind: form.survey_type,
        introduction: form.survey_introduction,
        free_text_prompt: form.subjective_question_prompt,
        table_option_count: form.table_option_count.unwrap_or(3),
        enable_quick_fill: checkbox(&form.enable_quick_fill),
    };

    match editor::create_survey(db.get_ref(), new).await {
        Ok(created) => Ok(redirect_with(
            &session,
            edit_page(created.id),
            FlashLevel::Success,
            "Survey created.",
        )),
        Err(EditError::Invalid(message)) => Ok(redirect_with(
            &session,
            "/admin",
            FlashLevel::Danger,
            message,
        )),
        Err(e) => edit_failed(&session, 0, e),
    }
}

#[derive(Serialize)]
struct SurveyEditPage {
    survey: surveys::Model,
    questions: Vec<crate::orm::questions::Model>,
    respondents: Vec<crate::orm::respondents::Model>,
    option_letters: Vec<&'static str>,
    option_limits: survey::OptionLimits,
    flash: Option<Flash>,
}

#[get("/admin/surveys/{survey_id}")]
pub async fn view_survey(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
) -> Result<impl Responder, Error> {
    require_admin(&session)?;
    let def = find_survey(db.get_ref(), path.into_inner()).await?;

    Ok(HttpResponse::Ok().json(SurveyEditPage {
        option_letters: def.option_letters().to_vec(),
        option_limits: def.option_limits(),
        survey: def.survey,
        questions: def.questions,
        respondents: def.respondents,
        flash: take_flash(&session),
    }))
}

#[derive(Deserialize, Validate)]
pub struct SurveyInfoForm {
    #[validate(length(min = 1, max = 200))]
    survey_name: String,
    survey_introduction: Option<String>,
    subjective_question_prompt: Option<String>,
    #[validate(range(min = 1, max = 5))]
    table_option_count: Option<i32>,
    enable_quick_fill: Option<String>,
}

#[post("/admin/surveys/{survey_id}/info")]
pub async fn update_survey_info(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
    form: web::Form<SurveyInfoForm>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let survey_id = path.into_inner();
    form.validate().map_err(|e| {
        log::debug!("update_survey_info: validation failed: {}", e);
        error::ErrorBadRequest("Invalid survey data")
    })?;

    let form = form.into_inner();
    let info = SurveyInfo {
        enable_quick_fill: checkbox(&form.enable_quick_fill),
        name: form.survey_name,
        introduction: form.survey_introduction,
        free_text_prompt: form.subjective_question_prompt,
        table_option_count: form.table_option_count,
    };

    match editor::update_survey_info(db.get_ref(), survey_id, info).await {
        Ok(_) => Ok(redirect_with(
            &session,
            edit_page(survey_id),
            FlashLevel::Success,
            "Survey updated.",
        )),
        Err(e) => edit_failed(&session, survey_id, e),
    }
}

#[derive(Deserialize, Validate)]
pub struct ImportQuestionsForm {
    #[validate(length(min = 1, max = 100000))]
    questions: String,
    #[validate(range(min = 2, max = 5))]
    option_count: Option<i32>,
}

#[post("/admin/surveys/{survey_id}/questions")]
pub async fn import_questions(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
    form: web::Form<ImportQuestionsForm>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let survey_id = path.into_inner();
    if let Err(e) = form.validate() {
        log::debug!("import_questions: validation failed: {}", e);
        return Ok(redirect_with(
            &session,
            edit_page(survey_id),
            FlashLevel::Danger,
            "Enter at least one question.",
        ));
    }

    match editor::import_questions(db.get_ref(), survey_id, &form.questions, form.option_count)
        .await
    {
        Ok(count) => Ok(redirect_with(
            &session,
            edit_page(survey_id),
            FlashLevel::Success,
            format!("Imported {} questions.", count),
        )),
        Err(e) => edit_failed(&session, survey_id, e),
    }
}

/// Repeated `question_ids` fields.
#[post("/admin/surveys/{survey_id}/questions/delete")]
pub async fn delete_questions(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
    form: web::Form<Vec<(String, String)>>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let survey_id = path.into_inner();

    let ids: Result<Vec<i32>, _> = form
        .iter()
        .filter(|(name, _)| name == "question_ids")
        .map(|(_, value)| value.trim().parse::<i32>())
        .collect();
    let ids = match ids {
        Ok(ids) => ids,
        Err(e) => {
            log::debug!("delete_questions: bad question id: {}", e);
            return Ok(redirect_with(
                &session,
                edit_page(survey_id),
                FlashLevel::Danger,
                "Invalid question selection.",
            ));
        }
    };

    match editor::delete_questions(db.get_ref(), survey_id, &ids).await {
        Ok(count) => Ok(redirect_with(
            &session,
            edit_page(survey_id),
            FlashLevel::Success,
            format!("Deleted {} questions.", count),
        )),
        Err(EditError::NotFound(_)) => Ok(redirect_with(
            &session,
            edit_page(survey_id),
            FlashLevel::Danger,
            "Some of the selected questions no longer exist.",
        )),
        Err(e) => edit_failed(&session, survey_id, e),
    }
}

/// `content` plus `option_Z` .. `option_A` labels.
#[post("/admin/surveys/{survey_id}/custom_component")]
pub async fn add_custom_component(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
    form: web::Form<HashMap<String, String>>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let survey_id = path.into_inner();
    let content = form.get("content").cloned().unwrap_or_default();
    let options = editor::custom_options_from_form(&form);

    match editor::add_custom_component(db.get_ref(), survey_id, &content, options).await {
        Ok(_) => Ok(redirect_with(
            &session,
            edit_page(survey_id),
            FlashLevel::Success,
            "Component added.",
        )),
        Err(e) => edit_failed(&session, survey_id, e),
    }
}

#[derive(Deserialize)]
pub struct ImportRespondentsForm {
    respondents: String,
}

#[post("/admin/surveys/{survey_id}/respondents")]
pub async fn import_respondents(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
    form: web::Form<ImportRespondentsForm>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let survey_id = path.into_inner();

    match editor::import_respondents(db.get_ref(), survey_id, &form.respondents).await {
        Ok(count) => Ok(redirect_with(
            &session,
            edit_page(survey_id),
            FlashLevel::Success,
            format!("Added {} respondents.", count),
        )),
        Err(e) => edit_failed(&session, survey_id, e),
    }
}

/// `limit_A` .. `limit_E`; blank or non-positive means uncapped.
#[post("/admin/surveys/{survey_id}/option_limits")]
pub async fn set_option_limits(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
    form: web::Form<HashMap<String, String>>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let def = find_survey(db.get_ref(), path.into_inner()).await?;

    let limits = match editor::parse_option_limits(&def.survey, &form) {
        Ok(limits) => limits,
        Err(e) => {
            return Ok(redirect_with(
                &session,
                edit_page(def.id()),
                FlashLevel::Danger,
                e.to_string(),
            ))
        }
    };

    match editor::set_option_limits(db.get_ref(), def.id(), &limits).await {
        Ok(()) => Ok(redirect_with(
            &session,
            edit_page(def.id()),
            FlashLevel::Success,
            "Option limits saved.",
        )),
        Err(e) => edit_failed(&session, def.id(), e),
    }
}

#[derive(Deserialize, Validate)]
pub struct MintTokensForm {
    #[validate(range(min = 1, max = 1000))]
    num_users: u32,
}

#[derive(Serialize)]
struct MintedTokens {
    survey_id: i32,
    tokens: Vec<String>,
    login_urls: Vec<String>,
}

#[post("/admin/surveys/{survey_id}/tokens")]
pub async fn mint_tokens(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
    form: web::Form<MintTokensForm>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    form.validate().map_err(|e| {
        log::debug!("mint_tokens: validation failed: {}", e);
        error::ErrorBadRequest(format!(
            "Ask for between 1 and {} tokens.",
            MAX_TOKENS_PER_REQUEST
        ))
    })?;
    let def = find_survey(db.get_ref(), path.into_inner()).await?;

    let tokens = access::mint_tokens(db.get_ref(), def.id(), form.num_users)
        .await
        .map_err(db_error("mint_tokens: mint_tokens()"))?;

    let config = app_config::get_config();
    let login_urls = tokens.iter().map(|t| config.login_url(t)).collect();
    Ok(HttpResponse::Ok().json(MintedTokens {
        survey_id: def.id(),
        tokens,
        login_urls,
    }))
}

#[post("/admin/surveys/{survey_id}/copy")]
pub async fn copy_survey(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let survey_id = path.into_inner();

    match editor::copy_survey(db.get_ref(), survey_id).await {
        Ok(copy) => Ok(redirect_with(
            &session,
            edit_page(copy.id),
            FlashLevel::Success,
            "Survey copied.",
        )),
        Err(e) => edit_failed(&session, survey_id, e),
    }
}

#[post("/admin/surveys/{survey_id}/delete")]
pub async fn delete_survey(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let survey_id = path.into_inner();

    match editor::delete_survey(db.get_ref(), survey_id).await {
        Ok(()) => Ok(redirect_with(
            &session,
            "/admin",
            FlashLevel::Success,
            "Survey deleted.",
        )),
        Err(e) => edit_failed(&session, survey_id, e),
    }
}

#[get("/admin/surveys/{survey_id}/results")]
pub async fn view_results(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
) -> Result<impl Responder, Error> {
    require_admin(&session)?;
    let def = find_survey(db.get_ref(), path.into_inner()).await?;

    let results = results::survey_results(db.get_ref(), &def)
        .await
        .map_err(db_error("view_results: survey_results()"))?;
    Ok(HttpResponse::Ok().json(results))
}

#[post("/admin/surveys/{survey_id}/results/delete")]
pub async fn delete_results(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let def = find_survey(db.get_ref(), path.into_inner()).await?;

    let removed = results::delete_results(db.get_ref(), def.id())
        .await
        .map_err(db_error("delete_results: delete_results()"))?;
    Ok(redirect_with(
        &session,
        format!("/admin/surveys/{}/results", def.id()),
        FlashLevel::Success,
        format!("Deleted {} result rows.", removed),
    ))
}

#[derive(Deserialize)]
pub struct UpdateQuestionForm {
    content: String,
}

#[post("/admin/questions/{question_id}")]
pub async fn update_question(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
    form: web::Form<UpdateQuestionForm>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;

    match editor::update_question(db.get_ref(), path.into_inner(), &form.content).await {
        Ok(question) => Ok(redirect_with(
            &session,
            edit_page(question.survey_id),
            FlashLevel::Success,
            "Question updated.",
        )),
        Err(EditError::Invalid(message)) => Err(error::ErrorBadRequest(message)),
        Err(e) => edit_failed(&session, 0, e),
    }
}

#[post("/admin/questions/{question_id}/delete")]
pub async fn delete_question(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;

    match editor::delete_question(db.get_ref(), path.into_inner()).await {
        Ok(survey_id) => Ok(redirect_with(
            &session,
            edit_page(survey_id),
            FlashLevel::Success,
            "Question deleted.",
        )),
        Err(e) => edit_failed(&session, 0, e),
    }
}

#[derive(Serialize)]
struct MoveResult {
    success: bool,
    message: String,
}

#[post("/admin/questions/{question_id}/move/{direction}")]
pub async fn move_question(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<(i32, String)>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;
    let (question_id, direction) = path.into_inner();

    let outcome = match direction.parse::<MoveDirection>() {
        Ok(direction) => editor::move_question(db.get_ref(), question_id, direction).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => Ok(HttpResponse::Ok().json(MoveResult {
            success: true,
            message: "Question moved.".to_string(),
        })),
        Err(EditError::Invalid(message)) => Ok(HttpResponse::BadRequest().json(MoveResult {
            success: false,
            message,
        })),
        Err(EditError::NotFound(what)) => Ok(HttpResponse::NotFound().json(MoveResult {
            success: false,
            message: format!("{} not found.", what),
        })),
        Err(EditError::Db(e)) => {
            log::error!("move_question: {}", e);
            Err(error::ErrorInternalServerError("Database error."))
        }
    }
}

#[post("/admin/respondents/{respondent_id}/delete")]
pub async fn delete_respondent(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
) -> Result<HttpResponse, Error> {
    require_admin(&session)?;

    match editor::delete_respondent(db.get_ref(), path.into_inner()).await {
        Ok(survey_id) => Ok(redirect_with(
            &session,
            edit_page(survey_id),
            FlashLevel::Success,
            "Respondent deleted.",
        )),
        Err(e) => edit_failed(&session, 0, e),
    }
}
