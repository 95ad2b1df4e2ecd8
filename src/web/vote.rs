//! Participant routes: token sign-in, the vote page and vote submission.

use super::flash::{redirect, redirect_with, take_flash, Flash, FlashLevel};
use crate::access;
use crate::orm::questions::ComponentType;
use crate::orm::surveys::SurveyKind;
use crate::survey::{self, CustomOptions, OptionLimits, SurveyDef};
use crate::vote::{self, merge_tally, OptionTally, Submission, VoteQueue};
use actix_session::Session;
use actix_web::{error, get, post, web, Error, HttpResponse, Responder};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::BTreeMap;

pub const PARTICIPANT_KEY: &str = "participant_id";

pub(super) fn configure(conf: &mut actix_web::web::ServiceConfig) {
    conf.service(view_index)
        .service(view_login)
        .service(view_vote)
        .service(submit_vote)
        .service(view_thank_you);
}

fn saved_choices_key(survey_id: i32) -> String {
    format!("saved_choices_{}", survey_id)
}

/// Participant id of the signed-in session.
pub fn require_participant(session: &Session) -> Result<i32, Error> {
    match session.get::<i32>(PARTICIPANT_KEY) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(error::ErrorUnauthorized(
            "Scan your QR code to sign in first.",
        )),
        Err(e) => {
            log::error!("require_participant: session.get() {}", e);
            Err(error::ErrorUnauthorized(
                "Scan your QR code to sign in first.",
            ))
        }
    }
}

/// Loads a survey or answers 404.
pub(super) async fn find_survey(db: &DatabaseConnection, survey_id: i32) -> Result<SurveyDef, Error> {
    survey::load_survey(db, survey_id)
        .await
        .map_err(|e| {
            log::error!("find_survey: load_survey() {}", e);
            error::ErrorInternalServerError("Could not load survey.")
        })?
        .ok_or_else(|| error::ErrorNotFound("Survey not found."))
}

#[derive(Serialize)]
struct SurveySummary {
    id: i32,
    name: String,
    kind: SurveyKind,
}

#[get("/")]
pub async fn view_index(db: web::Data<DatabaseConnection>) -> Result<impl Responder, Error> {
    let surveys = survey::active_surveys(db.get_ref()).await.map_err(|e| {
        log::error!("view_index: active_surveys() {}", e);
        error::ErrorInternalServerError("Could not list surveys.")
    })?;

    let summaries: Vec<SurveySummary> = surveys
        .into_iter()
        .map(|s| SurveySummary {
            id: s.id,
            name: s.name,
            kind: s.kind,
        })
        .collect();
    Ok(HttpResponse::Ok().json(summaries))
}

#[get("/login/{token}")]
pub async fn view_login(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let token = path.into_inner();
    let login = access::login_with_token(db.get_ref(), &token)
        .await
        .map_err(|e| {
            log::error!("view_login: login_with_token() {}", e);
            error::ErrorInternalServerError("Could not sign in.")
        })?;

    match login {
        Some(login) => {
            session.renew();
            session
                .insert(PARTICIPANT_KEY, login.participant_id)
                .map_err(|_| error::ErrorInternalServerError("Failed to start session."))?;
            Ok(redirect(format!("/vote/{}", login.survey_id)))
        }
        None => {
            log::info!("view_login: unknown token presented");
            Ok(redirect_with(
                &session,
                "/thank_you",
                FlashLevel::Danger,
                "This QR code is not valid.",
            ))
        }
    }
}

#[derive(Serialize)]
struct QuestionView {
    id: i32,
    content: String,
    component_type: ComponentType,
    option_count: Option<i32>,
    custom_options: CustomOptions,
}

#[derive(Serialize)]
struct RespondentView {
    id: i32,
    name: String,
}

#[derive(Serialize)]
struct VotePage {
    survey_id: i32,
    name: String,
    kind: SurveyKind,
    introduction: Option<String>,
    free_text_prompt: Option<String>,
    enable_quick_fill: bool,
    option_letters: Vec<&'static str>,
    option_limits: OptionLimits,
    questions: Vec<QuestionView>,
    respondents: Vec<RespondentView>,
    /// Field name to value from the last rejected submission.
    saved_choices: BTreeMap<String, String>,
    flash: Option<Flash>,
}

#[get("/vote/{survey_id}")]
pub async fn view_vote(
    db: web::Data<DatabaseConnection>,
    session: Session,
    path: web::Path<i32>,
) -> Result<impl Responder, Error> {
    require_participant(&session)?;
    let def = find_survey(db.get_ref(), path.into_inner()).await?;

    let saved_choices = session
        .get::<BTreeMap<String, String>>(&saved_choices_key(def.id()))
        .unwrap_or_else(|e| {
            log::warn!("view_vote: unreadable saved choices {}", e);
            None
        })
        .unwrap_or_default();

    let page = VotePage {
        survey_id: def.id(),
        name: def.survey.name.clone(),
        kind: def.kind(),
        introduction: def.survey.introduction.clone(),
        free_text_prompt: def.survey.free_text_prompt.clone(),
        enable_quick_fill: def.survey.enable_quick_fill,
        option_letters: def.option_letters().to_vec(),
        option_limits: def.option_limits(),
        questions: def
            .questions
            .iter()
            .map(|q| QuestionView {
                id: q.id,
                content: q.content.clone(),
                component_type: q.component_type,
                option_count: q.option_count,
                custom_options: survey::custom_options(q),
            })
            .collect(),
        respondents: def
            .respondents
            .iter()
            .map(|r| RespondentView {
                id: r.id,
                name: r.name.clone(),
            })
            .collect(),
        saved_choices,
        flash: take_flash(&session),
    };
    Ok(HttpResponse::Ok().json(page))
}

#[post("/submit_vote/{survey_id}")]
pub async fn submit_vote(
    db: web::Data<DatabaseConnection>,
    queue: web::Data<VoteQueue>,
    session: Session,
    path: web::Path<i32>,
    form: web::Form<Vec<(String, String)>>,
) -> Result<HttpResponse, Error> {
    let participant_id = require_participant(&session)?;
    let def = find_survey(db.get_ref(), path.into_inner()).await?;
    let submission = Submission::from_form(form.into_inner());
    let saved_key = saved_choices_key(def.id());

    // Kept until a submission is accepted so the page can be re-filled.
    if let Err(e) = session.insert(&saved_key, submission.to_form_fields()) {
        log::warn!("submit_vote: could not save choices {}", e);
    }

    // Capped surveys check and enqueue one submission at a time, counting
    // stored votes and batches still waiting in the queue.
    let capped = !def.option_limits().is_empty();
    let _admission = if capped {
        Some(queue.admit().await)
    } else {
        None
    };
    let committed = if capped {
        // Queued first: a batch committed in between is then counted twice,
        // never missed.
        let mut tally = queue.pending_tally(def.id(), participant_id);
        let stored = vote::committed_tally(db.get_ref(), &def, participant_id)
            .await
            .map_err(|e| {
                log::error!("submit_vote: committed_tally() {}", e);
                error::ErrorInternalServerError("Could not check option limits.")
            })?;
        merge_tally(&mut tally, &stored);
        tally
    } else {
        OptionTally::new()
    };

    match vote::validate_and_assemble(&def, participant_id, &submission, &committed) {
        Ok(batch) => {
            queue.enqueue_for_persistence(batch);
            session.remove(&saved_key);
            Ok(redirect_with(
                &session,
                "/thank_you",
                FlashLevel::Success,
                "Thank you, your answers were submitted.",
            ))
        }
        Err(e) => {
            log::debug!(
                "submit_vote: rejected participant_id={}, survey_id={}: {}",
                participant_id,
                def.id(),
                e
            );
            Ok(redirect_with(
                &session,
                format!("/vote/{}", def.id()),
                FlashLevel::Danger,
                e.to_string(),
            ))
        }
    }
}

#[derive(Serialize)]
struct ThankYouPage {
    flash: Option<Flash>,
}

#[get("/thank_you")]
pub async fn view_thank_you(session: Session) -> impl Responder {
    HttpResponse::Ok().json(ThankYouPage {
        flash: take_flash(&session),
    })
}
