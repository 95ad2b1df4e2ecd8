//! One-shot messages carried in the session across a redirect.

use actix_session::Session;
use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};

const FLASH_KEY: &str = "flash";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
    Success,
    Warning,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

/// Stores a message for the next page the client loads.
pub fn set_flash(session: &Session, level: FlashLevel, message: impl Into<String>) {
    let flash = Flash {
        level,
        message: message.into(),
    };
    if let Err(e) = session.insert(FLASH_KEY, flash) {
        log::error!("set_flash: session.insert() {}", e);
    }
}

/// Removes and returns the pending message, if any.
pub fn take_flash(session: &Session) -> Option<Flash> {
    match session.remove_as::<Flash>(FLASH_KEY) {
        Some(Ok(flash)) => Some(flash),
        Some(Err(raw)) => {
            log::warn!("take_flash: unreadable flash {:?}", raw);
            None
        }
        None => None,
    }
}

/// `302 Found` to `location`.
pub fn redirect(location: impl AsRef<str>) -> HttpResponse {
    HttpResponse::Found()
        .append_header(("Location", location.as_ref()))
        .finish()
}

/// Sets a flash message and redirects.
pub fn redirect_with(
    session: &Session,
    location: impl AsRef<str>,
    level: FlashLevel,
    message: impl Into<String>,
) -> HttpResponse {
    set_flash(session, level, message);
    redirect(location)
}
