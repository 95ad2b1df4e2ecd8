//! QR access tokens and the participants they sign in.

use crate::orm::{access_tokens, participants};
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use sea_orm::{entity::*, query::*, DatabaseConnection, DbErr, TransactionTrait};

pub const TOKEN_LENGTH: usize = 22;

/// Characters of the token used in a new participant's display name.
const NAME_PREFIX_LENGTH: usize = 8;

/// Generate a new opaque access token
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub fn participant_name(token: &str) -> String {
    let prefix: String = token.chars().take(NAME_PREFIX_LENGTH).collect();
    format!("user_{}", prefix)
}

/// Hashes a token into the participant's stored secret.
pub fn hash_token_secret(token: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(token.as_bytes(), &salt)?
        .to_string())
}

pub fn verify_token_secret(token: &str, secret_hash: &str) -> bool {
    match PasswordHash::new(secret_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(token.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            log::warn!("verify_token_secret: unreadable hash: {}", e);
            false
        }
    }
}

/// Creates `count` new tokens for a survey and returns them in creation order.
pub async fn mint_tokens(
    db: &DatabaseConnection,
    survey_id: i32,
    count: u32,
) -> Result<Vec<String>, DbErr> {
    let txn = db.begin().await?;
    let now = Utc::now().naive_utc();
    let mut tokens = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let token = generate_token();
        access_tokens::ActiveModel {
            survey_id: Set(survey_id),
            token: Set(token.clone()),
            is_used: Set(false),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        tokens.push(token);
    }

    txn.commit().await?;
    log::info!("Minted {} access tokens for survey {}", count, survey_id);
    Ok(tokens)
}

async fn find_participant(
    db: &DatabaseConnection,
    token: &str,
) -> Result<Option<participants::Model>, DbErr> {
    participants::Entity::find()
        .filter(participants::Column::Token.eq(token))
        .one(db)
        .await
}

/// A successful token sign-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenLogin {
    pub participant_id: i32,
    pub survey_id: i32,
    /// True when this sign-in created the participant.
    pub first_visit: bool,
}

/// Resolves a token to its participant, creating one on first use.
///
/// Returns `None` for tokens that were never minted, or whose participant's
/// stored secret no longer matches the token.
pub async fn login_with_token(
    db: &DatabaseConnection,
    token: &str,
) -> Result<Option<TokenLogin>, DbErr> {
    let access = match access_tokens::Entity::find()
        .filter(access_tokens::Column::Token.eq(token))
        .one(db)
        .await?
    {
        Some(access) => access,
        None => return Ok(None),
    };

    let existing = find_participant(db, token).await?;

    let (participant_id, first_visit) = match existing {
        Some(participant) => {
            if !verify_token_secret(token, &participant.secret_hash) {
                log::warn!(
                    "login_with_token: secret mismatch for participant {}",
                    participant.id
                );
                return Ok(None);
            }
            (participant.id, false)
        }
        None => {
            let secret_hash = hash_token_secret(token)
                .map_err(|e| DbErr::Custom(format!("Token hashing failed: {}", e)))?;
            let inserted = participants::ActiveModel {
                name: Set(participant_name(token)),
                secret_hash: Set(secret_hash),
                token: Set(token.to_string()),
                created_at: Set(Utc::now().naive_utc()),
                ..Default::default()
            }
            .insert(db)
            .await;

            match inserted {
                Ok(participant) => {
                    log::info!(
                        "New participant {} for survey {}",
                        participant.id,
                        access.survey_id
                    );
                    (participant.id, true)
                }
                // A concurrent sign-in with the same token created it first.
                Err(e) => match find_participant(db, token).await? {
                    Some(participant) => (participant.id, false),
                    None => return Err(e),
                },
            }
        }
    };

    if !access.is_used {
        let survey_id = access.survey_id;
        let mut active: access_tokens::ActiveModel = access.into();
        active.is_used = Set(true);
        active.update(db).await?;
        return Ok(Some(TokenLogin {
            participant_id,
            survey_id,
            first_visit,
        }));
    }

    Ok(Some(TokenLogin {
        participant_id,
        survey_id: access.survey_id,
        first_visit,
    }))
}
