use actix_session::{config::PersistentSession, storage::CookieSessionStore, SessionMiddleware};
use actix_web::cookie::{Key, SameSite};
use actix_web::middleware::Logger;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use env_logger::Env;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use votesite::app_config;
use votesite::vote::{RetryPolicy, SeaOrmStore, VotePipeline};

/// `Key::from` refuses anything shorter.
const MIN_SECRET_KEY_LEN: usize = 64;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_lib_mods();
    app_config::init();
    let config = app_config::get_config();

    let db = votesite::db::init_db(&config.database.url, config.database.max_connections)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    let secret_key = match std::env::var("SECRET_KEY") {
        Ok(key) if key.len() >= MIN_SECRET_KEY_LEN => Key::from(key.as_bytes()),
        other => {
            let random_string: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(128)
                .map(char::from)
                .collect();
            let reason = match other {
                Ok(_) => "too short".to_string(),
                Err(err) => err.to_string(),
            };
            log::warn!("SECRET_KEY was invalid. Reason: {}\r\nThis means the key used for signing session cookies will invalidate every time the application is restarted. A secret key must be at least 64 bytes to be accepted.\r\n\r\nNeed a key? How about:\r\n{}", reason, random_string);
            Key::from(random_string.as_bytes())
        }
    };

    // Single background writer; handlers only hold the queue.
    let store = Arc::new(SeaOrmStore::new(db.clone()));
    let queue = VotePipeline::start(
        store,
        RetryPolicy::from_config(&config.writer),
        config.writer.queue_warn_depth,
    );

    log::info!(
        "Admin entry: http://{}:{}/admin_login?k=<gate key>",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        // Order of middleware IS IMPORTANT and is in REVERSE EXECUTION ORDER.
        App::new()
            .app_data(Data::new(db.clone()))
            .app_data(Data::new(queue.clone()))
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), secret_key.clone())
                    .cookie_same_site(SameSite::Lax)
                    .cookie_secure(false) // Allow HTTP for development
                    .session_lifecycle(PersistentSession::default())
                    .build(),
            )
            .wrap(Logger::new("%a %r %s %Dms"))
            .configure(votesite::web::configure)
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}

/// Initialize third party crates we rely on but don't have control over.
pub fn init_lib_mods() {
    if let Err(e) = dotenv::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}
