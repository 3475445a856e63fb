use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::tokens::TokenSigner;
use crate::config::Config;
use crate::mail::Mailer;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub signer: TokenSigner,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, mailer: Arc<dyn Mailer>) -> Self {
        let signer = TokenSigner::new(&config.signing_secret());
        Self {
            db,
            config,
            signer,
            mailer,
        }
    }
}
