use std::sync::Arc;

use duet_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    /// Upper bound applied to the `limit` of a history request.
    pub page_limit_max: u32,
}
