use std::sync::Arc;

use hirewire_db::Database;
use hirewire_gateway::presence::PresenceRegistry;
use hirewire_gateway::rooms::ConversationRouter;
use hirewire_gateway::threads::ThreadAggregator;

pub type AppState = Arc<AppStateInner>;

/// Shared state for the REST handlers. The same `Database`, router, and
/// presence registry back the WebSocket gateway, so REST sends fan out to
/// live connections directly.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub router: ConversationRouter,
    pub presence: PresenceRegistry,
    pub threads: ThreadAggregator,
    pub jwt_secret: String,
}
