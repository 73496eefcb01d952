use std::sync::Arc;

use crate::config::Config;
use crate::outbox::{QueueRegistry, TemplateStore};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub queues: QueueRegistry,
    pub templates: Arc<dyn TemplateStore>,
}
