use std::sync::Arc;

use tagwatch_core::engine::Engine;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` on webhook deliveries.
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.filter(|s| !s.is_empty());
        self
    }
}
