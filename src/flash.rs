use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::warn;

const FLASH_KEY: &str = "_flashes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Info,
    Warning,
    Danger,
}

/// One-shot notice shown on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: Level,
    pub message: String,
}

pub async fn push(session: &Session, level: Level, message: impl Into<String>) {
    let mut queue: Vec<Flash> = match session.get(FLASH_KEY).await {
        Ok(q) => q.unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "read flash queue failed");
            Vec::new()
        }
    };
    queue.push(Flash {
        level,
        message: message.into(),
    });
    if let Err(e) = session.insert(FLASH_KEY, queue).await {
        warn!(error = %e, "store flash failed");
    }
}

/// Drains the queue.
pub async fn take(session: &Session) -> Vec<Flash> {
    match session.remove::<Vec<Flash>>(FLASH_KEY).await {
        Ok(q) => q.unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "drain flash queue failed");
            Vec::new()
        }
    }
}
