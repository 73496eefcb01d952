use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub template_name: String,
    pub subject: String,
    pub html_content: String,
    pub text_content: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
