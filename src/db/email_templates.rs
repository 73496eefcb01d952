use sqlx::PgPool;

use crate::models::EmailTemplate;

pub async fn find_active(pool: &PgPool, name: &str) -> Result<Option<EmailTemplate>, sqlx::Error> {
    sqlx::query_as::<_, EmailTemplate>(
        "SELECT * FROM email_templates WHERE template_name = $1 AND is_active = true",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
}
