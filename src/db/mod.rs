pub mod email_queue;
pub mod email_templates;
pub mod notification_logs;
