pub mod email_queue;
pub mod email_template;
pub mod notification_log;
pub mod queue_item;

pub use email_queue::EmailQueueRow;
pub use email_template::EmailTemplate;
pub use notification_log::NotificationLogRow;
pub use queue_item::{Payload, Pipeline, QueueItem, QueueStatus};
