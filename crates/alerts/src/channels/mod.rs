pub mod console;
pub mod email;
pub mod pagerduty;
pub mod slack;
pub mod telegram;
pub mod webhook;

pub use console::ConsoleChannel;
pub use email::{EmailChannel, EmailSender, SmtpSender};
pub use pagerduty::PagerDutyChannel;
pub use slack::SlackChannel;
pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;
