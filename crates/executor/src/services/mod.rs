pub mod execution_service;
pub mod telegram_service;

pub use execution_service::SessionRunner;
pub use telegram_service::TelegramService;
