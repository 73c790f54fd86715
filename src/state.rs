use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::services::calendar::CalendarSync;
use crate::services::notify::Notifier;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub calendar: Box<dyn CalendarSync>,
    pub notifier: Box<dyn Notifier>,
    pub clock: Box<dyn Clock>,
}
