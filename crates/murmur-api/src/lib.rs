pub mod auth;
pub mod csrf;
pub mod error;
pub mod extract;
pub mod forms;
pub mod i18n;
pub mod language;
pub mod mail;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod pagination;
pub mod posts;
pub mod routes;
pub mod search;
pub mod social;
pub mod state;
pub mod tasks;
pub mod translate;
pub mod views;

pub use routes::router;
pub use state::{AppState, AppStateInner, Settings};
