//! In-process collaborators with scripted behavior.

mod catalog;
mod generator;
mod notifier;
mod scanner;
mod store;

pub use catalog::{StaticCatalog, StaticCustomers};
pub use generator::ScriptedGenerator;
pub use notifier::{RecordingNotifier, SentNotification};
pub use scanner::RecordingScanner;
pub use store::FlakyStore;
