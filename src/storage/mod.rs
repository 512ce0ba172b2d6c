pub mod history_store;
pub mod images;

pub use history_store::{HistoryRecord, HistoryStore, JsonFileHistoryStore};
pub use images::{ImageStore, random_seed};
