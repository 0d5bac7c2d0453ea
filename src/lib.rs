//! Slice review core: catalog, records, navigation, session and the review
//! table. The egui front end lives in main.rs.
pub mod catalog;
pub mod config;
pub mod error;
pub mod navigation;
pub mod record;
pub mod session;
pub mod source;
pub mod table;

pub use catalog::{KeyCatalog, SliceKey};
pub use error::{Error, Result};
pub use navigation::NavCommand;
pub use record::{Rating, ReviewRecord, ReviewStore};
pub use session::ReviewSession;
pub use table::CsvTable;
