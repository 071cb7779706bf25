//! Test doubles for courier.
//!
//! - [`InMemoryRecordStore`] - mutex-backed store with call counting and
//!   failure injection
//! - [`ScriptedTransport`] - canned upload outcomes with a concurrency
//!   high-water mark
//! - [`ToggleProbe`] - switchable reachability
//! - [`EventRecorder`] - captures bus events for assertions

pub mod events;
pub mod fixtures;
pub mod probe;
pub mod store;
pub mod transport;

pub use events::EventRecorder;
pub use fixtures::{document, photo, seed_photos};
pub use probe::ToggleProbe;
pub use store::{InMemoryRecordStore, StoreOp};
pub use transport::{ScriptedTransport, UploadOutcome, UploadRecord};
