pub mod draft;
pub mod postings;

pub use draft::{DraftLine, JournalDraft};
