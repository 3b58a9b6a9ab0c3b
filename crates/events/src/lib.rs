//! Stock events and the envelope they travel in.
//!
//! Domain crates emit typed events; the envelope adds the tenant + stream
//! metadata needed to journal and project them.

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::Event;
