//! phi_session
//!
//! The façade: the single entry point through which the detection,
//! tokenization, storage, and audit subsystems are consumed together as
//! one vault session. Spec.md §6.

pub mod error;
pub mod facade;
pub mod review;

pub use error::SessionError;
pub use facade::{RedactResult, RestoreOutcome, Session, DEFAULT_MAX_TEXT_LEN};
pub use review::ReviewItem;
