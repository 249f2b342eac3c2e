//! phi_tokenizer
//!
//! Entity-to-token substitution ([`tokenize`]) and token restoration
//! ([`restore`]) atop `phi_storage::TokenStore`. Spec.md §4.6/§4.8.

pub mod restore;
pub mod tokenize;

pub use restore::{restore, RestoreError, RestoreMode, RestoreResult};
pub use tokenize::{tokenize, TokenizeError, TokenizedSpan, TokenizeResult};
