//! Authentication primitives.
//!
//! Token *issuance* is an external collaborator; this module only
//! validates tokens and exposes the typed principal consumed by handlers.

pub mod jwt;
