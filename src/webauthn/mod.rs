//! WebAuthn assertion verification.
//!
//! Validates a signed authentication assertion presented as four
//! base64-encoded fields: authenticator data, client-data JSON, credential id,
//! and signature. Every step is a hard rejection; a fully verified assertion
//! yields the credential's owner and counts as a second factor on its own.

mod assertion;
mod authenticator;
mod client_data;
mod cose;

pub use assertion::{
    verify_assertion, AssertionError, AssertionRequest, CredentialKind, DecodedAssertion,
    VerifiedAssertion,
};
pub use authenticator::AuthenticatorData;
pub use client_data::ClientData;
pub use cose::CoseAlgorithm;
