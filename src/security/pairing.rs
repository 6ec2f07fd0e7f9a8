//! Pairing codes and the parent/child pairing flow
//!
//! A child record is linked from two sides, each using the same short code:
//! - Parent: claims a record a child account created (`claim_as_parent`)
//! - Child: links to a record a parent created (`link_as_child`)
//!
//! The code is consumed once both sides are linked.

use rand::Rng;

use crate::db::{Child, ChildRepo};
use crate::{Error, Result};

/// Random bytes per pairing code (rendered as twice as many hex digits)
const PAIRING_CODE_BYTES: usize = 4;

/// Pairing code length in characters
pub const PAIRING_CODE_LENGTH: usize = PAIRING_CODE_BYTES * 2;

/// Result of presenting a pairing code
#[derive(Debug, Clone)]
pub enum PairingOutcome {
    /// The code matched and the link was made
    Paired(Child),

    /// The code is malformed, unknown, or already used on this side
    InvalidCode,
}

/// Runs pairing attempts against the child repository
#[derive(Clone)]
pub struct PairingManager {
    children: ChildRepo,
}

impl PairingManager {
    /// Create a new pairing manager
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(children: ChildRepo) -> Self {
        Self { children }
    }

    /// A parent presents a code to claim an unclaimed child
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn claim_as_parent(&self, parent_id: &str, input: &str) -> Result<PairingOutcome> {
        let code = normalize_code(input);
        if !is_well_formed(&code) {
            tracing::debug!(parent_id, "malformed pairing code");
            return Ok(PairingOutcome::InvalidCode);
        }

        match self.children.claim_by_parent(&code, parent_id)? {
            Some(child) => {
                tracing::info!(parent_id, child_id = %child.id, "child claimed by parent");
                Ok(PairingOutcome::Paired(child))
            }
            None => {
                tracing::debug!(parent_id, "invalid or used pairing code");
                Ok(PairingOutcome::InvalidCode)
            }
        }
    }

    /// A child account presents a code issued by a parent
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the account is already linked, or a
    /// database error
    pub fn link_as_child(&self, user_id: &str, input: &str) -> Result<PairingOutcome> {
        let code = normalize_code(input);
        if !is_well_formed(&code) {
            tracing::debug!(user_id, "malformed pairing code");
            return Ok(PairingOutcome::InvalidCode);
        }

        match self.children.link_user(&code, user_id)? {
            Some(child) => {
                tracing::info!(user_id, child_id = %child.id, "child account linked");
                Ok(PairingOutcome::Paired(child))
            }
            None => {
                tracing::debug!(user_id, "invalid or used pairing code");
                Ok(PairingOutcome::InvalidCode)
            }
        }
    }

    /// Issue a fresh code for a child that is still waiting for its other side
    ///
    /// # Errors
    ///
    /// Returns `Error::Pairing` if the child is already fully paired
    pub fn reissue_code(&self, child: &Child) -> Result<String> {
        self.children
            .regenerate_code(&child.id)?
            .ok_or_else(|| Error::Pairing(format!("{} is already fully paired", child.name)))
    }
}

/// Generate a random pairing code: uppercase hexadecimal
#[must_use]
pub fn generate_code() -> String {
    let bytes: [u8; PAIRING_CODE_BYTES] = rand::thread_rng().r#gen();
    hex::encode_upper(bytes)
}

/// Normalize user-entered code text
#[must_use]
pub fn normalize_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Whether a (normalized) code has the shape of a pairing code
#[must_use]
pub fn is_well_formed(code: &str) -> bool {
    code.len() == PAIRING_CODE_LENGTH
        && code
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
}
