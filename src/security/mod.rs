//! Security module for passwords and parent/child pairing

pub mod pairing;
pub mod password;

pub use pairing::{PairingManager, PairingOutcome, generate_code, is_well_formed, normalize_code};
pub use password::{hash_password, validate_new_password, verify_password};
