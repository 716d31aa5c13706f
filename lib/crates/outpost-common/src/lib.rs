//! Types and crypto shared by the outpost agent and its control plane.

pub mod activation;
pub mod sealed;
pub mod signature;
pub mod token;
pub mod types;

pub use activation::{
    ActivationClaims, ActivationKey, ActivationKeyError, AkInfo, UserKey, split_activation_header,
};
pub use sealed::{SealError, SealKey};
pub use signature::SignatureError;
pub use token::{HostToken, TokenError};
pub use types::*;
