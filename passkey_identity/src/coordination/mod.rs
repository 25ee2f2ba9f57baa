//! Sign-up and sign-in flows over the store, the verifier and the signer.

mod errors;
mod service;
mod types;

pub use errors::IdentityError;
pub use service::IdentityService;
pub use types::{
    Account, AuthenticationChallenge, CreateAccountOutcome, Credential, NewAccount,
    RegistrationChallenge,
};
