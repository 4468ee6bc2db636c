use async_trait::async_trait;
use stack_string::StackString;
use std::fmt;

use crate::errors::OmraminError as Error;

#[derive(Clone)]
pub struct Credentials {
    pub username: StackString,
    pub password: StackString,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the password must never reach log output
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Clients obtain credentials and MFA codes through this contract so that
/// none of them perform interactive I/O themselves.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    async fn obtain_credentials(&self, service: &str) -> Result<Credentials, Error>;
    async fn obtain_mfa_code(&self, service: &str) -> Result<StackString, Error>;
}
