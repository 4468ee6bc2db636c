use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use stack_string::{format_sstr, StackString};
use tokio::{fs, fs::File, io::AsyncWriteExt};

use omramin_lib::{
    auth_prompt::CredentialPrompt, errors::OmraminError as Error,
    omramin_config::OmraminConfig, omramin_util::exponential_retry,
};
use omramin_models::{device::OmronDevice, measurement::Measurement, sync_window::SyncWindow};

use crate::{omron_connect_v1::OmronConnectV1, omron_connect_v2::OmronConnectV2};

/// The two OMRON connect API generations, normalized to one contract.
/// `login` and `refresh` return the refresh token to persist.
#[async_trait]
pub trait OmronConnect: Send + Sync {
    async fn login(
        &mut self,
        email: &str,
        password: &str,
        country: &str,
    ) -> Result<StackString, Error>;
    async fn refresh(&mut self, refresh_token: &str) -> Result<StackString, Error>;
    async fn get_measurements(
        &self,
        device: &OmronDevice,
        window: &SyncWindow,
    ) -> Result<Vec<Measurement>, Error>;
}

/// The API generation is keyed entirely off the server URL.
#[must_use]
pub fn omron_client_for_server(server: &str) -> Box<dyn OmronConnect> {
    if server.contains("data-sg.omronconnect.com") {
        Box::new(OmronConnectV1::new(server))
    } else {
        Box::new(OmronConnectV2::new(server))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OmronTokenCache {
    refresh_token: StackString,
}

pub struct OmronConnectClient {
    pub config: OmraminConfig,
    inner: Box<dyn OmronConnect>,
    refresh_token: Option<StackString>,
}

impl OmronConnectClient {
    #[must_use]
    pub fn new(config: OmraminConfig) -> Self {
        let inner = omron_client_for_server(&config.omron_server);
        Self {
            config,
            inner,
            refresh_token: None,
        }
    }

    /// Reuse the persisted session if it can be refreshed, otherwise log in.
    /// # Errors
    /// Returns error if both the session refresh and the login fail
    pub async fn init(&mut self, prompt: &dyn CredentialPrompt) -> Result<(), Error> {
        if self.load().await.is_ok() {
            if let Some(refresh_token) = self.refresh_token.clone() {
                match self.inner.refresh(&refresh_token).await {
                    Ok(new_token) => {
                        self.refresh_token.replace(new_token);
                        self.dump().await?;
                        info!("Logged in to OMRON connect");
                        return Ok(());
                    }
                    Err(e) => debug!("session refresh failed: {e}"),
                }
            }
        }
        self.login(prompt).await
    }

    /// # Errors
    /// Returns `AuthFailed` if the account rejects the credentials
    pub async fn login(&mut self, prompt: &dyn CredentialPrompt) -> Result<(), Error> {
        let (email, password) = if self.config.omron_email.is_empty()
            || self.config.omron_password.is_empty()
        {
            let credentials = prompt.obtain_credentials("OMRON connect").await?;
            (credentials.username, credentials.password)
        } else {
            (
                self.config.omron_email.clone(),
                self.config.omron_password.clone(),
            )
        };
        let refresh_token = self
            .inner
            .login(&email, &password, &self.config.omron_country)
            .await?;
        self.refresh_token.replace(refresh_token);
        self.dump().await?;
        info!("Logged in to OMRON connect");
        Ok(())
    }

    /// Fetch every raw entry for the device's user slot in the window.
    /// Transient failures are retried with backoff, an expired session gets
    /// a single refresh before the error surfaces.
    /// # Errors
    /// Returns `SourceUnavailable` once retries are exhausted and
    /// `AuthFailed` when the session cannot be renewed
    pub async fn get_measurements(
        &mut self,
        device: &OmronDevice,
        window: &SyncWindow,
    ) -> Result<Vec<Measurement>, Error> {
        let result = exponential_retry(|| self.inner.get_measurements(device, window)).await;
        match result {
            Ok(measurements) => Ok(measurements),
            Err(Error::AuthExpired) => {
                let refresh_token = self.refresh_token.clone().ok_or(Error::AuthExpired)?;
                let new_token = self
                    .inner
                    .refresh(&refresh_token)
                    .await
                    .map_err(|e| Error::AuthFailed(format_sstr!("{e}")))?;
                self.refresh_token.replace(new_token);
                self.dump().await?;
                let result =
                    exponential_retry(|| self.inner.get_measurements(device, window)).await;
                match result {
                    Err(Error::AuthExpired) => Err(Error::AuthFailed(
                        "session could not be renewed".into(),
                    )),
                    Err(e) if e.is_transient() => {
                        Err(Error::SourceUnavailable(format_sstr!("{e}")))
                    }
                    other => other,
                }
            }
            Err(e) if e.is_transient() => Err(Error::SourceUnavailable(format_sstr!("{e}"))),
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// Returns error if saving the token file fails
    pub async fn dump(&self) -> Result<(), Error> {
        let refresh_token = self
            .refresh_token
            .clone()
            .ok_or(Error::StaticCustomError("No refresh token"))?;
        let cache = OmronTokenCache { refresh_token };
        let mut f = File::create(&self.config.omron_tokenfile).await?;
        f.write_all(&serde_json::to_vec(&cache)?).await?;
        Ok(())
    }

    /// # Errors
    /// Returns error if loading or deserializing the token file fails
    pub async fn load(&mut self) -> Result<(), Error> {
        let buf = fs::read(&self.config.omron_tokenfile).await?;
        let cache: OmronTokenCache = serde_json::from_slice(&buf)?;
        self.refresh_token.replace(cache.refresh_token);
        Ok(())
    }
}
