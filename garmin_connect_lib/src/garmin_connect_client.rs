use convert_case::{Case, Casing};
use log::{debug, info};
use maplit::hashmap;
use reqwest::{header::HeaderMap, Client, Response, StatusCode};
use reqwest_oauth1::{OAuthClientProvider, Secrets};
use select::{document::Document, predicate::Name};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use stack_string::{format_sstr, StackString};
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;
use tokio::{fs, fs::File, io::AsyncWriteExt};
use url::{form_urlencoded, Url};

use omramin_lib::{
    auth_prompt::CredentialPrompt, errors::OmraminError as Error,
    omramin_config::OmraminConfig, omramin_util::exponential_retry,
};
use omramin_models::{
    measurement::{IdentityKey, Measurement, MeasurementKind},
    sync_window::SyncWindow,
};

use crate::{
    garmin_bp_data::{GarminBpRangeResponse, GarminBpUpload},
    garmin_weight_data::{GarminWeightRangeResponse, GarminWeightUpload},
};

const HTTP_USER_AGENT: &str = "GCM-iOS-5.7.2.1";
const SSO_USER_AGENT: &str = "com.garmin.android.apps.connectmobile";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, PartialOrd)]
struct OAuth1Token {
    oauth_token: StackString,
    oauth_token_secret: StackString,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, PartialOrd)]
struct OAuth2Token {
    token: OAuth2TokenInner,
    expires_at: i64,
    refresh_token_expires_at: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, PartialOrd)]
struct OAuth2TokenInner {
    scope: StackString,
    jti: StackString,
    token_type: StackString,
    access_token: StackString,
    refresh_token: StackString,
    expires_in: i64,
    refresh_token_expires_in: i64,
}

impl From<OAuth2TokenInner> for OAuth2Token {
    fn from(token: OAuth2TokenInner) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let expires_at = now + token.expires_in;
        let refresh_token_expires_at = now + token.refresh_token_expires_in;

        Self {
            token,
            expires_at,
            refresh_token_expires_at,
        }
    }
}

impl OAuth2Token {
    fn expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc().unix_timestamp()
    }

    fn auth_header(&self) -> StackString {
        let token_type = self.token.token_type.as_str().to_case(Case::Title);
        let access_token = &self.token.access_token;
        format_sstr!("{token_type} {access_token}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Tokens {
    oauth1_token: OAuth1Token,
    oauth2_token: OAuth2Token,
}

#[derive(Default, Debug)]
pub struct GarminConnectClient {
    pub config: OmraminConfig,
    pub client: Client,
    consumer_key: StackString,
    consumer_secret: StackString,
    oauth1_token: Option<OAuth1Token>,
    oauth2_token: Option<OAuth2Token>,
    existing_cache: HashMap<(MeasurementKind, i64, i64), HashSet<IdentityKey>>,
}

impl GarminConnectClient {
    /// # Errors
    /// Returns error if client configuration fails or oauth consumer key is
    /// not present
    pub fn new(config: OmraminConfig) -> Result<Self, Error> {
        let client = Client::builder().cookie_store(true).build()?;
        let consumer_key = config
            .garmin_connect_oauth_consumer_key
            .clone()
            .ok_or(Error::StaticCustomError("No consumer key"))?;
        let consumer_secret = config
            .garmin_connect_oauth_consumer_secret
            .clone()
            .ok_or(Error::StaticCustomError("No consumer secret"))?;

        Ok(Self {
            config,
            client,
            consumer_key,
            consumer_secret,
            ..Self::default()
        })
    }

    fn sso_urlbase(&self) -> &'static str {
        if self.config.garmin_connect_is_cn {
            "https://sso.garmin.cn"
        } else {
            "https://sso.garmin.com"
        }
    }

    fn api_urlbase(&self) -> &'static str {
        if self.config.garmin_connect_is_cn {
            "https://connectapi.garmin.cn"
        } else {
            "https://connectapi.garmin.com"
        }
    }

    /// Reuse the persisted token pair if possible, otherwise run the full
    /// login flow.
    /// # Errors
    /// Returns error if login fails
    pub async fn init(&mut self, prompt: &dyn CredentialPrompt) -> Result<(), Error> {
        if self.load().await.is_ok() {
            let oauth2_token = self
                .oauth2_token
                .as_ref()
                .ok_or(Error::StaticCustomError("No Oauth2 Token"))?;
            if !oauth2_token.expired() {
                return Ok(());
            }
            if self.refresh_oauth2().await.is_ok() {
                self.dump().await?;
                return Ok(());
            }
        }
        self.login(prompt).await?;
        self.dump().await
    }

    /// Re-establish the session after it was rejected, refreshing first and
    /// falling back to a full interactive login.
    /// # Errors
    /// Returns error if login fails
    pub async fn reauthenticate(&mut self, prompt: &dyn CredentialPrompt) -> Result<(), Error> {
        if self.refresh_oauth2().await.is_ok() {
            self.dump().await?;
            return Ok(());
        }
        self.login(prompt).await?;
        self.dump().await
    }

    /// SSO embed flow: cookie bootstrap, csrf extraction, credential post,
    /// optional MFA code post, service ticket, oauth1 token, oauth2 exchange.
    /// # Errors
    /// Returns error if login fails
    pub async fn login(&mut self, prompt: &dyn CredentialPrompt) -> Result<(), Error> {
        let (username, password) = if self.config.garmin_connect_email.is_empty()
            || self.config.garmin_connect_password.is_empty()
        {
            let credentials = prompt.obtain_credentials("Garmin Connect").await?;
            (credentials.username, credentials.password)
        } else {
            (
                self.config.garmin_connect_email.clone(),
                self.config.garmin_connect_password.clone(),
            )
        };

        let referer = self.init_cookies().await?;

        let sso_urlbase = self.sso_urlbase();
        let sso_embed = format_sstr!("{sso_urlbase}/sso/embed");
        let signin_params = hashmap! {
            "id" => "gauth-widget",
            "embedWidged" => "true",
            "gauthHost" => sso_embed.as_str(),
            "service" => sso_embed.as_str(),
            "source" => sso_embed.as_str(),
            "redirectAfterAccountLoginUrl" => sso_embed.as_str(),
            "redirectAfterAccountCreationUrl" => sso_embed.as_str(),
        };
        let mut url = Url::parse(&format_sstr!("{sso_urlbase}/sso/signin"))?;
        for (k, v) in &signin_params {
            url.query_pairs_mut().append_pair(k, v);
        }
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HTTP_USER_AGENT.parse()?);
        headers.insert("referer", referer.as_str().parse()?);
        let referer = StackString::from(url.to_string());

        let buf = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let csrf_token = Self::extract_csrf(&buf)
            .ok_or(Error::StaticCustomError("Failed to extract csrf"))?;

        debug!("csrf_token {csrf_token}");

        let data = hashmap! {
            "username" => username.as_str(),
            "password" => password.as_str(),
            "embed" => "true",
            "_csrf" => csrf_token.as_str(),
        };

        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HTTP_USER_AGENT.parse()?);
        headers.insert("referer", referer.as_str().parse()?);

        let mut text = self
            .client
            .post(url)
            .headers(headers)
            .form(&data)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        if Self::needs_mfa(&text) {
            text = self.handle_mfa(prompt, &sso_embed, &referer, &text).await?;
        }

        let title = Self::get_title(&text);
        if title != Some("Success".into()) {
            return Err(Error::AuthFailed("Login failed".into()));
        }

        let ticket =
            Self::get_ticket(&text).ok_or(Error::StaticCustomError("Ticket not found"))?;
        let oauth1_token = self.get_oauth1_token(&ticket).await?;
        let oauth2_token = self.exchange(&oauth1_token).await?;

        self.oauth1_token.replace(oauth1_token);
        self.oauth2_token.replace(oauth2_token);

        info!("Logged in to Garmin Connect");
        Ok(())
    }

    async fn handle_mfa(
        &self,
        prompt: &dyn CredentialPrompt,
        sso_embed: &str,
        referer: &str,
        mfa_page: &str,
    ) -> Result<String, Error> {
        let csrf_token = Self::extract_csrf(mfa_page)
            .ok_or(Error::StaticCustomError("Failed to extract MFA csrf"))?;
        let mfa_code = prompt.obtain_mfa_code("Garmin Connect").await?;

        let sso_urlbase = self.sso_urlbase();
        let mut url = Url::parse(&format_sstr!(
            "{sso_urlbase}/sso/verifyMFA/loginEnterMfaCode"
        ))?;
        url.query_pairs_mut()
            .append_pair("id", "gauth-widget")
            .append_pair("embedWidged", "true")
            .append_pair("gauthHost", sso_embed)
            .append_pair("service", sso_embed)
            .append_pair("source", sso_embed)
            .append_pair("redirectAfterAccountLoginUrl", sso_embed)
            .append_pair("redirectAfterAccountCreationUrl", sso_embed);

        let data = hashmap! {
            "mfa-code" => mfa_code.as_str(),
            "embed" => "true",
            "_csrf" => csrf_token.as_str(),
            "fromPage" => "setupEnterMfaCode",
        };
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HTTP_USER_AGENT.parse()?);
        headers.insert("referer", referer.parse()?);

        self.client
            .post(url)
            .headers(headers)
            .form(&data)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .map_err(Into::into)
    }

    /// # Errors
    /// Returns error if oauth1/oauth2 tokens are not found or if saving to
    /// file fails
    pub async fn dump(&self) -> Result<(), Error> {
        let oauth1_token = self
            .oauth1_token
            .clone()
            .ok_or(Error::StaticCustomError("No Oauth1 Token"))?;
        let oauth2_token = self
            .oauth2_token
            .clone()
            .ok_or(Error::StaticCustomError("No Oauth2 Token"))?;
        let tokens = Tokens {
            oauth1_token,
            oauth2_token,
        };

        let mut f = File::create(&self.config.garmin_connect_tokenfile).await?;
        let token_js = serde_json::to_vec(&tokens)?;
        f.write_all(&token_js).await?;
        Ok(())
    }

    /// # Errors
    /// Returns error if loading file or deserializing token fails
    pub async fn load(&mut self) -> Result<(), Error> {
        let buf = fs::read(&self.config.garmin_connect_tokenfile).await?;
        let tokens: Tokens = serde_json::from_slice(&buf)?;
        self.oauth1_token.replace(tokens.oauth1_token);
        self.oauth2_token.replace(tokens.oauth2_token);
        Ok(())
    }

    /// # Errors
    /// Returns error if missing oauth1 token or exchange fails
    pub async fn refresh_oauth2(&mut self) -> Result<(), Error> {
        let oauth1_token = self
            .oauth1_token
            .as_ref()
            .ok_or(Error::StaticCustomError("No Oauth1 Token"))?;
        self.oauth2_token
            .replace(self.exchange(oauth1_token).await?);
        Ok(())
    }

    /// The set of identity keys already present on Garmin Connect for a
    /// measurement kind and window.  The set is fetched once per kind and
    /// window and served from a cache for the rest of the run.
    /// # Errors
    /// Returns `AuthExpired` on an invalid session and an error once
    /// retries are exhausted
    pub async fn fetch_existing(
        &mut self,
        kind: MeasurementKind,
        window: &SyncWindow,
    ) -> Result<HashSet<IdentityKey>, Error> {
        let cache_key = (
            kind,
            window.start.unix_timestamp(),
            window.end.unix_timestamp(),
        );
        if let Some(existing) = self.existing_cache.get(&cache_key) {
            return Ok(existing.clone());
        }

        let start_date = window.start.date();
        let end_date = window.end.date();
        let existing = match kind {
            MeasurementKind::Weight => {
                let path = format_sstr!(
                    "/weight-service/weight/dateRange?startDate={start_date}&endDate={end_date}"
                );
                let response: GarminWeightRangeResponse =
                    exponential_retry(|| self.api_json(&path)).await?;
                let keys = response.identity_keys();
                info!("Downloaded {} weigh-ins from 'Garmin Connect'", keys.len());
                keys
            }
            MeasurementKind::BloodPressure => {
                let path = format_sstr!(
                    "/bloodpressure-service/bloodpressure/range/{start_date}/{end_date}?includeAll=true"
                );
                let response: GarminBpRangeResponse =
                    exponential_retry(|| self.api_json(&path)).await?;
                let keys = response.identity_keys()?;
                info!(
                    "Downloaded {} bpm measurements from 'Garmin Connect'",
                    keys.len()
                );
                keys
            }
        };

        self.existing_cache.insert(cache_key, existing.clone());
        Ok(existing)
    }

    /// Upload one measurement.  Uploads are not retried, a lost response
    /// must not duplicate a record.
    /// # Errors
    /// Returns `UploadRejected` if the service rejects the record and
    /// `AuthExpired` on an invalid session
    pub async fn upload(&self, measurement: &Measurement) -> Result<(), Error> {
        match measurement {
            Measurement::Weight(wm) => {
                self.api_post_json(
                    "/weight-service/user-weight",
                    &GarminWeightUpload::from_measurement(wm)?,
                )
                .await
            }
            Measurement::BloodPressure(bp) => {
                self.api_post_json(
                    "/bloodpressure-service/bloodpressure",
                    &GarminBpUpload::from_measurement(bp)?,
                )
                .await
            }
        }
    }

    fn auth_headers(&self) -> Result<HeaderMap, Error> {
        let oauth2_token = self.oauth2_token.as_ref().ok_or(Error::AuthExpired)?;
        if oauth2_token.expired() {
            return Err(Error::AuthExpired);
        }
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", oauth2_token.auth_header().parse()?);
        headers.insert("User-Agent", HTTP_USER_AGENT.parse()?);
        Ok(headers)
    }

    async fn api_request(&self, path: &str) -> Result<Response, Error> {
        let url: Url = format_sstr!("{}{path}", self.api_urlbase()).parse()?;
        let response = self
            .client
            .get(url)
            .headers(self.auth_headers()?)
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthExpired),
            _ => response.error_for_status().map_err(Into::into),
        }
    }

    async fn api_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let response = self.api_request(path).await?;
        response.json().await.map_err(Into::into)
    }

    async fn api_post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<(), Error> {
        let url: Url = format_sstr!("{}{path}", self.api_urlbase()).parse()?;
        let response = self
            .client
            .post(url)
            .headers(self.auth_headers()?)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthExpired),
            _ if status.is_client_error() => {
                let message = response.text().await.unwrap_or_default();
                Err(Error::UploadRejected(format_sstr!("{status}: {message}")))
            }
            _ => response.error_for_status().map(|_| ()).map_err(Into::into),
        }
    }

    fn needs_mfa(buf: &str) -> bool {
        buf.contains("MFA")
    }

    #[must_use]
    pub fn get_title(buf: &str) -> Option<StackString> {
        Document::from(buf)
            .find(Name("title"))
            .find_map(|node| node.children().find_map(|n| n.as_text().map(Into::into)))
    }

    fn extract_csrf(buf: &str) -> Option<StackString> {
        Document::from(buf).find(Name("input")).find_map(|node| {
            node.attr("name").and_then(|name| {
                if name == "_csrf" {
                    node.attr("value").map(Into::into)
                } else {
                    None
                }
            })
        })
    }

    fn get_ticket(buf: &str) -> Option<StackString> {
        let prefix = "embed?ticket=";
        let offset = prefix.len();
        let start = buf.find(prefix)?;
        let end = buf[start..].find('"')?;
        let ticket = &buf[start + offset..start + end];
        Some(ticket.into())
    }

    async fn init_cookies(&self) -> Result<StackString, Error> {
        let sso = format_sstr!("{}/sso", self.sso_urlbase());
        let mut url = Url::parse(&format_sstr!("{sso}/embed"))?;
        url.query_pairs_mut()
            .append_pair("id", "gauth-widget")
            .append_pair("embedWidged", "true")
            .append_pair("gauthHost", sso.as_str());
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HTTP_USER_AGENT.parse()?);
        let response = self.client.get(url).headers(headers).send().await?;
        let referer = response.url().to_string();
        Ok(referer.into())
    }

    fn get_secrets(&self) -> Secrets {
        Secrets::new(self.consumer_key.as_str(), self.consumer_secret.as_str())
    }

    async fn exchange(&self, oauth1_token: &OAuth1Token) -> Result<OAuth2Token, Error> {
        let secrets = self.get_secrets().token(
            oauth1_token.oauth_token.as_str(),
            oauth1_token.oauth_token_secret.as_str(),
        );
        let base_url = format_sstr!("{}/oauth-service/oauth/", self.api_urlbase());
        let url: Url = format_sstr!("{base_url}exchange/user/2.0").parse()?;
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", SSO_USER_AGENT.parse()?);
        headers.insert("Content-Type", "application/x-www-form-urlencoded".parse()?);

        let client = self.client.clone();

        let token: OAuth2TokenInner = client
            .oauth1(secrets)
            .post(url)
            .headers(headers)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("oauth2 exchange complete");
        Ok(token.into())
    }

    async fn get_oauth1_token(&self, ticket: &str) -> Result<OAuth1Token, Error> {
        let base_url = format_sstr!("{}/oauth-service/oauth/", self.api_urlbase());
        let login_url = format_sstr!("{}/sso/embed", self.sso_urlbase());
        let mut url: Url = format_sstr!("{base_url}preauthorized").parse()?;
        url.query_pairs_mut()
            .append_pair("ticket", ticket)
            .append_pair("login-url", login_url.as_str())
            .append_pair("accepts-mfa-tokens", "true");

        let secrets = self.get_secrets();

        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", SSO_USER_AGENT.parse()?);
        let client = self.client.clone();
        let text = client
            .oauth1(secrets)
            .get(url)
            .headers(headers)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let mut oauth_token: Option<StackString> = None;
        let mut oauth_token_secret: Option<StackString> = None;
        for (k, v) in form_urlencoded::parse(text.as_bytes()) {
            if k == "oauth_token" {
                oauth_token.replace(v.into());
            } else if k == "oauth_token_secret" {
                oauth_token_secret.replace(v.into());
            }
        }
        let oauth_token = oauth_token.ok_or(Error::StaticCustomError("no oauth token"))?;
        let oauth_token_secret =
            oauth_token_secret.ok_or(Error::StaticCustomError("no oauth token secret"))?;

        Ok(OAuth1Token {
            oauth_token,
            oauth_token_secret,
        })
    }
}
