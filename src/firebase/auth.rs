/// Email/password sign-in against the Firebase Identity Toolkit REST API
use log::{debug, info};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Duration;

use crate::config::Credentials;
use crate::errors::AuthError;

const IDENTITY_TOOLKIT_URL: &str = "https://www.googleapis.com/identitytoolkit/v3/relyingparty";

/// The signed-in operator, as needed by the store client.
#[derive(Clone, PartialEq, Eq)]
pub struct UserSession {
    pub local_id: String,
    pub id_token: String,
    pub email: String,
}

impl std::fmt::Debug for UserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSession")
            .field("local_id", &self.local_id)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    id_token: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

pub struct Authenticator {
    client: Client,
    credentials: Credentials,
}

impl Authenticator {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            credentials,
        })
    }

    /// Sign in with email and password
    ///
    /// # Returns
    /// The session holding the user id and the ID token the store expects
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserSession, AuthError> {
        let response: SignInResponse = self
            .call(
                "verifyPassword",
                json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        info!("Signed in as {}", email);
        Ok(UserSession {
            local_id: response.local_id,
            id_token: response.id_token,
            email: if response.email.is_empty() {
                email.to_string()
            } else {
                response.email
            },
        })
    }

    /// Look up the account behind an ID token
    pub async fn account_info(&self, id_token: &str) -> Result<AccountInfo, AuthError> {
        let response: AccountInfoResponse = self
            .call("getAccountInfo", json!({ "idToken": id_token }))
            .await?;

        response
            .users
            .into_iter()
            .next()
            .ok_or(AuthError::UnknownAccount)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, AuthError> {
        let url = format!("{}/{}", IDENTITY_TOOLKIT_URL, method);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.credentials.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if status.is_success() {
            Ok(response
                .json()
                .await
                .map_err(reqwest::Error::without_url)?)
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(error_from_body(status.as_u16(), &text))
        }
    }
}

/// Turn an Identity Toolkit error response into an AuthError
fn error_from_body(status: u16, body: &str) -> AuthError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => AuthError::from_message(&parsed.error.message),
        Err(_) => AuthError::Rejected(format!("HTTP {}: {}", status, body.trim())),
    }
}
