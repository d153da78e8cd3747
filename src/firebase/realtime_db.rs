/// Realtime Database REST client for per-user telemetry and valve status
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Method};
use tokio::time::Duration;
use url::Url;

use crate::config::Credentials;
use crate::errors::SinkError;
use crate::firebase::auth::UserSession;
use crate::firebase::retry::{execute_with_retry, RetryPolicy};
use crate::models::{ActuatorCommand, TelemetrySample};
use crate::sync::{ControlSink, TelemetrySink};

const SENSOR_DATA_NODE: &str = "sensor_data";
const VALVE_STATUS_NODE: &str = "valve_status";

/// Writes under `users/<uid>/` on behalf of the signed-in user.
///
/// Cheap to clone; clones share the HTTP connection pool.
#[derive(Clone)]
pub struct RealtimeDb {
    client: Client,
    base_url: Url,
    session: UserSession,
    retry: RetryPolicy,
}

impl RealtimeDb {
    pub fn new(
        credentials: &Credentials,
        session: UserSession,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| SinkError::Http {
                path: credentials.database_url.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            base_url: credentials.database_url.clone(),
            session,
            retry,
        })
    }

    /// Path of a user node, without the auth token, for logs and errors
    fn node_path(&self, node: &str) -> String {
        format!("users/{}/{}", self.session.local_id, node)
    }

    /// REST endpoint of a user node with the ID token attached
    pub fn endpoint(&self, node: &str) -> Result<Url, SinkError> {
        let mut url = self.base_url.join(&format!("{}.json", self.node_path(node)))?;
        url.query_pairs_mut()
            .append_pair("auth", &self.session.id_token);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        node: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, SinkError> {
        let path = self.node_path(node);
        let url = self.endpoint(node)?;
        debug!("{} {}", method, path);

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        // The URL carries the ID token, keep it out of error messages
        let response = request.send().await.map_err(|source| SinkError::Http {
            path: path.clone(),
            source: source.without_url(),
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            Ok(text)
        } else {
            Err(SinkError::Status {
                path,
                status: status.as_u16(),
                body: text,
            })
        }
    }

    async fn send_with_retry(
        &self,
        method: Method,
        node: &str,
        body: Option<serde_json::Value>,
    ) -> Result<String, SinkError> {
        let what = format!("{} {}", method, self.node_path(node));
        execute_with_retry(&self.retry, &what, || {
            self.send(method.clone(), node, body.as_ref())
        })
        .await
    }

    /// Delete all stored readings and the valve status for the user
    pub async fn purge(&self) -> Result<(), SinkError> {
        self.send_with_retry(Method::DELETE, SENSOR_DATA_NODE, None)
            .await?;
        self.send_with_retry(Method::DELETE, VALVE_STATUS_NODE, None)
            .await?;

        info!("Deleted sensor data and valve status for {}", self.session.email);
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for RealtimeDb {
    async fn push(&self, sample: &TelemetrySample) -> Result<(), SinkError> {
        let body = serde_json::to_value(sample)?;
        let key = self
            .send_with_retry(Method::POST, SENSOR_DATA_NODE, Some(body))
            .await?;
        debug!("Stored sample as {}", key.trim());
        Ok(())
    }
}

#[async_trait]
impl ControlSink for RealtimeDb {
    async fn set(&self, command: &ActuatorCommand) -> Result<(), SinkError> {
        let body = serde_json::to_value(command)?;
        self.send_with_retry(Method::PUT, VALVE_STATUS_NODE, Some(body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(database_url: &str) -> RealtimeDb {
        let credentials = Credentials::new("api-key", database_url).unwrap();
        let session = UserSession {
            local_id: "uid-42".into(),
            id_token: "token/with+chars".into(),
            email: "grower@example.com".into(),
        };
        RealtimeDb::new(
            &credentials,
            session,
            Duration::from_secs(10),
            RetryPolicy::none(),
        )
        .unwrap()
    }

    #[test]
    fn endpoints_are_per_user_json_paths() {
        let db = db("https://agribot-default-rtdb.firebaseio.com");

        assert_eq!(
            db.endpoint(SENSOR_DATA_NODE).unwrap().as_str(),
            "https://agribot-default-rtdb.firebaseio.com/users/uid-42/sensor_data.json?auth=token%2Fwith%2Bchars"
        );
        assert_eq!(
            db.endpoint(VALVE_STATUS_NODE).unwrap().path(),
            "/users/uid-42/valve_status.json"
        );
    }

    #[test]
    fn endpoints_keep_database_prefix() {
        let db = db("https://example.com/rtdb");
        assert_eq!(
            db.endpoint(VALVE_STATUS_NODE).unwrap().path(),
            "/rtdb/users/uid-42/valve_status.json"
        );
    }

    #[test]
    fn errors_do_not_leak_token() {
        let db = db("https://example.com");
        let path = db.node_path(SENSOR_DATA_NODE);

        assert_eq!(path, "users/uid-42/sensor_data");
        assert!(!path.contains("token"));
    }
}
