use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::appsettings::BackendSettings;
use crate::roster::{RosterEntry, UserDirectory, UserId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

const AUTH_HEADER: &str = "authorization-token";
const UID_HEADER: &str = "tg-uid";
const ATTRIB_HEADER: &str = "attrib";

/// Columns the scheduler needs from the user table.
const ROSTER_ATTRIBUTES: &str = "tg_uid time_zone";

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub tg_uid: UserId,
    /// Habit name to the number of times it has been worked on.
    #[serde(default)]
    pub habits: HashMap<String, u32>,
    /// The backend stores an empty list as null.
    #[serde(default)]
    pub completed: Option<Vec<String>>,
    #[serde(default = "default_repeat_number")]
    pub repeat_number: u32,
    #[serde(default)]
    pub time_zone: i32,
}

impl UserProfile {
    pub fn completed_habits(&self) -> &[String] {
        self.completed.as_deref().unwrap_or_default()
    }
}

fn default_repeat_number() -> u32 {
    21
}

/// Partial update; the backend changes only the fields that are present.
#[derive(Debug, Default, Serialize)]
pub struct UserPatch {
    pub tg_uid: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub habits: Option<HashMap<String, u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<i32>,
}

#[derive(Debug, Serialize)]
struct NewUser {
    tg_uid: UserId,
    time_zone: i32,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    result: bool,
    #[serde(default)]
    user: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    result: bool,
}

#[derive(Debug, Deserialize)]
struct RosterRecord {
    tg_uid: UserId,
    #[serde(default)]
    time_zone: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RosterEnvelope {
    result: bool,
    #[serde(default)]
    users: Vec<RosterRecord>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Client for the habit CRUD backend. All requests carry the shared
/// authorization token and a bounded timeout.
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BackendClient {
    pub fn new(settings: &BackendSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building the backend HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            token: settings.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// `None` when the backend has no account for this user.
    pub async fn get_user(&self, tg_uid: UserId) -> anyhow::Result<Option<UserProfile>> {
        let envelope: UserEnvelope = self
            .http
            .get(self.url("user"))
            .header(AUTH_HEADER, &self.token)
            .header(UID_HEADER, tg_uid)
            .send()
            .await?
            .json()
            .await
            .context("decoding the user response")?;

        Ok(envelope.user.filter(|_| envelope.result))
    }

    pub async fn make_user(&self, tg_uid: UserId, time_zone: i32) -> anyhow::Result<bool> {
        let envelope: UserEnvelope = self
            .http
            .post(self.url("make_user"))
            .header(AUTH_HEADER, &self.token)
            .json(&NewUser { tg_uid, time_zone })
            .send()
            .await?
            .json()
            .await
            .context("decoding the make_user response")?;

        Ok(envelope.result)
    }

    pub async fn patch_user(&self, patch: &UserPatch) -> anyhow::Result<bool> {
        let envelope: ResultEnvelope = self
            .http
            .patch(self.url("change_user"))
            .header(AUTH_HEADER, &self.token)
            .json(patch)
            .send()
            .await?
            .json()
            .await
            .context("decoding the change_user response")?;

        Ok(envelope.result)
    }

    pub async fn delete_user(&self, tg_uid: UserId) -> anyhow::Result<bool> {
        let envelope: ResultEnvelope = self
            .http
            .delete(self.url("delete_user"))
            .header(AUTH_HEADER, &self.token)
            .header(UID_HEADER, tg_uid)
            .send()
            .await?
            .json()
            .await
            .context("decoding the delete_user response")?;

        Ok(envelope.result)
    }

    async fn get_users(&self, attributes: &str) -> anyhow::Result<RosterEnvelope> {
        let envelope = self
            .http
            .get(self.url("get_users"))
            .header(AUTH_HEADER, &self.token)
            .header(ATTRIB_HEADER, attributes)
            .send()
            .await?
            .json()
            .await
            .context("decoding the get_users response")?;

        Ok(envelope)
    }
}

#[async_trait]
impl UserDirectory for BackendClient {
    async fn list_users(&self) -> anyhow::Result<Vec<RosterEntry>> {
        let envelope = self.get_users(ROSTER_ATTRIBUTES).await?;
        roster_from_envelope(envelope)
    }
}

/// An empty user table comes back as a `UserNotFound` error envelope; that is
/// a valid empty roster, not a failure to retry. A record without a time zone
/// is scheduled at offset zero.
fn roster_from_envelope(envelope: RosterEnvelope) -> anyhow::Result<Vec<RosterEntry>> {
    if envelope.result {
        return Ok(envelope
            .users
            .into_iter()
            .map(|record| RosterEntry {
                user_id: record.tg_uid,
                offset_hours: record.time_zone.unwrap_or(0),
            })
            .collect());
    }

    match envelope.error_type.as_deref() {
        Some("UserNotFound") => Ok(Vec::new()),
        other => anyhow::bail!(
            "backend rejected the roster query. [error_type = {:?}, error_message = {:?}]",
            other,
            envelope.error_message
        ),
    }
}
