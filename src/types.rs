//! Type definitions for the slot swap service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum SlotStatus {
    Available,
    Pending,
    Swapped,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStatus::Available => write!(f, "available"),
            SlotStatus::Pending => write!(f, "pending"),
            SlotStatus::Swapped => write!(f, "swapped"),
        }
    }
}

impl std::str::FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(SlotStatus::Available),
            "pending" => Ok(SlotStatus::Pending),
            "swapped" | "busy" => Ok(SlotStatus::Swapped),
            _ => Err(format!("Invalid slot status: {}", s)),
        }
    }
}

impl TryFrom<String> for SlotStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Lifecycle state of a swap request. `Accepted` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Accepted => write!(f, "accepted"),
            RequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            _ => Err(format!("Invalid request status: {}", s)),
        }
    }
}

impl TryFrom<String> for RequestStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A user-owned time slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub is_swappable: bool,
    pub status: SlotStatus,
    pub created_at: DateTime<Utc>,
}

/// A proposed exchange of two slots between their owners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub offered_slot_id: String,
    pub requested_slot_id: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

/// Registered account
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by an owner when creating a slot
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSlot {
    pub title: String,
    #[serde(alias = "d_Date", deserialize_with = "flexible_datetime::deserialize")]
    pub date: DateTime<Utc>,
    pub is_swappable: bool,
}

/// Owner-initiated change to a slot
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotUpdate {
    pub is_swappable: bool,
    #[serde(default)]
    pub status: Option<SlotStatus>,
}

/// A swap request together with both slots as they stand after the
/// request or response was applied
#[derive(Debug, Clone, Serialize)]
pub struct SwapOutcome {
    pub request: SwapRequest,
    pub offered: Slot,
    pub requested: Slot,
}

/// Filter for listing swap requests
#[derive(Debug, Clone, Copy)]
pub struct SwapFilter {
    pub status: Option<RequestStatus>,
    pub limit: i64,
}

impl Default for SwapFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
        }
    }
}

// Accepts RFC 3339 as well as the zone-less forms browsers send from
// datetime-local inputs; zone-less values are taken as UTC.
pub(crate) mod flexible_datetime {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    const NAIVE_FORMATS: [&str; 3] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
    ];

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        let raw = raw.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Some(naive) = NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        {
            return Ok(naive.and_utc());
        }

        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| format!("Invalid date: {}", raw))
    }
}
