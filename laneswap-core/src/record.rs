use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::status::ServiceStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub status: ServiceStatus,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl HeartbeatEvent {
    pub fn new(status: ServiceStatus, message: Option<String>, metadata: Metadata, timestamp: DateTime<Utc>) -> Self {
        Self {
            status,
            message,
            timestamp,
            metadata,
        }
    }
}

/// What a storage adapter receives when a service registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub status: ServiceStatus,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub history: VecDeque<HeartbeatEvent>,
}

impl ServiceRecord {
    pub fn new(registration: &ServiceRegistration) -> Self {
        Self {
            id: registration.id.clone(),
            name: registration.name.clone(),
            status: ServiceStatus::Unknown,
            created_at: registration.created_at,
            last_heartbeat_at: None,
            last_message: None,
            metadata: registration.metadata.clone(),
            history: VecDeque::new(),
        }
    }

    /// Appends `event`, evicting the oldest entries beyond `limit`.
    pub(crate) fn push_history(&mut self, event: HeartbeatEvent, limit: usize) {
        self.history.push_back(event);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    /// Reference point for staleness: last heartbeat, or registration if none arrived yet.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_heartbeat_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub service_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ErrorEvent {
    pub fn new(service_id: impl Into<String>, message: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            service_id: service_id.into(),
            message: message.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: usize,
    pub status_counts: BTreeMap<ServiceStatus, usize>,
}

impl StatusSummary {
    pub(crate) fn from_statuses(statuses: impl IntoIterator<Item=ServiceStatus>) -> Self {
        let mut status_counts: BTreeMap<ServiceStatus, usize> = ServiceStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut total = 0;
        for status in statuses {
            total += 1;
            *status_counts.entry(status).or_insert(0) += 1;
        }
        Self { total, status_counts }
    }

    pub fn count(&self, status: ServiceStatus) -> usize {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }
}
