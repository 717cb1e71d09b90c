use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Last committed entitlement state. This is the record written to storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSnapshot {
    /// Records written by the mobile app use `isActive` / `isTrial`.
    #[serde(alias = "isActive")]
    pub active: bool,
    pub product_id: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(alias = "isTrial")]
    pub trial_active: bool,
    pub trial_end_date: Option<DateTime<Utc>>,
}

/// What the premium gate should do with a feature request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AccessDecision {
    Premium,
    #[serde(rename_all = "camelCase")]
    Trial { days_remaining: i64 },
    Locked,
}

impl EntitlementSnapshot {
    /// First-launch state: a trial window of `trial_days` starting at `now`.
    pub fn fresh_trial(now: DateTime<Utc>, trial_days: i64) -> Self {
        Self {
            active: false,
            product_id: None,
            expiration_date: None,
            trial_active: true,
            trial_end_date: Some(now + Duration::days(trial_days)),
        }
    }

    pub fn is_trial_expired(&self, now: DateTime<Utc>) -> bool {
        self.trial_active && self.trial_end_date.map_or(false, |end| end < now)
    }

    pub fn is_trial_running(&self, now: DateTime<Utc>) -> bool {
        self.trial_active && !self.is_trial_expired(now)
    }

    /// Whole trial days left, rounded up, never negative.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        if !self.trial_active {
            return 0;
        }
        let Some(end) = self.trial_end_date else {
            return 0;
        };
        let left = end.signed_duration_since(now).num_milliseconds();
        if left <= 0 {
            return 0;
        }
        (left + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
    }

    pub fn has_access(&self, now: DateTime<Utc>) -> bool {
        self.active || self.is_trial_running(now)
    }

    pub fn access_decision(&self, now: DateTime<Utc>) -> AccessDecision {
        if self.active {
            return AccessDecision::Premium;
        }
        let days_remaining = self.days_remaining(now);
        if self.is_trial_running(now) && days_remaining > 0 {
            AccessDecision::Trial { days_remaining }
        } else {
            AccessDecision::Locked
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorePhase {
    Initializing,
    Ready,
    Reconciling,
    Purchasing,
    Restoring,
}

/// Loading/error signal published next to the snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreStatus {
    pub phase: StorePhase,
    pub last_error: Option<String>,
}

impl StoreStatus {
    pub fn is_loading(&self) -> bool {
        self.phase != StorePhase::Ready
    }
}

impl Default for StoreStatus {
    fn default() -> Self {
        Self {
            phase: StorePhase::Initializing,
            last_error: None,
        }
    }
}

/// Flattened read model for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementView {
    pub has_access: bool,
    pub is_premium: bool,
    pub is_trial_active: bool,
    pub is_trial_expired: bool,
    pub days_remaining: i64,
    pub access: AccessDecision,
    pub snapshot: EntitlementSnapshot,
    pub loading: bool,
    pub last_error: Option<String>,
}

impl EntitlementView {
    pub fn new(snapshot: EntitlementSnapshot, status: &StoreStatus, now: DateTime<Utc>) -> Self {
        Self {
            has_access: snapshot.has_access(now),
            is_premium: snapshot.active,
            is_trial_active: snapshot.is_trial_running(now),
            is_trial_expired: snapshot.is_trial_expired(now),
            days_remaining: snapshot.days_remaining(now),
            access: snapshot.access_decision(now),
            snapshot,
            loading: status.is_loading(),
            last_error: status.last_error.clone(),
        }
    }
}
