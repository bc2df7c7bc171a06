use crate::error::RefDataError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store collection names shared by all components.
pub mod collections {
    pub const BANKS: &str = "platform_banks";
    pub const ASSIGNMENTS: &str = "bank_assignments";
    pub const USERS: &str = "users";
}

/// Payout addressing method for a settlement bank.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CliqMethod {
    #[default]
    Alias,
    Mobile,
}

/// CliQ payout details attached to a bank record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliqDetails {
    #[serde(default)]
    pub method: CliqMethod,
    #[serde(default)]
    pub value: String,
}

/// A settlement bank usable for transfers.
///
/// Optional attributes missing on the stored document decode to defaults:
/// empty alias CliQ details, zero balance, priority 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformBank {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cliq_details: CliqDetails,
    #[serde(default)]
    pub account_holder: String,
    /// Balance in minor units, mutated only by explicit balance-update calls.
    #[serde(default)]
    pub balance_minor: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub description: String,
    /// Lower is preferred for display ordering.
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PlatformBank {
    pub fn from_document(doc: serde_json::Value) -> Result<Self, RefDataError> {
        serde_json::from_value(doc).map_err(|e| RefDataError::Decode(format!("bank record: {e}")))
    }
}

/// Visibility of a bank-to-exchange grant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    Private,
    Public,
}

/// Grant linking an exchange to a usable settlement bank.
///
/// Soft-delete only: removal flips `is_active` to false and the record stays
/// behind as audit history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BankAssignment {
    #[serde(default)]
    pub id: String,
    pub exchange_id: String,
    pub bank_id: String,
    pub assignment_type: AssignmentType,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_by: String,
}

impl BankAssignment {
    pub fn from_document(doc: serde_json::Value) -> Result<Self, RefDataError> {
        serde_json::from_value(doc)
            .map_err(|e| RefDataError::Decode(format!("assignment record: {e}")))
    }
}

/// An active assignment joined with its resolved bank record.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedBank {
    pub assignment: BankAssignment,
    pub bank: PlatformBank,
}

/// Transfer direction a commission applies to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateKind {
    Percentage,
    Fixed,
}

/// Commission applied to a transfer amount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissionRate {
    #[serde(rename = "type")]
    pub kind: RateKind,
    pub value: f64,
}

impl CommissionRate {
    pub fn percentage(value: f64) -> Self {
        Self {
            kind: RateKind::Percentage,
            value,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self {
            kind: RateKind::Fixed,
            value,
        }
    }

    /// A configured rate is honored only when its value is a usable number.
    pub fn is_well_formed(&self) -> bool {
        self.value.is_finite() && self.value >= 0.0
    }

    /// Commission in minor units for a transfer of `amount_minor`.
    pub fn apply(&self, amount_minor: i64) -> i64 {
        match self.kind {
            RateKind::Percentage => ((amount_minor as f64) * self.value / 100.0).round() as i64,
            RateKind::Fixed => self.value.round() as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Exchange,
}

/// Per-direction configured commission rates on a user record.
///
/// Either side may be absent or malformed on the stored document; resolution
/// falls back to direction-specific defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommissionRates {
    #[serde(default, deserialize_with = "lenient_rate")]
    pub incoming: Option<CommissionRate>,
    #[serde(default, deserialize_with = "lenient_rate")]
    pub outgoing: Option<CommissionRate>,
}

fn lenient_rate<'de, D>(deserializer: D) -> Result<Option<CommissionRate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // A malformed stored rate must fall back to defaults, not fail the whole
    // user decode.
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).ok())
}

/// The slice of a user record this core reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    pub role: UserRole,
    #[serde(default)]
    pub exchange_name: String,
    #[serde(default)]
    pub commission_rates: CommissionRates,
}

fn default_active() -> bool {
    true
}

fn default_priority() -> i64 {
    1
}
