//! Models for two-factor enrollment and login challenges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Active two-factor enrollment of a user.
pub struct TwoFactorRecord {
    pub user_id: UserId,
    /// AES-GCM protected base32 TOTP secret (`enc:v1:<nonce>:<ciphertext>`).
    pub secret_ciphertext: String,
    /// Keyed digests of the unused backup codes.
    pub backup_code_hashes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TwoFactorRecord {
    pub fn backup_codes_remaining(&self) -> usize {
        self.backup_code_hashes.len()
    }
}

#[derive(Debug, Clone)]
/// Secret and backup codes generated by setup, held until enable confirms
/// the user can produce a valid code.
pub struct PendingTwoFactorSetup {
    pub secret: String,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Clone)]
/// Login context of a user who passed the password check but still owes a
/// second factor.
pub struct PendingTwoFactorVerification {
    pub user_id: UserId,
    pub remember_me: bool,
    pub failed_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
    BackupCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of a successful second-factor check.
pub struct TwoFactorVerification {
    pub user_id: UserId,
    pub remember_me: bool,
    pub method: TwoFactorMethod,
    /// Position of the consumed code in the stored set, for backup codes.
    pub backup_index_consumed: Option<usize>,
    pub backup_codes_remaining: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Response returned when initiating two-factor setup. The backup codes are
/// shown exactly once.
pub struct TwoFactorSetupResponse {
    pub secret: String,
    /// `otpauth://` URI encoded in the QR code.
    pub uri: String,
    /// Base64 PNG rendering of `uri`.
    pub qr_code: String,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Request payload carrying a TOTP or backup code.
pub struct TwoFactorCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Password re-confirmation required to turn two-factor off.
pub struct TwoFactorDisableRequest {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Exposes two-factor enrollment status for the current user.
pub struct TwoFactorStatusResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_codes_remaining: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}
