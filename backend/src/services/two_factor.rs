//! TOTP enrollment and second-factor verification.
//!
//! Enrollment is a two-step flow: `setup` parks a fresh secret and backup
//! codes for ten minutes, `enable` persists them once the user proves the
//! authenticator works. Login challenges live for five minutes and allow
//! five wrong codes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use super::audit_log::{AuditEventType, AuditLogEntry, AuditLogService};
use super::credentials::CredentialStore;
use super::ephemeral::{EphemeralStore, Entry, MemoryEphemeralStore};
use crate::error::AuthError;
use crate::models::two_factor::{
    PendingTwoFactorSetup, PendingTwoFactorVerification, TwoFactorMethod, TwoFactorRecord,
    TwoFactorSetupResponse, TwoFactorStatusResponse, TwoFactorVerification,
};
use crate::models::user::User;
use crate::repositories::TwoFactorRepository;
use crate::types::UserId;
use crate::utils::mfa::{
    generate_backup_codes, generate_otpauth_uri, generate_qr_code, generate_totp_secret,
    hash_backup_code, protect_totp_secret, recover_totp_secret, verify_totp_code_at,
};
use crate::utils::security::{constant_time_eq, generate_secure_token, hash_token};

pub const SETUP_TTL_MINUTES: i64 = 10;
pub const VERIFICATION_TTL_MINUTES: i64 = 5;
pub const MAX_VERIFICATION_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct TwoFactorService {
    records: Arc<dyn TwoFactorRepository>,
    credentials: CredentialStore,
    pending_setups: Arc<dyn EphemeralStore<PendingTwoFactorSetup>>,
    pending_verifications: Arc<dyn EphemeralStore<PendingTwoFactorVerification>>,
    audit: AuditLogService,
    issuer: String,
    encryption_key: String,
}

impl TwoFactorService {
    pub fn new(
        records: Arc<dyn TwoFactorRepository>,
        credentials: CredentialStore,
        audit: AuditLogService,
        issuer: impl Into<String>,
        encryption_key: impl Into<String>,
    ) -> Self {
        Self::with_stores(
            records,
            credentials,
            Arc::new(MemoryEphemeralStore::new()),
            Arc::new(MemoryEphemeralStore::new()),
            audit,
            issuer,
            encryption_key,
        )
    }

    pub fn with_stores(
        records: Arc<dyn TwoFactorRepository>,
        credentials: CredentialStore,
        pending_setups: Arc<dyn EphemeralStore<PendingTwoFactorSetup>>,
        pending_verifications: Arc<dyn EphemeralStore<PendingTwoFactorVerification>>,
        audit: AuditLogService,
        issuer: impl Into<String>,
        encryption_key: impl Into<String>,
    ) -> Self {
        Self {
            records,
            credentials,
            pending_setups,
            pending_verifications,
            audit,
            issuer: issuer.into(),
            encryption_key: encryption_key.into(),
        }
    }

    pub async fn setup(&self, user: &User) -> Result<TwoFactorSetupResponse, AuthError> {
        if user.two_factor_enabled {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }

        let secret = generate_totp_secret();
        let uri = generate_otpauth_uri(&self.issuer, &user.email, &secret)?;
        let qr_code = generate_qr_code(&self.issuer, &user.email, &secret)?;
        let backup_codes = generate_backup_codes();

        self.pending_setups.insert(
            &setup_key(user.id),
            PendingTwoFactorSetup {
                secret: secret.clone(),
                backup_codes: backup_codes.clone(),
            },
            Utc::now() + Duration::minutes(SETUP_TTL_MINUTES),
        );

        self.audit
            .record_event(AuditLogEntry::success(AuditEventType::TwoFactorSetup).actor(user.id))
            .await;

        Ok(TwoFactorSetupResponse {
            secret,
            uri,
            qr_code,
            backup_codes,
        })
    }

    pub async fn enable(&self, user: &User, code: &str) -> Result<(), AuthError> {
        self.enable_at(user, code, Utc::now()).await
    }

    pub async fn enable_at(
        &self,
        user: &User,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if user.two_factor_enabled {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }
        let key = setup_key(user.id);
        let pending = self
            .pending_setups
            .get(&key, now)
            .ok_or(AuthError::TwoFactorSetupMissing)?;

        if !verify_totp_code_at(&pending.secret, code, unix_seconds(now))? {
            self.audit
                .record_event(
                    AuditLogEntry::failure(AuditEventType::TwoFactorEnable, "invalid_code")
                        .actor(user.id),
                )
                .await;
            return Err(AuthError::SetupCodeRejected);
        }

        let Some(pending) = self.pending_setups.take(&key, now) else {
            return Err(AuthError::TwoFactorSetupMissing);
        };
        let record = TwoFactorRecord {
            user_id: user.id,
            secret_ciphertext: protect_totp_secret(&pending.secret, &self.encryption_key)?,
            backup_code_hashes: self.hash_codes(&pending.backup_codes)?,
            created_at: now,
            updated_at: now,
        };
        self.records.enable(&record).await?;

        self.audit
            .record_event(AuditLogEntry::success(AuditEventType::TwoFactorEnable).actor(user.id))
            .await;
        tracing::info!(user_id = %user.id, "Two-factor authentication enabled");
        Ok(())
    }

    pub async fn disable(&self, user: &User, password: &str) -> Result<(), AuthError> {
        if !user.two_factor_enabled {
            return Err(AuthError::TwoFactorNotEnabled);
        }
        if !self.credentials.confirm_password(user, password).await? {
            self.audit
                .record_event(
                    AuditLogEntry::failure(AuditEventType::TwoFactorDisable, "wrong_password")
                        .actor(user.id),
                )
                .await;
            return Err(AuthError::PasswordConfirmationFailed);
        }

        self.records.disable(user.id).await?;
        self.audit
            .record_event(AuditLogEntry::success(AuditEventType::TwoFactorDisable).actor(user.id))
            .await;
        tracing::info!(user_id = %user.id, "Two-factor authentication disabled");
        Ok(())
    }

    pub async fn status(&self, user: &User) -> anyhow::Result<TwoFactorStatusResponse> {
        if !user.two_factor_enabled {
            return Ok(TwoFactorStatusResponse {
                enabled: false,
                backup_codes_remaining: None,
            });
        }
        let record = self.records.find(user.id).await?;
        Ok(TwoFactorStatusResponse {
            enabled: record.is_some(),
            backup_codes_remaining: record.map(|record| record.backup_codes_remaining()),
        })
    }

    /// Parks a password-verified login until a second factor arrives and
    /// returns the opaque token that correlates the two requests.
    pub fn begin_verification(&self, user_id: UserId, remember_me: bool) -> String {
        self.begin_verification_at(user_id, remember_me, Utc::now())
    }

    pub fn begin_verification_at(
        &self,
        user_id: UserId,
        remember_me: bool,
        now: DateTime<Utc>,
    ) -> String {
        let token = generate_secure_token();
        self.pending_verifications.insert(
            &hash_token(&token),
            PendingTwoFactorVerification {
                user_id,
                remember_me,
                failed_attempts: 0,
            },
            now + Duration::minutes(VERIFICATION_TTL_MINUTES),
        );
        token
    }

    pub async fn verify(
        &self,
        pending_token: &str,
        code: &str,
    ) -> Result<TwoFactorVerification, AuthError> {
        self.verify_at(pending_token, code, Utc::now()).await
    }

    /// Checks `code` as a TOTP first, then as a backup code. The error for a
    /// wrong code is the same whichever factor was attempted.
    pub async fn verify_at(
        &self,
        pending_token: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<TwoFactorVerification, AuthError> {
        let key = hash_token(pending_token);
        let pending = self
            .pending_verifications
            .get(&key, now)
            .ok_or(AuthError::TwoFactorSessionExpired)?;

        let Some(record) = self.records.find(pending.user_id).await? else {
            self.pending_verifications.remove(&key);
            return Err(AuthError::TwoFactorSessionExpired);
        };

        let secret = recover_totp_secret(&record.secret_ciphertext, &self.encryption_key)?;
        if verify_totp_code_at(&secret, code, unix_seconds(now))? {
            let pending = self.claim(&key, now)?;
            return Ok(TwoFactorVerification {
                user_id: pending.user_id,
                remember_me: pending.remember_me,
                method: TwoFactorMethod::Totp,
                backup_index_consumed: None,
                backup_codes_remaining: None,
            });
        }

        let submitted = hash_backup_code(code, &self.encryption_key)?;
        // Every stored hash is compared so timing does not reveal the position.
        let index = record
            .backup_code_hashes
            .iter()
            .enumerate()
            .fold(None, |found, (position, stored)| {
                let hit = constant_time_eq(stored, &submitted);
                found.or(hit.then_some(position))
            });

        if let Some(index) = index {
            // The challenge is claimed before the code is burned, so a request
            // that loses the claim leaves its backup code untouched.
            let claimed = self.claim_entry(&key, now)?;
            let consumed = self
                .records
                .consume_backup_code(claimed.value.user_id, &submitted)
                .await;
            return match consumed {
                Ok(Some(remaining)) => Ok(TwoFactorVerification {
                    user_id: claimed.value.user_id,
                    remember_me: claimed.value.remember_me,
                    method: TwoFactorMethod::BackupCode,
                    backup_index_consumed: Some(index),
                    backup_codes_remaining: Some(remaining),
                }),
                Ok(None) => Err(AuthError::InvalidTwoFactorCode {
                    attempts_remaining: self.reinstate_after_failure(&key, claimed),
                }),
                Err(err) => {
                    self.pending_verifications
                        .insert(&key, claimed.value, claimed.expires_at);
                    Err(err.into())
                }
            };
        }

        Err(AuthError::InvalidTwoFactorCode {
            attempts_remaining: self.record_failed_attempt(&key, now)?,
        })
    }

    /// Replaces the backup code set after re-confirming a current TOTP code.
    pub async fn regenerate_backup_codes(
        &self,
        user: &User,
        code: &str,
    ) -> Result<Vec<String>, AuthError> {
        if !user.two_factor_enabled {
            return Err(AuthError::TwoFactorNotEnabled);
        }
        let record = self
            .records
            .find(user.id)
            .await?
            .ok_or(AuthError::TwoFactorNotEnabled)?;
        let secret = recover_totp_secret(&record.secret_ciphertext, &self.encryption_key)?;
        if !verify_totp_code_at(&secret, code, unix_seconds(Utc::now()))? {
            self.audit
                .record_event(
                    AuditLogEntry::failure(AuditEventType::BackupCodesRegenerate, "invalid_code")
                        .actor(user.id),
                )
                .await;
            return Err(AuthError::SetupCodeRejected);
        }

        let codes = generate_backup_codes();
        self.records
            .replace_backup_codes(user.id, &self.hash_codes(&codes)?)
            .await?;
        self.audit
            .record_event(
                AuditLogEntry::success(AuditEventType::BackupCodesRegenerate)
                    .actor(user.id)
                    .metadata(json!({ "count": codes.len() })),
            )
            .await;
        Ok(codes)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.pending_setups.purge_expired(now) + self.pending_verifications.purge_expired(now)
    }

    fn hash_codes(&self, codes: &[String]) -> anyhow::Result<Vec<String>> {
        codes
            .iter()
            .map(|code| hash_backup_code(code, &self.encryption_key))
            .collect()
    }

    /// Removes the pending verification on success. Losing the race to a
    /// concurrent request reads as an expired challenge.
    fn claim(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingTwoFactorVerification, AuthError> {
        self.claim_entry(key, now).map(|entry| entry.value)
    }

    fn claim_entry(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Entry<PendingTwoFactorVerification>, AuthError> {
        let mut claimed = None;
        self.pending_verifications
            .update(key, now, &mut |slot| claimed = slot.take());
        claimed.ok_or(AuthError::TwoFactorSessionExpired)
    }

    /// Puts a claimed challenge back with one more failure charged, unless
    /// that exhausts the budget. Returns the attempts left.
    fn reinstate_after_failure(
        &self,
        key: &str,
        mut claimed: Entry<PendingTwoFactorVerification>,
    ) -> u32 {
        claimed.value.failed_attempts += 1;
        let left = MAX_VERIFICATION_ATTEMPTS.saturating_sub(claimed.value.failed_attempts);
        if left > 0 {
            self.pending_verifications
                .insert(key, claimed.value, claimed.expires_at);
        }
        left
    }

    fn record_failed_attempt(&self, key: &str, now: DateTime<Utc>) -> Result<u32, AuthError> {
        let mut remaining = None;
        self.pending_verifications.update(key, now, &mut |slot| {
            let Some(entry) = slot.as_mut() else {
                return;
            };
            entry.value.failed_attempts += 1;
            let left = MAX_VERIFICATION_ATTEMPTS.saturating_sub(entry.value.failed_attempts);
            remaining = Some(left);
            if left == 0 {
                *slot = None;
            }
        });
        remaining.ok_or(AuthError::TwoFactorSessionExpired)
    }
}

fn setup_key(user_id: UserId) -> String {
    user_id.to_string()
}

fn unix_seconds(now: DateTime<Utc>) -> u64 {
    now.timestamp().max(0) as u64
}
