//! Sequences a login: rate limit, lockout, password, optional second factor,
//! then session issuance.

use serde_json::json;

use super::audit_log::{AuditEventType, AuditLogEntry, AuditLogService};
use super::credentials::{CredentialCheck, CredentialStore};
use super::lockout::LockoutTracker;
use super::rate_limit::RateLimiter;
use super::session::SessionManager;
use super::two_factor::TwoFactorService;
use crate::config::two_factor_required;
use crate::error::AuthError;
use crate::models::session::IssuedSession;
use crate::models::two_factor::{TwoFactorMethod, TwoFactorVerification};
use crate::models::user::User;

const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy)]
pub struct LoginAttempt<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub remember_me: bool,
    pub ip: Option<&'a str>,
    /// Session token already presented by the client, revoked on success.
    pub existing_session: Option<&'a str>,
}

#[derive(Debug)]
pub enum LoginOutcome {
    SessionIssued {
        user: User,
        session: IssuedSession,
    },
    TwoFactorRequired {
        pending_token: String,
    },
}

#[derive(Debug)]
pub struct TwoFactorLogin {
    pub user: User,
    pub session: IssuedSession,
    pub verification: TwoFactorVerification,
}

#[derive(Clone)]
pub struct LoginOrchestrator {
    rate_limiter: RateLimiter,
    lockout: LockoutTracker,
    credentials: CredentialStore,
    sessions: SessionManager,
    two_factor: TwoFactorService,
    audit: AuditLogService,
    two_factor_feature_enabled: bool,
}

impl LoginOrchestrator {
    pub fn new(
        rate_limiter: RateLimiter,
        lockout: LockoutTracker,
        credentials: CredentialStore,
        sessions: SessionManager,
        two_factor: TwoFactorService,
        audit: AuditLogService,
        two_factor_feature_enabled: bool,
    ) -> Self {
        Self {
            rate_limiter,
            lockout,
            credentials,
            sessions,
            two_factor,
            audit,
            two_factor_feature_enabled,
        }
    }

    pub async fn login(&self, attempt: LoginAttempt<'_>) -> Result<LoginOutcome, AuthError> {
        let client = attempt.ip.unwrap_or(UNKNOWN_CLIENT);
        if !self.rate_limiter.allow(client) {
            let retry_after = self.rate_limiter.retry_after(client).max(1);
            tracing::warn!(ip = client, retry_after, "Login rate limit exceeded");
            self.audit
                .record_event(
                    AuditLogEntry::failure(AuditEventType::Login, "rate_limited")
                        .ip(attempt.ip)
                        .metadata(json!({ "email": attempt.email })),
                )
                .await;
            return Err(AuthError::RateLimited { retry_after });
        }

        let status = self.lockout.is_locked(attempt.email);
        if status.locked {
            self.audit
                .record_event(
                    AuditLogEntry::failure(AuditEventType::Login, "account_locked")
                        .ip(attempt.ip)
                        .metadata(json!({ "email": attempt.email })),
                )
                .await;
            return Err(AuthError::AccountLocked {
                minutes_remaining: status.minutes_remaining,
            });
        }

        let user = match self
            .credentials
            .verify(attempt.email, attempt.password)
            .await?
        {
            CredentialCheck::Verified(user) => user,
            CredentialCheck::WrongPassword(user) => {
                return Err(self
                    .reject_password(&attempt, Some(&user), "wrong_password")
                    .await)
            }
            CredentialCheck::UnknownAccount => {
                return Err(self.reject_password(&attempt, None, "unknown_email").await)
            }
        };

        // A correct password clears brute-force state even if the second
        // factor later fails.
        self.lockout.reset(attempt.email);

        if two_factor_required(self.two_factor_feature_enabled, user.two_factor_enabled) {
            let pending_token = self
                .two_factor
                .begin_verification(user.id, attempt.remember_me);
            self.audit
                .record_event(
                    AuditLogEntry::success(AuditEventType::TwoFactorChallenge)
                        .actor(user.id)
                        .ip(attempt.ip),
                )
                .await;
            return Ok(LoginOutcome::TwoFactorRequired { pending_token });
        }

        let session = self
            .sessions
            .replace(attempt.existing_session, user.id, attempt.remember_me)
            .await?;
        self.audit
            .record_event(
                AuditLogEntry::success(AuditEventType::Login)
                    .actor(user.id)
                    .ip(attempt.ip)
                    .metadata(json!({ "rememberMe": attempt.remember_me })),
            )
            .await;
        tracing::info!(user_id = %user.id, "User logged in");
        Ok(LoginOutcome::SessionIssued { user, session })
    }

    /// Finishes a login parked on a second factor.
    pub async fn complete_two_factor(
        &self,
        pending_token: &str,
        code: &str,
        existing_session: Option<&str>,
        ip: Option<&str>,
    ) -> Result<TwoFactorLogin, AuthError> {
        let verification = match self.two_factor.verify(pending_token, code).await {
            Ok(verification) => verification,
            Err(err) => {
                let reason = match &err {
                    AuthError::InvalidTwoFactorCode { .. } => "invalid_code",
                    AuthError::TwoFactorSessionExpired => "challenge_expired",
                    _ => "error",
                };
                self.audit
                    .record_event(
                        AuditLogEntry::failure(AuditEventType::TwoFactorVerify, reason).ip(ip),
                    )
                    .await;
                return Err(err);
            }
        };

        let Some(user) = self.credentials.find_user(verification.user_id).await? else {
            return Err(AuthError::TwoFactorSessionExpired);
        };

        let session = self
            .sessions
            .replace(existing_session, user.id, verification.remember_me)
            .await?;

        let method = match verification.method {
            TwoFactorMethod::Totp => "totp",
            TwoFactorMethod::BackupCode => "backup_code",
        };
        self.audit
            .record_event(
                AuditLogEntry::success(AuditEventType::TwoFactorVerify)
                    .actor(user.id)
                    .ip(ip)
                    .metadata(json!({
                        "method": method,
                        "backupIndexConsumed": verification.backup_index_consumed,
                        "backupCodesRemaining": verification.backup_codes_remaining,
                    })),
            )
            .await;
        self.audit
            .record_event(
                AuditLogEntry::success(AuditEventType::Login)
                    .actor(user.id)
                    .ip(ip)
                    .metadata(json!({ "rememberMe": verification.remember_me, "method": method })),
            )
            .await;
        tracing::info!(user_id = %user.id, method, "User logged in with second factor");

        Ok(TwoFactorLogin {
            user,
            session,
            verification,
        })
    }

    pub async fn logout(
        &self,
        session_token: Option<&str>,
        user: Option<&User>,
        ip: Option<&str>,
    ) -> anyhow::Result<()> {
        if let Some(token) = session_token {
            self.sessions.revoke(token).await?;
        }
        let mut entry = AuditLogEntry::success(AuditEventType::Logout).ip(ip);
        if let Some(user) = user {
            entry = entry.actor(user.id);
        }
        self.audit.record_event(entry).await;
        Ok(())
    }

    /// Changes the password, revokes every session of the user and issues a
    /// fresh one for the caller.
    pub async fn change_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
        remember_me: bool,
        ip: Option<&str>,
    ) -> Result<IssuedSession, AuthError> {
        if let Err(err) = self
            .credentials
            .change_password(user, current_password, new_password)
            .await
        {
            let reason = match &err {
                AuthError::PasswordConfirmationFailed => "wrong_password",
                AuthError::WeakPassword { .. } => "weak_password",
                _ => "error",
            };
            self.audit
                .record_event(
                    AuditLogEntry::failure(AuditEventType::PasswordChange, reason)
                        .actor(user.id)
                        .ip(ip),
                )
                .await;
            return Err(err);
        }

        let revoked = self.sessions.revoke_all_for_user(user.id).await?;
        let session = self.sessions.issue(user.id, remember_me).await?;
        self.audit
            .record_event(
                AuditLogEntry::success(AuditEventType::PasswordChange)
                    .actor(user.id)
                    .ip(ip)
                    .metadata(json!({ "sessionsRevoked": revoked })),
            )
            .await;
        Ok(session)
    }

    async fn reject_password(
        &self,
        attempt: &LoginAttempt<'_>,
        user: Option<&User>,
        reason: &str,
    ) -> AuthError {
        // Unknown emails count against the same budget so the response
        // never reveals whether the account exists.
        let outcome = self.lockout.record_failure(attempt.email);

        let mut entry = AuditLogEntry::failure(AuditEventType::Login, reason)
            .ip(attempt.ip)
            .metadata(json!({
                "email": attempt.email,
                "attemptsRemaining": outcome.attempts_remaining,
            }));
        if let Some(user) = user {
            entry = entry.actor(user.id);
        }
        self.audit.record_event(entry).await;

        if outcome.locked {
            tracing::warn!(email = attempt.email, "Account locked after repeated failures");
            let mut entry = AuditLogEntry::success(AuditEventType::Lockout)
                .ip(attempt.ip)
                .metadata(json!({
                    "email": attempt.email,
                    "lockoutMinutes": outcome.lockout_minutes,
                }));
            if let Some(user) = user {
                entry = entry.actor(user.id);
            }
            self.audit.record_event(entry).await;
        }

        AuthError::InvalidCredentials {
            attempts_remaining: Some(outcome.attempts_remaining),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::user::UserRole;
    use crate::repositories::{MemoryStore, UserRepository};
    use crate::utils::mfa::generate_totp_code_at;
    use crate::utils::password::hash_password;

    const PASSWORD: &str = "correct horse battery";

    struct Fixture {
        orchestrator: LoginOrchestrator,
        two_factor: TwoFactorService,
        sessions: SessionManager,
        store: Arc<MemoryStore>,
        user: User,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user = User::new(
            "alice@example.com",
            "Alice",
            hash_password(PASSWORD).unwrap(),
            UserRole::Member,
        );
        UserRepository::create(store.as_ref(), &user).await.unwrap();

        let audit = AuditLogService::new(store.clone());
        let credentials = CredentialStore::new(store.clone());
        let sessions = SessionManager::new(
            store.clone(),
            store.clone(),
            Duration::hours(24),
            Duration::days(30),
        );
        let two_factor = TwoFactorService::new(
            store.clone(),
            credentials.clone(),
            audit.clone(),
            "Gatehouse",
            "unit-test-key",
        );
        let orchestrator = LoginOrchestrator::new(
            RateLimiter::in_memory(5, Duration::minutes(15)),
            LockoutTracker::in_memory(5, Duration::minutes(30)),
            credentials,
            sessions.clone(),
            two_factor.clone(),
            audit,
            true,
        );
        Fixture {
            orchestrator,
            two_factor,
            sessions,
            store,
            user,
        }
    }

    fn attempt<'a>(email: &'a str, password: &'a str, ip: &'a str) -> LoginAttempt<'a> {
        LoginAttempt {
            email,
            password,
            remember_me: false,
            ip: Some(ip),
            existing_session: None,
        }
    }

    #[tokio::test]
    async fn correct_password_without_two_factor_issues_session() {
        let fx = fixture().await;
        let outcome = fx
            .orchestrator
            .login(attempt("Alice@Example.com", PASSWORD, "10.0.0.1"))
            .await
            .unwrap();
        let LoginOutcome::SessionIssued { user, session } = outcome else {
            panic!("expected a session");
        };
        assert_eq!(user.id, fx.user.id);
        assert!(!session.csrf_token().is_empty());
        assert!(fx.sessions.validate(&session.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fifth_failure_reports_zero_then_account_is_locked() {
        let fx = fixture().await;
        for (index, expected) in (0..5).rev().enumerate() {
            let ip = format!("10.0.1.{index}");
            match fx
                .orchestrator
                .login(attempt("alice@example.com", "wrong", &ip))
                .await
            {
                Err(AuthError::InvalidCredentials { attempts_remaining }) => {
                    assert_eq!(attempts_remaining, Some(expected))
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        match fx
            .orchestrator
            .login(attempt("alice@example.com", PASSWORD, "10.0.1.99"))
            .await
        {
            Err(AuthError::AccountLocked { minutes_remaining }) => {
                assert!((29..=30).contains(&minutes_remaining))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sixth_attempt_from_one_ip_is_rate_limited_across_accounts() {
        let fx = fixture().await;
        for index in 0..5 {
            let email = format!("user{index}@example.com");
            let result = fx
                .orchestrator
                .login(attempt(&email, "whatever", "192.168.0.7"))
                .await;
            assert!(matches!(result, Err(AuthError::InvalidCredentials { .. })));
        }
        let result = fx
            .orchestrator
            .login(attempt("alice@example.com", PASSWORD, "192.168.0.7"))
            .await;
        assert!(matches!(result, Err(AuthError::RateLimited { retry_after }) if retry_after > 0));
    }

    #[tokio::test]
    async fn unknown_email_looks_like_wrong_password_but_is_audited_as_such() {
        let fx = fixture().await;
        let unknown = fx
            .orchestrator
            .login(attempt("ghost@example.com", PASSWORD, "10.0.2.1"))
            .await;
        let wrong = fx
            .orchestrator
            .login(attempt("alice@example.com", "nope", "10.0.2.2"))
            .await;
        assert!(matches!(
            unknown,
            Err(AuthError::InvalidCredentials {
                attempts_remaining: Some(4)
            })
        ));
        assert!(matches!(
            wrong,
            Err(AuthError::InvalidCredentials {
                attempts_remaining: Some(4)
            })
        ));

        let reasons: Vec<_> = fx
            .store
            .audit_logs()
            .into_iter()
            .filter_map(|log| log.reason)
            .collect();
        assert!(reasons.contains(&"unknown_email".to_string()));
        assert!(reasons.contains(&"wrong_password".to_string()));
    }

    #[tokio::test]
    async fn correct_password_resets_failure_count() {
        let fx = fixture().await;
        for index in 0..4 {
            let ip = format!("10.0.3.{index}");
            let _ = fx
                .orchestrator
                .login(attempt("alice@example.com", "wrong", &ip))
                .await;
        }
        fx.orchestrator
            .login(attempt("alice@example.com", PASSWORD, "10.0.3.50"))
            .await
            .unwrap();
        let result = fx
            .orchestrator
            .login(attempt("alice@example.com", "wrong", "10.0.3.51"))
            .await;
        assert!(matches!(
            result,
            Err(AuthError::InvalidCredentials {
                attempts_remaining: Some(4)
            })
        ));
    }

    #[tokio::test]
    async fn successful_login_revokes_presented_session() {
        let fx = fixture().await;
        let planted = fx.sessions.issue(fx.user.id, false).await.unwrap();
        let mut login = attempt("alice@example.com", PASSWORD, "10.0.4.1");
        login.existing_session = Some(planted.token.as_str());

        let LoginOutcome::SessionIssued { session, .. } =
            fx.orchestrator.login(login).await.unwrap()
        else {
            panic!("expected a session");
        };
        assert_ne!(session.token, planted.token);
        assert!(fx.sessions.validate(&planted.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enrolled_user_is_challenged_then_completes_with_backup_code() {
        let fx = fixture().await;
        let setup = fx.two_factor.setup(&fx.user).await.unwrap();
        let code = generate_totp_code_at(&setup.secret, Utc::now().timestamp() as u64).unwrap();
        fx.two_factor.enable(&fx.user, &code).await.unwrap();

        let outcome = fx
            .orchestrator
            .login(attempt("alice@example.com", PASSWORD, "10.0.5.1"))
            .await
            .unwrap();
        let LoginOutcome::TwoFactorRequired { pending_token } = outcome else {
            panic!("expected a two-factor challenge");
        };
        assert_eq!(fx.store.session_count(), 0);

        let login = fx
            .orchestrator
            .complete_two_factor(&pending_token, &setup.backup_codes[0], None, Some("10.0.5.1"))
            .await
            .unwrap();
        assert_eq!(login.user.id, fx.user.id);
        assert_eq!(login.verification.backup_codes_remaining, Some(9));
        assert!(fx.sessions.validate(&login.session.token).await.unwrap().is_some());

        assert!(matches!(
            fx.orchestrator
                .complete_two_factor(&pending_token, &setup.backup_codes[1], None, None)
                .await,
            Err(AuthError::TwoFactorSessionExpired)
        ));
    }

    #[tokio::test]
    async fn change_password_revokes_other_sessions() {
        let fx = fixture().await;
        let other = fx.sessions.issue(fx.user.id, false).await.unwrap();
        let fresh = fx
            .orchestrator
            .change_password(&fx.user, PASSWORD, "a much better password", false, None)
            .await
            .unwrap();
        assert!(fx.sessions.validate(&other.token).await.unwrap().is_none());
        assert!(fx.sessions.validate(&fresh.token).await.unwrap().is_some());
        assert_eq!(fx.store.session_count(), 1);
    }
}
