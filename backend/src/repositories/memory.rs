//! In-process implementations of every repository trait, used when no
//! `DATABASE_URL` is configured and by the test suite.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AuditLogRepository, SessionRepository, TwoFactorRepository, UserRepository};
use crate::models::audit_log::AuditLog;
use crate::models::session::SessionRecord;
use crate::models::two_factor::TwoFactorRecord;
use crate::models::user::{normalize_email, User};
use crate::types::UserId;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    sessions: HashMap<String, SessionRecord>,
    two_factor: HashMap<UserId, TwoFactorRecord>,
    audit_logs: Vec<AuditLog>,
}

/// One lock around all tables, so multi-table writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn audit_logs(&self) -> Vec<AuditLog> {
        self.tables().audit_logs.clone()
    }

    pub fn session_count(&self) -> usize {
        self.tables().sessions.len()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let email = normalize_email(email);
        Ok(self
            .tables()
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: UserId) -> anyhow::Result<Option<User>> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn create(&self, user: &User) -> anyhow::Result<()> {
        let mut tables = self.tables();
        if tables.users.values().any(|existing| existing.email == user.email) {
            anyhow::bail!("email {} is already registered", user.email);
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_password_hash(&self, id: UserId, password_hash: &str) -> anyhow::Result<()> {
        if let Some(user) = self.tables().users.get_mut(&id) {
            user.password_hash = password_hash.to_string();
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create(&self, record: &SessionRecord) -> anyhow::Result<()> {
        self.tables()
            .sessions
            .insert(record.id_hash.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, id_hash: &str) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.tables().sessions.get(id_hash).cloned())
    }

    async fn delete(&self, id_hash: &str) -> anyhow::Result<bool> {
        Ok(self.tables().sessions.remove(id_hash).is_some())
    }

    async fn delete_for_user(&self, user_id: UserId) -> anyhow::Result<u64> {
        let mut tables = self.tables();
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| session.user_id != user_id);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut tables = self.tables();
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| !session.is_expired_at(now));
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl TwoFactorRepository for MemoryStore {
    async fn find(&self, user_id: UserId) -> anyhow::Result<Option<TwoFactorRecord>> {
        Ok(self.tables().two_factor.get(&user_id).cloned())
    }

    async fn enable(&self, record: &TwoFactorRecord) -> anyhow::Result<()> {
        let mut tables = self.tables();
        let Some(user) = tables.users.get_mut(&record.user_id) else {
            anyhow::bail!("user {} does not exist", record.user_id);
        };
        user.two_factor_enabled = true;
        user.updated_at = Utc::now();
        tables.two_factor.insert(record.user_id, record.clone());
        Ok(())
    }

    async fn disable(&self, user_id: UserId) -> anyhow::Result<()> {
        let mut tables = self.tables();
        tables.two_factor.remove(&user_id);
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.two_factor_enabled = false;
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: UserId,
        code_hash: &str,
    ) -> anyhow::Result<Option<usize>> {
        let mut tables = self.tables();
        let Some(record) = tables.two_factor.get_mut(&user_id) else {
            return Ok(None);
        };
        let Some(position) = record
            .backup_code_hashes
            .iter()
            .position(|hash| hash == code_hash)
        else {
            return Ok(None);
        };
        record.backup_code_hashes.remove(position);
        record.updated_at = Utc::now();
        Ok(Some(record.backup_code_hashes.len()))
    }

    async fn replace_backup_codes(
        &self,
        user_id: UserId,
        hashes: &[String],
    ) -> anyhow::Result<()> {
        if let Some(record) = self.tables().two_factor.get_mut(&user_id) {
            record.backup_code_hashes = hashes.to_vec();
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLogRepository for MemoryStore {
    async fn insert(&self, log: &AuditLog) -> anyhow::Result<()> {
        self.tables().audit_logs.push(log.clone());
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut tables = self.tables();
        let before = tables.audit_logs.len();
        tables.audit_logs.retain(|log| log.occurred_at >= cutoff);
        Ok((before - tables.audit_logs.len()) as u64)
    }
}
