//! Password verification against stored account hashes.

use std::sync::Arc;

use anyhow::Context;

use crate::error::AuthError;
use crate::models::user::User;
use crate::repositories::UserRepository;
use crate::types::UserId;
use crate::utils::password::{
    equalize_verification_cost, hash_password, verify_password, MIN_PASSWORD_LENGTH,
};

#[derive(Debug)]
pub enum CredentialCheck {
    Verified(User),
    WrongPassword(User),
    UnknownAccount,
}

#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserRepository>,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    pub async fn find_user(&self, id: UserId) -> anyhow::Result<Option<User>> {
        self.users.find_by_id(id).await
    }

    /// Looks the account up and checks the password. An unknown email still
    /// pays for one hash verification.
    pub async fn verify(&self, email: &str, password: &str) -> anyhow::Result<CredentialCheck> {
        let Some(user) = self.users.find_by_email(email).await? else {
            let password = password.to_string();
            tokio::task::spawn_blocking(move || equalize_verification_cost(&password))
                .await
                .context("password verification task failed")?;
            return Ok(CredentialCheck::UnknownAccount);
        };

        if password_matches(password, &user.password_hash).await? {
            Ok(CredentialCheck::Verified(user))
        } else {
            Ok(CredentialCheck::WrongPassword(user))
        }
    }

    pub async fn confirm_password(&self, user: &User, password: &str) -> anyhow::Result<bool> {
        password_matches(password, &user.password_hash).await
    }

    pub async fn change_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if !self.confirm_password(user, current_password).await? {
            return Err(AuthError::PasswordConfirmationFailed);
        }
        if new_password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword {
                min: MIN_PASSWORD_LENGTH,
            });
        }
        let new_password = new_password.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_password(&new_password))
            .await
            .context("password hashing task failed")??;
        self.users.update_password_hash(user.id, &hash).await?;
        Ok(())
    }
}

async fn password_matches(password: &str, hash: &str) -> anyhow::Result<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("password verification task failed")?
}
