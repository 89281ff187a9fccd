//! Models that represent users, authentication payloads, and role metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;
use validator::Validate;

use crate::types::UserId;

#[derive(Debug, Clone, Serialize)]
/// Persistent representation of an account that can sign in.
pub struct User {
    /// Unique identifier for the user.
    pub id: UserId,
    /// Login identifier, stored lower-cased.
    pub email: String,
    /// Human-readable name shown to other realtime participants.
    pub display_name: String,
    /// Argon2 PHC string of the user's password.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Role describing the user's privileges.
    pub role: UserRole,
    /// Whether the user completed two-factor enrollment.
    pub two_factor_enabled: bool,
    /// Creation timestamp for auditing.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp for auditing.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ToSchema, Default)]
/// Supported user roles, ordered from least to most privileged.
pub enum UserRole {
    /// Regular signed-in account.
    #[default]
    Member,
    /// May publish content and join editor rooms.
    Editor,
    /// Full administrative access.
    Admin,
}

/// Level granted to connections without an authenticated user.
pub const ANONYMOUS_LEVEL: u8 = 0;

impl UserRole {
    pub const ALL: [UserRole; 3] = [UserRole::Member, UserRole::Editor, UserRole::Admin];

    /// Returns the canonical snake_case representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Member => "member",
            UserRole::Editor => "editor",
            UserRole::Admin => "admin",
        }
    }

    /// Fixed ordinal used for every "at least this role" comparison.
    pub const fn level(self) -> u8 {
        match self {
            UserRole::Member => 1,
            UserRole::Editor => 2,
            UserRole::Admin => 3,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "member" | "user" => Some(UserRole::Member),
            "editor" => Some(UserRole::Editor),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

/// Whether an optional role satisfies an optional minimum requirement.
/// Anonymous callers only pass when there is no requirement.
pub fn role_satisfies(actual: Option<UserRole>, required: Option<UserRole>) -> bool {
    let actual_level = actual.map(UserRole::level).unwrap_or(ANONYMOUS_LEVEL);
    let required_level = required.map(UserRole::level).unwrap_or(ANONYMOUS_LEVEL);
    actual_level >= required_level
}

impl Serialize for UserRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        UserRole::parse(&s).ok_or_else(|| {
            serde::de::Error::unknown_variant(&s, &["member", "editor", "admin"])
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Credentials submitted by a user attempting to authenticate.
pub struct LoginRequest {
    #[validate(length(min = 3, max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
    /// Extends the session lifetime from hours to days.
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload submitted when a user requests to change their password.
pub struct ChangePasswordRequest {
    /// Existing password that will be verified before applying the change.
    pub current_password: String,
    /// Replacement password that will be stored if verification succeeds.
    #[validate(length(min = 8, max = 1024))]
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Public-facing representation of a user returned by the API.
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub two_factor_enabled: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id.to_string(),
            email: user.email,
            display_name: user.display_name,
            role: user.role.as_str().to_string(),
            two_factor_enabled: user.two_factor_enabled,
        }
    }
}

impl User {
    /// Constructs a new user with freshly generated identifiers.
    pub fn new(
        email: &str,
        display_name: impl Into<String>,
        password_hash: String,
        role: UserRole,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            email: normalize_email(email),
            display_name: display_name.into(),
            password_hash,
            role,
            two_factor_enabled: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Canonical form of a login identifier; also the lockout key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
