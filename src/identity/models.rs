use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {column} value: {value}"),
    )))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Mentor,
    Institute,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Mentor => "mentor",
            Self::Institute => "institute",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Self::Student),
            "mentor" => Some(Self::Mentor),
            "institute" => Some(Self::Institute),
            _ => None,
        }
    }

    /// Records created alongside a new user of this role.
    #[must_use]
    pub const fn side_collections(self) -> &'static [ProfileCollection] {
        match self {
            Self::Student => &[
                ProfileCollection::StudentProfiles,
                ProfileCollection::StudentPreferences,
            ],
            Self::Mentor => &[
                ProfileCollection::MentorProfiles,
                ProfileCollection::MentorPreferences,
            ],
            Self::Institute => &[
                ProfileCollection::InstituteProfiles,
                ProfileCollection::InstitutePreferences,
            ],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Local,
    Google,
    Discord,
}

impl Provider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Google => "google",
            Self::Discord => "discord",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "google" => Some(Self::Google),
            "discord" => Some(Self::Discord),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_oauth(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-role profile and preference tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileCollection {
    StudentProfiles,
    StudentPreferences,
    MentorProfiles,
    MentorPreferences,
    InstituteProfiles,
    InstitutePreferences,
}

impl ProfileCollection {
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::StudentProfiles => "student_profiles",
            Self::StudentPreferences => "student_preferences",
            Self::MentorProfiles => "mentor_profiles",
            Self::MentorPreferences => "mentor_preferences",
            Self::InstituteProfiles => "institute_profiles",
            Self::InstitutePreferences => "institute_preferences",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub is_verified: bool,
    pub role: Role,
    pub image_url: Option<String>,
    pub is_deleted: bool,
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            is_verified: row.try_get("is_verified")?,
            role: Role::parse(&role).ok_or_else(|| decode_error("users.role", &role))?,
            image_url: row.try_get("image_url")?,
            is_deleted: row.try_get("is_deleted")?,
        })
    }
}

/// One credential source of a user.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: Provider,
    pub provider_id: Option<String>,
    pub password_hash: Option<String>,
    pub is_deleted: bool,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("provider_id", &self.provider_id)
            .field("has_password", &self.password_hash.is_some())
            .field("is_deleted", &self.is_deleted)
            .finish()
    }
}

impl<'r> FromRow<'r, PgRow> for Account {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let provider: String = row.try_get("provider")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            provider: Provider::parse(&provider)
                .ok_or_else(|| decode_error("accounts.provider", &provider))?,
            provider_id: row.try_get("provider_id")?,
            password_hash: row.try_get("password_hash")?,
            is_deleted: row.try_get("is_deleted")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub role: Role,
    pub is_verified: bool,
    pub image_url: Option<String>,
}

#[derive(Clone)]
pub struct NewAccount {
    pub user_id: Uuid,
    pub provider: Provider,
    pub provider_id: Option<String>,
    pub password_hash: Option<String>,
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("provider_id", &self.provider_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_owns_a_profile_and_preferences() {
        for role in [Role::Student, Role::Mentor, Role::Institute] {
            let tables: Vec<&str> = role
                .side_collections()
                .iter()
                .map(|c| c.table())
                .collect();
            assert_eq!(tables.len(), 2);
            assert!(tables[0].starts_with(role.as_str()));
            assert!(tables[0].ends_with("_profiles"));
            assert!(tables[1].ends_with("_preferences"));
        }
    }

    #[test]
    fn provider_parse_is_closed() {
        assert_eq!(Provider::parse("google"), Some(Provider::Google));
        assert_eq!(Provider::parse("discord"), Some(Provider::Discord));
        assert_eq!(Provider::parse("local"), Some(Provider::Local));
        assert_eq!(Provider::parse("github"), None);
        assert!(!Provider::Local.is_oauth());
    }

    #[test]
    fn account_debug_hides_password_hash() {
        let account = Account {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            provider: Provider::Local,
            provider_id: None,
            password_hash: Some("$2b$10$hash".to_string()),
            is_deleted: false,
        };
        let debug = format!("{account:?}");
        assert!(!debug.contains("$2b$"));
        assert!(debug.contains("has_password: true"));
    }
}
