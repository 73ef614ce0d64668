use super::models::{Account, NewAccount, NewUser, Provider, Role, User};
use super::repo::{IdentityStore, InsertAccountOutcome, InsertUserOutcome, UnlinkOutcome};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Trim and lowercase an email address before lookup or storage.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    email_pattern().is_some_and(|regex| regex.is_match(email_normalized))
}

/// Compiled once per process.
fn email_pattern() -> Option<&'static Regex> {
    static EMAIL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_PATTERN
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least {min} characters", min = MIN_PASSWORD_LENGTH)]
    WeakCredential,
    #[error("a user with this email already exists")]
    EmailTaken,
    #[error("provider already linked to this user")]
    AlreadyLinked,
    #[error("cannot unlink the last account")]
    LastAccount,
    #[error("provider not linked to this user")]
    NotLinked,
    #[error("user not found")]
    UserNotFound,
    #[error("user already verified")]
    AlreadyVerified,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("identity store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Input for [`IdentityService::register`].
#[derive(Clone)]
pub struct Registration {
    email: String,
    password: Option<SecretString>,
    provider: Provider,
    provider_id: Option<String>,
    image_url: Option<String>,
    role: Role,
    verified: bool,
}

impl Registration {
    #[must_use]
    pub fn local(email: &str, password: SecretString) -> Self {
        Self {
            email: email.to_string(),
            password: Some(password),
            provider: Provider::Local,
            provider_id: None,
            image_url: None,
            role: Role::default(),
            verified: false,
        }
    }

    /// OAuth identities arrive with an email the provider already verified.
    #[must_use]
    pub fn oauth(email: &str, provider: Provider, provider_id: String) -> Self {
        Self {
            email: email.to_string(),
            password: None,
            provider,
            provider_id: Some(provider_id),
            image_url: None,
            role: Role::default(),
            verified: true,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn with_image_url(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url.filter(|url| !url.is_empty());
        self
    }
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    bcrypt_cost: u32,
}

impl std::fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityService")
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish_non_exhaustive()
    }
}

impl IdentityService {
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>, bcrypt_cost: u32) -> Self {
        Self { store, bcrypt_cost }
    }

    /// Create a user and its first account.
    ///
    /// If the account cannot be stored after the user was created, the user is
    /// deleted again so no user is left without an account.
    ///
    /// # Errors
    /// `InvalidEmail`, `WeakCredential`, `EmailTaken`, or `Store`.
    pub async fn register(&self, registration: Registration) -> Result<User, IdentityError> {
        let email = normalize_email(&registration.email);
        if !valid_email(&email) {
            return Err(IdentityError::InvalidEmail);
        }

        let password_hash = match (registration.provider, &registration.password) {
            (Provider::Local, Some(password)) => Some(self.hash_password(password).await?),
            (Provider::Local, None) => return Err(IdentityError::WeakCredential),
            _ => None,
        };

        let new_user = NewUser {
            email,
            role: registration.role,
            is_verified: registration.verified,
            image_url: registration.image_url,
        };
        let user = match self.store.insert_user(&new_user).await? {
            InsertUserOutcome::Created(user) => user,
            InsertUserOutcome::EmailTaken => return Err(IdentityError::EmailTaken),
        };

        let new_account = NewAccount {
            user_id: user.id,
            provider: registration.provider,
            provider_id: registration.provider_id,
            password_hash,
        };
        let outcome = self.store.insert_account(&new_account).await;
        match outcome {
            Ok(InsertAccountOutcome::Created(_)) => {
                info!(user_id = %user.id, provider = %new_account.provider, "user registered");
                Ok(user)
            }
            Ok(InsertAccountOutcome::AlreadyLinked) => {
                self.compensate(user.id).await;
                Err(IdentityError::AlreadyLinked)
            }
            Err(err) => {
                self.compensate(user.id).await;
                Err(IdentityError::Store(err))
            }
        }
    }

    async fn compensate(&self, user_id: Uuid) {
        warn!(%user_id, "account creation failed, removing orphaned user");
        if let Err(err) = self.store.delete_user(user_id).await {
            error!(%user_id, "failed to remove orphaned user: {err:#}");
        }
    }

    /// # Errors
    /// Returns `Store` if the lookup fails.
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, IdentityError> {
        Ok(self.store.find_user_by_email(&normalize_email(email)).await?)
    }

    /// # Errors
    /// Returns `Store` if the lookup fails.
    pub async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, IdentityError> {
        Ok(self.store.find_user_by_id(user_id).await?)
    }

    /// Live account for `(user, provider)`; soft-deleted accounts are absent.
    ///
    /// # Errors
    /// Returns `Store` if the lookup fails.
    pub async fn find_account(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<Account>, IdentityError> {
        Ok(self.store.find_account(user_id, provider).await?)
    }

    /// # Errors
    /// Returns `Store` if the lookup fails.
    pub async fn accounts(&self, user_id: Uuid) -> Result<Vec<Account>, IdentityError> {
        Ok(self.store.list_accounts(user_id).await?)
    }

    /// # Errors
    /// `UserNotFound`, `WeakCredential`, `AlreadyLinked`, or `Store`.
    pub async fn link(
        &self,
        user_id: Uuid,
        provider: Provider,
        provider_id: Option<String>,
        password: Option<&SecretString>,
    ) -> Result<Account, IdentityError> {
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(IdentityError::UserNotFound);
        }

        let password_hash = match password {
            Some(password) if provider == Provider::Local => {
                Some(self.hash_password(password).await?)
            }
            _ => None,
        };

        let new_account = NewAccount {
            user_id,
            provider,
            provider_id,
            password_hash,
        };
        match self.store.insert_account(&new_account).await? {
            InsertAccountOutcome::Created(account) => {
                info!(%user_id, %provider, "account linked");
                Ok(account)
            }
            InsertAccountOutcome::AlreadyLinked => Err(IdentityError::AlreadyLinked),
        }
    }

    /// # Errors
    /// `LastAccount` when this is the user's only live account, `NotLinked`
    /// when there is nothing to unlink, or `Store`.
    pub async fn unlink(&self, user_id: Uuid, provider: Provider) -> Result<(), IdentityError> {
        match self
            .store
            .soft_delete_account_unless_last(user_id, provider)
            .await?
        {
            UnlinkOutcome::Unlinked => {
                info!(%user_id, %provider, "account unlinked");
                Ok(())
            }
            UnlinkOutcome::LastAccount => Err(IdentityError::LastAccount),
            UnlinkOutcome::NotLinked => Err(IdentityError::NotLinked),
        }
    }

    /// Overwrite the local credential, creating the local account when the user
    /// only has OAuth accounts so far.
    ///
    /// # Errors
    /// `WeakCredential`, `UserNotFound`, or `Store`.
    pub async fn set_password(
        &self,
        user_id: Uuid,
        password: &SecretString,
    ) -> Result<(), IdentityError> {
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(IdentityError::UserNotFound);
        }
        let password_hash = self.hash_password(password).await?;

        if let Some(account) = self.store.find_account(user_id, Provider::Local).await? {
            self.store.update_password(account.id, &password_hash).await?;
            return Ok(());
        }

        let new_account = NewAccount {
            user_id,
            provider: Provider::Local,
            provider_id: None,
            password_hash: Some(password_hash.clone()),
        };
        match self.store.insert_account(&new_account).await? {
            InsertAccountOutcome::Created(_) => {
                info!(%user_id, "local account created by password set");
            }
            InsertAccountOutcome::AlreadyLinked => {
                // Linked concurrently; overwrite it instead.
                if let Some(account) = self.store.find_account(user_id, Provider::Local).await? {
                    self.store.update_password(account.id, &password_hash).await?;
                }
            }
        }
        Ok(())
    }

    /// Resolve a local sign-in. Unknown users, missing local accounts and wrong
    /// passwords all fail the same way.
    ///
    /// # Errors
    /// `InvalidCredentials` or `Store`.
    pub async fn check_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<User, IdentityError> {
        let Some(user) = self.find_user_by_email(email).await? else {
            return Err(IdentityError::InvalidCredentials);
        };
        let Some(hash) = self
            .store
            .find_account(user.id, Provider::Local)
            .await?
            .and_then(|account| account.password_hash)
        else {
            return Err(IdentityError::InvalidCredentials);
        };

        let candidate = password.expose_secret().to_string();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash))
            .await
            .map_err(|err| IdentityError::Store(err.into()))?
            .unwrap_or(false);

        if matches {
            Ok(user)
        } else {
            Err(IdentityError::InvalidCredentials)
        }
    }

    /// # Errors
    /// `UserNotFound`, `AlreadyVerified`, or `Store`.
    pub async fn mark_verified(&self, user_id: Uuid) -> Result<User, IdentityError> {
        let Some(mut user) = self.store.find_user_by_id(user_id).await? else {
            return Err(IdentityError::UserNotFound);
        };
        if user.is_verified || !self.store.set_verified(user_id).await? {
            return Err(IdentityError::AlreadyVerified);
        }
        user.is_verified = true;
        Ok(user)
    }

    /// Take the provider avatar when the user has none yet.
    ///
    /// # Errors
    /// Returns `Store` if the update fails.
    pub async fn adopt_avatar(
        &self,
        user_id: Uuid,
        image_url: &str,
    ) -> Result<bool, IdentityError> {
        if image_url.is_empty() {
            return Ok(false);
        }
        Ok(self.store.set_image_url_if_missing(user_id, image_url).await?)
    }

    /// # Errors
    /// `UserNotFound` or `Store`.
    pub async fn deactivate_user(&self, user_id: Uuid) -> Result<(), IdentityError> {
        if self.store.set_user_deleted(user_id, true).await? {
            info!(%user_id, "user deactivated");
            Ok(())
        } else {
            Err(IdentityError::UserNotFound)
        }
    }

    /// # Errors
    /// `UserNotFound` or `Store`.
    pub async fn activate_user(&self, user_id: Uuid) -> Result<(), IdentityError> {
        if self.store.set_user_deleted(user_id, false).await? {
            info!(%user_id, "user activated");
            Ok(())
        } else {
            Err(IdentityError::UserNotFound)
        }
    }

    /// # Errors
    /// Returns `Store` if the lookup fails.
    pub async fn live_account_count(&self, user_id: Uuid) -> Result<usize, IdentityError> {
        Ok(self.store.list_accounts(user_id).await?.len())
    }

    /// # Errors
    /// Returns an error if the store is unreachable.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.store.ping().await
    }

    async fn hash_password(&self, password: &SecretString) -> Result<String, IdentityError> {
        if password.expose_secret().chars().count() < MIN_PASSWORD_LENGTH {
            return Err(IdentityError::WeakCredential);
        }
        let password = password.expose_secret().to_string();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|err| IdentityError::Store(err.into()))?
            .map_err(|err| IdentityError::Store(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::memory::MemoryIdentityStore;
    use crate::identity::models::ProfileCollection;
    use crate::identity::repo::RepoFuture;
    use anyhow::{Result, anyhow};

    const TEST_COST: u32 = 4;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn service() -> (IdentityService, Arc<MemoryIdentityStore>) {
        let store = Arc::new(MemoryIdentityStore::new());
        (IdentityService::new(store.clone(), TEST_COST), store)
    }

    /// Memory store whose account inserts always fail.
    struct BrokenAccounts(MemoryIdentityStore);

    impl IdentityStore for BrokenAccounts {
        fn insert_user<'a>(&'a self, user: &'a NewUser) -> RepoFuture<'a, InsertUserOutcome> {
            self.0.insert_user(user)
        }
        fn delete_user(&self, user_id: Uuid) -> RepoFuture<'_, ()> {
            self.0.delete_user(user_id)
        }
        fn find_user_by_email<'a>(&'a self, email: &'a str) -> RepoFuture<'a, Option<User>> {
            self.0.find_user_by_email(email)
        }
        fn find_user_by_id(&self, user_id: Uuid) -> RepoFuture<'_, Option<User>> {
            self.0.find_user_by_id(user_id)
        }
        fn insert_account<'a>(&'a self, _: &'a NewAccount) -> RepoFuture<'a, InsertAccountOutcome> {
            Box::pin(async { Err(anyhow!("accounts table unavailable")) })
        }
        fn find_account(
            &self,
            user_id: Uuid,
            provider: Provider,
        ) -> RepoFuture<'_, Option<Account>> {
            self.0.find_account(user_id, provider)
        }
        fn list_accounts(&self, user_id: Uuid) -> RepoFuture<'_, Vec<Account>> {
            self.0.list_accounts(user_id)
        }
        fn soft_delete_account_unless_last(
            &self,
            user_id: Uuid,
            provider: Provider,
        ) -> RepoFuture<'_, UnlinkOutcome> {
            self.0.soft_delete_account_unless_last(user_id, provider)
        }
        fn set_user_deleted(&self, user_id: Uuid, deleted: bool) -> RepoFuture<'_, bool> {
            self.0.set_user_deleted(user_id, deleted)
        }
        fn set_verified(&self, user_id: Uuid) -> RepoFuture<'_, bool> {
            self.0.set_verified(user_id)
        }
        fn set_image_url_if_missing<'a>(
            &'a self,
            user_id: Uuid,
            url: &'a str,
        ) -> RepoFuture<'a, bool> {
            self.0.set_image_url_if_missing(user_id, url)
        }
        fn update_password<'a>(&'a self, account_id: Uuid, hash: &'a str) -> RepoFuture<'a, ()> {
            self.0.update_password(account_id, hash)
        }
        fn ping(&self) -> RepoFuture<'_, ()> {
            self.0.ping()
        }
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" User@X.COM "), "user@x.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("user@x.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn email_pattern_is_compiled_once() {
        let first = email_pattern().map(|regex| regex as *const Regex);
        assert!(first.is_some());
        assert_eq!(first, email_pattern().map(|regex| regex as *const Regex));
        assert!(valid_email("again@x.com"));
    }

    #[tokio::test]
    async fn register_local_creates_user_account_and_role_collections() -> Result<()> {
        let (identity, store) = service();
        let user = identity
            .register(Registration::local(" User@X.com", secret("secret1")).with_role(Role::Mentor))
            .await?;

        assert_eq!(user.email, "user@x.com");
        assert!(!user.is_verified);
        let account = identity.find_account(user.id, Provider::Local).await?;
        let hash = account.and_then(|a| a.password_hash).ok_or_else(|| anyhow!("no hash"))?;
        assert!(hash.starts_with("$2"));
        assert_eq!(
            store.collections_for(user.id).await,
            vec![ProfileCollection::MentorProfiles, ProfileCollection::MentorPreferences]
        );
        Ok(())
    }

    #[tokio::test]
    async fn register_rejects_weak_password_and_bad_email() {
        let (identity, _) = service();
        assert!(matches!(
            identity.register(Registration::local("user@x.com", secret("12345"))).await,
            Err(IdentityError::WeakCredential)
        ));
        assert!(matches!(
            identity.register(Registration::local("nope", secret("secret1"))).await,
            Err(IdentityError::InvalidEmail)
        ));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email_case_insensitively() -> Result<()> {
        let (identity, _) = service();
        identity
            .register(Registration::local("user@x.com", secret("secret1")))
            .await?;
        assert!(matches!(
            identity
                .register(Registration::oauth("USER@x.com", Provider::Google, "g-1".into()))
                .await,
            Err(IdentityError::EmailTaken)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn failed_account_insert_removes_the_user() -> Result<()> {
        let store = Arc::new(BrokenAccounts(MemoryIdentityStore::new()));
        let identity = IdentityService::new(store.clone(), TEST_COST);

        let result = identity
            .register(Registration::oauth("user@x.com", Provider::Google, "g-1".into()))
            .await;
        assert!(matches!(result, Err(IdentityError::Store(_))));
        assert_eq!(store.0.user_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unlink_keeps_the_last_account() -> Result<()> {
        let (identity, _) = service();
        let user = identity
            .register(Registration::local("user@x.com", secret("secret1")))
            .await?;
        identity
            .link(user.id, Provider::Google, Some("g-1".into()), None)
            .await?;
        assert_eq!(identity.live_account_count(user.id).await?, 2);

        identity.unlink(user.id, Provider::Google).await?;
        assert_eq!(identity.live_account_count(user.id).await?, 1);
        assert!(identity.find_account(user.id, Provider::Google).await?.is_none());

        assert!(matches!(
            identity.unlink(user.id, Provider::Local).await,
            Err(IdentityError::LastAccount)
        ));
        assert!(matches!(
            identity.unlink(user.id, Provider::Google).await,
            Err(IdentityError::NotLinked)
        ));
        assert_eq!(identity.live_account_count(user.id).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn link_twice_is_already_linked_and_relink_after_unlink_works() -> Result<()> {
        let (identity, _) = service();
        let user = identity
            .register(Registration::local("user@x.com", secret("secret1")))
            .await?;
        identity
            .link(user.id, Provider::Discord, Some("d-1".into()), None)
            .await?;
        assert!(matches!(
            identity
                .link(user.id, Provider::Discord, Some("d-1".into()), None)
                .await,
            Err(IdentityError::AlreadyLinked)
        ));

        identity.unlink(user.id, Provider::Discord).await?;
        identity
            .link(user.id, Provider::Discord, Some("d-2".into()), None)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_unlinks_leave_one_account() -> Result<()> {
        let (identity, _) = service();
        let user = identity
            .register(Registration::oauth("user@x.com", Provider::Google, "g-1".into()))
            .await?;
        identity
            .link(user.id, Provider::Discord, Some("d-1".into()), None)
            .await?;

        let (google, discord) = tokio::join!(
            identity.unlink(user.id, Provider::Google),
            identity.unlink(user.id, Provider::Discord)
        );
        assert_eq!(
            u8::from(google.is_ok()) + u8::from(discord.is_ok()),
            1,
            "exactly one unlink may succeed"
        );
        assert_eq!(identity.live_account_count(user.id).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn set_password_creates_local_account_for_oauth_users() -> Result<()> {
        let (identity, _) = service();
        let user = identity
            .register(Registration::oauth("user@x.com", Provider::Google, "g-1".into()))
            .await?;
        assert!(matches!(
            identity.check_password("user@x.com", &secret("secret1")).await,
            Err(IdentityError::InvalidCredentials)
        ));

        identity.set_password(user.id, &secret("secret1")).await?;
        assert_eq!(
            identity.check_password("user@x.com", &secret("secret1")).await?.id,
            user.id
        );

        identity.set_password(user.id, &secret("secret2")).await?;
        assert!(identity.check_password("user@x.com", &secret("secret1")).await.is_err());
        assert!(identity.check_password("user@x.com", &secret("secret2")).await.is_ok());
        assert_eq!(identity.live_account_count(user.id).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn check_password_does_not_reveal_unknown_users() -> Result<()> {
        let (identity, _) = service();
        identity
            .register(Registration::local("user@x.com", secret("secret1")))
            .await?;
        assert!(matches!(
            identity.check_password("ghost@x.com", &secret("secret1")).await,
            Err(IdentityError::InvalidCredentials)
        ));
        assert!(matches!(
            identity.check_password("user@x.com", &secret("wrong-1")).await,
            Err(IdentityError::InvalidCredentials)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn mark_verified_only_once() -> Result<()> {
        let (identity, _) = service();
        let user = identity
            .register(Registration::local("user@x.com", secret("secret1")))
            .await?;
        assert!(identity.mark_verified(user.id).await?.is_verified);
        assert!(matches!(
            identity.mark_verified(user.id).await,
            Err(IdentityError::AlreadyVerified)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn adopt_avatar_keeps_existing_image() -> Result<()> {
        let (identity, _) = service();
        let user = identity
            .register(Registration::local("user@x.com", secret("secret1")))
            .await?;
        assert!(identity.adopt_avatar(user.id, "https://cdn/a.png").await?);
        assert!(!identity.adopt_avatar(user.id, "https://cdn/b.png").await?);
        let user = identity
            .find_user_by_id(user.id)
            .await?
            .ok_or_else(|| anyhow!("user missing"))?;
        assert_eq!(user.image_url.as_deref(), Some("https://cdn/a.png"));
        Ok(())
    }

    #[tokio::test]
    async fn deactivate_cascades_and_activate_restores_only_suspended_accounts() -> Result<()> {
        let (identity, store) = service();
        let user = identity
            .register(Registration::local("user@x.com", secret("secret1")))
            .await?;
        identity
            .link(user.id, Provider::Google, Some("g-1".into()), None)
            .await?;
        identity
            .link(user.id, Provider::Discord, Some("d-1".into()), None)
            .await?;
        identity.unlink(user.id, Provider::Discord).await?;

        identity.deactivate_user(user.id).await?;
        assert!(identity.find_user_by_email("user@x.com").await?.is_none());
        assert_eq!(identity.live_account_count(user.id).await?, 0);
        assert!(store.collections_for(user.id).await.is_empty());

        identity.activate_user(user.id).await?;
        let providers: Vec<Provider> = identity
            .accounts(user.id)
            .await?
            .into_iter()
            .map(|a| a.provider)
            .collect();
        assert_eq!(providers, vec![Provider::Local, Provider::Google]);
        assert_eq!(store.collections_for(user.id).await.len(), 2);
        Ok(())
    }
}
