use super::models::{Account, NewAccount, NewUser, Provider, User};
use std::{future::Future, pin::Pin};
use uuid::Uuid;

pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

#[derive(Debug)]
pub enum InsertUserOutcome {
    Created(User),
    EmailTaken,
}

#[derive(Debug)]
pub enum InsertAccountOutcome {
    Created(Account),
    AlreadyLinked,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UnlinkOutcome {
    Unlinked,
    LastAccount,
    NotLinked,
}

/// Persistence boundary for users and their accounts.
///
/// Finders return `None` for rows that are absent or soft-deleted. Each
/// outcome-returning method decides its outcome atomically in the store.
pub trait IdentityStore: Send + Sync {
    /// Insert the user and the side collections of its role.
    fn insert_user<'a>(&'a self, user: &'a NewUser) -> RepoFuture<'a, InsertUserOutcome>;

    /// Hard delete; only used to compensate a half-finished registration.
    fn delete_user(&self, user_id: Uuid) -> RepoFuture<'_, ()>;

    fn find_user_by_email<'a>(&'a self, email: &'a str) -> RepoFuture<'a, Option<User>>;

    fn find_user_by_id(&self, user_id: Uuid) -> RepoFuture<'_, Option<User>>;

    /// Fails with `AlreadyLinked` when a live account exists for `(user, provider)`.
    fn insert_account<'a>(
        &'a self,
        account: &'a NewAccount,
    ) -> RepoFuture<'a, InsertAccountOutcome>;

    fn find_account(&self, user_id: Uuid, provider: Provider) -> RepoFuture<'_, Option<Account>>;

    fn list_accounts(&self, user_id: Uuid) -> RepoFuture<'_, Vec<Account>>;

    /// Soft-delete the live account unless it is the user's last one.
    fn soft_delete_account_unless_last(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> RepoFuture<'_, UnlinkOutcome>;

    /// Set the user's deleted flag and cascade it to accounts and side
    /// collections. Returns `false` when the user does not exist.
    fn set_user_deleted(&self, user_id: Uuid, deleted: bool) -> RepoFuture<'_, bool>;

    /// Returns `false` when the user is missing or already verified.
    fn set_verified(&self, user_id: Uuid) -> RepoFuture<'_, bool>;

    /// Returns `false` when the user already has an avatar.
    fn set_image_url_if_missing<'a>(
        &'a self,
        user_id: Uuid,
        image_url: &'a str,
    ) -> RepoFuture<'a, bool>;

    fn update_password<'a>(
        &'a self,
        account_id: Uuid,
        password_hash: &'a str,
    ) -> RepoFuture<'a, ()>;

    fn ping(&self) -> RepoFuture<'_, ()>;
}
