use super::models::{Account, NewAccount, NewUser, ProfileCollection, Provider, User};
use super::repo::{
    IdentityStore, InsertAccountOutcome, InsertUserOutcome, RepoFuture, UnlinkOutcome,
};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug)]
struct StoredAccount {
    account: Account,
    suspended: bool,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, User>,
    accounts: Vec<StoredAccount>,
    collections: Vec<(Uuid, ProfileCollection, bool)>,
}

impl State {
    fn live_accounts(&self, user_id: Uuid) -> impl Iterator<Item = &Account> {
        self.accounts
            .iter()
            .map(|stored| &stored.account)
            .filter(move |a| a.user_id == user_id && !a.is_deleted)
    }

    fn live_user(&self, user_id: Uuid) -> Option<&User> {
        self.users.get(&user_id).filter(|user| !user.is_deleted)
    }
}

/// Identity store kept in process memory.
///
/// Used when no database DSN is configured and in tests. One lock guards all
/// tables, which gives every method the atomicity the Postgres store gets from
/// its transactions.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    state: Mutex<State>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live side collections owned by `user_id`.
    pub async fn collections_for(&self, user_id: Uuid) -> Vec<ProfileCollection> {
        self.state
            .lock()
            .await
            .collections
            .iter()
            .filter(|(owner, _, deleted)| *owner == user_id && !deleted)
            .map(|(_, collection, _)| *collection)
            .collect()
    }

    /// Number of users, including soft-deleted ones.
    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn insert_user<'a>(&'a self, user: &'a NewUser) -> RepoFuture<'a, InsertUserOutcome> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state
                .users
                .values()
                .any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
            {
                return Ok(InsertUserOutcome::EmailTaken);
            }

            let created = User {
                id: Uuid::new_v4(),
                email: user.email.clone(),
                is_verified: user.is_verified,
                role: user.role,
                image_url: user.image_url.clone(),
                is_deleted: false,
            };
            state.users.insert(created.id, created.clone());
            for collection in user.role.side_collections() {
                state.collections.push((created.id, *collection, false));
            }
            Ok(InsertUserOutcome::Created(created))
        })
    }

    fn delete_user(&self, user_id: Uuid) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.users.remove(&user_id);
            state.accounts.retain(|stored| stored.account.user_id != user_id);
            state.collections.retain(|(owner, _, _)| *owner != user_id);
            Ok(())
        })
    }

    fn find_user_by_email<'a>(&'a self, email: &'a str) -> RepoFuture<'a, Option<User>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let found = state
                .users
                .values()
                .find(|user| !user.is_deleted && user.email.eq_ignore_ascii_case(email))
                .cloned();
            Ok(found)
        })
    }

    fn find_user_by_id(&self, user_id: Uuid) -> RepoFuture<'_, Option<User>> {
        Box::pin(async move { Ok(self.state.lock().await.live_user(user_id).cloned()) })
    }

    fn insert_account<'a>(
        &'a self,
        account: &'a NewAccount,
    ) -> RepoFuture<'a, InsertAccountOutcome> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state
                .live_accounts(account.user_id)
                .any(|existing| existing.provider == account.provider)
            {
                return Ok(InsertAccountOutcome::AlreadyLinked);
            }

            let created = Account {
                id: Uuid::new_v4(),
                user_id: account.user_id,
                provider: account.provider,
                provider_id: account.provider_id.clone(),
                password_hash: account.password_hash.clone(),
                is_deleted: false,
            };
            state.accounts.push(StoredAccount {
                account: created.clone(),
                suspended: false,
            });
            Ok(InsertAccountOutcome::Created(created))
        })
    }

    fn find_account(&self, user_id: Uuid, provider: Provider) -> RepoFuture<'_, Option<Account>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let found = state
                .live_accounts(user_id)
                .find(|account| account.provider == provider)
                .cloned();
            Ok(found)
        })
    }

    fn list_accounts(&self, user_id: Uuid) -> RepoFuture<'_, Vec<Account>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let accounts = state.live_accounts(user_id).cloned().collect();
            Ok(accounts)
        })
    }

    fn soft_delete_account_unless_last(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> RepoFuture<'_, UnlinkOutcome> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let live = state.live_accounts(user_id).count();
            let Some(target) = state.accounts.iter_mut().find(|stored| {
                stored.account.user_id == user_id
                    && stored.account.provider == provider
                    && !stored.account.is_deleted
            }) else {
                return Ok(UnlinkOutcome::NotLinked);
            };
            if live <= 1 {
                return Ok(UnlinkOutcome::LastAccount);
            }
            target.account.is_deleted = true;
            Ok(UnlinkOutcome::Unlinked)
        })
    }

    fn set_user_deleted(&self, user_id: Uuid, deleted: bool) -> RepoFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(user) = state.users.get_mut(&user_id) else {
                return Ok(false);
            };
            user.is_deleted = deleted;

            for stored in state
                .accounts
                .iter_mut()
                .filter(|stored| stored.account.user_id == user_id)
            {
                if deleted && !stored.account.is_deleted {
                    stored.account.is_deleted = true;
                    stored.suspended = true;
                } else if !deleted && stored.suspended {
                    stored.account.is_deleted = false;
                    stored.suspended = false;
                }
            }
            for (_, _, collection_deleted) in state
                .collections
                .iter_mut()
                .filter(|(owner, _, _)| *owner == user_id)
            {
                *collection_deleted = deleted;
            }
            Ok(true)
        })
    }

    fn set_verified(&self, user_id: Uuid) -> RepoFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            match state.users.get_mut(&user_id) {
                Some(user) if !user.is_deleted && !user.is_verified => {
                    user.is_verified = true;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn set_image_url_if_missing<'a>(
        &'a self,
        user_id: Uuid,
        image_url: &'a str,
    ) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            match state.users.get_mut(&user_id) {
                Some(user) if user.image_url.as_deref().is_none_or(str::is_empty) => {
                    user.image_url = Some(image_url.to_string());
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn update_password<'a>(
        &'a self,
        account_id: Uuid,
        password_hash: &'a str,
    ) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some(stored) = state
                .accounts
                .iter_mut()
                .find(|stored| stored.account.id == account_id)
            {
                stored.account.password_hash = Some(password_hash.to_string());
            }
            Ok(())
        })
    }

    fn ping(&self) -> RepoFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::models::Role;
    use anyhow::{Result, bail};

    async fn created_user(store: &MemoryIdentityStore, email: &str) -> Result<User> {
        let new_user = NewUser {
            email: email.to_string(),
            role: Role::default(),
            is_verified: false,
            image_url: None,
        };
        match store.insert_user(&new_user).await? {
            InsertUserOutcome::Created(user) => Ok(user),
            InsertUserOutcome::EmailTaken => bail!("email already taken"),
        }
    }

    #[tokio::test]
    async fn lookups_return_owned_copies_of_live_rows() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let user = created_user(&store, "user@x.com").await?;
        let link = NewAccount {
            user_id: user.id,
            provider: Provider::Google,
            provider_id: Some("g-1".to_string()),
            password_hash: None,
        };
        store.insert_account(&link).await?;

        let by_email = store.find_user_by_email("USER@x.com").await?;
        assert_eq!(by_email.map(|found| found.id), Some(user.id));
        let account = store.find_account(user.id, Provider::Google).await?;
        assert_eq!(account.and_then(|found| found.provider_id).as_deref(), Some("g-1"));
        assert_eq!(store.list_accounts(user.id).await?.len(), 1);

        store.set_user_deleted(user.id, true).await?;
        assert!(store.find_user_by_email("user@x.com").await?.is_none());
        assert!(store.find_account(user.id, Provider::Google).await?.is_none());
        assert!(store.list_accounts(user.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_is_reported_not_inserted() -> Result<()> {
        let store = MemoryIdentityStore::new();
        created_user(&store, "user@x.com").await?;
        assert!(created_user(&store, "User@X.com").await.is_err());
        assert_eq!(store.user_count().await, 1);
        Ok(())
    }
}
