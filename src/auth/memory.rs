//! In-process [`UserStore`] used by the test suite. Check and insert run under
//! one lock, which gives the same atomicity as a UNIQUE constraint.

use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo::UserStore;
use crate::auth::repo_types::{NewUser, Provider, StoreError, UniqueField, User};

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn len(&self) -> usize {
        self.users.lock().expect("user store poisoned").len()
    }

    fn find(&self, pred: impl Fn(&User) -> bool) -> Option<User> {
        self.users
            .lock()
            .expect("user store poisoned")
            .iter()
            .find(|u| pred(u))
            .cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.find(|u| u.id == id))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.find(|u| u.username == username))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.find(|u| u.email == email))
    }

    async fn find_by_provider_id(
        &self,
        provider: Provider,
        subject: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.find(|u| u.provider_id(provider) == Some(subject)))
    }

    async fn create(&self, draft: NewUser) -> Result<User, StoreError> {
        if !draft.has_auth_method() {
            return Err(StoreError::NoAuthMethod);
        }
        let mut users = self.users.lock().expect("user store poisoned");
        for existing in users.iter() {
            if existing.username == draft.username {
                return Err(StoreError::Conflict(UniqueField::Username));
            }
            if existing.email == draft.email {
                return Err(StoreError::Conflict(UniqueField::Email));
            }
            if let Some((provider, subject)) = &draft.provider {
                if existing.provider_id(*provider) == Some(subject.as_str()) {
                    return Err(StoreError::Conflict(UniqueField::ProviderId(*provider)));
                }
            }
        }
        let user = User {
            id: Uuid::new_v4(),
            google_id: draft.provider_id(Provider::Google),
            microsoft_id: draft.provider_id(Provider::Microsoft),
            github_id: draft.provider_id(Provider::Github),
            username: draft.username,
            email: draft.email,
            password_hash: draft.password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        users.push(user.clone());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_duplicate_usernames_yield_one_account() {
        let store = Arc::new(MemoryUserStore::default());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .create(NewUser::local(
                        "racer".into(),
                        format!("racer{i}@example.com"),
                        "hash".into(),
                    ))
                    .await
            }));
        }
        let mut ok = 0;
        let mut conflicts = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::Conflict(UniqueField::Username)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn provider_id_is_unique_when_present() {
        let store = MemoryUserStore::default();
        store
            .create(NewUser::federated("a".into(), "a@x.io".into(), Provider::Google, "sub-1".into()))
            .await
            .unwrap();
        // two accounts without a google id do not collide
        store.create(NewUser::local("b".into(), "b@x.io".into(), "h".into())).await.unwrap();
        store.create(NewUser::local("c".into(), "c@x.io".into(), "h".into())).await.unwrap();

        let err = store
            .create(NewUser::federated("d".into(), "d@x.io".into(), Provider::Google, "sub-1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(UniqueField::ProviderId(Provider::Google))));

        let found = store.find_by_provider_id(Provider::Google, "sub-1").await.unwrap();
        assert_eq!(found.map(|u| u.username), Some("a".to_string()));
    }

    #[tokio::test]
    async fn rejects_draft_without_auth_method() {
        let store = MemoryUserStore::default();
        let draft = NewUser {
            username: "ghost".into(),
            email: "ghost@x.io".into(),
            password_hash: None,
            provider: None,
        };
        assert!(matches!(store.create(draft).await, Err(StoreError::NoAuthMethod)));
        assert_eq!(store.len(), 0);
    }
}
