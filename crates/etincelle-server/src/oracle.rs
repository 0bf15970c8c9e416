//! Service seams for match checking and profile lookup.
//!
//! The thread service and call signaling only ever ask these two questions
//! about accounts, so they are traits: production wires them to the store,
//! tests substitute fixed fakes.

use async_trait::async_trait;

use etincelle_shared::UserId;
use etincelle_store::{SharedDb, StoreError, UserRecord};

/// Answers whether two users are mutually matched.
#[async_trait]
pub trait MatchOracle: Send + Sync {
    async fn is_mutual(&self, a: &UserId, b: &UserId) -> Result<bool, StoreError>;

    /// Every user matched with `user`.
    async fn matched_ids(&self, user: &UserId) -> Result<Vec<UserId>, StoreError>;
}

/// Looks up the account records behind recipients and callers.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError>;
}

/// Match oracle backed by the likes table.
pub struct StoreMatchOracle {
    db: SharedDb,
}

impl StoreMatchOracle {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MatchOracle for StoreMatchOracle {
    async fn is_mutual(&self, a: &UserId, b: &UserId) -> Result<bool, StoreError> {
        let db = self.db.lock().await;
        db.is_mutual_like(a, b)
    }

    async fn matched_ids(&self, user: &UserId) -> Result<Vec<UserId>, StoreError> {
        let db = self.db.lock().await;
        db.matched_ids(user)
    }
}

/// Directory backed by the users table.
pub struct StoreDirectory {
    db: SharedDb,
}

impl StoreDirectory {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Directory for StoreDirectory {
    async fn user_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError> {
        let db = self.db.lock().await;
        db.user_by_id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use etincelle_shared::Plan;
    use etincelle_store::Database;

    fn sample_user(username: &str) -> UserRecord {
        UserRecord {
            id: UserId::new(),
            username: username.to_string(),
            plan: Plan::Free,
            video_chat: false,
            active: true,
            verified_at: None,
            photo: None,
            age: Some(30),
            city: None,
            country: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_store_oracle_requires_both_directions() {
        let db = Database::open_in_memory().unwrap().into_shared();
        let alice = sample_user("alice");
        let bob = sample_user("bob");

        {
            let conn = db.lock().await;
            conn.upsert_user(&alice).unwrap();
            conn.upsert_user(&bob).unwrap();
            conn.add_like(&alice.id, &bob.id).unwrap();
        }

        let oracle = StoreMatchOracle::new(db.clone());
        assert!(!oracle.is_mutual(&alice.id, &bob.id).await.unwrap());

        {
            let conn = db.lock().await;
            conn.add_like(&bob.id, &alice.id).unwrap();
        }

        assert!(oracle.is_mutual(&alice.id, &bob.id).await.unwrap());
        assert_eq!(oracle.matched_ids(&alice.id).await.unwrap(), vec![bob.id]);
    }

    #[tokio::test]
    async fn test_store_directory_round_trip() {
        let db = Database::open_in_memory().unwrap().into_shared();
        let alice = sample_user("alice");

        {
            let conn = db.lock().await;
            conn.upsert_user(&alice).unwrap();
        }

        let directory = StoreDirectory::new(db);
        let loaded = directory.user_by_id(&alice.id).await.unwrap().unwrap();
        assert_eq!(loaded, alice);

        assert!(directory
            .user_by_id(&UserId::new())
            .await
            .unwrap()
            .is_none());
    }
}
