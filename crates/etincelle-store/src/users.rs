//! Read-side account slice and the likes substrate.
//!
//! Account writes belong to the account system; this subsystem upserts rows
//! only to stay in sync (and to seed fixtures in tests).

use chrono::{DateTime, Utc};
use rusqlite::params;

use etincelle_shared::{Plan, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::UserRecord;

impl Database {
    pub fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO users
             (id, username, plan, video_chat, active, verified_at, photo, age, city, country, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                user.id.to_string(),
                user.username,
                user.plan.as_str(),
                user.video_chat,
                user.active,
                user.verified_at.map(|t| t.to_rfc3339()),
                user.photo,
                user.age,
                user.city,
                user.country,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn user_by_id(&self, id: &UserId) -> Result<Option<UserRecord>> {
        let row = self.conn().query_row(
            "SELECT id, username, plan, video_chat, active, verified_at,
                    photo, age, city, country, created_at
             FROM users WHERE id = ?1",
            params![id.to_string()],
            row_to_user,
        );

        match row {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// Record a one-directional like. Idempotent.
    pub fn add_like(&self, user: &UserId, target: &UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO likes (user_id, target_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                user.to_string(),
                target.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// True when both directions of the like exist.
    pub fn is_mutual_like(&self, a: &UserId, b: &UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM likes
             WHERE (user_id = ?1 AND target_id = ?2)
                OR (user_id = ?2 AND target_id = ?1)",
            params![a.to_string(), b.to_string()],
            |row| row.get(0),
        )?;
        Ok(count == 2)
    }

    /// Every peer this user is mutually matched with.
    pub fn matched_ids(&self, user: &UserId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT l1.target_id FROM likes l1
             JOIN likes l2 ON l2.user_id = l1.target_id AND l2.target_id = l1.user_id
             WHERE l1.user_id = ?1",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            let id_str: String = row.get(0)?;
            UserId::parse(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let plan_str: String = row.get(2)?;
    let video_chat: bool = row.get(3)?;
    let active: bool = row.get(4)?;
    let verified_at_str: Option<String> = row.get(5)?;
    let photo: Option<String> = row.get(6)?;
    let age: Option<u32> = row.get(7)?;
    let city: Option<String> = row.get(8)?;
    let country: Option<String> = row.get(9)?;
    let created_at_str: String = row.get(10)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let verified_at = match verified_at_str {
        Some(ts) => Some(parse_ts(5, &ts)?),
        None => None,
    };
    let created_at = parse_ts(10, &created_at_str)?;

    Ok(UserRecord {
        id,
        username,
        plan: Plan::parse(&plan_str),
        video_chat,
        active,
        verified_at,
        photo,
        age,
        city,
        country,
        created_at,
    })
}

fn parse_ts(col: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(username: &str) -> UserRecord {
        UserRecord {
            id: UserId::new(),
            username: username.to_string(),
            plan: Plan::Free,
            video_chat: false,
            active: true,
            verified_at: None,
            photo: None,
            age: Some(30),
            city: Some("Lyon".to_string()),
            country: Some("FR".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_and_fetch_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let mut user = record("amelie");
        db.upsert_user(&user).unwrap();

        let fetched = db.user_by_id(&user.id).unwrap().expect("user exists");
        assert_eq!(fetched.username, "amelie");
        assert_eq!(fetched.plan, Plan::Free);

        user.plan = Plan::Elite;
        user.verified_at = Some(Utc::now());
        db.upsert_user(&user).unwrap();

        let fetched = db.user_by_id(&user.id).unwrap().expect("user exists");
        assert!(fetched.plan.is_elite());
        assert!(fetched.verified_at.is_some());

        assert!(db.user_by_id(&UserId::new()).unwrap().is_none());
    }

    #[test]
    fn mutual_likes_and_matched_ids() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        db.add_like(&a, &b).unwrap();
        assert!(!db.is_mutual_like(&a, &b).unwrap());

        db.add_like(&b, &a).unwrap();
        // A second identical like changes nothing.
        db.add_like(&b, &a).unwrap();
        assert!(db.is_mutual_like(&a, &b).unwrap());

        db.add_like(&a, &c).unwrap();
        let matched = db.matched_ids(&a).unwrap();
        assert_eq!(matched, vec![b.clone()]);
        assert!(db.matched_ids(&c).unwrap().is_empty());
    }
}
