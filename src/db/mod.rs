use crate::models::{Candidate, Contribution, Poll, Role};
use chrono::{DateTime, Utc};
use log::info;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row, Sqlite,
};
use std::env;

pub struct Database {
    pool: SqlitePool,
}

fn parse_utc(s: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

impl Database {
    pub async fn new() -> Result<Self, sqlx::Error> {
        let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:livetally.db".to_string());
        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            Sqlite::create_database(&db_url).await?;
        }
        Self::connect(&db_url, 5).await
    }

    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Self::init_schema(&pool).await?;
        info!("Database ready at {}", db_url);
        Ok(Self { pool })
    }

    /// Shared in-memory database, used by the test suite.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                admin_id TEXT NOT NULL,
                judge_a TEXT NOT NULL,
                judge_b TEXT NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                name TEXT NOT NULL,
                position INTEGER NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contributors (
                id TEXT PRIMARY KEY,
                first_seen TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        // The composite primary key is the sole coordination primitive
        // preventing double-counting under concurrent writers.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contributions (
                poll_id TEXT NOT NULL,
                candidate_id TEXT NOT NULL,
                contributor_id TEXT NOT NULL,
                role TEXT NOT NULL,
                value REAL NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (poll_id, candidate_id, contributor_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE,
                FOREIGN KEY (candidate_id) REFERENCES candidates(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn create_poll(&self, poll: &Poll) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO polls (id, title, admin_id, judge_a, judge_b, start_at, end_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.title)
        .bind(&poll.admin_id)
        .bind(&poll.judge_a)
        .bind(&poll.judge_b)
        .bind(poll.start_at.to_rfc3339())
        .bind(poll.end_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, title, admin_id, judge_a, judge_b, start_at, end_at
            FROM polls
            WHERE id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Poll {
            id: row.get::<String, _>("id"),
            title: row.get::<String, _>("title"),
            admin_id: row.get::<String, _>("admin_id"),
            judge_a: row.get::<String, _>("judge_a"),
            judge_b: row.get::<String, _>("judge_b"),
            start_at: parse_utc(&row.get::<String, _>("start_at"))?,
            end_at: parse_utc(&row.get::<String, _>("end_at"))?,
        }))
    }

    pub async fn create_candidate(&self, candidate: &Candidate) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO candidates (id, poll_id, name, position)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&candidate.id)
        .bind(&candidate.poll_id)
        .bind(&candidate.name)
        .bind(candidate.position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Candidates for a poll in display order.
    pub async fn get_candidates(&self, poll_id: &str) -> Result<Vec<Candidate>, sqlx::Error> {
        let candidates = sqlx::query(
            r#"
            SELECT id, poll_id, name, position
            FROM candidates
            WHERE poll_id = ?
            ORDER BY position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| Candidate {
            id: row.get::<String, _>("id"),
            poll_id: row.get::<String, _>("poll_id"),
            name: row.get::<String, _>("name"),
            position: row.get::<i64, _>("position"),
        })
        .collect();
        Ok(candidates)
    }

    pub async fn get_candidate(
        &self,
        poll_id: &str,
        candidate_id: &str,
    ) -> Result<Option<Candidate>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, poll_id, name, position
            FROM candidates
            WHERE id = ? AND poll_id = ?
            "#,
        )
        .bind(candidate_id)
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Candidate {
            id: row.get::<String, _>("id"),
            poll_id: row.get::<String, _>("poll_id"),
            name: row.get::<String, _>("name"),
            position: row.get::<i64, _>("position"),
        }))
    }

    /// Idempotent contributor provisioning; safe to call on every request.
    pub async fn ensure_contributor(&self, contributor_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO contributors (id, first_seen)
            VALUES (?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(contributor_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomic keyed insert. Returns `None` when a new row was written, or
    /// `Some(existing_value)` when a row for the key already existed (the
    /// existing row is never touched). There is no check-then-insert window:
    /// the conflict is resolved by the storage engine itself.
    pub async fn try_insert_contribution(
        &self,
        contribution: &Contribution,
    ) -> Result<Option<f64>, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO contributions (poll_id, candidate_id, contributor_id, role, value, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(poll_id, candidate_id, contributor_id) DO NOTHING
            "#,
        )
        .bind(&contribution.poll_id)
        .bind(&contribution.candidate_id)
        .bind(&contribution.contributor_id)
        .bind(contribution.role.as_str())
        .bind(contribution.value)
        .bind(contribution.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(None);
        }

        let existing = sqlx::query(
            r#"
            SELECT value
            FROM contributions
            WHERE poll_id = ? AND candidate_id = ? AND contributor_id = ?
            "#,
        )
        .bind(&contribution.poll_id)
        .bind(&contribution.candidate_id)
        .bind(&contribution.contributor_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(existing.get::<f64, _>("value")))
    }

    /// The full contribution set for a poll, the single source of truth
    /// every aggregate is recomputed from.
    pub async fn get_contributions(&self, poll_id: &str) -> Result<Vec<Contribution>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT poll_id, candidate_id, contributor_id, role, value, created_at
            FROM contributions
            WHERE poll_id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        let mut contributions = Vec::with_capacity(rows.len());
        for row in rows {
            let role_str = row.get::<String, _>("role");
            let role = Role::parse(&role_str).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown contribution role: {}", role_str).into())
            })?;
            contributions.push(Contribution {
                poll_id: row.get::<String, _>("poll_id"),
                candidate_id: row.get::<String, _>("candidate_id"),
                contributor_id: row.get::<String, _>("contributor_id"),
                role,
                value: row.get::<f64, _>("value"),
                created_at: parse_utc(&row.get::<String, _>("created_at"))?,
            });
        }
        Ok(contributions)
    }
}
