//! SQLite backend with FTS5 full-text search.
//!
//! Uses a single SQLite database file with three tables:
//! - `conversations` — one row per chat thread
//! - `turns` — the append-only utterance log
//! - `turns_fts` — FTS5 virtual table for keyword search over turn bodies
//!
//! A trigger keeps the FTS index in sync on insert. Turns are append-only,
//! so no update/delete sync is needed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parlor_core::error::StoreError;
use parlor_core::store::{Page, TurnDraft, TurnStore};
use parlor_core::turn::{Conversation, Turn, TurnRole};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info};

/// A production SQLite turn store with FTS5 keyword search.
pub struct SqliteTurnStore {
    pool: SqlitePool,
}

impl SqliteTurnStore {
    /// Create a new SQLite store from a connection string.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database
    /// (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite turn store initialized at {url}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations — creates tables, the FTS5 virtual table, and
    /// the sync trigger.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    TEXT NOT NULL,
                topic      TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL,
                body            TEXT NOT NULL,
                role            TEXT NOT NULL CHECK (role IN ('human', 'model')),
                token_cost      INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("turns table: {e}")))?;

        // External-content FTS5 table over turn bodies.
        // content_rowid maps to the integer primary key in turns.
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS turns_fts USING fts5(
                body,
                content='turns',
                content_rowid='id',
                tokenize='porter unicode61'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("FTS5 table: {e}")))?;

        // Turns are append-only: only the insert trigger is needed to keep
        // the FTS index in sync.
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS turns_ai AFTER INSERT ON turns BEGIN
                INSERT INTO turns_fts(rowid, body) VALUES (new.id, new.body);
            END
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("insert trigger: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation_created
             ON turns(conversation_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("turns index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_user_created
             ON conversations(user_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_timestamp(raw: &str) -> DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, StoreError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))?;
        let topic: String = row
            .try_get("topic")
            .map_err(|e| StoreError::QueryFailed(format!("topic column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        Ok(Conversation {
            id,
            user_id,
            topic,
            created_at: Self::parse_timestamp(&created_at_str),
        })
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, StoreError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let conversation_id: i64 = row
            .try_get("conversation_id")
            .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))?;
        let body: String = row
            .try_get("body")
            .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
        let role_str: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let token_cost: i64 = row
            .try_get("token_cost")
            .map_err(|e| StoreError::QueryFailed(format!("token_cost column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        let role = TurnRole::parse(&role_str)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown role '{role_str}'")))?;

        Ok(Turn {
            id,
            conversation_id,
            user_id,
            body,
            role,
            token_cost,
            created_at: Self::parse_timestamp(&created_at_str),
        })
    }

    /// Insert a turn inside an open transaction and return the stored row.
    async fn insert_turn_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        conversation_id: i64,
        draft: &TurnDraft,
        created_at: &DateTime<Utc>,
    ) -> Result<Turn, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO turns (conversation_id, user_id, body, role, token_cost, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(conversation_id)
        .bind(&draft.user_id)
        .bind(&draft.body)
        .bind(draft.role.as_str())
        .bind(draft.token_cost)
        .bind(created_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT turn failed: {e}")))?;

        Ok(Turn {
            id: result.last_insert_rowid(),
            conversation_id,
            user_id: draft.user_id.clone(),
            body: draft.body.clone(),
            role: draft.role,
            token_cost: draft.token_cost,
            created_at: *created_at,
        })
    }

    /// Build a safe FTS5 query for a single word.
    ///
    /// FTS5 requires special syntax. We strip non-alphanumeric characters
    /// and quote the token to prevent injection, with prefix matching.
    fn sanitize_fts_word(word: &str) -> String {
        let clean: String = word.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect();
        if clean.is_empty() { String::new() } else { format!("\"{clean}\"*") }
    }

    /// Conversation ids of `user_id` where `word` appears in some turn.
    async fn conversations_with_word(
        &self,
        user_id: &str,
        word: &str,
    ) -> Result<HashSet<i64>, StoreError> {
        let fts_query = Self::sanitize_fts_word(word);
        if fts_query.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT DISTINCT t.conversation_id AS conversation_id
            FROM turns_fts f
            JOIN turns t ON t.id = f.rowid
            WHERE turns_fts MATCH ?1 AND t.user_id = ?2
            "#,
        )
        .bind(&fts_query)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("FTS5 search: {e}")))?;

        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("conversation_id")
                    .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))
            })
            .collect()
    }

    /// Resolve the set of conversation ids matching a keyword query.
    ///
    /// A conversation matches when every word appears in its topic, or when
    /// every word appears somewhere among its turns (each word may hit a
    /// different turn — the per-word id sets are intersected).
    async fn search_conversation_ids(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<HashSet<i64>, StoreError> {
        let words: Vec<&str> = query.split_whitespace().collect();
        if words.is_empty() {
            return Ok(HashSet::new());
        }

        // Topic match: every word as a LIKE filter.
        let mut sql = String::from("SELECT id FROM conversations WHERE user_id = ?1");
        for i in 0..words.len() {
            sql.push_str(&format!(" AND topic LIKE ?{} ESCAPE '\\'", i + 2));
        }
        let mut topic_query = sqlx::query(&sql).bind(user_id);
        for word in &words {
            let escaped = word.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
            topic_query = topic_query.bind(format!("%{escaped}%"));
        }
        let rows = topic_query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("topic search: {e}")))?;

        let mut matched: HashSet<i64> = rows
            .iter()
            .map(|row| {
                row.try_get::<i64, _>("id")
                    .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))
            })
            .collect::<Result<_, _>>()?;

        // Turn match: intersect the per-word conversation id sets.
        let mut body_matches: Option<HashSet<i64>> = None;
        for word in &words {
            let ids = self.conversations_with_word(user_id, word).await?;
            body_matches = Some(match body_matches {
                None => ids,
                Some(acc) => acc.intersection(&ids).copied().collect(),
            });
            if body_matches.as_ref().is_some_and(HashSet::is_empty) {
                break;
            }
        }

        if let Some(ids) = body_matches {
            matched.extend(ids);
        }

        Ok(matched)
    }

    /// All turns of a conversation, oldest-first.
    async fn turns_for_conversation(&self, conversation_id: i64) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM turns WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("turns lookup: {e}")))?;

        rows.iter().map(Self::row_to_turn).collect()
    }
}

#[async_trait]
impl TurnStore for SqliteTurnStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        topic: &str,
        prompt: TurnDraft,
        reply: TurnDraft,
    ) -> Result<(Conversation, Turn, Turn), StoreError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO conversations (user_id, topic, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(user_id)
        .bind(topic)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT conversation failed: {e}")))?;

        let conversation = Conversation {
            id: result.last_insert_rowid(),
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            created_at: now,
        };

        let prompt_turn = Self::insert_turn_tx(&mut tx, conversation.id, &prompt, &now).await?;
        let reply_turn = Self::insert_turn_tx(&mut tx, conversation.id, &reply, &now).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        debug!(
            conversation_id = conversation.id,
            topic = %conversation.topic,
            "Created conversation with opening exchange"
        );
        Ok((conversation, prompt_turn, reply_turn))
    }

    async fn append_exchange(
        &self,
        conversation_id: i64,
        prompt: TurnDraft,
        reply: TurnDraft,
    ) -> Result<(Turn, Turn), StoreError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        let prompt_turn = Self::insert_turn_tx(&mut tx, conversation_id, &prompt, &now).await?;
        let reply_turn = Self::insert_turn_tx(&mut tx, conversation_id, &reply, &now).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        Ok((prompt_turn, reply_turn))
    }

    async fn append_turn(
        &self,
        conversation_id: i64,
        draft: TurnDraft,
    ) -> Result<Turn, StoreError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("BEGIN failed: {e}")))?;

        let turn = Self::insert_turn_tx(&mut tx, conversation_id, &draft, &now).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("COMMIT failed: {e}")))?;

        Ok(turn)
    }

    async fn list_recent(
        &self,
        conversation_id: i64,
        limit: u32,
    ) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM turns
            WHERE conversation_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("recent turns: {e}")))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("conversation lookup: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_conversation(r)?)),
            None => Ok(None),
        }
    }

    async fn get_conversation_with_turns(
        &self,
        id: i64,
    ) -> Result<Option<(Conversation, Vec<Turn>)>, StoreError> {
        let Some(conversation) = self.get_conversation(id).await? else {
            return Ok(None);
        };
        let turns = self.turns_for_conversation(id).await?;
        Ok(Some((conversation, turns)))
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        query: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<(Conversation, Vec<Turn>)>, StoreError> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let query = query.map(str::trim).filter(|q| !q.is_empty());

        let (count, rows) = match query {
            None => {
                let count_row =
                    sqlx::query("SELECT COUNT(*) AS cnt FROM conversations WHERE user_id = ?1")
                        .bind(user_id)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(|e| StoreError::QueryFailed(format!("count: {e}")))?;
                let count: i64 = count_row
                    .try_get("cnt")
                    .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;

                let rows = sqlx::query(
                    r#"
                    SELECT * FROM conversations
                    WHERE user_id = ?1
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?2 OFFSET ?3
                    "#,
                )
                .bind(user_id)
                .bind(i64::from(page_size))
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("listing: {e}")))?;

                (count as u64, rows)
            }
            Some(q) => {
                let ids = self.search_conversation_ids(user_id, q).await?;
                if ids.is_empty() {
                    return Ok(Page { items: vec![], count: 0, page, page_size });
                }

                let placeholders: Vec<String> =
                    (0..ids.len()).map(|i| format!("?{}", i + 1)).collect();
                let sql = format!(
                    "SELECT * FROM conversations WHERE id IN ({}) \
                     ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
                    placeholders.join(", "),
                    ids.len() + 1,
                    ids.len() + 2,
                );

                let mut db_query = sqlx::query(&sql);
                for id in &ids {
                    db_query = db_query.bind(*id);
                }
                db_query = db_query.bind(i64::from(page_size)).bind(offset);

                let rows = db_query
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| StoreError::QueryFailed(format!("search listing: {e}")))?;

                (ids.len() as u64, rows)
            }
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let conversation = Self::row_to_conversation(row)?;
            let turns = self.turns_for_conversation(conversation.id).await?;
            items.push((conversation, turns));
        }

        Ok(Page { items, count, page, page_size })
    }
}
