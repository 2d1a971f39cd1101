use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::board::{
    Board, BoardOperations, BoardRepository, Card, Column, Comment, Idea, DEFAULT_COLUMNS,
};

pub struct BoardDatabase {
    conn: Mutex<Connection>,
}

impl BoardDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open board database {:?}", path))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS ideas (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS columns (
                idea_id TEXT NOT NULL REFERENCES ideas(id) ON DELETE CASCADE,
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (idea_id, id)
            );

            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                idea_id TEXT NOT NULL REFERENCES ideas(id) ON DELETE CASCADE,
                column_id TEXT NOT NULL,
                text TEXT NOT NULL,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cards_idea ON cards(idea_id, column_id, position);

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                author TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_comments_card ON comments(card_id);"#,
        )
        .context("Failed to create board schema")?;
        Ok(())
    }

    // ========================================================================
    // Ideas
    // ========================================================================

    /// Create an idea with the default `todo`/`doing`/`done` columns.
    pub fn create_idea(&self, title: &str, summary: &str) -> Result<Idea> {
        let title = title.trim();
        if title.is_empty() {
            bail!("Idea title cannot be empty");
        }
        let idea = Idea {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            summary: summary.trim().to_string(),
        };

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO ideas (id, title, summary, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![idea.id, idea.title, idea.summary, Utc::now().to_rfc3339()],
        )?;
        for (position, (column_id, column_title)) in DEFAULT_COLUMNS.iter().enumerate() {
            tx.execute(
                "INSERT INTO columns (idea_id, id, title, position) VALUES (?1, ?2, ?3, ?4)",
                params![idea.id, column_id, column_title, position as i64],
            )?;
        }
        tx.commit()?;

        tracing::info!("Created idea '{}' ({})", idea.title, idea.id);
        Ok(idea)
    }

    fn query_idea(conn: &Connection, idea_id: &str) -> Result<Option<Idea>> {
        let idea = conn
            .query_row(
                "SELECT id, title, summary FROM ideas WHERE id = ?1",
                params![idea_id],
                |row| {
                    Ok(Idea {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        summary: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(idea)
    }

    // ========================================================================
    // Cards
    // ========================================================================

    fn query_card(conn: &Connection, card_id: &str) -> Result<Option<(String, Card)>> {
        let card = conn
            .query_row(
                "SELECT idea_id, id, column_id, text, position FROM cards WHERE id = ?1",
                params![card_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        Card {
                            id: row.get(1)?,
                            column_id: row.get(2)?,
                            text: row.get(3)?,
                            position: row.get(4)?,
                        },
                    ))
                },
            )
            .optional()?;
        Ok(card)
    }

    fn column_exists(conn: &Connection, idea_id: &str, column_id: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM columns WHERE idea_id = ?1 AND id = ?2",
            params![idea_id, column_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn next_position(conn: &Connection, idea_id: &str, column_id: &str) -> Result<i64> {
        let position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM cards WHERE idea_id = ?1 AND column_id = ?2",
            params![idea_id, column_id],
            |row| row.get(0),
        )?;
        Ok(position)
    }

    pub fn insert_card(&self, idea_id: &str, column_id: &str, text: &str) -> Result<Card> {
        let text = text.trim();
        if text.is_empty() {
            bail!("Card text cannot be empty");
        }

        let conn = self.lock_conn()?;
        if Self::query_idea(&conn, idea_id)?.is_none() {
            bail!("Idea '{}' not found", idea_id);
        }
        if !Self::column_exists(&conn, idea_id, column_id)? {
            bail!("Column '{}' does not exist on this board", column_id);
        }

        let card = Card {
            id: uuid::Uuid::new_v4().to_string(),
            column_id: column_id.to_string(),
            text: text.to_string(),
            position: Self::next_position(&conn, idea_id, column_id)?,
        };
        conn.execute(
            "INSERT INTO cards (id, idea_id, column_id, text, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                card.id,
                idea_id,
                card.column_id,
                card.text,
                card.position,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(card)
    }

    /// Move a card to the end of another column on the same board.
    pub fn relocate_card(&self, card_id: &str, from_column_id: &str, to_column_id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let (idea_id, card) = Self::query_card(&conn, card_id)?
            .ok_or_else(|| anyhow!("Card '{}' not found", card_id))?;

        if card.column_id != from_column_id {
            tracing::warn!(
                "Card {} is in '{}', not '{}'; moving it anyway",
                card_id,
                card.column_id,
                from_column_id
            );
        }
        if !Self::column_exists(&conn, &idea_id, to_column_id)? {
            bail!("Column '{}' does not exist on this board", to_column_id);
        }
        if card.column_id == to_column_id {
            return Ok(());
        }

        let position = Self::next_position(&conn, &idea_id, to_column_id)?;
        conn.execute(
            "UPDATE cards SET column_id = ?1, position = ?2 WHERE id = ?3",
            params![to_column_id, position, card_id],
        )?;
        Ok(())
    }

    pub fn update_card_text(&self, card_id: &str, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            bail!("Card text cannot be empty");
        }
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            "UPDATE cards SET text = ?1 WHERE id = ?2",
            params![text, card_id],
        )?;
        if updated == 0 {
            bail!("Card '{}' not found", card_id);
        }
        Ok(())
    }

    // ========================================================================
    // Comments
    // ========================================================================

    pub fn add_comment(&self, card_id: &str, author: &str, body: &str) -> Result<Comment> {
        let comment = Comment {
            id: uuid::Uuid::new_v4().to_string(),
            card_id: card_id.to_string(),
            author: author.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        };

        let conn = self.lock_conn()?;
        if Self::query_card(&conn, card_id)?.is_none() {
            bail!("Card '{}' not found", card_id);
        }
        conn.execute(
            "INSERT INTO comments (id, card_id, author, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.id,
                comment.card_id,
                comment.author,
                comment.body,
                comment.created_at.to_rfc3339()
            ],
        )?;
        Ok(comment)
    }
}

impl BoardRepository for BoardDatabase {
    fn list_ideas(&self) -> Result<Vec<Idea>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT id, title, summary FROM ideas ORDER BY rowid ASC")?;
        let ideas = stmt
            .query_map([], |row| {
                Ok(Idea {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    summary: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ideas)
    }

    fn get_idea(&self, idea_id: &str) -> Result<Option<Idea>> {
        let conn = self.lock_conn()?;
        Self::query_idea(&conn, idea_id)
    }

    fn load_board(&self, idea_id: &str) -> Result<Option<Board>> {
        let conn = self.lock_conn()?;
        let Some(idea) = Self::query_idea(&conn, idea_id)? else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT id, title, position FROM columns WHERE idea_id = ?1 ORDER BY position ASC",
        )?;
        let mut columns = stmt
            .query_map(params![idea_id], |row| {
                Ok(Column {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    position: row.get(2)?,
                    cards: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, column_id, text, position FROM cards
             WHERE idea_id = ?1
             ORDER BY position ASC, rowid ASC",
        )?;
        let cards = stmt
            .query_map(params![idea_id], |row| {
                Ok(Card {
                    id: row.get(0)?,
                    column_id: row.get(1)?,
                    text: row.get(2)?,
                    position: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for card in cards {
            match columns.iter_mut().find(|c| c.id == card.column_id) {
                Some(column) => column.cards.push(card),
                None => tracing::warn!("Card {} references missing column {}", card.id, card.column_id),
            }
        }

        Ok(Some(Board { idea, columns }))
    }

    fn get_card(&self, card_id: &str) -> Result<Option<Card>> {
        let conn = self.lock_conn()?;
        Ok(Self::query_card(&conn, card_id)?.map(|(_, card)| card))
    }

    fn recent_comments(&self, card_id: &str, limit: usize) -> Result<Vec<Comment>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, card_id, author, body, created_at FROM comments
             WHERE card_id = ?1
             ORDER BY rowid DESC
             LIMIT ?2",
        )?;

        let mut comments = stmt
            .query_map(params![card_id, limit as i64], |row| {
                let created_raw: String = row.get(4)?;
                let created_at: DateTime<Utc> = created_raw.parse().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(Comment {
                    id: row.get(0)?,
                    card_id: row.get(1)?,
                    author: row.get(2)?,
                    body: row.get(3)?,
                    created_at,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        comments.reverse();
        Ok(comments)
    }
}

#[async_trait]
impl BoardOperations for BoardDatabase {
    async fn create_card(&self, idea_id: &str, column_id: &str, text: &str) -> Result<Card> {
        self.insert_card(idea_id, column_id, text)
    }

    async fn move_card(&self, card_id: &str, from_column_id: &str, to_column_id: &str) -> Result<()> {
        self.relocate_card(card_id, from_column_id, to_column_id)
    }

    async fn edit_card(&self, card_id: &str, text: &str) -> Result<()> {
        self.update_card_text(card_id, text)
    }
}
