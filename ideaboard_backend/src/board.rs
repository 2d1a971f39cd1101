//! Board snapshot types and the seams the assistant uses to read and
//! mutate a board.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Columns every new idea starts with, as `(id, title)`.
pub const DEFAULT_COLUMNS: [(&str, &str); 3] =
    [("todo", "To Do"), ("doing", "Doing"), ("done", "Done")];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idea {
    pub id: String,
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub column_id: String,
    pub text: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub title: String,
    pub position: i64,
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub idea: Idea,
    pub columns: Vec<Column>,
}

impl Board {
    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn find_card(&self, card_id: &str) -> Option<(&Column, &Card)> {
        self.columns.iter().find_map(|column| {
            column
                .cards
                .iter()
                .find(|card| card.id == card_id)
                .map(|card| (column, card))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub card_id: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Read side of board storage, consumed by context building.
pub trait BoardRepository: Send + Sync {
    fn list_ideas(&self) -> Result<Vec<Idea>>;
    fn get_idea(&self, idea_id: &str) -> Result<Option<Idea>>;
    fn load_board(&self, idea_id: &str) -> Result<Option<Board>>;
    fn get_card(&self, card_id: &str) -> Result<Option<Card>>;
    /// Most recent `limit` comments on a card, oldest first.
    fn recent_comments(&self, card_id: &str, limit: usize) -> Result<Vec<Comment>>;
}

/// Write side of board storage, invoked when a proposal is approved.
#[async_trait]
pub trait BoardOperations: Send + Sync {
    async fn create_card(&self, idea_id: &str, column_id: &str, text: &str) -> Result<Card>;
    async fn move_card(&self, card_id: &str, from_column_id: &str, to_column_id: &str)
        -> Result<()>;
    async fn edit_card(&self, card_id: &str, text: &str) -> Result<()>;
}
