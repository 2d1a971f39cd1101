use std::sync::Arc;

use anyhow::{anyhow, Result};

use ideaboard_backend::actions::ProposedAction;
use ideaboard_backend::board::BoardOperations;

/// Carries out approved proposals against the board.
#[derive(Clone)]
pub struct MutationApplier {
    board: Arc<dyn BoardOperations>,
    default_column: String,
}

impl MutationApplier {
    pub fn new(board: Arc<dyn BoardOperations>, default_column: impl Into<String>) -> Self {
        Self {
            board,
            default_column: default_column.into(),
        }
    }

    /// Apply one action and return the confirmation shown to the user.
    pub async fn apply(&self, action: &ProposedAction, idea_id: Option<&str>) -> Result<String> {
        match action {
            ProposedAction::CreateCard { text, column_id } => {
                let idea_id =
                    idea_id.ok_or_else(|| anyhow!("Open an idea before adding cards to it"))?;
                let column = column_id.as_deref().unwrap_or(&self.default_column);
                let card = self.board.create_card(idea_id, column, text).await?;
                tracing::info!("Created card {} in {}", card.id, column);
                Ok(format!("Added \"{}\" to {}.", card.text, column))
            }
            ProposedAction::MoveCard {
                card_id,
                column_id,
                from_column_id,
            } => {
                let from = from_column_id.as_deref().unwrap_or(&self.default_column);
                self.board.move_card(card_id, from, column_id).await?;
                tracing::info!("Moved card {} from {} to {}", card_id, from, column_id);
                Ok(format!("Moved card {} to {}.", card_id, column_id))
            }
            ProposedAction::ModifyCard { card_id, text } => {
                self.board.edit_card(card_id, text).await?;
                tracing::info!("Edited card {}", card_id);
                Ok(format!("Updated card {} to \"{}\".", card_id, text))
            }
        }
    }
}
