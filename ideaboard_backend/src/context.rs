//! Bounded snapshots of board state handed to the model with each
//! invocation.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::board::{Board, BoardRepository, Comment, Idea};

/// Comments older than this are left out of card-scoped context.
pub const MAX_RECENT_COMMENTS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionType {
    Card,
    #[default]
    Global,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idea_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idea_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_comments: Option<String>,
    #[serde(default)]
    pub mention_type: MentionType,
}

/// One line per column: `Title: card1; card2` or `Title: (empty)`.
pub fn summarize_board(board: &Board) -> String {
    board
        .columns
        .iter()
        .map(|column| {
            if column.cards.is_empty() {
                format!("{}: (empty)", column.title)
            } else {
                let cards: Vec<&str> = column.cards.iter().map(|c| c.text.as_str()).collect();
                format!("{}: {}", column.title, cards.join("; "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_comments(comments: &[Comment]) -> String {
    let skip = comments.len().saturating_sub(MAX_RECENT_COMMENTS);
    comments[skip..]
        .iter()
        .map(|c| format!("{}: {}", c.author, c.body))
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Context for a mention made on a specific card.
pub fn build_card_context(
    board: &Board,
    card_id: &str,
    comments: &[Comment],
) -> Result<InvocationContext> {
    let (column, card) = board
        .find_card(card_id)
        .ok_or_else(|| anyhow!("card '{}' is not on board '{}'", card_id, board.idea.id))?;

    Ok(InvocationContext {
        idea_title: non_empty(&board.idea.title),
        idea_summary: non_empty(&board.idea.summary),
        card_text: non_empty(&card.text),
        column_title: non_empty(&column.title),
        board_state: non_empty(&summarize_board(board)),
        recent_comments: non_empty(&format_comments(comments)),
        mention_type: MentionType::Card,
    })
}

/// Context for a mention made outside any card, e.g. the chat panel.
pub fn build_global_context(selected: Option<&Board>, ideas: &[Idea]) -> InvocationContext {
    let digest = ideas
        .iter()
        .map(|idea| format!("- {}: {}", idea.title, idea.summary))
        .collect::<Vec<_>>()
        .join("\n");

    let mut sections = Vec::new();
    if let Some(board) = selected {
        let summary = summarize_board(board);
        if !summary.is_empty() {
            sections.push(summary);
        }
    }
    if !digest.is_empty() {
        sections.push(format!("All ideas:\n{}", digest));
    }

    InvocationContext {
        idea_title: selected.and_then(|b| non_empty(&b.idea.title)),
        idea_summary: selected.and_then(|b| non_empty(&b.idea.summary)),
        board_state: non_empty(&sections.join("\n\n")),
        mention_type: MentionType::Global,
        ..InvocationContext::default()
    }
}

/// Repository-backed helpers used by front ends.
pub struct ContextBuilder<'a> {
    repo: &'a dyn BoardRepository,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(repo: &'a dyn BoardRepository) -> Self {
        Self { repo }
    }

    pub fn for_card(&self, idea_id: &str, card_id: &str) -> Result<InvocationContext> {
        let board = self
            .repo
            .load_board(idea_id)?
            .ok_or_else(|| anyhow!("idea '{}' not found", idea_id))?;
        let comments = self.repo.recent_comments(card_id, MAX_RECENT_COMMENTS)?;
        build_card_context(&board, card_id, &comments)
    }

    pub fn for_global(&self, selected_idea: Option<&str>) -> Result<InvocationContext> {
        let board = match selected_idea {
            Some(idea_id) => self.repo.load_board(idea_id)?,
            None => None,
        };
        let ideas = self.repo.list_ideas()?;
        Ok(build_global_context(board.as_ref(), &ideas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Card, Column};
    use chrono::Utc;

    fn sample_board() -> Board {
        Board {
            idea: Idea {
                id: "i1".to_string(),
                title: "Launch".to_string(),
                summary: "Ship v1".to_string(),
            },
            columns: vec![
                Column {
                    id: "todo".to_string(),
                    title: "To Do".to_string(),
                    position: 0,
                    cards: vec![
                        Card {
                            id: "c1".to_string(),
                            column_id: "todo".to_string(),
                            text: "Write docs".to_string(),
                            position: 0,
                        },
                        Card {
                            id: "c2".to_string(),
                            column_id: "todo".to_string(),
                            text: "Fix login".to_string(),
                            position: 1,
                        },
                    ],
                },
                Column {
                    id: "done".to_string(),
                    title: "Done".to_string(),
                    position: 1,
                    cards: Vec::new(),
                },
            ],
        }
    }

    fn comment(n: usize) -> Comment {
        Comment {
            id: format!("m{}", n),
            card_id: "c1".to_string(),
            author: format!("user{}", n),
            body: format!("note {}", n),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn board_summary_lists_cards_or_empty() {
        assert_eq!(
            summarize_board(&sample_board()),
            "To Do: Write docs; Fix login\nDone: (empty)"
        );
    }

    #[test]
    fn card_context_includes_card_column_and_last_ten_comments() {
        let comments: Vec<Comment> = (1..=12).map(comment).collect();
        let ctx = build_card_context(&sample_board(), "c1", &comments).unwrap();

        assert_eq!(ctx.mention_type, MentionType::Card);
        assert_eq!(ctx.idea_title.as_deref(), Some("Launch"));
        assert_eq!(ctx.card_text.as_deref(), Some("Write docs"));
        assert_eq!(ctx.column_title.as_deref(), Some("To Do"));

        let recent = ctx.recent_comments.unwrap();
        let lines: Vec<&str> = recent.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "user3: note 3");
        assert_eq!(lines[9], "user12: note 12");
    }

    #[test]
    fn card_context_for_unknown_card_is_an_error() {
        assert!(build_card_context(&sample_board(), "nope", &[]).is_err());
    }

    #[test]
    fn global_context_digests_every_idea() {
        let board = sample_board();
        let ideas = vec![
            board.idea.clone(),
            Idea {
                id: "i2".to_string(),
                title: "Garden".to_string(),
                summary: "Grow tomatoes".to_string(),
            },
        ];

        let with_board = build_global_context(Some(&board), &ideas);
        let state = with_board.board_state.unwrap();
        assert!(state.starts_with("To Do: Write docs; Fix login"));
        assert!(state.contains("- Launch: Ship v1\n- Garden: Grow tomatoes"));
        assert_eq!(with_board.mention_type, MentionType::Global);

        let without_board = build_global_context(None, &ideas);
        assert!(without_board.idea_title.is_none());
        assert!(without_board
            .board_state
            .unwrap()
            .starts_with("All ideas:\n- Launch"));
    }

    #[test]
    fn context_serializes_camel_case() {
        let ctx = InvocationContext {
            idea_title: Some("t".to_string()),
            mention_type: MentionType::Card,
            ..InvocationContext::default()
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["ideaTitle"], "t");
        assert_eq!(json["mentionType"], "card");
        assert!(json.get("cardText").is_none());
    }
}
