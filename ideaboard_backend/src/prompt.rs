use crate::context::{InvocationContext, MentionType};

const CARD_IDENTITY: &str = "You are Claude, an assistant embedded in a kanban-style idea board. \
     You were mentioned in a comment on a card. Answer concisely and help the team move the work forward.";

const GLOBAL_IDENTITY: &str = "You are Claude, an assistant embedded in a kanban-style idea board. \
     You are chatting with the board's owner about their ideas. Answer concisely and suggest concrete next steps.";

const ACTIONS_INSTRUCTIONS: &str = "You can propose changes to the board. The user must approve each one before it happens.\n\
Available actions:\n\
- create_card: params {\"text\": string, \"columnId\": string (optional, defaults to \"todo\")}\n\
- move_card: params {\"cardId\": string, \"columnId\": string, \"fromColumnId\": string (optional)}\n\
- modify_card: params {\"cardId\": string, \"text\": string}\n\
To propose actions, include a fenced block labelled actions containing a JSON array, exactly like this:\n\
```actions\n\
[{\"type\": \"create_card\", \"params\": {\"text\": \"Write onboarding guide\", \"columnId\": \"todo\"}}]\n\
```\n\
If you do not include this block, no change will be made to the board.";

/// Assemble the system prompt: identity, then each populated context
/// section, then the actions contract. Sections are blank-line separated.
pub fn build_system_prompt(context: &InvocationContext) -> String {
    let identity = match context.mention_type {
        MentionType::Card => CARD_IDENTITY,
        MentionType::Global => GLOBAL_IDENTITY,
    };
    let mut sections = vec![identity.to_string()];

    if let Some(title) = present(&context.idea_title) {
        match present(&context.idea_summary) {
            Some(summary) => sections.push(format!("Current project: {} - {}", title, summary)),
            None => sections.push(format!("Current project: {}", title)),
        }
    }

    if let Some(board) = present(&context.board_state) {
        sections.push(format!("Board state:\n{}", board));
    }

    if let Some(card) = present(&context.card_text) {
        match present(&context.column_title) {
            Some(column) => sections.push(format!("Current card: {} (in column: {})", card, column)),
            None => sections.push(format!("Current card: {}", card)),
        }
    }

    if let Some(comments) = present(&context.recent_comments) {
        sections.push(format!("Recent comments:\n{}", comments));
    }

    sections.push(ACTIONS_INSTRUCTIONS.to_string());
    sections.join("\n\n")
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}
