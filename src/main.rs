mod api;
mod applier;
mod controller;
mod router;

use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ideaboard_backend::actions::{Proposal, ProposedAction};
use ideaboard_backend::board::BoardRepository;
use ideaboard_backend::brainstorm::BrainstormClient;
use ideaboard_backend::config::AssistantConfig;
use ideaboard_backend::context::{summarize_board, ContextBuilder, InvocationContext};
use ideaboard_backend::database::BoardDatabase;
use ideaboard_backend::mention::MentionDetector;

use applier::MutationApplier;
use controller::{ConversationController, Role};
use router::AssistantRouter;

const HELP: &str = "\
Commands:
  <text>                 chat with the assistant (on a card: post a comment; mention the assistant to ask it)
  /ideas                 list ideas
  /new-idea <title> | <summary>
  /idea <id>             open an idea's board
  /board                 show the open board
  /card <id>             focus a card (use /card to return to the board)
  /pending               list proposals awaiting approval
  /approve <n>           apply proposal n
  /dismiss <n>           drop proposal n
  /dismiss-all           drop every proposal
  /brainstorm            ask the local LLM for card ideas
  /health                check the assistant connection
  /quit";

struct Session {
    db: Arc<BoardDatabase>,
    controller: ConversationController,
    detector: MentionDetector,
    config: AssistantConfig,
    card_id: Option<String>,
    interrupts: mpsc::UnboundedReceiver<()>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ideaboard=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Idea board starting...");

    let config = AssistantConfig::load();
    let db = Arc::new(
        BoardDatabase::new(&config.database_path)
            .with_context(|| format!("failed to open {}", config.database_path))?,
    );
    let router = AssistantRouter::from_config(&config)?;
    println!("Assistant backend: {}", router.backend_name());

    let detector = MentionDetector::new(&config.trigger);
    let controller = ConversationController::new(
        router,
        MutationApplier::new(db.clone(), config.default_column.clone()),
        detector.clone(),
    );

    // One SIGINT handler for the whole process: it cancels a request in
    // flight and quits when idle.
    let (interrupt_tx, interrupts) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        db,
        controller,
        detector,
        config,
        card_id: None,
        interrupts,
    };

    println!("{}\n", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = session.interrupts.recv() => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }
        if let Err(e) = session.handle(line).await {
            println!("! {:#}", e);
        }
    }
    Ok(())
}

impl Session {
    async fn handle(&mut self, line: &str) -> Result<()> {
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        match command {
            "/ideas" => self.list_ideas(),
            "/new-idea" => self.new_idea(arg),
            "/idea" => self.open_idea(arg),
            "/board" => self.show_board(),
            "/card" => self.focus_card(arg),
            "/pending" => {
                self.show_pending();
                Ok(())
            }
            "/approve" => {
                let id = self.proposal_at(arg)?;
                self.controller.approve(id).await?;
                self.print_latest();
                Ok(())
            }
            "/dismiss" => {
                let id = self.proposal_at(arg)?;
                self.controller.dismiss(id);
                self.show_pending();
                Ok(())
            }
            "/dismiss-all" => {
                self.controller.dismiss_all();
                println!("Cleared all proposals.");
                Ok(())
            }
            "/brainstorm" => self.brainstorm().await,
            "/health" => {
                let health = self.controller.router().check_health().await;
                match (health.available, health.version, health.error) {
                    (true, Some(version), _) => println!("Assistant available ({})", version),
                    (true, None, _) => println!("Assistant available"),
                    (false, _, error) => println!(
                        "Assistant unavailable: {}",
                        error.unwrap_or_else(|| "unknown error".to_string())
                    ),
                }
                Ok(())
            }
            "/help" => {
                println!("{}", HELP);
                Ok(())
            }
            other if other.starts_with('/') => bail!("Unknown command {} (try /help)", other),
            _ => self.chat(line).await,
        }
    }

    fn list_ideas(&self) -> Result<()> {
        let ideas = self.db.list_ideas()?;
        if ideas.is_empty() {
            println!("No ideas yet. Create one with /new-idea <title> | <summary>");
        }
        for idea in ideas {
            println!("{}  {} - {}", idea.id, idea.title, idea.summary);
        }
        Ok(())
    }

    fn new_idea(&mut self, arg: &str) -> Result<()> {
        let (title, summary) = arg.split_once('|').unwrap_or((arg, ""));
        let idea = self.db.create_idea(title, summary)?;
        println!("Created {} ({})", idea.title, idea.id);
        self.open_idea(&idea.id)
    }

    fn open_idea(&mut self, idea_id: &str) -> Result<()> {
        let idea = self
            .db
            .get_idea(idea_id)?
            .ok_or_else(|| anyhow!("No idea with id '{}'", idea_id))?;
        self.controller.set_idea(Some(idea.id.clone()));
        self.card_id = None;
        println!("Opened {}", idea.title);
        self.show_board()
    }

    fn show_board(&self) -> Result<()> {
        let idea_id = self.require_idea()?;
        let board = self
            .db
            .load_board(idea_id)?
            .ok_or_else(|| anyhow!("Idea '{}' no longer exists", idea_id))?;
        println!("{}", summarize_board(&board));
        for column in &board.columns {
            for card in &column.cards {
                println!("  [{}] {}  {}", column.id, card.id, card.text);
            }
        }
        Ok(())
    }

    fn focus_card(&mut self, card_id: &str) -> Result<()> {
        if card_id.is_empty() {
            self.card_id = None;
            println!("Back to the board chat.");
            return Ok(());
        }
        self.require_idea()?;
        let card = self
            .db
            .get_card(card_id)?
            .ok_or_else(|| anyhow!("No card with id '{}'", card_id))?;
        println!("Focused \"{}\" in {}", card.text, card.column_id);
        for comment in self.db.recent_comments(&card.id, 10)? {
            println!("  {}: {}", comment.author, comment.body);
        }
        self.card_id = Some(card.id);
        Ok(())
    }

    async fn chat(&mut self, text: &str) -> Result<()> {
        let context = match self.card_id.clone() {
            Some(card_id) => {
                self.db
                    .add_comment(&card_id, &self.config.username, text)?;
                if !self.detector.contains_mention(text) {
                    return Ok(());
                }
                let idea_id = self.require_idea()?.to_string();
                ContextBuilder::new(self.db.as_ref()).for_card(&idea_id, &card_id)?
            }
            None => ContextBuilder::new(self.db.as_ref()).for_global(self.controller.idea_id())?,
        };

        self.send(text, &context).await;

        if let (Some(card_id), None) = (&self.card_id, self.controller.last_error()) {
            if let Some(reply) = self.controller.messages().last() {
                if reply.role == Role::Assistant {
                    self.db.add_comment(card_id, "Claude", &reply.content)?;
                    tracing::debug!("Stored reply {} on card {}", reply.id, card_id);
                }
            }
        }
        Ok(())
    }

    async fn send(&mut self, text: &str, context: &InvocationContext) {
        let token = self.controller.cancel_handle();
        // Interrupts left over from a previous command must not cancel this one.
        while self.interrupts.try_recv().is_ok() {}

        println!("(thinking... Ctrl-C to cancel)");
        let accepted = cancel_on_interrupt(
            self.controller.send_message(text, context),
            &token,
            &mut self.interrupts,
        )
        .await;

        if !accepted {
            return;
        }
        match self.controller.last_error() {
            Some(error) => println!("! {}", error),
            None => {
                self.print_latest();
                if !self.controller.pending().is_empty() {
                    self.show_pending();
                }
            }
        }
    }

    async fn brainstorm(&mut self) -> Result<()> {
        let idea_id = self.require_idea()?.to_string();
        let board = self
            .db
            .load_board(&idea_id)?
            .ok_or_else(|| anyhow!("Idea '{}' no longer exists", idea_id))?;
        let existing: Vec<String> = board
            .columns
            .iter()
            .flat_map(|c| c.cards.iter().map(|card| card.text.clone()))
            .collect();

        let client = BrainstormClient::from_config(&self.config)?;
        let suggestions = client.brainstorm(&board.idea, &existing).await?;
        if suggestions.is_empty() {
            println!("No new suggestions.");
            return Ok(());
        }

        let proposals = suggestions
            .into_iter()
            .map(|text| {
                Proposal::new(ProposedAction::CreateCard {
                    text,
                    column_id: None,
                })
            })
            .collect();
        self.controller.propose(proposals);
        self.show_pending();
        Ok(())
    }

    fn show_pending(&self) {
        let pending = self.controller.pending();
        if pending.is_empty() {
            println!("Nothing pending.");
            return;
        }
        println!("Proposed changes:");
        for (index, proposal) in pending.iter().enumerate() {
            println!("  {}. {}", index + 1, proposal.action.describe());
        }
        println!("Use /approve <n> or /dismiss <n>.");
    }

    fn print_latest(&self) {
        if let Some(message) = self.controller.messages().last() {
            if message.role == Role::Assistant {
                println!(
                    "[{}] Claude: {}",
                    message.created_at.format("%H:%M"),
                    message.content
                );
            }
        }
    }

    /// Resolve a 1-based position shown by `/pending` to a proposal id.
    fn proposal_at(&self, arg: &str) -> Result<uuid::Uuid> {
        let index: usize = arg
            .parse()
            .map_err(|_| anyhow!("Expected a proposal number, got '{}'", arg))?;
        self.controller
            .pending()
            .get(index.wrapping_sub(1))
            .map(|p| p.id)
            .ok_or_else(|| anyhow!("No proposal #{}", index))
    }

    fn require_idea(&self) -> Result<&str> {
        self.controller
            .idea_id()
            .ok_or_else(|| anyhow!("Open an idea first with /idea <id>"))
    }
}

/// Drive `work` to completion, cancelling `token` for every interrupt that
/// arrives meanwhile. `work` is expected to observe the token and finish.
async fn cancel_on_interrupt<F: Future>(
    work: F,
    token: &CancellationToken,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> F::Output {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return output,
            Some(()) = interrupts.recv() => token.cancel(),
        }
    }
}
