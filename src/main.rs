//! Terminal reference surface for the chat client.
//!
//! Drives the full pipeline against the real endpoint: type a message,
//! watch the reply stream in, `/clear` to reset the conversation,
//! `/quit` to exit.

use std::collections::HashMap;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};

use twin_chat::config::ChatConfig;
use twin_chat::pipeline::ChatSession;
use twin_chat::store::FileStore;
use twin_chat::surface::{BubbleId, ChatSurface};
use twin_chat::transport::HttpTransport;
use twin_chat::types::Role;
use twin_chat::{lang, logging, ChatError};

/// Line-oriented surface: bubbles become printed lines, streaming updates
/// print only the suffix that arrived since the last update.
#[derive(Default)]
struct TerminalSurface {
    next_id: BubbleId,
    /// Printed length per streaming bubble, to emit deltas only.
    printed: HashMap<BubbleId, usize>,
}

impl TerminalSurface {
    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

impl ChatSurface for TerminalSurface {
    fn append_bubble(&mut self, role: Role, content: &str) -> BubbleId {
        self.next_id += 1;
        match role {
            Role::User => println!("you> {content}"),
            Role::Assistant => {
                if content.is_empty() {
                    // Streaming placeholder: open the line, deltas follow.
                    print!("twin> ");
                    self.printed.insert(self.next_id, 0);
                    self.flush();
                } else {
                    println!("twin> {content}");
                }
            }
        }
        self.next_id
    }

    fn update_bubble(&mut self, id: BubbleId, content: &str) {
        let printed = self.printed.entry(id).or_insert(0);
        if content.len() > *printed {
            print!("{}", &content[*printed..]);
            *printed = content.len();
            self.flush();
        }
    }

    fn remove_bubble(&mut self, id: BubbleId) {
        if self.printed.remove(&id).is_some() {
            println!();
        }
    }

    fn show_typing(&mut self) -> BubbleId {
        self.next_id += 1;
        self.next_id
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        // Settlement: close any still-open streaming line.
        if enabled && !self.printed.is_empty() {
            println!();
            self.printed.clear();
        }
    }

    fn show_suggestions(&mut self, title: &str, questions: &[&str]) {
        println!("{title}");
        for question in questions {
            println!("  - {question}");
        }
    }

    fn scroll_to_latest(&mut self) {}

    fn clear(&mut self) {
        println!("--- conversation cleared ---");
        self.printed.clear();
    }
}

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    dotenvy::dotenv().ok();
    logging::init();

    let config = ChatConfig::from_env();
    let transport = HttpTransport::new(config.endpoint.clone());
    let store = FileStore::default_location()?;
    let mut session = ChatSession::new(config, transport, store, TerminalSurface::default())?;
    session.init();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "/quit" | "/exit" => break,
            "/clear" => {
                let locale = lang::conversation_locale(session.transcript());
                print!("{} [y/N] ", lang::clear_confirm(locale));
                let _ = std::io::stdout().flush();
                if let Some(answer) = lines.next_line().await? {
                    if answer.trim().eq_ignore_ascii_case("y") {
                        session.clear()?;
                    }
                }
            }
            input => {
                let outcome = session.send(input).await;
                tracing::debug!(?outcome, "Turn settled");
            }
        }
    }
    Ok(())
}
