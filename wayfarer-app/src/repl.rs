//! Terminal chat loop over a persistent session.

use crate::bootstrap::Bootstrap;
use anyhow::Result;
use std::io::{self, Write};
use tracing::warn;
use wayfarer_runtime::{flows, ChatSession, TranscriptEntry};

/// A line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Help,
    Reset,
    Status,
    Providers,
    Model { provider: String, model: String },
    Summarize(String),
    Message(String),
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let command = match head {
            "exit" | "quit" | "/exit" | "/quit" => Self::Exit,
            "help" | "/help" => Self::Help,
            "/reset" | "/new" => Self::Reset,
            "/status" => Self::Status,
            "/providers" => Self::Providers,
            "/model" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
                [provider, model] => Self::Model {
                    provider: provider.to_string(),
                    model: model.to_string(),
                },
                _ => Self::Invalid("usage: /model <provider> <model>".to_string()),
            },
            "/summarize" if rest.is_empty() => {
                Self::Invalid("usage: /summarize <text>".to_string())
            }
            "/summarize" => Self::Summarize(rest.to_string()),
            cmd if cmd.starts_with('/') => Self::Invalid(format!("unknown command {}", cmd)),
            _ => Self::Message(line.to_string()),
        };
        Some(command)
    }
}

pub struct Repl {
    boot: Bootstrap,
    session: ChatSession,
}

impl Repl {
    pub fn new(boot: Bootstrap) -> Result<Self> {
        let session = boot.session()?;
        Ok(Self { boot, session })
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("Wayfarer travel assistant");
        println!("Model: {}", self.session.config().model_ref());
        println!("Type 'help' for commands, 'exit' to quit.");
        println!();

        loop {
            print!("you> ");
            io::stdout().flush()?;

            let mut input = String::new();
            if io::stdin().read_line(&mut input)? == 0 {
                break;
            }
            let Some(command) = Command::parse(&input) else {
                continue;
            };
            if command == Command::Exit {
                println!("Goodbye!");
                break;
            }
            self.handle(command).await?;
        }
        Ok(())
    }

    /// Execute one non-exit command. Turn failures are shown, not returned.
    pub async fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Exit => {}
            Command::Help => print_help(),
            Command::Reset => {
                self.session.reset();
                println!("Started a new conversation ({})", self.session.thread_id());
            }
            Command::Status => {
                println!("Thread: {}", self.session.thread_id());
                println!("Model: {}", self.session.config().model_ref());
                println!("Flow: {}", self.boot.flow);
                println!("Messages: {}", self.session.state().len());
            }
            Command::Providers => {
                for key in self.boot.app.provider_keys() {
                    if let Some(provider) = self.boot.app.provider(&key) {
                        println!("{}: {}", key, provider.model.join(", "));
                    }
                }
            }
            Command::Model { provider, model } => match self.boot.select(&provider, &model) {
                Ok(config) => {
                    self.session.reconfigure(config);
                    println!("Now using {}", self.session.config().model_ref());
                }
                Err(e) => println!("Error: {:#}", e),
            },
            Command::Summarize(text) => {
                let handle = self.boot.model_handle()?;
                let instruction = self.boot.summarizer_instruction().to_string();
                match flows::summarize_text(&handle, &instruction, &text).await {
                    Ok(summary) => println!("Summary: {}", summary),
                    Err(e) => println!("Error: {}", e),
                }
            }
            Command::Message(text) => {
                if let Err(e) = self.session.submit(&text, render).await {
                    warn!(thread_id = %self.session.thread_id(), error = %e, "turn failed");
                }
            }
            Command::Invalid(reason) => println!("{}", reason),
        }
        Ok(())
    }
}

fn render(entry: &TranscriptEntry) {
    match entry {
        TranscriptEntry::User { .. } => {}
        TranscriptEntry::Assistant { text } => println!("assistant> {}", text),
        TranscriptEntry::Failed { retryable: true, .. } => {
            println!("{}", entry);
            println!("(temporary failure, send the message again to retry)");
        }
        other => println!("{}", other),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  exit, quit                 Leave the chat");
    println!("  /reset                     Start a new conversation");
    println!("  /status                    Show thread and model");
    println!("  /providers                 List configured providers and models");
    println!("  /model <provider> <model>  Switch model, keeping the conversation");
    println!("  /summarize <text>          Summarize text with the current model");
    println!("Anything else is sent to the assistant.");
}
