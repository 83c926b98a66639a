// Terminal front end: renders the session's view to stdout and feeds
// numbered choices from stdin back into the session.

use anyhow::{Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::conversation::{Event, Phase, Sender, ViewState, WELCOME_MESSAGE};
use crate::session::Session;

pub async fn run_chat(session: Session) -> Result<()> {
    info!(session = %session.id(), "Starting terminal chat session...");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    converse(session, stdin, &mut stdout).await
}

/// Prints every message after the first `printed` ones and returns the new count.
fn print_new_messages<W: Write>(view: &ViewState, out: &mut W, printed: usize) -> Result<usize> {
    for message in view.messages.iter().skip(printed) {
        let who = match message.sender {
            Sender::Bot => "Compass",
            Sender::User => "You",
        };
        writeln!(out, "[{}] {}: {}", message.timestamp, who, message.text)?;
    }
    Ok(view.messages.len())
}

/// Accepts either the option's number or its exact text.
fn parse_choice(input: &str, options: &[String]) -> Option<String> {
    let input = input.trim();
    if let Ok(n) = input.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| options.get(i)).cloned();
    }
    options.iter().find(|o| o.eq_ignore_ascii_case(input)).cloned()
}

pub async fn converse<R, W>(mut session: Session, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut printed = 0;

    writeln!(out, "{}", WELCOME_MESSAGE)?;
    session.dispatch(Event::Start)?;

    loop {
        while session.is_busy() {
            if session.conversation().is_loading_ai_response() {
                writeln!(out, "(Compass is asking the AI advisor...)")?;
            } else {
                writeln!(out, "(Compass is typing...)")?;
            }
            out.flush()?;
            if let Err(e) = session.next_internal().await {
                debug!(error = %e, "Ignoring stale internal event");
            }
            printed = print_new_messages(&session.view(), out, printed)?;
        }

        let view = session.view();
        match view.phase {
            Phase::AwaitingAnswer(_) => {
                for (i, option) in view.options.iter().enumerate() {
                    writeln!(out, "  {}) {}", i + 1, option)?;
                }
                write!(out, "> ")?;
                out.flush()?;
                let Some(line) = lines.next_line().await.context("Failed to read answer")? else {
                    break;
                };
                match parse_choice(&line, &view.options) {
                    Some(option) => session.dispatch(Event::AnswerSelected(option))?,
                    None => writeln!(out, "Please choose a number between 1 and {}.", view.options.len())?,
                }
                printed = print_new_messages(&session.view(), out, printed)?;
            }
            Phase::Finished => {
                write!(out, "Get personalised AI advice? [y/N] ")?;
                out.flush()?;
                let line = lines
                    .next_line()
                    .await
                    .context("Failed to read advice choice")?
                    .unwrap_or_default();
                if matches!(line.trim().to_lowercase().as_str(), "y" | "yes") {
                    session.dispatch(Event::AdviceRequested)?;
                } else {
                    break;
                }
            }
            _ => break,
        }
    }

    writeln!(out, "Goodbye!")?;
    session.teardown();
    Ok(())
}
