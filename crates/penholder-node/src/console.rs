//! Line-oriented command surface.

use std::fmt;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

/// One console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Hand write access to a member.
    Give(String),
    /// Ask the editor for write access.
    Request,
    /// Take write access without consent.
    Force,
    /// Accept an access request (the first pending one if no name is given).
    Accept(Option<String>),
    /// Decline an access request (the first pending one if no name is given).
    Decline(Option<String>),
    /// Leave the session.
    Leave,
    /// End the session (host only).
    End,
    /// Show members and the editor.
    Who,
    /// Simulate a local edit to a document.
    Edit(String),
    /// Simulate saving a document.
    Save(String),
    /// Show available commands.
    Help,
    /// Exit without leaving gracefully.
    Quit,
}

/// A line that is not a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

/// Usage text for `help`.
pub const HELP: &str = "\
commands:
  give <user>      hand write access to <user>
  request          ask the editor for write access
  force            take write access without asking
  accept [user]    accept an access request
  decline [user]   decline an access request
  leave            leave the session
  end              end the session (host only)
  who              show members and the editor
  edit <doc>       make a local change to <doc>
  save <doc>       save <doc>
  quit             exit";

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let arg = words.next().map(str::to_owned);

        if words.next().is_some() {
            return Err(ParseError(format!("too many arguments to `{verb}`")));
        }

        let required = |arg: Option<String>, what: &str| {
            arg.ok_or_else(|| ParseError(format!("`{verb}` needs a {what}")))
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "give" => Self::Give(required(arg, "username")?),
            "request" => Self::Request,
            "force" | "take" => Self::Force,
            "accept" => Self::Accept(arg),
            "decline" => Self::Decline(arg),
            "leave" => Self::Leave,
            "end" => Self::End,
            "who" => Self::Who,
            "edit" => Self::Edit(required(arg, "document")?),
            "save" => Self::Save(required(arg, "document")?),
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(ParseError(format!("unknown command `{other}`, try `help`"))),
        };

        Ok(Some(command))
    }
}

/// Parse `line` and route it: commands to `commands`, complaints about
/// unparseable input straight to `output`.
///
/// Returns false once the command receiver is gone.
pub fn dispatch_line(
    line: &str,
    commands: &mpsc::UnboundedSender<Command>,
    output: &mpsc::UnboundedSender<String>,
) -> bool {
    match Command::parse(line) {
        Ok(Some(command)) => commands.send(command).is_ok(),
        Ok(None) => true,
        Err(error) => {
            let _ = output.send(error.to_string());
            true
        },
    }
}

/// Read stdin on a dedicated thread until it closes.
///
/// A blocking read cannot be cancelled, so the thread is detached rather
/// than run on the async runtime, where it would hold up shutdown. It holds
/// `output` weakly so the printer can finish while a read is pending.
pub fn spawn_stdin_reader(
    commands: mpsc::UnboundedSender<Command>,
    output: mpsc::WeakUnboundedSender<String>,
) -> std::io::Result<()> {
    std::thread::Builder::new().name("penholder-stdin".into()).spawn(move || {
        for line in std::io::stdin().lines() {
            let line = match line {
                Ok(line) => line,
                Err(error) => {
                    tracing::warn!(%error, "console read failed");
                    return;
                },
            };
            let Some(output) = output.upgrade() else {
                return;
            };
            if !dispatch_line(&line, &commands, &output) {
                return;
            }
        }
    })?;
    Ok(())
}

/// Write every line from `lines` to `out`.
pub async fn write_lines<W>(mut lines: mpsc::UnboundedReceiver<String>, mut out: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = lines.recv().await {
        line.push('\n');
        if out.write_all(line.as_bytes()).await.is_err() || out.flush().await.is_err() {
            return;
        }
    }
}
