//! Line-oriented front end: parses what the user types and renders what the
//! network reports.

use std::fmt::Write as _;

use p2p::{BroadcastReport, NetworkEvent, PeerRecord};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Nick(String),
    Peers,
    Stop,
    Start,
    Quit,
    Say(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command /{0}, try /connect /nick /peers /stop /start /quit")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// `Ok(None)` for blank input.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Command::Say(line.to_string())));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let command = match name {
            "connect" if arg.is_empty() => return Err(CommandError::Usage("/connect ip:port")),
            "connect" => Command::Connect(arg.to_string()),
            "nick" if arg.is_empty() => return Err(CommandError::Usage("/nick NAME")),
            "nick" => Command::Nick(arg.to_string()),
            "peers" => Command::Peers,
            "stop" => Command::Stop,
            "start" => Command::Start,
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// Terminal input, one command or message per line.
pub fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

pub fn render_event(event: &NetworkEvent) -> String {
    match event {
        NetworkEvent::PeerJoined {
            nickname, address, ..
        } => format!("* {nickname} joined from {address}"),
        NetworkEvent::PeerLeft { nickname, .. } => format!("* {nickname} left"),
        NetworkEvent::NickChanged {
            old_nick, new_nick, ..
        } => format!("* {old_nick} is now known as {new_nick}"),
        NetworkEvent::MessageReceived { nickname, text, .. } => format!("<{nickname}> {text}"),
        NetworkEvent::Diagnostic(diag) => format!("! {diag}"),
    }
}

pub fn render_peers(peers: &[PeerRecord]) -> String {
    if peers.is_empty() {
        return "no known peers".to_string();
    }
    let mut out = format!("{} known peer(s):", peers.len());
    for record in peers {
        let _ = write!(
            out,
            "\n  {} {} @ {}",
            record.profile.id, record.profile.nickname, record.address
        );
    }
    out
}

/// `None` when every peer was reached.
pub fn render_failures(report: &BroadcastReport) -> Option<String> {
    if report.is_complete() {
        return None;
    }
    let mut out = format!(
        "delivered to {}/{} peer(s)",
        report.delivered.len(),
        report.attempted()
    );
    for failure in &report.failed {
        let _ = write!(out, "\n  {}: {}", failure.address, failure.error);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use p2p::{Diagnostic, DiagnosticKind, PeerId, PeerProfile};

    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("   "), Ok(None));
        assert_eq!(
            Command::parse("/connect 10.0.0.2:6886"),
            Ok(Some(Command::Connect("10.0.0.2:6886".into())))
        );
        assert_eq!(
            Command::parse("/nick  bob the builder "),
            Ok(Some(Command::Nick("bob the builder".into())))
        );
        assert_eq!(Command::parse("/peers"), Ok(Some(Command::Peers)));
        assert_eq!(Command::parse("/stop"), Ok(Some(Command::Stop)));
        assert_eq!(Command::parse("/start"), Ok(Some(Command::Start)));
        assert_eq!(Command::parse("/quit"), Ok(Some(Command::Quit)));
        assert_eq!(
            Command::parse("hello there"),
            Ok(Some(Command::Say("hello there".into())))
        );
    }

    #[test]
    fn rejects_bad_commands() {
        assert_eq!(
            Command::parse("/connect"),
            Err(CommandError::Usage("/connect ip:port"))
        );
        assert_eq!(Command::parse("/nick "), Err(CommandError::Usage("/nick NAME")));
        assert_eq!(
            Command::parse("/dance"),
            Err(CommandError::Unknown("dance".into()))
        );
    }

    #[test]
    fn renders_events() {
        let id = PeerId::random();
        let address: SocketAddr = "10.0.0.2:6886".parse().expect("addr");
        assert_eq!(
            render_event(&NetworkEvent::PeerJoined {
                id,
                nickname: "alice".into(),
                address,
            }),
            "* alice joined from 10.0.0.2:6886"
        );
        assert_eq!(
            render_event(&NetworkEvent::MessageReceived {
                id,
                nickname: "alice".into(),
                text: "hi".into(),
            }),
            "<alice> hi"
        );
        let diag = Diagnostic::new(DiagnosticKind::Send, "refused", Some(address));
        assert!(render_event(&NetworkEvent::Diagnostic(diag)).starts_with("! "));
    }

    #[test]
    fn renders_peer_list() {
        assert_eq!(render_peers(&[]), "no known peers");
        let record = PeerRecord {
            profile: PeerProfile::new(PeerId::random(), "bob", vec![1; 32]),
            address: "127.0.0.1:7000".parse().expect("addr"),
        };
        let rendered = render_peers(&[record]);
        assert!(rendered.starts_with("1 known peer(s):"));
        assert!(rendered.contains("bob @ 127.0.0.1:7000"));
    }

    #[tokio::test]
    async fn stdin_reader_is_available() {
        let lines = stdin_lines();
        drop(lines);
    }

    #[test]
    fn complete_report_renders_nothing() {
        assert_eq!(render_failures(&BroadcastReport::default()), None);
    }
}
