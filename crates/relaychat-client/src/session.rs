//! The ready-state client loop.
//!
//! Two input sources are multiplexed: lines typed at the prompt and PDUs
//! arriving from the server. A dedicated task drains the socket and feeds
//! complete payloads through a channel, which keeps the `select!` below
//! cancel-safe: a half-read PDU can never be torn by a keystroke.
//!
//! A roster reply is assembled by reading from the channel directly: the
//! count header tells the client exactly how many entry PDUs to consume
//! before the terminator.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use relaychat_core::protocol::{recv_pdu, send_pdu};
use relaychat_core::{Error, Handle, Message, MAX_PAYLOAD_LEN};

use crate::commands::{self, Command};

const PROMPT: &str = "$: ";

/// A registered connection to the server plus the local handle.
pub struct Session {
    handle: Handle,
    writer: tokio::net::tcp::OwnedWriteHalf,
    inbound: mpsc::Receiver<Vec<u8>>,
}

impl Session {
    /// Take over a stream that has completed the registration handshake.
    pub fn new(handle: Handle, stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        let (tx, inbound) = mpsc::channel(64);
        tokio::spawn(pump_inbound(reader, tx));
        Self {
            handle,
            writer,
            inbound,
        }
    }

    /// Run until stdin closes or the server goes away. Both are orderly
    /// endings; the caller exits 0.
    pub async fn run(mut self) -> Result<()> {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        prompt();

        loop {
            tokio::select! {
                line = stdin.next_line() => {
                    let Some(line) = line? else {
                        return Ok(());
                    };
                    if !line.trim().is_empty() {
                        match self.handle_line(&line).await {
                            Ok(()) => {}
                            Err(Error::PayloadTooLarge(_)) => {
                                println!("Message too long");
                            }
                            Err(_) => {
                                println!("\nServer Terminated");
                                return Ok(());
                            }
                        }
                    }
                    prompt();
                }
                payload = self.inbound.recv() => {
                    let Some(payload) = payload else {
                        println!("\nServer Terminated");
                        return Ok(());
                    };
                    self.handle_inbound(&payload).await;
                    prompt();
                }
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> relaychat_core::Result<()> {
        match commands::parse(line) {
            Ok(Command::Unicast { dest, text }) => {
                self.send(Message::Unicast {
                    sender: self.handle.clone(),
                    dests: vec![dest],
                    text,
                })
                .await?;
            }
            Ok(Command::Broadcast { text }) => {
                self.send(Message::Broadcast {
                    sender: self.handle.clone(),
                    text,
                })
                .await?;
            }
            Ok(Command::Multicast { dests, text }) => {
                self.send(Message::Multicast {
                    sender: self.handle.clone(),
                    dests,
                    text,
                })
                .await?;
            }
            Ok(Command::List) => self.send(Message::ListRequest).await?,
            Ok(Command::Help) => println!("{}", commands::help_text()),
            Err(err) => println!("{err}"),
        }
        Ok(())
    }

    async fn send(&mut self, message: Message) -> relaychat_core::Result<()> {
        send_pdu(&mut self.writer, &message.encode()).await
    }

    async fn handle_inbound(&mut self, payload: &[u8]) {
        match Message::decode(payload) {
            Ok(Message::ListCount { count }) => {
                println!("\nNumber of clients: {count}");
                for name in collect_roster(&mut self.inbound, count).await {
                    println!("{name}");
                }
            }
            Ok(message) => match render(&message) {
                Some(line) => println!("{line}"),
                None => debug!(
                    flag = message.flag().to_byte(),
                    "ignoring unexpected PDU"
                ),
            },
            Err(err) => debug!(error = %err, "dropping malformed PDU"),
        }
    }
}

/// Drain the socket, forwarding each complete payload. Ends when the
/// server closes, the transport fails, or the session is dropped; the
/// closed channel is the session's end-of-stream signal.
async fn pump_inbound(mut reader: OwnedReadHalf, tx: mpsc::Sender<Vec<u8>>) {
    loop {
        match recv_pdu(&mut reader, MAX_PAYLOAD_LEN).await {
            Ok(Some(payload)) => {
                if tx.send(payload).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                debug!(error = %err, "socket receive failed");
                return;
            }
        }
    }
}

/// Consume one roster reply: exactly `count` PDUs, then the terminator.
/// Entry handles come back in reply order; PDUs that are not roster
/// entries are skipped but still counted, matching the lenient reading of
/// the reply sequence. A channel that closes mid-reply ends the roster
/// early; the caller's main loop then reports the dead server.
async fn collect_roster(inbound: &mut mpsc::Receiver<Vec<u8>>, count: u32) -> Vec<String> {
    let mut names = Vec::new();
    for _ in 0..count {
        let Some(payload) = inbound.recv().await else {
            return names;
        };
        match Message::decode(&payload) {
            Ok(Message::ListHandle { handle }) => names.push(handle.as_str().to_owned()),
            Ok(other) => debug!(
                flag = other.flag().to_byte(),
                "skipping unexpected PDU inside a roster reply"
            ),
            Err(err) => debug!(error = %err, "skipping malformed PDU inside a roster reply"),
        }
    }
    if let Some(payload) = inbound.recv().await {
        if !matches!(Message::decode(&payload), Ok(Message::ListDone)) {
            debug!("roster reply did not end with a terminator");
        }
    }
    names
}

/// What an inbound message looks like on the terminal, if it prints at
/// all. Relayed messages lead with a newline to break off the prompt.
fn render(message: &Message) -> Option<String> {
    match message {
        Message::Broadcast { sender, text }
        | Message::Unicast { sender, text, .. }
        | Message::Multicast { sender, text, .. } => Some(format!("\n{sender}: {text}")),
        Message::UnknownDest { handle } => {
            Some(format!("\nClient with handle {handle} does not exist."))
        }
        _ => None,
    }
}

fn prompt() {
    print!("{PROMPT}");
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> Handle {
        Handle::new(name).expect("valid handle")
    }

    #[test]
    fn renders_relayed_messages_as_sender_and_text() {
        let msg = Message::Broadcast {
            sender: handle("alice"),
            text: "hello".into(),
        };
        assert_eq!(render(&msg).as_deref(), Some("\nalice: hello"));

        let msg = Message::Unicast {
            sender: handle("bob"),
            dests: vec![handle("alice")],
            text: "hi".into(),
        };
        assert_eq!(render(&msg).as_deref(), Some("\nbob: hi"));

        let msg = Message::Multicast {
            sender: handle("carol"),
            dests: vec![handle("alice"), handle("bob")],
            text: String::new(),
        };
        assert_eq!(render(&msg).as_deref(), Some("\ncarol: "));
    }

    #[test]
    fn renders_unknown_destination_notice() {
        let msg = Message::UnknownDest {
            handle: handle("carol"),
        };
        assert_eq!(
            render(&msg).as_deref(),
            Some("\nClient with handle carol does not exist.")
        );
    }

    #[test]
    fn reply_flags_do_not_render() {
        assert_eq!(render(&Message::RegisterAck), None);
        assert_eq!(render(&Message::ListDone), None);
    }

    #[tokio::test]
    async fn roster_assembly_reads_count_entries_and_terminator() {
        let (tx, mut rx) = mpsc::channel(8);
        for name in ["alice", "bob", "carol"] {
            tx.send(
                Message::ListHandle {
                    handle: handle(name),
                }
                .encode(),
            )
            .await
            .expect("send");
        }
        tx.send(Message::ListDone.encode()).await.expect("send");

        let names = collect_roster(&mut rx, 3).await;
        assert_eq!(names, ["alice", "bob", "carol"]);
        // The terminator was consumed too.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn roster_assembly_skips_foreign_pdus_but_counts_them() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(
            Message::ListHandle {
                handle: handle("alice"),
            }
            .encode(),
        )
        .await
        .expect("send");
        tx.send(Message::RegisterAck.encode()).await.expect("send");
        tx.send(Message::ListDone.encode()).await.expect("send");

        let names = collect_roster(&mut rx, 2).await;
        assert_eq!(names, ["alice"]);
    }

    #[tokio::test]
    async fn roster_assembly_survives_a_vanishing_server() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(
            Message::ListHandle {
                handle: handle("alice"),
            }
            .encode(),
        )
        .await
        .expect("send");
        drop(tx);

        let names = collect_roster(&mut rx, 5).await;
        assert_eq!(names, ["alice"]);
    }
}
