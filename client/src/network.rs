use crate::input::{parse_line, Command, InputManager, HELP};
use crate::mirror::ObserverState;
use crate::presentation::Presenter;
use log::{debug, error, info, warn};
use shared::{
    EndReason, Intent, Packet, ParticipantClass, ParticipantId, StatisticsRow, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};

/// How a client run finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOutcome {
    Finished {
        reason: EndReason,
        standings: Vec<StatisticsRow>,
    },
    Rejected(String),
    Disconnected(String),
    Quit,
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    participant_id: Option<ParticipantId>,
    connected: bool,

    observer: ObserverState,
    presenter: Box<dyn Presenter + Send>,
    input_manager: InputManager,

    fake_ping_ms: u64,
    requested_name: Option<String>,
    requested_class: Option<ParticipantClass>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        presenter: Box<dyn Presenter + Send>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let bind = if server_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;

        Ok(Client {
            socket,
            server_addr,
            participant_id: None,
            connected: false,
            observer: ObserverState::new(),
            presenter,
            input_manager: InputManager::new(),
            fake_ping_ms,
            requested_name: None,
            requested_class: None,
        })
    }

    /// Name and class to request as soon as the server admits us.
    pub fn with_profile(mut self, name: Option<String>, class: Option<ParticipantClass>) -> Self {
        self.requested_name = name;
        self.requested_class = class;
        self
    }

    pub fn participant_id(&self) -> Option<ParticipantId> {
        self.participant_id
    }

    pub fn observer(&self) -> &ObserverState {
        &self.observer
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = packet.encode()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn send_intent(&mut self, intent: Intent) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            debug!("Not connected yet, dropping {:?}", intent);
            return Ok(());
        }
        let packet = self.input_manager.packet_for(intent);
        self.send_packet(&packet).await
    }

    /// Handles one server packet; returns an outcome when the run is over.
    async fn handle_packet(
        &mut self,
        packet: Packet,
    ) -> Result<Option<ClientOutcome>, Box<dyn std::error::Error>> {
        match packet {
            Packet::Connected { participant_id } => {
                if self.participant_id == Some(participant_id) {
                    return Ok(None);
                }
                // A retried Connect makes the server re-admit us under a new id
                if let Some(previous) = self.participant_id {
                    warn!("Re-admitted as {} (was {})", participant_id, previous);
                } else {
                    info!("Connected! Participant ID: {}", participant_id);
                }
                self.participant_id = Some(participant_id);
                self.connected = true;
                self.presenter.set_local_participant(participant_id);

                if let Some(name) = self.requested_name.clone() {
                    self.send_intent(Intent::Rename(name)).await?;
                }
                if let Some(class) = self.requested_class {
                    self.send_intent(Intent::SetClass(class)).await?;
                }
            }

            Packet::Rejected { reason } => {
                warn!("Rejected by server: {}", reason);
                return Ok(Some(ClientOutcome::Rejected(reason)));
            }

            Packet::Ping { nonce } => {
                self.send_packet(&Packet::Pong { nonce }).await?;
            }

            Packet::Broadcast(broadcast) => {
                match self.observer.apply(broadcast) {
                    Ok(true) => {}
                    Ok(false) => debug!("Skipped stale or held-back update"),
                    Err(e) => error!("Mirror refused update: {}", e),
                }
                self.observer.present(self.presenter.as_mut());
            }

            Packet::Disconnected { reason } => {
                info!("Disconnected: {}", reason);
                self.connected = false;
                let outcome = match self.observer.outcome() {
                    Some((reason, standings)) => ClientOutcome::Finished {
                        reason: *reason,
                        standings: standings.clone(),
                    },
                    None => ClientOutcome::Disconnected(reason),
                };
                return Ok(Some(outcome));
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
        Ok(None)
    }

    async fn handle_line(&mut self, line: &str) -> Result<bool, Box<dyn std::error::Error>> {
        match parse_line(line) {
            Ok(Command::Send(intent)) => self.send_intent(intent).await?,
            Ok(Command::Help) => println!("{}", HELP),
            Ok(Command::Quit) => return Ok(false),
            Ok(Command::Nothing) => {}
            Err(e) => println!("{}", e),
        }
        Ok(true)
    }

    /// Connects and mirrors the session until the match ends, the server
    /// drops us or a `quit` line arrives on `lines`.
    pub async fn run(
        &mut self,
        mut lines: mpsc::UnboundedReceiver<String>,
    ) -> Result<ClientOutcome, Box<dyn std::error::Error>> {
        info!("Connecting to server at {}...", self.server_addr);

        let mut connect_interval = interval(Duration::from_secs(1));
        let mut buffer = [0u8; 8192];
        let mut console_open = true;

        let outcome = loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match Packet::decode(&buffer[..len]) {
                                Ok(packet) => {
                                    if let Some(outcome) = self.handle_packet(packet).await? {
                                        break outcome;
                                    }
                                }
                                Err(_) => warn!("Failed to deserialize packet from server"),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                line = lines.recv(), if console_open => {
                    match line {
                        Some(line) => {
                            if !self.handle_line(&line).await? {
                                break ClientOutcome::Quit;
                            }
                        }
                        None => console_open = false,
                    }
                },

                // UDP may drop the handshake, keep asking until answered
                _ = connect_interval.tick(), if !self.connected => {
                    let packet = Packet::Connect { client_version: PROTOCOL_VERSION };
                    self.send_packet(&packet).await?;
                },
            }
        };

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::ConsolePresenter;

    #[tokio::test]
    async fn test_client_rejects_bad_address() {
        let result = Client::new("not an address", 0, Box::new(ConsolePresenter::new())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_quit_line_ends_run() {
        // Nothing listens here; the run must still end on quit
        let mut client = Client::new("127.0.0.1:9", 0, Box::new(ConsolePresenter::new()))
            .await
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("quit".to_string()).unwrap();

        let outcome = tokio_test::assert_ok!(client.run(rx).await);
        assert_eq!(outcome, ClientOutcome::Quit);
        assert_eq!(client.participant_id(), None);
    }

    #[tokio::test]
    async fn test_newer_connected_replaces_participant_id() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap().to_string();
        let mut client = Client::new(&server_addr, 0, Box::new(ConsolePresenter::new()))
            .await
            .unwrap();
        let (_lines, rx) = mpsc::unbounded_channel();

        let fake_server = async {
            let mut buf = [0u8; 1024];
            let (len, addr) = server.recv_from(&mut buf).await.unwrap();
            assert!(matches!(
                Packet::decode(&buf[..len]).unwrap(),
                Packet::Connect { .. }
            ));
            for packet in [
                Packet::Connected { participant_id: 1 },
                Packet::Connected { participant_id: 2 },
                Packet::Disconnected {
                    reason: "closing".to_string(),
                },
            ] {
                server.send_to(&packet.encode().unwrap(), addr).await.unwrap();
            }
        };

        let (outcome, _) = tokio::join!(client.run(rx), fake_server);
        assert_eq!(
            tokio_test::assert_ok!(outcome),
            ClientOutcome::Disconnected("closing".to_string())
        );
        assert_eq!(client.participant_id(), Some(2));
    }
}
