//! Server network layer: UDP transport around one [`Session`].
//!
//! Receive, send, timeout checking and ping sampling run as tokio tasks. They
//! hand packets and events to the main loop over channels; the loop turns
//! them into [`SessionCommand`]s, runs one session tick per frame and sends
//! whatever the session committed, in commit order.

use crate::client_manager::ClientManager;
use crate::config::SessionConfig;
use crate::session::{Session, SessionCommand, SessionNotice};
use crate::world::World;
use log::{debug, error, info, warn};
use shared::{Broadcast, EndReason, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// How long the server keeps running after the final standings were queued.
const END_LINGER: Duration = Duration::from_millis(250);
const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { packet: Packet },
}

/// Main server coordinating networking and the session
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    session: Session,
    tick_duration: Duration,
    pending: Vec<SessionCommand>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    broadcast_rx: mpsc::UnboundedReceiver<Broadcast>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        client_timeout: Duration,
        config: SessionConfig,
        world: Box<dyn World>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();

        let mut session = Session::new(config, world, broadcast_tx)?;
        session.attach_ticker(command_tx);

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(client_timeout))),
            session,
            tick_duration,
            pending: Vec::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
            command_rx,
            broadcast_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(_) => warn!("Failed to deserialize packet from {}", addr),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(Instant::now())
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    /// Spawns task that pings every client once per second
    fn spawn_pinger(&self) {
        let clients = Arc::clone(&self.clients);
        let game_tx = self.game_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_INTERVAL);

            loop {
                interval.tick().await;

                let pings = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.begin_ping_round(Instant::now())
                };

                for (addr, nonce) in pings {
                    let packet = Packet::Ping { nonce };
                    if game_tx.send(GameMessage::SendPacket { packet, addr }).is_err() {
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = packet.encode()?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { packet }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Turns an incoming packet into session commands
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let now = Instant::now();
        let known_client = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };
        if let Some(client_id) = known_client {
            self.clients.write().await.touch(client_id, now);
        }

        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let reason = format!(
                        "protocol version {} required, got {}",
                        PROTOCOL_VERSION, client_version
                    );
                    self.send_packet(Packet::Rejected { reason }, addr);
                    return;
                }

                // A reconnect from the same address replaces the old connection
                if let Some(existing_id) = known_client {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.clients.write().await.remove_client(&existing_id);
                    self.pending.push(SessionCommand::Leave(existing_id));
                }

                let client_id = self.clients.write().await.add_client(addr, now);
                self.pending.push(SessionCommand::Join(client_id));
            }

            Packet::Intent { sequence, intent } => {
                let client_id = match known_client {
                    Some(client_id) => client_id,
                    None => {
                        debug!("Intent from unknown address {}", addr);
                        return;
                    }
                };
                let accepted = self.clients.write().await.accept_intent(client_id, sequence);
                if accepted {
                    self.pending.push(SessionCommand::Intent {
                        participant_id: client_id,
                        intent,
                    });
                } else {
                    debug!(
                        "Dropping stale intent {} from client {}",
                        sequence, client_id
                    );
                }
            }

            Packet::Pong { nonce } => {
                if let Some(client_id) = known_client {
                    let sample = self
                        .clients
                        .write()
                        .await
                        .complete_ping(client_id, nonce, now);
                    if let Some(ping_ms) = sample {
                        self.pending.push(SessionCommand::PingSample {
                            participant_id: client_id,
                            ping_ms,
                        });
                    }
                }
            }

            Packet::Disconnect => {
                if let Some(client_id) = known_client {
                    self.clients.write().await.remove_client(&client_id);
                    self.pending.push(SessionCommand::Leave(client_id));
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Sends every committed change, oldest first
    fn flush_broadcasts(&mut self) {
        while let Ok(broadcast) = self.broadcast_rx.try_recv() {
            self.broadcast_packet(Packet::Broadcast(broadcast));
        }
    }

    async fn handle_notices(&mut self, notices: Vec<SessionNotice>) {
        for notice in notices {
            match notice {
                SessionNotice::Admitted(participant) => {
                    let addr = self.clients.write().await.admit(participant.id);
                    match addr {
                        Some(addr) => {
                            self.send_packet(
                                Packet::Connected {
                                    participant_id: participant.id,
                                },
                                addr,
                            );
                            for broadcast in self.session.replay() {
                                self.send_packet(Packet::Broadcast(broadcast), addr);
                            }
                        }
                        None => debug!("{} left before admission", participant.name),
                    }
                }
                SessionNotice::Rejected {
                    participant_id,
                    error,
                } => {
                    let addr = {
                        let mut clients = self.clients.write().await;
                        let addr = clients.get(participant_id).map(|client| client.addr);
                        clients.remove_client(&participant_id);
                        addr
                    };
                    if let Some(addr) = addr {
                        self.send_packet(
                            Packet::Rejected {
                                reason: error.to_string(),
                            },
                            addr,
                        );
                    }
                }
            }
        }
    }

    async fn finish(&mut self, reason: EndReason) {
        let farewell = Packet::Disconnected {
            reason: format!("match ended: {:?}", reason),
        };
        self.broadcast_packet(farewell);
        tokio::time::sleep(END_LINGER).await;
    }

    /// Main server loop. Returns once the match has ended.
    pub async fn run(&mut self) -> Result<EndReason, Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();
        self.spawn_pinger();

        let mut tick_interval = interval(self.tick_duration);
        let mut frames: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.pending.push(SessionCommand::Leave(client_id));
                        },
                        None => return Err("server message channel closed".into()),
                    }
                },

                // Countdown ticks
                Some(command) = self.command_rx.recv() => {
                    self.pending.push(command);
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let commands = std::mem::take(&mut self.pending);
                    let notices = self.session.tick(Instant::now(), commands);
                    self.flush_broadcasts();
                    self.handle_notices(notices).await;
                    frames += 1;

                    if let Some(reason) = self.session.end_reason() {
                        self.finish(reason).await;
                        return Ok(reason);
                    }

                    if frames % 300 == 0 {
                        let client_count = self.clients.read().await.len();
                        debug!(
                            "Frame {}: {} clients, phase {:?}",
                            frames,
                            client_count,
                            self.session.phase()
                        );
                    }
                },
            }
        }
    }
}
