//! Connection table for the UDP transport.
//!
//! This module tracks which socket address belongs to which participant id:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Intent sequence filtering so duplicated or reordered datagrams apply once
//! - Ping nonces and round-trip measurement
//!
//! Lobby capacity is not enforced here; the session's roster decides who may
//! join and the transport drops connections it rejects.

use log::info;
use shared::ParticipantId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected peer and its transport bookkeeping.
#[derive(Debug)]
pub struct Client {
    /// Participant id assigned on connect
    pub id: ParticipantId,
    /// Address responses are sent to
    pub addr: SocketAddr,
    /// Last time any packet arrived from this peer
    pub last_seen: Instant,
    /// Highest intent sequence accepted so far
    pub last_intent_sequence: u32,
    /// Ping awaiting its pong
    pub outstanding_ping: Option<(u64, Instant)>,
    /// Set once the session has admitted the participant
    pub admitted: bool,
}

impl Client {
    pub fn new(id: ParticipantId, addr: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            addr,
            last_seen: now,
            last_intent_sequence: 0,
            outstanding_ping: None,
            admitted: false,
        }
    }

    /// Accepts an intent only if its sequence is newer than the last one.
    pub fn accept_intent(&mut self, sequence: u32) -> bool {
        if sequence <= self.last_intent_sequence {
            return false;
        }
        self.last_intent_sequence = sequence;
        true
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

pub struct ClientManager {
    clients: HashMap<ParticipantId, Client>,
    /// Ids start at 1 and are never reused within a process
    next_client_id: ParticipantId,
    next_nonce: u64,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            next_nonce: 1,
            timeout,
        }
    }

    /// Registers a connection and returns its participant id.
    pub fn add_client(&mut self, addr: SocketAddr, now: Instant) -> ParticipantId {
        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, now));
        client_id
    }

    pub fn remove_client(&mut self, client_id: &ParticipantId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ParticipantId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: ParticipantId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Marks a client as admitted and returns its address.
    pub fn admit(&mut self, client_id: ParticipantId) -> Option<SocketAddr> {
        let client = self.clients.get_mut(&client_id)?;
        client.admitted = true;
        Some(client.addr)
    }

    /// Records activity from a peer.
    pub fn touch(&mut self, client_id: ParticipantId, now: Instant) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = now;
        }
    }

    /// Returns false for unknown peers and stale or duplicate sequences.
    pub fn accept_intent(&mut self, client_id: ParticipantId, sequence: u32) -> bool {
        self.clients
            .get_mut(&client_id)
            .map_or(false, |client| client.accept_intent(sequence))
    }

    /// Starts a ping round for every client and returns what to send.
    ///
    /// A ping that never got its pong is simply replaced.
    pub fn begin_ping_round(&mut self, now: Instant) -> Vec<(SocketAddr, u64)> {
        let mut pings = Vec::with_capacity(self.clients.len());
        for client in self.clients.values_mut() {
            let nonce = self.next_nonce;
            self.next_nonce += 1;
            client.outstanding_ping = Some((nonce, now));
            pings.push((client.addr, nonce));
        }
        pings
    }

    /// Matches a pong to its ping and returns the round trip in milliseconds.
    pub fn complete_ping(
        &mut self,
        client_id: ParticipantId,
        nonce: u64,
        now: Instant,
    ) -> Option<u32> {
        let client = self.clients.get_mut(&client_id)?;
        match client.outstanding_ping {
            Some((expected, sent_at)) if expected == nonce => {
                client.outstanding_ping = None;
                let millis = now.saturating_duration_since(sent_at).as_millis();
                Some(millis.min(u32::MAX as u128) as u32)
            }
            _ => None,
        }
    }

    /// Removes and returns every client silent for longer than the timeout.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<ParticipantId> {
        let timeout = self.timeout;
        let timed_out: Vec<ParticipantId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout, now))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    /// Addresses of admitted clients, the audience for broadcasts.
    pub fn get_client_addrs(&self) -> Vec<(ParticipantId, SocketAddr)> {
        self.clients
            .iter()
            .filter(|(_, client)| client.admitted)
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
