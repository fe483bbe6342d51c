//! Client for the deck's control protocol.
//!
//! A dedicated worker thread owns the TCP connection and multiplexes three
//! concerns over it: requests from [`DeckClient`] handles, the periodic
//! slot/transport status poll, and inbound line parsing. The protocol is
//! strictly request/response with a single outstanding command, so the
//! worker admits the next command only once the previous response has
//! fully resolved; replies are matched to commands purely by arrival
//! order.
//!
//! Response completion is tracked by an explicit state machine
//! ([`Pending`]) so that an aborted or timed-out clip listing can never
//! bleed into a later, unrelated command.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};

use deck_offload_types::ClipRecord;
use deck_proto::{ClipEntry, DeckCommand, ResponseShape};

use crate::error::DeckError;
use crate::events::EventBus;
use crate::status::{ConnectionState, DeckStatus, StatusSnapshot};

/// Deadline for a framed clip-listing response.
const CLIP_LIST_TIMEOUT: Duration = Duration::from_secs(15);
/// Interval between slot/transport status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Socket read timeout; paces the worker loop.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Outcome of one command once its response resolved.
#[derive(Debug, Clone)]
pub enum CommandReply {
    /// Terminal numeric-status line.
    Status { code: u16, text: String },
    /// Detail lines of a framed clip listing, in arrival order.
    Clips(Vec<ClipEntry>),
}

type ReplySender = Sender<Result<CommandReply, DeckError>>;

enum Request {
    Execute { command: DeckCommand, reply: ReplySender },
    StartPoll { slots: Vec<u8> },
    StopPoll,
    Disconnect,
}

/// Handle to the connection worker. Clones share the one connection, and
/// every command funnels through the worker's single in-flight slot.
#[derive(Clone, Debug)]
pub struct DeckClient {
    req_tx: Sender<Request>,
    status: Arc<Mutex<DeckStatus>>,
    events: EventBus,
}

impl DeckClient {
    /// Open the control connection and spawn the worker that owns it.
    ///
    /// `address` is a host, or `host:port` to override the control port.
    pub fn connect(address: &str, events: EventBus) -> Result<Self, DeckError> {
        Self::connect_inner(address, events, CLIP_LIST_TIMEOUT)
    }

    fn connect_inner(
        address: &str,
        events: EventBus,
        clip_list_timeout: Duration,
    ) -> Result<Self, DeckError> {
        let status = DeckStatus::shared();
        if let Ok(mut s) = status.lock() {
            s.state = ConnectionState::Connecting;
            s.address = Some(address.to_string());
        }

        let addr = control_addr(address);
        let stream = match TcpStream::connect(&addr) {
            Ok(stream) => stream,
            Err(e) => {
                if let Ok(mut s) = status.lock() {
                    s.state = ConnectionState::Disconnected;
                }
                return Err(DeckError::Connection(format!("connect {addr}: {e}")));
            }
        };
        stream.set_nodelay(true).ok();
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| DeckError::Connection(format!("set read timeout: {e}")))?;
        stream.set_write_timeout(Some(Duration::from_secs(2))).ok();

        if let Ok(mut s) = status.lock() {
            s.state = ConnectionState::Connected;
        }
        tracing::info!(address = %addr, "connected to deck");
        events.connected(address);

        let (req_tx, req_rx) = unbounded();
        let worker = Worker {
            stream,
            req_rx,
            status: status.clone(),
            events: events.clone(),
            buffer: String::new(),
            pending: Pending::Idle,
            queue: VecDeque::new(),
            poll: None,
            poll_queue: VecDeque::new(),
            clip_list_timeout,
        };
        std::thread::spawn(move || worker.run());

        Ok(Self {
            req_tx,
            status,
            events,
        })
    }

    /// Execute one command and wait for its terminal response.
    pub fn execute(&self, command: DeckCommand) -> Result<CommandReply, DeckError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.req_tx
            .send(Request::Execute {
                command,
                reply: reply_tx,
            })
            .map_err(|_| DeckError::Disconnected)?;
        reply_rx.recv().map_err(|_| DeckError::Disconnected)?
    }

    /// Fetch the clip listing of one slot, tagged with that slot.
    pub fn clip_list(&self, slot: u8) -> Result<Vec<ClipRecord>, DeckError> {
        if let CommandReply::Status { code, text } = self.execute(DeckCommand::SelectSlot(slot))? {
            if deck_proto::is_failure_code(code) {
                return Err(DeckError::Device { code, text });
            }
        }
        match self.execute(DeckCommand::ClipsGet)? {
            CommandReply::Clips(entries) => Ok(entries
                .into_iter()
                .map(|entry| ClipRecord {
                    id: entry.id,
                    name: entry.name,
                    start_timecode: entry.start_timecode,
                    duration: entry.duration,
                    slot,
                })
                .collect()),
            CommandReply::Status { code, text } => Err(DeckError::Device { code, text }),
        }
    }

    /// Fetch listings for several slots and publish the combined catalog.
    pub fn catalog(&self, slots: &[u8]) -> Result<Vec<ClipRecord>, DeckError> {
        let mut clips = Vec::new();
        for &slot in slots {
            clips.extend(self.clip_list(slot)?);
        }
        self.events.clip_catalog(clips.clone());
        Ok(clips)
    }

    /// Start the periodic slot/transport status poll.
    pub fn start_status_poll(&self, slots: &[u8]) {
        let _ = self.req_tx.send(Request::StartPoll {
            slots: slots.to_vec(),
        });
    }

    /// Stop the periodic status poll. Pending poll commands are dropped.
    pub fn stop_status_poll(&self) {
        let _ = self.req_tx.send(Request::StopPoll);
    }

    /// Tear down the connection. Safe to call more than once.
    pub fn disconnect(&self) {
        let _ = self.req_tx.send(Request::Disconnect);
    }

    pub fn state(&self) -> ConnectionState {
        self.status
            .lock()
            .map(|s| s.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn status_snapshot(&self) -> Option<StatusSnapshot> {
        self.status.lock().map(|s| s.snapshot()).ok()
    }
}

/// Append the default control port when the address has none.
fn control_addr(address: &str) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{}", deck_proto::CONTROL_PORT)
    }
}

/// Who is waiting for the in-flight command.
enum Origin {
    Caller(ReplySender),
    Poll,
}

/// Response-completion state of the single in-flight command.
enum Pending {
    Idle,
    SingleLine {
        origin: Origin,
    },
    FramedBlock {
        origin: Origin,
        expected: Option<usize>,
        collected: Vec<ClipEntry>,
        deadline: Instant,
    },
}

struct PollState {
    slots: Vec<u8>,
    last_tick: Option<Instant>,
}

struct Worker {
    stream: TcpStream,
    req_rx: Receiver<Request>,
    status: Arc<Mutex<DeckStatus>>,
    events: EventBus,
    buffer: String,
    pending: Pending,
    queue: VecDeque<(DeckCommand, ReplySender)>,
    poll: Option<PollState>,
    poll_queue: VecDeque<DeckCommand>,
    clip_list_timeout: Duration,
}

impl Worker {
    fn run(mut self) {
        loop {
            loop {
                match self.req_rx.try_recv() {
                    Ok(Request::Execute { command, reply }) => {
                        self.queue.push_back((command, reply));
                    }
                    Ok(Request::StartPoll { slots }) => {
                        self.poll = Some(PollState {
                            slots,
                            last_tick: None,
                        });
                    }
                    Ok(Request::StopPoll) => {
                        self.poll = None;
                        self.poll_queue.clear();
                    }
                    Ok(Request::Disconnect) => {
                        self.teardown(DeckError::Disconnected);
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.teardown(DeckError::Disconnected);
                        return;
                    }
                }
            }

            if matches!(self.pending, Pending::Idle) {
                if let Some((command, reply)) = self.queue.pop_front() {
                    if self.issue(command, Origin::Caller(reply)).is_err() {
                        self.events.error("deck connection lost while writing");
                        self.teardown(DeckError::Connection("write failed".into()));
                        return;
                    }
                } else {
                    self.refill_poll_queue();
                    if let Some(command) = self.poll_queue.pop_front() {
                        if self.issue(command, Origin::Poll).is_err() {
                            self.events.error("deck connection lost while polling");
                            self.teardown(DeckError::Connection("write failed".into()));
                            return;
                        }
                    }
                }
            }

            if let Pending::FramedBlock { deadline, .. } = &self.pending {
                if Instant::now() >= *deadline {
                    tracing::warn!("clip listing timed out; discarding partial response");
                    let stale = std::mem::replace(&mut self.pending, Pending::Idle);
                    if let Pending::FramedBlock { origin, .. } = stale {
                        self.fail_origin(origin, DeckError::ProtocolTimeout);
                    }
                }
            }

            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    tracing::warn!("deck closed the control connection");
                    self.events.error("deck closed the control connection");
                    self.teardown(DeckError::Connection("connection closed by deck".into()));
                    return;
                }
                Ok(n) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                    self.process_buffer();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                Err(e) => {
                    tracing::warn!(error = %e, "deck read error");
                    self.events.error(format!("deck read error: {e}"));
                    self.teardown(DeckError::Connection(format!("read: {e}")));
                    return;
                }
            }
        }
    }

    /// Queue a poll pass (one slot-info per slot, then transport-info)
    /// when the interval elapsed and the previous pass drained.
    fn refill_poll_queue(&mut self) {
        if !self.poll_queue.is_empty() {
            return;
        }
        let Some(poll) = self.poll.as_mut() else {
            return;
        };
        let due = poll
            .last_tick
            .map(|tick| tick.elapsed() >= POLL_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        poll.last_tick = Some(Instant::now());
        for &slot in &poll.slots {
            self.poll_queue.push_back(DeckCommand::SlotInfo(slot));
        }
        self.poll_queue.push_back(DeckCommand::TransportInfo);
    }

    fn issue(&mut self, command: DeckCommand, origin: Origin) -> Result<(), ()> {
        if !matches!(self.pending, Pending::Idle) {
            self.fail_origin(origin, DeckError::CommandInProgress);
            return Ok(());
        }

        let line = command.wire_line();
        tracing::debug!(command = %line, "sending command");
        let mut payload = line.into_bytes();
        payload.extend_from_slice(deck_proto::LINE_TERMINATOR.as_bytes());
        if let Err(e) = self.stream.write_all(&payload) {
            tracing::warn!(error = %e, "deck write error");
            self.fail_origin(origin, DeckError::Connection(format!("write: {e}")));
            return Err(());
        }

        self.pending = match command.response_shape() {
            ResponseShape::SingleLine => Pending::SingleLine { origin },
            ResponseShape::FramedBlock => Pending::FramedBlock {
                origin,
                expected: None,
                collected: Vec::new(),
                deadline: Instant::now() + self.clip_list_timeout,
            },
        };
        Ok(())
    }

    fn process_buffer(&mut self) {
        while let Some(idx) = self.buffer.find(deck_proto::LINE_TERMINATOR) {
            let line: String = self.buffer[..idx].to_string();
            self.buffer
                .drain(..idx + deck_proto::LINE_TERMINATOR.len());
            if line.is_empty() {
                continue;
            }
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &str) {
        match std::mem::replace(&mut self.pending, Pending::Idle) {
            Pending::Idle => self.handle_unsolicited(line),
            Pending::SingleLine { origin } => {
                if let Some(status) = deck_proto::parse_status_line(line) {
                    self.resolve(
                        origin,
                        CommandReply::Status {
                            code: status.code,
                            text: status.text,
                        },
                    );
                } else {
                    self.handle_unsolicited(line);
                    self.pending = Pending::SingleLine { origin };
                }
            }
            Pending::FramedBlock {
                origin,
                mut expected,
                mut collected,
                deadline,
            } => {
                if deck_proto::is_clip_list_header(line) {
                    // Header consumed; the count line comes next.
                } else if let Some(count) = deck_proto::parse_clip_count(line) {
                    expected = Some(count);
                } else if let Some(entry) = deck_proto::parse_clip_entry(line) {
                    collected.push(entry);
                } else if let Some(status) = deck_proto::parse_status_line(line) {
                    if deck_proto::is_failure_code(status.code) {
                        self.resolve(
                            origin,
                            CommandReply::Status {
                                code: status.code,
                                text: status.text,
                            },
                        );
                        return;
                    }
                    tracing::warn!(line, "unexpected status inside clip listing; skipping");
                } else {
                    tracing::warn!(line, "unrecognized line inside clip listing; skipping");
                }

                if expected.is_some_and(|count| collected.len() >= count) {
                    self.resolve(origin, CommandReply::Clips(collected));
                } else {
                    self.pending = Pending::FramedBlock {
                        origin,
                        expected,
                        collected,
                        deadline,
                    };
                }
            }
        }
    }

    /// Lines that belong to no in-flight command: slot status details from
    /// a poll pass, or the deck's connect banner.
    fn handle_unsolicited(&mut self, line: &str) {
        if let Some(status) = deck_proto::parse_slot_line(line) {
            if let Ok(mut s) = self.status.lock() {
                s.slots.insert(status.slot, status.clone());
            }
            self.events.slot_status(status);
        } else {
            tracing::debug!(line, "ignoring unsolicited line");
        }
    }

    fn resolve(&mut self, origin: Origin, reply: CommandReply) {
        match origin {
            Origin::Caller(tx) => {
                let _ = tx.send(Ok(reply));
            }
            Origin::Poll => {
                if let CommandReply::Status { code, text } = reply {
                    if deck_proto::is_failure_code(code) {
                        tracing::warn!(code, %text, "status poll command refused");
                        self.events.error(format!("status poll failed: {code} {text}"));
                    }
                }
            }
        }
    }

    fn fail_origin(&mut self, origin: Origin, err: DeckError) {
        match origin {
            Origin::Caller(tx) => {
                let _ = tx.send(Err(err));
            }
            Origin::Poll => {
                self.events.error(format!("status poll failed: {err}"));
            }
        }
    }

    /// Drop every trace of the connection: pending and queued commands
    /// fail, the buffer and framed-block state are discarded, polling
    /// stops, and the socket is released.
    fn teardown(&mut self, err: DeckError) {
        let stale = std::mem::replace(&mut self.pending, Pending::Idle);
        match stale {
            Pending::Idle => {}
            Pending::SingleLine { origin } | Pending::FramedBlock { origin, .. } => {
                self.fail_origin(origin, err.clone());
            }
        }
        for (_, reply) in self.queue.drain(..) {
            let _ = reply.send(Err(DeckError::Disconnected));
        }
        self.buffer.clear();
        self.poll = None;
        self.poll_queue.clear();
        if let Ok(mut s) = self.status.lock() {
            s.state = ConnectionState::Disconnected;
            s.slots.clear();
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        tracing::info!("deck connection closed");
        self.events.disconnected();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_offload_types::SlotState;
    use crate::events::OffloadEvent;

    /// Line-oriented peer for a scripted fake deck.
    struct DeckPeer {
        stream: TcpStream,
        buf: String,
    }

    impl DeckPeer {
        fn new(stream: TcpStream) -> Self {
            stream
                .set_read_timeout(Some(Duration::from_millis(20)))
                .expect("peer read timeout");
            Self {
                stream,
                buf: String::new(),
            }
        }

        fn read_line(&mut self, timeout: Duration) -> Option<String> {
            let deadline = Instant::now() + timeout;
            loop {
                if let Some(idx) = self.buf.find("\r\n") {
                    let line = self.buf[..idx].to_string();
                    self.buf.drain(..idx + 2);
                    return Some(line);
                }
                if Instant::now() >= deadline {
                    return None;
                }
                let mut chunk = [0u8; 256];
                match self.stream.read(&mut chunk) {
                    Ok(0) => return None,
                    Ok(n) => self.buf.push_str(&String::from_utf8_lossy(&chunk[..n])),
                    Err(_) => {}
                }
            }
        }

        fn send(&mut self, lines: &[&str]) {
            for line in lines {
                let _ = self.stream.write_all(format!("{line}\r\n").as_bytes());
            }
        }
    }

    fn spawn_fake_deck(script: impl FnOnce(DeckPeer) + Send + 'static) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind fake deck");
        let addr = listener.local_addr().expect("fake deck addr");
        std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                script(DeckPeer::new(stream));
            }
        });
        format!("{addr}")
    }

    /// A fake deck that answers every command like an idle device.
    fn scripted_idle_deck(mut peer: DeckPeer) {
        while let Some(line) = peer.read_line(Duration::from_secs(5)) {
            if line.starts_with("slot select:") {
                peer.send(&["202 slot selected"]);
            } else if line == "clips get" {
                peer.send(&["205 clips info:", "clip count: 0"]);
            } else if line.starts_with("slot info:") {
                peer.send(&["202 slot info:", "slot id: 1 status: mounted"]);
            } else if line == "transport info" {
                peer.send(&["208 transport info:", "status: stopped"]);
            } else {
                peer.send(&["100 syntax error"]);
            }
        }
    }

    #[test]
    fn connect_refused_is_a_connection_error() {
        // Bind then drop, so the port is very likely unbound.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            format!("{}", listener.local_addr().expect("addr"))
        };
        let err = DeckClient::connect(&addr, EventBus::new()).unwrap_err();
        assert!(matches!(err, DeckError::Connection(_)));
    }

    #[test]
    fn clip_list_collects_entries_in_order() {
        let addr = spawn_fake_deck(|mut peer| {
            while let Some(line) = peer.read_line(Duration::from_secs(5)) {
                if line.starts_with("slot select:") {
                    peer.send(&["202 slot selected"]);
                } else if line == "clips get" {
                    peer.send(&[
                        "205 clips info:",
                        "clip count: 3",
                        "1: B_0005.mp4 00:00:00:00 00:00:10:00",
                        "checksum: ab12cd",
                        "2: B_0006.mp4 00:00:10:00 00:00:05:00",
                        "3: B_0007.mp4 00:00:15:00 00:00:01:08",
                    ]);
                }
            }
        });

        let client = DeckClient::connect(&addr, EventBus::new()).expect("connect");
        let clips = client.clip_list(2).expect("clip list");
        assert_eq!(clips.len(), 3);
        assert_eq!(clips[0].name, "B_0005.mp4");
        assert_eq!(clips[2].name, "B_0007.mp4");
        assert_eq!(clips[2].duration, "00:00:01:08");
        assert!(clips.iter().all(|c| c.slot == 2));
        client.disconnect();
    }

    #[test]
    fn incomplete_listing_times_out_without_leaking_state() {
        let addr = spawn_fake_deck(|mut peer| {
            while let Some(line) = peer.read_line(Duration::from_secs(5)) {
                if line.starts_with("slot select:") {
                    peer.send(&["202 slot selected"]);
                } else if line == "clips get" {
                    peer.send(&[
                        "205 clips info:",
                        "clip count: 3",
                        "1: B_0005.mp4 00:00:00:00 00:00:10:00",
                        "2: B_0006.mp4 00:00:10:00 00:00:05:00",
                    ]);
                } else if line == "transport info" {
                    peer.send(&["208 transport info:"]);
                }
            }
        });

        let client =
            DeckClient::connect_inner(&addr, EventBus::new(), Duration::from_millis(300))
                .expect("connect");
        let err = client.clip_list(1).unwrap_err();
        assert_eq!(err, DeckError::ProtocolTimeout);

        // The aborted fetch must not leak into the next command.
        let reply = client.execute(DeckCommand::TransportInfo).expect("clean command");
        match reply {
            CommandReply::Status { code, .. } => assert_eq!(code, 208),
            other => panic!("unexpected reply: {other:?}"),
        }
        client.disconnect();
    }

    #[test]
    fn commands_are_serialized_one_at_a_time() {
        let (probe_tx, probe_rx) = bounded(1);
        let addr = spawn_fake_deck(move |mut peer| {
            let first = peer.read_line(Duration::from_secs(5));
            assert!(first.is_some());
            // While the first response is outstanding, nothing else may
            // arrive on the wire.
            let early = peer.read_line(Duration::from_millis(300));
            let _ = probe_tx.send(early.is_none());
            peer.send(&["200 ok"]);
            if peer.read_line(Duration::from_secs(5)).is_some() {
                peer.send(&["200 ok"]);
            }
        });

        let client = DeckClient::connect(&addr, EventBus::new()).expect("connect");
        let second = client.clone();
        let handle =
            std::thread::spawn(move || second.execute(DeckCommand::TransportInfo));
        let first = client.execute(DeckCommand::TransportInfo);
        let other = handle.join().expect("join");

        assert!(first.is_ok());
        assert!(other.is_ok());
        assert!(
            probe_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("probe result"),
            "second command hit the wire before the first response"
        );
        client.disconnect();
    }

    #[test]
    fn status_poll_publishes_slot_events() {
        let addr = spawn_fake_deck(scripted_idle_deck);
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let client = DeckClient::connect(&addr, events).expect("connect");
        client.start_status_poll(&[1]);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = None;
        while Instant::now() < deadline && seen.is_none() {
            match rx.try_recv() {
                Ok(OffloadEvent::SlotStatus { status }) => seen = Some(status),
                Ok(_) => {}
                Err(_) => std::thread::sleep(Duration::from_millis(50)),
            }
        }
        let status = seen.expect("slot status event");
        assert_eq!(status.slot, 1);
        assert_eq!(status.state, SlotState::Mounted);

        client.stop_status_poll();
        client.disconnect();
    }

    #[test]
    fn disconnect_is_idempotent_and_rejects_later_commands() {
        let addr = spawn_fake_deck(scripted_idle_deck);
        let client = DeckClient::connect(&addr, EventBus::new()).expect("connect");
        assert_eq!(client.state(), ConnectionState::Connected);

        client.disconnect();
        client.disconnect();

        let deadline = Instant::now() + Duration::from_secs(5);
        while client.state() != ConnectionState::Disconnected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let err = client.execute(DeckCommand::TransportInfo).unwrap_err();
        assert_eq!(err, DeckError::Disconnected);
    }

    #[test]
    fn fresh_connection_starts_clean_after_an_aborted_fetch() {
        let addr = spawn_fake_deck(|mut peer| {
            // Never complete the listing; the client gives up and hangs up.
            while let Some(line) = peer.read_line(Duration::from_secs(5)) {
                if line.starts_with("slot select:") {
                    peer.send(&["202 slot selected"]);
                } else if line == "clips get" {
                    peer.send(&["205 clips info:", "clip count: 2"]);
                }
            }
        });
        let client =
            DeckClient::connect_inner(&addr, EventBus::new(), Duration::from_millis(200))
                .expect("connect");
        assert_eq!(client.clip_list(1).unwrap_err(), DeckError::ProtocolTimeout);
        client.disconnect();

        let addr = spawn_fake_deck(scripted_idle_deck);
        let client = DeckClient::connect(&addr, EventBus::new()).expect("reconnect");
        let clips = client.clip_list(1).expect("empty listing");
        assert!(clips.is_empty());
        client.disconnect();
    }
}
