//! In-memory STOMP broker for game channels.
//!
//! Each connection gets a reader loop and a writer task. The reader feeds
//! frames into the shared [`Tables`]; every frame a client should see,
//! replies included, goes through that client's outbox so writes stay in
//! order.

use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::{Mutex, mpsc},
};
use tracing::{debug, info, warn};

use crate::frame::{Command, Frame, read_frame, write_frame};

type ClientId = u64;
type Outbox = mpsc::UnboundedSender<Frame>;

/// Only protocol version the broker speaks.
pub const SUPPORTED_VERSION: &str = "1.2";

pub struct Broker {
    listener: TcpListener,
    state: Arc<BrokerState>,
}

impl Broker {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            state: Arc::new(BrokerState::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Broker { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &BrokerState) {
    info!("broker shutting down");
    state.tables.lock().await.notify_all(
        Frame::new(Command::Error).with_header("message", "broker shutting down"),
    );
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<BrokerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<BrokerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, state).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

struct BrokerState {
    tables: Mutex<Tables>,
    next_id: AtomicU64,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<BrokerState>) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let (outbox, inbox) = mpsc::unbounded_channel();
    let client_id = state.next_id();
    state.tables.lock().await.add_client(client_id, outbox);
    let writer_task = tokio::spawn(drain_outbox(writer, inbox));
    debug!(?peer, client_id, "client connected");

    let session = run_client_session(&state, client_id, &mut reader).await;

    // Dropping the record drops the last outbox sender, which lets the
    // writer flush what is queued and exit.
    if let Some(username) = state.tables.lock().await.remove_client(client_id) {
        info!(?peer, %username, "client disconnected");
    }
    if let Err(err) = writer_task.await {
        warn!(?err, "writer task failed");
    }

    session
}

async fn run_client_session<R>(
    state: &BrokerState,
    client_id: ClientId,
    reader: &mut R,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    while let Some(frame) = read_frame(reader).await? {
        debug!(client_id, command = %frame.command, "frame received");
        if state.tables.lock().await.process(client_id, &frame) == Flow::Close {
            break;
        }
    }
    Ok(())
}

async fn drain_outbox(mut writer: OwnedWriteHalf, mut inbox: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = inbox.recv().await {
        if let Err(err) = write_frame(&mut writer, &frame).await {
            debug!(?err, "failed to deliver frame to client");
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        debug!(?err, "failed to shutdown client writer cleanly");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Open,
    Close,
}

/// A protocol violation; answered with ERROR and a closed connection.
struct Violation(String);

impl Violation {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

struct ClientRecord {
    outbox: Outbox,
    username: Option<String>,
    /// Subscription id → destination.
    subscriptions: HashMap<String, String>,
}

#[derive(Default)]
struct Tables {
    clients: HashMap<ClientId, ClientRecord>,
    passwords: HashMap<String, String>,
    next_message_id: u64,
}

impl Tables {
    fn add_client(&mut self, id: ClientId, outbox: Outbox) {
        self.clients.insert(
            id,
            ClientRecord {
                outbox,
                username: None,
                subscriptions: HashMap::new(),
            },
        );
    }

    fn remove_client(&mut self, id: ClientId) -> Option<String> {
        self.clients.remove(&id).and_then(|record| record.username)
    }

    fn send_to(&self, id: ClientId, frame: Frame) {
        if let Some(record) = self.clients.get(&id) {
            // A closed outbox means the client is already going away.
            let _ = record.outbox.send(frame);
        }
    }

    fn notify_all(&self, frame: Frame) {
        for record in self.clients.values() {
            let _ = record.outbox.send(frame.clone());
        }
    }

    fn process(&mut self, id: ClientId, frame: &Frame) -> Flow {
        let logged_in = self
            .clients
            .get(&id)
            .is_some_and(|record| record.username.is_some());

        let result = match &frame.command {
            Command::Connect => self.connect(id, frame),
            _ if !logged_in => Err(Violation::new("Not logged in")),
            Command::Subscribe => self.subscribe(id, frame),
            Command::Unsubscribe => self.unsubscribe(id, frame),
            Command::Send => self.publish(id, frame),
            Command::Disconnect => self.disconnect(id, frame),
            other => Err(Violation::new(format!("Unknown command {other}"))),
        };

        match result {
            Ok(flow) => {
                if let Some(receipt) = frame.header("receipt") {
                    self.send_to(
                        id,
                        Frame::new(Command::Receipt).with_header("receipt-id", receipt),
                    );
                }
                flow
            }
            Err(Violation(message)) => {
                debug!(id, %message, "protocol violation");
                self.send_to(id, error_frame(frame, &message));
                Flow::Close
            }
        }
    }

    fn connect(&mut self, id: ClientId, frame: &Frame) -> Result<Flow, Violation> {
        let offers_supported = frame
            .header("accept-version")
            .is_some_and(|versions| versions.split(',').any(|v| v.trim() == SUPPORTED_VERSION));
        if !offers_supported {
            return Err(Violation::new("Unsupported protocol version"));
        }
        let (Some(login), Some(passcode)) = (frame.header("login"), frame.header("passcode")) else {
            return Err(Violation::new("Missing login or passcode header"));
        };

        if self
            .clients
            .get(&id)
            .is_some_and(|record| record.username.is_some())
        {
            return Err(Violation::new("Client already connected"));
        }
        if self
            .clients
            .values()
            .any(|record| record.username.as_deref() == Some(login))
        {
            return Err(Violation::new("User already logged in"));
        }
        match self.passwords.get(login) {
            Some(known) if known != passcode => return Err(Violation::new("Wrong password")),
            Some(_) => {}
            None => {
                self.passwords.insert(login.to_string(), passcode.to_string());
            }
        }

        if let Some(record) = self.clients.get_mut(&id) {
            record.username = Some(login.to_string());
        }
        info!(id, username = login, "user logged in");
        self.send_to(
            id,
            Frame::new(Command::Connected).with_header("version", SUPPORTED_VERSION),
        );
        Ok(Flow::Open)
    }

    fn subscribe(&mut self, id: ClientId, frame: &Frame) -> Result<Flow, Violation> {
        let (Some(destination), Some(sub_id)) = (frame.header("destination"), frame.header("id"))
        else {
            return Err(Violation::new("Missing destination or id header"));
        };
        let record = self
            .clients
            .get_mut(&id)
            .ok_or_else(|| Violation::new("Unknown client"))?;
        if record.subscriptions.contains_key(sub_id) {
            return Err(Violation::new(format!("Subscription id {sub_id} already in use")));
        }
        record
            .subscriptions
            .insert(sub_id.to_string(), destination.to_string());
        Ok(Flow::Open)
    }

    fn unsubscribe(&mut self, id: ClientId, frame: &Frame) -> Result<Flow, Violation> {
        let sub_id = frame
            .header("id")
            .ok_or_else(|| Violation::new("Missing id header"))?;
        let record = self
            .clients
            .get_mut(&id)
            .ok_or_else(|| Violation::new("Unknown client"))?;
        record
            .subscriptions
            .remove(sub_id)
            .ok_or_else(|| Violation::new(format!("No subscription with id {sub_id}")))?;
        Ok(Flow::Open)
    }

    fn publish(&mut self, id: ClientId, frame: &Frame) -> Result<Flow, Violation> {
        let destination = frame
            .header("destination")
            .ok_or_else(|| Violation::new("Missing destination header"))?;
        let sender_subscribed = self.clients.get(&id).is_some_and(|record| {
            record
                .subscriptions
                .values()
                .any(|subscribed| subscribed == destination)
        });
        if !sender_subscribed {
            return Err(Violation::new(format!("Not subscribed to {destination}")));
        }

        for record in self.clients.values() {
            let Some(sub_id) = record
                .subscriptions
                .iter()
                .find_map(|(sub_id, subscribed)| (subscribed == destination).then_some(sub_id))
            else {
                continue;
            };
            self.next_message_id += 1;
            let message = Frame::new(Command::Message)
                .with_header("subscription", sub_id)
                .with_header("message-id", self.next_message_id)
                .with_header("destination", destination)
                .with_body(frame.body.clone());
            let _ = record.outbox.send(message);
        }
        Ok(Flow::Open)
    }

    fn disconnect(&mut self, id: ClientId, frame: &Frame) -> Result<Flow, Violation> {
        if frame.header("receipt").is_none() {
            return Err(Violation::new("DISCONNECT requires a receipt header"));
        }
        if let Some(record) = self.clients.get_mut(&id) {
            record.subscriptions.clear();
        }
        Ok(Flow::Close)
    }
}

fn error_frame(offending: &Frame, message: &str) -> Frame {
    let original = offending.encode();
    let original = original.trim_end_matches('\0');
    let mut error = Frame::new(Command::Error).with_header("message", message);
    if let Some(receipt) = offending.header("receipt") {
        error = error.with_header("receipt-id", receipt);
    }
    error.with_body(format!("The message:\n-----\n{original}\n-----\n"))
}
