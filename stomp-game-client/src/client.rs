use std::{io, thread};

use anyhow::Result;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    command::{UserCommand, dispatch},
    error::ClientError,
    frame::{Frame, read_frame, write_frame},
    session::{Session, SessionConfig, SessionState},
};

/// Everything the receiver task hands to the processing loop.
#[derive(Debug)]
enum Received {
    Frame(Frame),
    Closed,
}

struct Connection {
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<Received>,
    receiver: JoinHandle<()>,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Transport {
                addr: addr.to_string(),
                source,
            })?;
        info!("connected to {addr}");

        let (reader, writer) = stream.into_split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(receive_frames(BufReader::new(reader), tx));

        Ok(Self {
            writer,
            inbound,
            receiver,
        })
    }

    async fn shutdown(mut self) {
        self.receiver.abort();
        if let Err(error) = self.writer.shutdown().await {
            debug!(?error, "failed to shutdown client writer cleanly");
        }
    }
}

/// Reads frames until the socket closes. Never touches session state.
async fn receive_frames(mut reader: BufReader<OwnedReadHalf>, tx: mpsc::UnboundedSender<Received>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                if tx.send(Received::Frame(frame)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                let _ = tx.send(Received::Closed);
                break;
            }
            Err(error) => {
                warn!(?error, "failed to read frame");
                let _ = tx.send(Received::Closed);
                break;
            }
        }
    }
}

/// Reads user lines on a plain thread. A blocking stdin read cannot be
/// cancelled, so it must not live on the runtime's blocking pool.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
                Err(error) => {
                    warn!(?error, "failed to read stdin");
                    return;
                }
            }
        }
    });
    rx
}

async fn next_received(connection: &mut Option<Connection>) -> Option<Received> {
    match connection {
        Some(connection) => connection.inbound.recv().await,
        None => std::future::pending().await,
    }
}

/// The single processing loop: owns the session and the connection.
pub struct Client {
    session: Session,
    connection: Option<Connection>,
}

impl Client {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            session: Session::new(config),
            connection: None,
        }
    }

    async fn handle_line(&mut self, line: &str) -> io::Result<()> {
        let command = match UserCommand::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(error) => return write_stdout(&error.to_string()).await,
        };

        // A repeated logout stops waiting for the receipt.
        if command == UserCommand::Logout && self.session.is_logging_out() {
            self.session.close();
            return Ok(());
        }

        if let UserCommand::Login { host_port, .. } = &command {
            if self.session.state() == SessionState::Disconnected && self.connection.is_none() {
                match Connection::open(host_port).await {
                    Ok(connection) => self.connection = Some(connection),
                    Err(error) => {
                        self.session.close();
                        return write_stdout(&error.to_string()).await;
                    }
                }
            }
        }

        match dispatch(&mut self.session, command).await {
            Ok(dispatched) => {
                self.send_all(&dispatched.frames).await?;
                if let Some(notice) = dispatched.notice {
                    write_stdout(&notice).await?;
                }
                Ok(())
            }
            Err(error) => {
                if error.is_fatal() {
                    self.session.close();
                }
                write_stdout(&error.to_string()).await
            }
        }
    }

    async fn send_all(&mut self, frames: &[Frame]) -> io::Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        for frame in frames {
            debug!(command = %frame.command, "outbound frame");
            if let Err(error) = write_frame(&mut connection.writer, frame).await {
                warn!(?error, "failed to write frame");
                self.session.close();
                return write_stdout("Disconnected from server.").await;
            }
        }
        Ok(())
    }

    async fn handle_received(&mut self, received: Option<Received>) -> io::Result<()> {
        match received {
            Some(Received::Frame(frame)) => {
                let outcome = self.session.handle_frame(&frame);
                if let Some(notice) = outcome.notice() {
                    write_stdout(&notice).await?;
                }
                Ok(())
            }
            Some(Received::Closed) | None => {
                self.session.close();
                write_stdout("Disconnected from server.").await
            }
        }
    }

    /// Runs until the session terminates or stdin reaches EOF.
    pub async fn run_until_terminated(&mut self) -> Result<()> {
        let mut lines = spawn_stdin_reader();

        while !self.session.is_terminated() {
            select! {
                line = lines.recv() => {
                    match line {
                        Some(line) => self.handle_line(&line).await?,
                        None => break,
                    }
                }
                received = next_received(&mut self.connection) => {
                    self.handle_received(received).await?;
                }
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.shutdown().await;
        }
        Ok(())
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut client = Client::new(args.session_config());
    client.run_until_terminated().await
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
