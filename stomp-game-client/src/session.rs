//! Client session state machine.
//!
//! The session is the only owner of the subscription registry, the receipt
//! ledger and the event ledger. User actions produce outbound frames;
//! inbound frames produce an [`Inbound`] outcome the runtime reports.
//!
//! ```text
//! Disconnected --login--> Connecting --CONNECTED--> Connected
//!       any state --ERROR / DISCONNECT receipt / transport loss--> Terminated
//! ```

use tracing::{debug, info};

use crate::{
    error::ClientError,
    event::{EventReport, GameEvents},
    frame::{Command, Frame},
    ledger::{EventLedger, order_events},
    registry::{PendingAction, ReceiptLedger, SubscriptionRegistry},
    summary::Summary,
};

/// Protocol version the client offers when none is configured.
pub const DEFAULT_ACCEPT_VERSION: &str = "1.2";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub accept_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            accept_version: DEFAULT_ACCEPT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Terminated,
}

/// What an inbound frame did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    LoggedIn,
    Resolved(PendingAction),
    /// The broker acknowledged our DISCONNECT.
    LoggedOut,
    Stored { game: String, user: String },
    /// A MESSAGE we authored ourselves, echoed back by the broker.
    SelfEcho,
    Error { message: String, body: String },
    Ignored,
}

impl Inbound {
    /// Line to show the user, if any.
    pub fn notice(&self) -> Option<String> {
        match self {
            Inbound::LoggedIn => Some("Login successful".to_string()),
            Inbound::Resolved(action) => Some(action.to_string()),
            Inbound::LoggedOut => Some("Logged out".to_string()),
            Inbound::Error { message, body } if body.is_empty() => {
                Some(format!("Error from server: {message}"))
            }
            Inbound::Error { message, body } => {
                Some(format!("Error from server: {message}\n{body}"))
            }
            Inbound::Stored { .. } | Inbound::SelfEcho | Inbound::Ignored => None,
        }
    }

    pub fn ends_session(&self) -> bool {
        matches!(self, Inbound::LoggedOut | Inbound::Error { .. })
    }
}

#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    username: String,
    subscriptions: SubscriptionRegistry,
    receipts: ReceiptLedger,
    ledger: EventLedger,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            username: String::new(),
            subscriptions: SubscriptionRegistry::new(),
            receipts: ReceiptLedger::new(),
            ledger: EventLedger::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn receipts(&self) -> &ReceiptLedger {
        &self.receipts
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    /// True once DISCONNECT is sent and its receipt is still outstanding.
    pub fn is_logging_out(&self) -> bool {
        self.receipts.awaits(&PendingAction::Disconnect)
    }

    fn require_connected(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Starts the STOMP handshake. The transport must already be open.
    pub fn login(
        &mut self,
        host_port: &str,
        username: &str,
        password: &str,
    ) -> Result<Frame, ClientError> {
        match self.state {
            SessionState::Disconnected => {}
            SessionState::Connecting | SessionState::Connected => {
                return Err(ClientError::AlreadyLoggedIn);
            }
            SessionState::Terminated => return Err(ClientError::NotConnected),
        }

        let host = host_port
            .rsplit_once(':')
            .map_or(host_port, |(host, _port)| host);
        self.username = username.to_string();
        self.state = SessionState::Connecting;
        info!(%host, username, "sending CONNECT");

        Ok(Frame::new(Command::Connect)
            .with_header("accept-version", &self.config.accept_version)
            .with_header("host", host)
            .with_header("login", username)
            .with_header("passcode", password))
    }

    pub fn join(&mut self, game: &str) -> Result<Frame, ClientError> {
        self.require_connected()?;
        if self.subscriptions.is_subscribed(game) {
            return Err(ClientError::AlreadySubscribed(game.to_string()));
        }

        let subscription = self.subscriptions.subscribe(game);
        let receipt = self.receipts.register(PendingAction::Joined {
            game: game.to_string(),
        });

        Ok(Frame::new(Command::Subscribe)
            .with_header("destination", format!("/{game}"))
            .with_header("id", subscription)
            .with_header("receipt", receipt))
    }

    pub fn exit(&mut self, game: &str) -> Result<Frame, ClientError> {
        self.require_connected()?;
        let subscription = self
            .subscriptions
            .unsubscribe(game)
            .ok_or_else(|| ClientError::NotSubscribed(game.to_string()))?;
        let receipt = self.receipts.register(PendingAction::Exited {
            game: game.to_string(),
        });

        Ok(Frame::new(Command::Unsubscribe)
            .with_header("id", subscription)
            .with_header("receipt", receipt))
    }

    /// Records the user's own events and returns one SEND per event.
    pub fn report(&mut self, game: GameEvents) -> Result<Vec<Frame>, ClientError> {
        self.require_connected()?;
        let game_name = game.game_name();
        let destination = format!("/{game_name}");
        let events = order_events(game.events);

        let frames = events
            .iter()
            .map(|event| {
                Frame::new(Command::Send)
                    .with_header("destination", &destination)
                    .with_body(event.to_body(&self.username))
            })
            .collect();

        let username = self.username.clone();
        self.ledger.extend(&game_name, &username, events);
        Ok(frames)
    }

    pub fn summary(&self, game: &str, user: &str) -> Result<Summary, ClientError> {
        self.require_connected()?;
        self.ledger
            .history(game, user)
            .and_then(Summary::aggregate)
            .ok_or_else(|| ClientError::NoReports {
                game: game.to_string(),
                user: user.to_string(),
            })
    }

    /// Asks the broker to end the session. Stays connected until the
    /// matching receipt arrives.
    pub fn logout(&mut self) -> Result<Frame, ClientError> {
        self.require_connected()?;
        if self.is_logging_out() {
            return Err(ClientError::LogoutPending);
        }
        let receipt = self.receipts.register(PendingAction::Disconnect);
        Ok(Frame::new(Command::Disconnect).with_header("receipt", receipt))
    }

    /// Marks the session dead after the transport went away.
    pub fn close(&mut self) {
        self.state = SessionState::Terminated;
    }

    pub fn handle_frame(&mut self, frame: &Frame) -> Inbound {
        debug!(command = %frame.command, "inbound frame");
        if self.is_terminated() {
            return Inbound::Ignored;
        }

        match frame.command {
            Command::Connected if self.state == SessionState::Connecting => {
                self.state = SessionState::Connected;
                info!(username = %self.username, "logged in");
                Inbound::LoggedIn
            }
            Command::Error => {
                self.state = SessionState::Terminated;
                Inbound::Error {
                    message: frame.header("message").unwrap_or_default().to_string(),
                    body: frame.body.clone(),
                }
            }
            Command::Receipt => self.handle_receipt(frame),
            Command::Message => self.handle_message(frame),
            _ => Inbound::Ignored,
        }
    }

    fn handle_receipt(&mut self, frame: &Frame) -> Inbound {
        let Some(id) = frame
            .header("receipt-id")
            .and_then(|id| id.trim().parse().ok())
        else {
            return Inbound::Ignored;
        };

        match self.receipts.resolve(id) {
            Some(PendingAction::Disconnect) => {
                self.state = SessionState::Terminated;
                info!(username = %self.username, "logged out");
                Inbound::LoggedOut
            }
            Some(action) => Inbound::Resolved(action),
            None => Inbound::Ignored,
        }
    }

    fn handle_message(&mut self, frame: &Frame) -> Inbound {
        let EventReport { user, event } = EventReport::parse(&frame.body);
        if user == self.username {
            return Inbound::SelfEcho;
        }

        let game = if event.team_a_name.is_empty() && event.team_b_name.is_empty() {
            frame
                .header("destination")
                .map(|destination| destination.trim_start_matches('/').to_string())
                .unwrap_or_default()
        } else {
            event.game_name()
        };

        debug!(%game, %user, event = %event.name, "stored event");
        self.ledger.append(&game, &user, event);
        Inbound::Stored { game, user }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn connected(username: &str) -> Session {
        let mut session = Session::default();
        session
            .login("127.0.0.1:7777", username, "pw")
            .expect("login from disconnected");
        session.handle_frame(&Frame::new(Command::Connected).with_header("version", "1.2"));
        assert!(session.is_connected());
        session
    }

    fn receipt(id: impl ToString) -> Frame {
        Frame::new(Command::Receipt).with_header("receipt-id", id)
    }

    fn message_from(user: &str, name: &str, time: i64) -> Frame {
        let event = Event {
            team_a_name: "Arsenal".into(),
            team_b_name: "Chelsea".into(),
            name: name.into(),
            time,
            ..Event::default()
        };
        Frame::new(Command::Message)
            .with_header("destination", "/Arsenal_Chelsea")
            .with_body(event.to_body(user))
    }

    fn game(events: &[(&str, i64)]) -> GameEvents {
        GameEvents {
            team_a: "Arsenal".into(),
            team_b: "Chelsea".into(),
            events: events
                .iter()
                .map(|(name, time)| Event {
                    team_a_name: "Arsenal".into(),
                    team_b_name: "Chelsea".into(),
                    name: name.to_string(),
                    time: *time,
                    ..Event::default()
                })
                .collect(),
        }
    }

    #[test]
    fn login_sends_connect_and_waits_for_connected() {
        let mut session = Session::default();
        let connect = session
            .login("127.0.0.1:7777", "alice", "pw")
            .expect("login");

        assert_eq!(connect.command, Command::Connect);
        assert_eq!(connect.header("accept-version"), Some("1.2"));
        assert_eq!(connect.header("host"), Some("127.0.0.1"));
        assert_eq!(connect.header("login"), Some("alice"));
        assert_eq!(connect.header("passcode"), Some("pw"));
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.is_connected());

        let err = session.join("Arsenal_Chelsea").expect_err("not connected yet");
        assert_eq!(err.to_string(), "Please login first");
    }

    #[test]
    fn second_login_is_rejected() {
        let mut session = connected("alice");
        let err = session
            .login("127.0.0.1:7777", "alice", "pw")
            .expect_err("already logged in");
        assert!(matches!(err, ClientError::AlreadyLoggedIn));
        assert!(session.is_connected());
    }

    #[test]
    fn host_header_keeps_ipv6_brackets() {
        let mut session = Session::default();
        let connect = session.login("[::1]:7777", "alice", "pw").expect("login");
        assert_eq!(connect.header("host"), Some("[::1]"));
    }

    #[test]
    fn configured_accept_version_is_offered() {
        let mut session = Session::new(SessionConfig {
            accept_version: "1.1,1.2".into(),
        });
        let connect = session.login("host:1", "alice", "pw").expect("login");
        assert_eq!(connect.header("accept-version"), Some("1.1,1.2"));
    }

    #[test]
    fn join_and_exit_allocate_increasing_ids() {
        let mut session = connected("alice");

        let subscribe = session.join("Arsenal_Chelsea").expect("join");
        assert_eq!(subscribe.command, Command::Subscribe);
        assert_eq!(subscribe.header("destination"), Some("/Arsenal_Chelsea"));
        assert_eq!(subscribe.header("id"), Some("1"));
        assert_eq!(subscribe.header("receipt"), Some("1"));

        let second = session.join("Germany_Japan").expect("join");
        assert_eq!(second.header("id"), Some("2"));
        assert_eq!(second.header("receipt"), Some("2"));

        let unsubscribe = session.exit("Arsenal_Chelsea").expect("exit");
        assert_eq!(unsubscribe.command, Command::Unsubscribe);
        assert_eq!(unsubscribe.header("id"), Some("1"));
        assert_eq!(unsubscribe.header("receipt"), Some("3"));
        assert!(!session.subscriptions().is_subscribed("Arsenal_Chelsea"));

        let rejoin = session.join("Arsenal_Chelsea").expect("rejoin");
        assert_eq!(rejoin.header("id"), Some("3"));
        assert_eq!(rejoin.header("receipt"), Some("4"));

        let logout = session.logout().expect("logout");
        assert_eq!(logout.header("receipt"), Some("5"));
    }

    #[test]
    fn second_logout_sends_nothing() {
        let mut session = connected("alice");
        session.logout().expect("first logout");
        assert!(session.is_logging_out());

        let err = session.logout().expect_err("already logging out");

        assert!(matches!(err, ClientError::LogoutPending));
        assert_eq!(session.receipts().last_issued(), Some(1));
        assert_eq!(session.receipts().pending(), 1);
        assert!(session.is_connected());
    }

    #[test]
    fn exit_without_join_allocates_nothing() {
        let mut session = connected("alice");

        let err = session.exit("Arsenal_Chelsea").expect_err("not subscribed");

        assert_eq!(err.to_string(), "Error: Not subscribed to Arsenal_Chelsea");
        assert_eq!(session.receipts().last_issued(), None);
    }

    #[test]
    fn joining_twice_is_rejected() {
        let mut session = connected("alice");
        session.join("Arsenal_Chelsea").expect("join");
        let err = session.join("Arsenal_Chelsea").expect_err("duplicate");
        assert!(matches!(err, ClientError::AlreadySubscribed(_)));
        assert_eq!(session.receipts().last_issued(), Some(1));
    }

    #[test]
    fn join_receipt_is_reported_then_forgotten() {
        let mut session = connected("alice");
        let subscribe = session.join("Arsenal_Chelsea").expect("join");
        let id = subscribe.header("receipt").expect("receipt header").to_string();

        let outcome = session.handle_frame(&receipt(&id));
        assert_eq!(outcome.notice().as_deref(), Some("Joined channel Arsenal_Chelsea"));
        assert!(!outcome.ends_session());

        assert_eq!(session.handle_frame(&receipt(&id)), Inbound::Ignored);
        assert_eq!(session.receipts().pending(), 0);
    }

    #[test]
    fn unknown_receipts_are_ignored() {
        let mut session = connected("alice");
        assert_eq!(session.handle_frame(&receipt(42)), Inbound::Ignored);
        assert_eq!(session.handle_frame(&receipt("abc")), Inbound::Ignored);
        assert!(session.is_connected());
    }

    #[test]
    fn logout_terminates_only_on_its_receipt() {
        let mut session = connected("alice");
        let disconnect = session.logout().expect("logout");
        assert_eq!(disconnect.command, Command::Disconnect);
        assert!(session.is_connected());

        let id = disconnect.header("receipt").expect("receipt").to_string();
        let outcome = session.handle_frame(&receipt(id));

        assert_eq!(outcome, Inbound::LoggedOut);
        assert!(outcome.ends_session());
        assert!(session.is_terminated());
    }

    #[test]
    fn error_frame_is_fatal() {
        let mut session = connected("alice");
        let error = Frame::new(Command::Error)
            .with_header("message", "malformed frame received")
            .with_body("SEND\n\n");

        let outcome = session.handle_frame(&error);

        assert!(outcome.ends_session());
        assert_eq!(
            outcome.notice().as_deref(),
            Some("Error from server: malformed frame received\nSEND\n\n")
        );
        assert!(session.is_terminated());
        assert_eq!(
            session.handle_frame(&Frame::new(Command::Connected)),
            Inbound::Ignored
        );
    }

    #[test]
    fn error_while_connecting_terminates() {
        let mut session = Session::default();
        session.login("host:1", "alice", "wrong").expect("login");
        let outcome = session.handle_frame(
            &Frame::new(Command::Error).with_header("message", "Wrong password"),
        );
        assert_eq!(outcome.notice().as_deref(), Some("Error from server: Wrong password"));
        assert!(session.is_terminated());
    }

    #[test]
    fn messages_from_others_are_stored_by_author() {
        let mut session = connected("alice");

        let outcome = session.handle_frame(&message_from("bob", "goal", 1200));

        assert_eq!(
            outcome,
            Inbound::Stored {
                game: "Arsenal_Chelsea".into(),
                user: "bob".into()
            }
        );
        let history = session
            .ledger()
            .history("Arsenal_Chelsea", "bob")
            .expect("bob's events");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "goal");
    }

    #[test]
    fn own_messages_are_not_stored_twice() {
        let mut session = connected("alice");

        let outcome = session.handle_frame(&message_from("alice", "goal", 1200));

        assert_eq!(outcome, Inbound::SelfEcho);
        assert!(!outcome.ends_session());
        assert!(session.ledger().history("Arsenal_Chelsea", "alice").is_none());
    }

    #[test]
    fn message_without_teams_falls_back_to_destination() {
        let mut session = connected("alice");
        let frame = Frame::new(Command::Message)
            .with_header("destination", "/Germany_Japan")
            .with_body("user: bob\nevent name: whistle\ntime: 5\n");

        session.handle_frame(&frame);

        assert!(session.ledger().history("Germany_Japan", "bob").is_some());
    }

    #[test]
    fn report_orders_events_and_stores_them_locally() {
        let mut session = connected("alice");

        let frames = session
            .report(game(&[("second half", 3100), ("kickoff", 0), ("goal", 600)]))
            .expect("report");

        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|frame| frame.command == Command::Send
            && frame.header("destination") == Some("/Arsenal_Chelsea")));
        let sent: Vec<_> = frames
            .iter()
            .map(|frame| EventReport::parse(&frame.body))
            .collect();
        assert!(sent.iter().all(|report| report.user == "alice"));
        let names: Vec<_> = sent.iter().map(|report| report.event.name.as_str()).collect();
        assert_eq!(names, ["kickoff", "goal", "second half"]);

        let summary = session.summary("Arsenal_Chelsea", "alice").expect("summary");
        assert_eq!(summary.reports.len(), 3);
    }

    #[test]
    fn summary_needs_reports() {
        let session = connected("alice");
        let err = session
            .summary("Arsenal_Chelsea", "bob")
            .expect_err("nothing reported");
        assert!(matches!(err, ClientError::NoReports { .. }));
    }

    #[test]
    fn closing_terminates() {
        let mut session = connected("alice");
        session.close();
        assert!(session.is_terminated());
        assert!(matches!(session.logout(), Err(ClientError::NotConnected)));
    }
}
