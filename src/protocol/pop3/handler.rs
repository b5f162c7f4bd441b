use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{ AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader, BufWriter };
use tracing::{ debug, error, info, instrument, warn };

use super::command::Command;
use super::response::{ split_lines, top_lines, Response };
use super::state::{ parse_index, Phase, Pop3Error, Session };
use crate::storage::MailboxStore;

pub const GREETING: &str = "POP3 server ready";

const CAPABILITIES: &[&str] = &["USER", "TOP", "UIDL", "IMPLEMENTATION lightpop"];

/// Longest command line accepted, CRLF included.
pub const MAX_LINE_LENGTH: usize = 512;

enum LineRead {
    Line,
    TooLong,
    Eof,
}

/// Reads one command line into `line`, buffering at most
/// [`MAX_LINE_LENGTH`] bytes. The rest of an oversized line is skipped.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<LineRead>
    where R: AsyncBufRead + Unpin
{
    let read = (&mut *reader).take((MAX_LINE_LENGTH + 1) as u64).read_until(b'\n', line).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if line.ends_with(b"\n") || line.len() <= MAX_LINE_LENGTH {
        return Ok(LineRead::Line);
    }

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(LineRead::TooLong);
        }
        let (end_of_line, used) = match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => (true, pos + 1),
            None => (false, buf.len()),
        };
        reader.consume(used);
        if end_of_line {
            return Ok(LineRead::TooLong);
        }
    }
}

/// Drives one POP3 session. The handler owns its [`Session`] exclusively;
/// the store is the only thing shared with other connections.
pub struct Pop3Handler {
    store: Arc<dyn MailboxStore>,
    addr: SocketAddr,
    session: Session,
    idle_timeout: Option<Duration>,
}

impl Pop3Handler {
    pub fn new(store: Arc<dyn MailboxStore>, addr: SocketAddr) -> Self {
        Self {
            store,
            addr,
            session: Session::new(),
            idle_timeout: None,
        }
    }

    /// Drops the connection after this long without a command. Pending
    /// deletions are discarded, as for any other disconnect.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    #[instrument(skip_all, fields(peer = %self.addr))]
    pub async fn run<S>(&mut self, stream: S) -> Result<()> where S: AsyncRead + AsyncWrite + Unpin {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        Response::ok(GREETING).write_to(&mut writer).await?;

        let mut line = Vec::new();
        loop {
            line.clear();
            let read = read_line(&mut reader, &mut line);
            let outcome = match self.idle_timeout {
                Some(limit) =>
                    match tokio::time::timeout(limit, read).await {
                        Ok(result) => result?,
                        Err(_) => {
                            info!("POP3 session idle for {:?}, closing", limit);
                            break;
                        }
                    }
                None => read.await?,
            };

            match outcome {
                LineRead::Line => {}
                LineRead::TooLong => {
                    warn!("Command line over {} bytes discarded", MAX_LINE_LENGTH);
                    Response::err("Line too long.").write_to(&mut writer).await?;
                    continue;
                }
                LineRead::Eof => {
                    debug!("POP3 client disconnected");
                    break;
                }
            }

            let command = Command::parse(&String::from_utf8_lossy(&line));
            match &command {
                Command::Pass(_) => debug!("POP3 command: PASS ****"),
                other => debug!("POP3 command: {:?}", other),
            }

            let response = self.execute(command).await;
            response.write_to(&mut writer).await?;

            if self.session.phase() == Phase::Closed {
                break;
            }
        }

        let pending = self.session.marked().count();
        if self.session.phase() != Phase::Closed && pending > 0 {
            info!("Session ended without QUIT, {} deletions discarded", pending);
        }
        Ok(())
    }

    /// Runs one command against the session and renders the reply.
    pub async fn execute(&mut self, command: Command) -> Response {
        let name = command.name().to_string();
        match self.dispatch(command).await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} rejected: {}", name, e);
                Response::err(e)
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<Response, Pop3Error> {
        let phase = self.session.phase();

        match command {
            Command::Capa => Ok(Response::multi_line("Capability list follows", CAPABILITIES.iter().copied())),
            // APOP would need the plaintext password on the server
            Command::Apop => Err(Pop3Error::NotImplemented),
            Command::Quit => Ok(self.quit().await),
            Command::Unknown(_) => Err(Pop3Error::UnknownCommand),

            Command::User(arg) if phase == Phase::Authorization => self.user(arg.as_deref()),
            Command::Pass(arg) if phase == Phase::Authorization => self.pass(arg.as_deref()).await,

            _ if phase != Phase::Transaction => Err(Pop3Error::NotAuthorized),

            Command::Stat => Ok(self.stat()),
            Command::List(arg) => self.list(arg.as_deref()),
            Command::Retr(arg) => self.retr(arg.as_deref()).await,
            Command::Dele(arg) => self.dele(arg.as_deref()),
            Command::Rset => Ok(self.rset()),
            Command::Noop => Ok(Response::ok("")),
            Command::Top(arg) => self.top(arg.as_deref()).await,
            Command::Uidl(arg) => self.uidl(arg.as_deref()),
            Command::User(_) | Command::Pass(_) => Err(Pop3Error::NotAuthorized),
        }
    }

    fn user(&mut self, arg: Option<&str>) -> Result<Response, Pop3Error> {
        let mailbox = arg.ok_or(Pop3Error::InvalidArgument("Provide a username."))?;
        self.session.set_identity(mailbox)?;
        Ok(Response::ok(""))
    }

    async fn pass(&mut self, arg: Option<&str>) -> Result<Response, Pop3Error> {
        let (user, domain) = match self.session.identity() {
            Some((user, domain)) => (user.to_string(), domain.to_string()),
            None => {
                return Err(Pop3Error::FailedLogin);
            }
        };
        let secret = arg.unwrap_or("");

        match self.store.authenticate(&user, &domain, secret).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Failed login for {}@{}", user, domain);
                return Err(Pop3Error::FailedLogin);
            }
            Err(e) => {
                error!("Credential lookup for {}@{} failed: {}", user, domain, e);
                return Err(Pop3Error::FailedLogin);
            }
        }

        let listing = self.store.enumerate(&user, &domain).await.map_err(|e| {
            error!("Failed to open mailbox {}@{}: {}", user, domain, e);
            Pop3Error::Backend(e.to_string())
        })?;

        let store = &self.store;
        self.session.open_mailbox(
            listing.into_iter().map(|info| {
                let uid = store.uid(&info.identifier);
                (info, uid)
            })
        );

        let (count, size) = self.session.stat();
        info!("{}@{} logged in, {} messages ({} octets)", user, domain, count, size);
        Ok(Response::ok("Mailbox open."))
    }

    fn stat(&self) -> Response {
        let (count, size) = self.session.stat();
        Response::ok(format!("{} {}", count, size))
    }

    fn list(&self, arg: Option<&str>) -> Result<Response, Pop3Error> {
        if arg.is_some() {
            let entry = self.session.get(parse_index(arg)?)?;
            return Ok(Response::ok(format!("{} {}", entry.index, entry.size)));
        }

        let lines = self.session.visible().map(|m| format!("{} {}", m.index, m.size));
        Ok(Response::multi_line("scan listing follows", lines))
    }

    fn uidl(&self, arg: Option<&str>) -> Result<Response, Pop3Error> {
        if arg.is_some() {
            let entry = self.session.get(parse_index(arg)?)?;
            return Ok(Response::ok(format!("{} {}", entry.index, entry.uid)));
        }

        let lines = self.session.visible().map(|m| format!("{} {}", m.index, m.uid));
        Ok(Response::multi_line("unique-id listing follows", lines))
    }

    async fn retr(&self, arg: Option<&str>) -> Result<Response, Pop3Error> {
        let entry = self.session.get(parse_index(arg)?)?;
        let content = self.read(&entry.identifier).await?;
        Ok(Response::multi_line(format!("{} octets", content.len()), split_lines(&content)))
    }

    async fn top(&self, arg: Option<&str>) -> Result<Response, Pop3Error> {
        let args: Vec<&str> = arg.unwrap_or("").split_whitespace().collect();
        let [index, lines] = args.as_slice() else {
            return Err(Pop3Error::InvalidArgument("Usage: TOP msg lines"));
        };
        let index = parse_index(Some(*index))?;
        let lines: usize = lines.parse().map_err(|_| Pop3Error::InvalidArgument("Invalid line count."))?;

        let entry = self.session.get(index)?;
        let content = self.read(&entry.identifier).await?;
        Ok(Response::multi_line("top of message follows", top_lines(&content, lines)))
    }

    async fn read(&self, identifier: &str) -> Result<Vec<u8>, Pop3Error> {
        self.store.read(identifier).await.map_err(|e| {
            error!("Failed to read {}: {}", identifier, e);
            Pop3Error::Backend(e.to_string())
        })
    }

    fn dele(&mut self, arg: Option<&str>) -> Result<Response, Pop3Error> {
        let index = parse_index(arg)?;
        self.session.mark_deleted(index)?;
        Ok(Response::ok(format!("message {} deleted", index)))
    }

    fn rset(&mut self) -> Response {
        self.session.reset();
        let (count, size) = self.session.stat();
        Response::ok(format!("maildrop has {} messages ({} octets)", count, size))
    }

    /// UPDATE state: purge marked messages, then close. A failed delete is
    /// logged and does not stop the remaining ones.
    async fn quit(&mut self) -> Response {
        let purge = self.session.begin_update();
        let mut failed = 0usize;

        for identifier in &purge {
            match self.store.delete(identifier).await {
                Ok(()) => debug!("Deleted {}", identifier),
                Err(e) => {
                    failed += 1;
                    error!("Failed to delete {}: {}", identifier, e);
                }
            }
        }

        if !purge.is_empty() {
            info!("Purged {} of {} marked messages", purge.len() - failed, purge.len());
        }

        self.session.close();
        Response::ok("bye.")
    }
}
