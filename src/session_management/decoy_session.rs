//! Simulated interactive shell.
//!
//! The decoy answers a handful of commands with canned output and everything else with
//! `command not found`. Each completed line is logged as a command event before anything
//! is written back, so the log always leads the client's screen.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};

use super::session::{PtyRequest, SessionFsm, ShellChannel};
use super::HoneypotContext;
use crate::storage::Event;

const BANNER: &str = "Welcome to Ubuntu 22.04.3 LTS\r\n";
const LS_OUTPUT: &str = "Documents  Downloads  Pictures  Videos  secret.txt";
const SECRET: &str = "TOP_SECRET_KEY=abc123_confidential";

/// Longest line the decoy buffers, like a canonical-mode tty. Bytes past it are dropped.
pub const MAX_LINE: usize = 4096;

const CTRL_C: u8 = 0x03;
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoyState {
    Init,
    Active,
    Terminated,
}

/// A line typed at the decoy prompt, already trimmed.
#[derive(Debug, PartialEq, Eq)]
pub enum DecoyCommand<'a> {
    Exit,
    Whoami,
    Pwd,
    Cd(&'a str),
    Ls,
    LsLong,
    CatSecret,
    Unknown(&'a str),
}

impl<'a> DecoyCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        match line {
            "exit" | "quit" | "logout" => DecoyCommand::Exit,
            "whoami" => DecoyCommand::Whoami,
            "pwd" => DecoyCommand::Pwd,
            "cd" => DecoyCommand::Cd(""),
            "ls" => DecoyCommand::Ls,
            "ls -la" => DecoyCommand::LsLong,
            "cat secret.txt" => DecoyCommand::CatSecret,
            _ => match line.strip_prefix("cd ") {
                Some(arg) => DecoyCommand::Cd(arg.trim()),
                None => DecoyCommand::Unknown(line),
            },
        }
    }
}

pub struct DecoySession {
    context: Arc<HoneypotContext>,
    username: String,
    client_ip: IpAddr,
    current_dir: String,
    input_buffer: Vec<u8>,
    state: DecoyState,
    echo: bool,
    after_cr: bool,
}

impl DecoySession {
    pub fn new(context: Arc<HoneypotContext>, username: &str, client_ip: IpAddr) -> Self {
        Self {
            context,
            username: username.to_string(),
            client_ip,
            current_dir: home_dir(username),
            input_buffer: Vec::new(),
            state: DecoyState::Init,
            echo: false,
            after_cr: false,
        }
    }

    pub fn state(&self) -> DecoyState {
        self.state
    }

    pub fn current_dir(&self) -> &str {
        &self.current_dir
    }

    pub fn prompt(&self) -> String {
        format!("{}@server:~$ ", self.username)
    }

    /// A terminal client gets its keystrokes echoed back, like a real line discipline would.
    pub fn on_pty(&mut self, _pty: PtyRequest) {
        self.echo = true;
    }

    /// Applies `cd` to the working directory. Paths are taken as typed.
    pub fn change_dir(&mut self, target: &str) {
        if target.is_empty() || target == "~" {
            self.current_dir = home_dir(&self.username);
        } else if target.starts_with('/') {
            self.current_dir = target.to_string();
        } else {
            self.current_dir.push('/');
            self.current_dir.push_str(target);
        }
    }

    /// Long listing of the fake home directory. Depends on nothing but the username.
    pub fn long_listing(username: &str) -> String {
        [
            format!("drwxr-xr-x 2 {u} {u} 4096 .", u = username),
            String::from("drwxr-xr-x 12 root root 4096 .."),
            format!("-rw-r--r-- 1 {u} {u} 23 secret.txt", u = username),
            format!("drwxr-xr-x 2 {u} {u} 4096 Documents", u = username),
            format!("drwxr-xr-x 2 {u} {u} 4096 Downloads", u = username),
            format!("drwxr-xr-x 2 {u} {u} 4096 Pictures", u = username),
            format!("drwxr-xr-x 2 {u} {u} 4096 Videos", u = username),
        ]
        .join("\r\n")
    }

    async fn write_line<O: ShellChannel>(out: &mut O, line: &str) {
        out.write(line.as_bytes()).await;
        out.write(b"\r\n").await;
    }

    async fn write_prompt<O: ShellChannel>(&self, out: &mut O) {
        out.write(self.prompt().as_bytes()).await;
    }

    /// Removes the last whole character from the input buffer.
    fn erase_last_char(&mut self) -> bool {
        if self.input_buffer.is_empty() {
            return false;
        }
        while let Some(byte) = self.input_buffer.pop() {
            // Stop once a UTF-8 leading byte (or ASCII) has been removed.
            if byte & 0xc0 != 0x80 {
                break;
            }
        }
        true
    }

    async fn finish_line<O: ShellChannel>(&mut self, out: &mut O) {
        let raw = std::mem::take(&mut self.input_buffer);
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim();
        if line.is_empty() {
            self.write_prompt(out).await;
            return;
        }
        self.execute(line, out).await;
        if self.state == DecoyState::Active {
            self.write_prompt(out).await;
        }
    }

    async fn execute<O: ShellChannel>(&mut self, line: &str, out: &mut O) {
        let geo = self.context.geo.lookup(self.client_ip).await;
        let event = Event::command(&self.username, self.client_ip, line, geo);
        // A lost event is already counted by the logger; the shell carries on regardless.
        let _ = self.context.logger.append(&event).await;
        debug!("Decoy command from {}: {:?}", self.client_ip, line);

        match DecoyCommand::parse(line) {
            DecoyCommand::Exit => {
                Self::write_line(out, "logout").await;
                out.exit(0).await;
                self.state = DecoyState::Terminated;
                info!("Decoy session for {}@{} logged out", self.username, self.client_ip);
            }
            DecoyCommand::Whoami => Self::write_line(out, &self.username).await,
            DecoyCommand::Pwd => Self::write_line(out, &self.current_dir).await,
            DecoyCommand::Cd(target) => self.change_dir(target),
            DecoyCommand::Ls => Self::write_line(out, LS_OUTPUT).await,
            DecoyCommand::LsLong => {
                Self::write_line(out, &Self::long_listing(&self.username)).await
            }
            DecoyCommand::CatSecret => Self::write_line(out, SECRET).await,
            DecoyCommand::Unknown(cmd) => {
                Self::write_line(out, &format!("bash: {}: command not found", cmd)).await
            }
        }
    }
}

impl SessionFsm for DecoySession {
    async fn on_open<O: ShellChannel>(&mut self, out: &mut O) {
        if self.state != DecoyState::Init {
            return;
        }
        self.state = DecoyState::Active;
        info!("Decoy shell opened for {}@{}", self.username, self.client_ip);

        out.write(BANNER.as_bytes()).await;
        let last_login = format!(
            "Last login: {} from {}\r\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%S"),
            self.client_ip
        );
        out.write(last_login.as_bytes()).await;
        self.write_prompt(out).await;
    }

    async fn on_data<O: ShellChannel>(&mut self, data: &[u8], out: &mut O) {
        for &byte in data {
            if self.state != DecoyState::Active {
                break;
            }
            let after_cr = std::mem::replace(&mut self.after_cr, byte == b'\r');
            match byte {
                b'\n' if after_cr => {}
                b'\r' | b'\n' => {
                    if self.echo {
                        out.write(b"\r\n").await;
                    }
                    self.finish_line(out).await;
                }
                DELETE | BACKSPACE => {
                    if self.erase_last_char() && self.echo {
                        out.write(b"\x08 \x08").await;
                    }
                }
                CTRL_C => {
                    self.input_buffer.clear();
                    out.write(b"^C\r\n").await;
                    self.write_prompt(out).await;
                }
                _ if self.input_buffer.len() >= MAX_LINE => {}
                _ => {
                    self.input_buffer.push(byte);
                    if self.echo {
                        out.write(&[byte]).await;
                    }
                }
            }
        }
    }

    /// End of input runs whatever is left on the line, then logs the client out.
    async fn on_eof<O: ShellChannel>(&mut self, out: &mut O) {
        if self.state != DecoyState::Active {
            return;
        }
        if !self.input_buffer.is_empty() {
            self.finish_line(out).await;
        }
        if self.state == DecoyState::Active {
            out.exit(0).await;
            self.state = DecoyState::Terminated;
        }
    }

    fn on_close(&mut self) {
        if self.state != DecoyState::Terminated {
            debug!("Decoy session for {} closed by client", self.client_ip);
        }
        self.state = DecoyState::Terminated;
        self.input_buffer.clear();
    }
}

fn home_dir(username: &str) -> String {
    format!("/home/{}", username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::AllowList;
    use crate::enrichment::GeoEnricher;
    use crate::session_management::session::BufferedOutput;
    use crate::storage::event_reader::read_events;
    use crate::storage::{EventKind, EventLogger};
    use std::time::Duration;
    use tempfile::TempDir;

    fn decoy(dir: &TempDir, username: &str) -> DecoySession {
        let logger = EventLogger::new(dir.path().join("honeypot.log")).unwrap();
        let context = HoneypotContext::new(
            AllowList::default(),
            logger,
            GeoEnricher::disabled(),
            Duration::from_secs(1),
        );
        DecoySession::new(context, username, "127.0.0.1".parse().unwrap())
    }

    async fn opened(dir: &TempDir, username: &str) -> DecoySession {
        let mut session = decoy(dir, username);
        session.on_open(&mut BufferedOutput::default()).await;
        session
    }

    async fn type_line(session: &mut DecoySession, line: &str) -> BufferedOutput {
        let mut out = BufferedOutput::default();
        session.on_data(format!("{}\r", line).as_bytes(), &mut out).await;
        out
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(DecoyCommand::parse("quit"), DecoyCommand::Exit);
        assert_eq!(DecoyCommand::parse("cd"), DecoyCommand::Cd(""));
        assert_eq!(DecoyCommand::parse("cd  /tmp "), DecoyCommand::Cd("/tmp"));
        assert_eq!(DecoyCommand::parse("cdx"), DecoyCommand::Unknown("cdx"));
        assert_eq!(DecoyCommand::parse("ls -la"), DecoyCommand::LsLong);
        assert_eq!(DecoyCommand::parse("ls -l"), DecoyCommand::Unknown("ls -l"));
    }

    #[tokio::test]
    async fn test_banner_and_prompt() {
        let dir = TempDir::new().unwrap();
        let mut session = decoy(&dir, "root");
        let mut out = BufferedOutput::default();
        session.on_open(&mut out).await;

        let text = out.text();
        assert!(text.starts_with("Welcome to Ubuntu 22.04.3 LTS\r\nLast login: "));
        assert!(text.contains(" from 127.0.0.1\r\n"));
        assert!(text.ends_with("root@server:~$ "));
        assert_eq!(session.state(), DecoyState::Active);

        // Opening twice does nothing.
        let mut again = BufferedOutput::default();
        session.on_open(&mut again).await;
        assert!(again.data.is_empty());
    }

    #[tokio::test]
    async fn test_cd_semantics() {
        let dir = TempDir::new().unwrap();
        let mut session = opened(&dir, "alice").await;

        type_line(&mut session, "cd /var/www").await;
        assert_eq!(session.current_dir(), "/var/www");

        type_line(&mut session, "cd ../logs/./x//y").await;
        assert_eq!(session.current_dir(), "/var/www/../logs/./x//y");

        type_line(&mut session, "cd ~").await;
        assert_eq!(session.current_dir(), "/home/alice");

        type_line(&mut session, "cd /tmp").await;
        type_line(&mut session, "cd").await;
        assert_eq!(session.current_dir(), "/home/alice");

        let out = type_line(&mut session, "pwd").await;
        assert_eq!(out.text(), "/home/alice\r\nalice@server:~$ ");
    }

    #[tokio::test]
    async fn test_canned_outputs() {
        let dir = TempDir::new().unwrap();
        let mut session = opened(&dir, "root").await;

        let out = type_line(&mut session, "ls").await;
        assert_eq!(
            out.text(),
            "Documents  Downloads  Pictures  Videos  secret.txt\r\nroot@server:~$ "
        );

        let out = type_line(&mut session, "cat secret.txt").await;
        assert!(out.text().starts_with("TOP_SECRET_KEY=abc123_confidential\r\n"));

        let out = type_line(&mut session, "wget http://x/y.sh").await;
        assert!(out
            .text()
            .starts_with("bash: wget http://x/y.sh: command not found\r\n"));
    }

    #[test]
    fn test_long_listing_depends_only_on_username() {
        let a = DecoySession::long_listing("bob");
        assert_eq!(a, DecoySession::long_listing("bob"));
        assert_ne!(a, DecoySession::long_listing("eve"));
        assert_eq!(a.lines().count(), 7);
        assert!(a.starts_with("drwxr-xr-x 2 bob bob 4096 .\r\n"));
        assert!(a.contains("drwxr-xr-x 12 root root 4096 ..\r\n"));
        assert!(a.ends_with("drwxr-xr-x 2 bob bob 4096 Videos"));
    }

    #[tokio::test]
    async fn test_exit_terminates_without_prompt() {
        let dir = TempDir::new().unwrap();
        let mut session = opened(&dir, "root").await;

        let out = type_line(&mut session, "exit").await;
        assert_eq!(out.text(), "logout\r\n");
        assert_eq!(out.exit_status, Some(0));
        assert_eq!(session.state(), DecoyState::Terminated);

        // Anything after logout is ignored and not logged.
        let out = type_line(&mut session, "whoami").await;
        assert!(out.data.is_empty());
        let logged = read_events(&dir.path().join("honeypot.log"), 10, None).unwrap();
        assert_eq!(logged.len(), 1);
    }

    #[tokio::test]
    async fn test_line_editing_with_echo() {
        let dir = TempDir::new().unwrap();
        let mut session = opened(&dir, "root").await;
        session.on_pty(PtyRequest::default());

        let mut out = BufferedOutput::default();
        session.on_data(b"whoo\x7fami\r\n", &mut out).await;
        assert_eq!(
            out.text(),
            "whoo\x08 \x08ami\r\nroot\r\nroot@server:~$ "
        );

        // Multi-byte characters are erased whole.
        let mut out = BufferedOutput::default();
        session.on_data("é".as_bytes(), &mut out).await;
        session.on_data(&[DELETE, DELETE], &mut out).await;
        session.on_data(b"pwd\r", &mut out).await;
        assert!(out.text().ends_with("/home/root\r\nroot@server:~$ "));

        let events = read_events(&dir.path().join("honeypot.log"), 10, None).unwrap();
        let commands: Vec<_> = events
            .iter()
            .map(|e| match e {
                Event::Command { command, .. } => command.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(commands, vec!["whoami", "pwd"]);
    }

    #[tokio::test]
    async fn test_ctrl_c_and_blank_lines_are_not_logged() {
        let dir = TempDir::new().unwrap();
        let mut session = opened(&dir, "root").await;

        let mut out = BufferedOutput::default();
        session.on_data(b"rm -rf /\x03", &mut out).await;
        assert_eq!(out.text(), "^C\r\nroot@server:~$ ");

        let out = type_line(&mut session, "   ").await;
        assert_eq!(out.text(), "root@server:~$ ");

        let path = dir.path().join("honeypot.log");
        assert!(read_events(&path, 10, Some(EventKind::Command))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_overlong_line_is_capped() {
        let dir = TempDir::new().unwrap();
        let mut session = opened(&dir, "root").await;
        session.on_pty(PtyRequest::default());

        let flood = vec![b'A'; MAX_LINE * 4];
        let mut out = BufferedOutput::default();
        session.on_data(&flood, &mut out).await;
        session.on_data(&flood, &mut out).await;
        assert_eq!(out.data.len(), MAX_LINE);

        let mut out = BufferedOutput::default();
        session.on_data(b"\r", &mut out).await;
        assert!(out.text().ends_with("root@server:~$ "));

        let events = read_events(&dir.path().join("honeypot.log"), 10, None).unwrap();
        match &events[..] {
            [Event::Command { command, .. }] => assert_eq!(command.len(), MAX_LINE),
            other => panic!("expected one command, got {:?}", other),
        }

        // The shell still works afterwards.
        let out = type_line(&mut session, "whoami").await;
        assert!(out.text().contains("root\r\nroot@server:~$ "));
    }

    #[tokio::test]
    async fn test_eof_runs_pending_line_then_exits() {
        let dir = TempDir::new().unwrap();
        let mut session = opened(&dir, "root").await;

        let mut out = BufferedOutput::default();
        session.on_data(b"whoami", &mut out).await;
        session.on_eof(&mut out).await;

        assert!(out.text().starts_with("root\r\n"));
        assert_eq!(out.exit_status, Some(0));
        assert_eq!(session.state(), DecoyState::Terminated);
    }
}
