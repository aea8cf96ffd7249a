//! Read side of the event log.
//!
//! Consumers only: nothing here writes to the log. Malformed lines are skipped and a
//! missing file reads as an empty log.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, trace, warn};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error_handling::types::StorageError;
use crate::storage::types::{Event, EventKind};

pub const DEFAULT_EVENT_LIMIT: usize = 200;
/// Window the overview aggregates are computed over.
pub const OVERVIEW_WINDOW: usize = 5000;
const TOP_N: usize = 10;

/// Returns the last `limit` events, oldest first, optionally restricted to one type.
pub fn read_events(
    path: &Path,
    limit: usize,
    kind: Option<EventKind>,
) -> Result<Vec<Event>, StorageError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::ReadFailed(e)),
    };

    let mut window: VecDeque<Event> = VecDeque::with_capacity(limit.min(OVERVIEW_WINDOW));
    let mut skipped = 0usize;
    for line in BufReader::new(file).split(b'\n') {
        let line = line.map_err(StorageError::ReadFailed)?;
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = match Event::from_line(line) {
            Ok(ev) => ev,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        if kind.is_some_and(|k| k != event.kind()) {
            continue;
        }
        if limit == 0 {
            continue;
        }
        if window.len() == limit {
            window.pop_front();
        }
        window.push_back(event);
    }
    if skipped > 0 {
        debug!("Skipped {} malformed line(s) in {}", skipped, path.display());
    }
    Ok(window.into_iter().collect())
}

/// Aggregates over a window of events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewStats {
    pub total_events: usize,
    pub total_login_attempts: usize,
    pub total_commands: usize,
    pub unique_ips: usize,
    pub top_usernames: Vec<(String, usize)>,
    pub top_passwords: Vec<(String, usize)>,
    pub top_commands: Vec<(String, usize)>,
}

impl OverviewStats {
    pub fn from_events(events: &[Event]) -> Self {
        let mut ips = HashSet::new();
        let mut usernames = Tally::default();
        let mut passwords = Tally::default();
        let mut commands = Tally::default();
        let mut logins = 0usize;
        let mut command_count = 0usize;

        for event in events {
            match event {
                Event::LoginAttempt {
                    username,
                    password,
                    client_ip,
                    ..
                } => {
                    logins += 1;
                    if !client_ip.is_empty() {
                        ips.insert(client_ip.as_str());
                    }
                    usernames.add(username);
                    passwords.add(password);
                }
                Event::Command { command, .. } => {
                    command_count += 1;
                    commands.add(command);
                }
            }
        }

        Self {
            total_events: events.len(),
            total_login_attempts: logins,
            total_commands: command_count,
            unique_ips: ips.len(),
            top_usernames: usernames.top(TOP_N),
            top_passwords: passwords.top(TOP_N),
            top_commands: commands.top(TOP_N),
        }
    }
}

pub fn overview(path: &Path) -> Result<OverviewStats, StorageError> {
    let events = read_events(path, OVERVIEW_WINDOW, None)?;
    Ok(OverviewStats::from_events(&events))
}

/// Frequency counter that breaks ties by first appearance.
#[derive(Default)]
struct Tally<'a> {
    counts: HashMap<&'a str, (usize, usize)>,
}

impl<'a> Tally<'a> {
    fn add(&mut self, value: &'a str) {
        if value.is_empty() {
            return;
        }
        let next = self.counts.len();
        self.counts.entry(value).or_insert((0, next)).0 += 1;
    }

    fn top(self, n: usize) -> Vec<(String, usize)> {
        let mut entries: Vec<_> = self.counts.into_iter().collect();
        entries.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        entries
            .into_iter()
            .take(n)
            .map(|(value, (count, _))| (value.to_string(), count))
            .collect()
    }
}

/// Follows the event log from its end, yielding records as they are appended.
///
/// The file is polled at a fixed interval. Only complete lines are delivered, in append
/// order; malformed lines are dropped. If the file shrinks it is assumed to have been
/// replaced and is read again from the start.
pub struct LogTail {
    path: PathBuf,
    poll_interval: Duration,
    position: u64,
    partial: Vec<u8>,
    ready: VecDeque<Event>,
}

impl LogTail {
    /// Starts following `path` from its current end, creating it empty if needed.
    pub async fn open(path: &Path, poll_interval: Duration) -> Result<Self, StorageError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(StorageError::ReadFailed)?;
        let position = file
            .metadata()
            .await
            .map_err(StorageError::ReadFailed)?
            .len();
        trace!("Tailing {} from offset {}", path.display(), position);

        Ok(Self {
            path: path.to_path_buf(),
            poll_interval,
            position,
            partial: Vec::new(),
            ready: VecDeque::new(),
        })
    }

    /// Waits for the next appended event.
    pub async fn next_event(&mut self) -> Event {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return event;
            }
            if let Err(e) = self.poll().await {
                warn!("Polling {} failed: {}", self.path.display(), e);
            }
            if self.ready.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    async fn poll(&mut self) -> Result<(), StorageError> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::ReadFailed(e)),
        };
        let len = file
            .metadata()
            .await
            .map_err(StorageError::ReadFailed)?
            .len();

        if len < self.position {
            debug!("{} shrank, reading from the start", self.path.display());
            self.position = 0;
            self.partial.clear();
        }
        if len == self.position {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.position))
            .await
            .map_err(StorageError::ReadFailed)?;
        let mut chunk = Vec::new();
        let read = file
            .read_to_end(&mut chunk)
            .await
            .map_err(StorageError::ReadFailed)?;
        self.position += read as u64;
        self.partial.extend_from_slice(&chunk);

        while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match Event::from_line(line) {
                Ok(event) => self.ready.push_back(event),
                Err(e) => trace!("Skipping malformed line: {}", e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::GeoInfo;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn login(user: &str, pass: &str, ip: &str) -> Event {
        Event::login_attempt(user, pass, ip, GeoInfo::default())
    }

    fn command(cmd: &str) -> Event {
        Event::command("root", "1.2.3.4", cmd, GeoInfo::default())
    }

    fn write_log(path: &Path, events: &[Event], junk: &[&str]) {
        let mut f = fs::File::create(path).unwrap();
        for (i, ev) in events.iter().enumerate() {
            writeln!(f, "{}", ev.to_line().unwrap()).unwrap();
            if let Some(j) = junk.get(i) {
                writeln!(f, "{}", j).unwrap();
            }
        }
    }

    fn append_raw(path: &Path, raw: &str) {
        let mut f = fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(raw.as_bytes()).unwrap();
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let events = read_events(&dir.path().join("absent.log"), 10, None).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_read_events_limit_filter_and_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("honeypot.log");
        let events = vec![
            login("root", "123456", "1.2.3.4"),
            command("ls"),
            command("whoami"),
            login("admin", "admin", "5.6.7.8"),
            command("pwd"),
        ];
        write_log(&path, &events, &["{broken", "", "not json at all"]);

        let all = read_events(&path, 100, None).unwrap();
        assert_eq!(all, events);

        let last_two = read_events(&path, 2, None).unwrap();
        assert_eq!(last_two, events[3..].to_vec());

        let commands = read_events(&path, 2, Some(EventKind::Command)).unwrap();
        assert_eq!(commands, vec![events[2].clone(), events[4].clone()]);

        let logins = read_events(&path, 100, Some(EventKind::LoginAttempt)).unwrap();
        assert_eq!(logins.len(), 2);
    }

    #[test]
    fn test_overview_stats() {
        let events = vec![
            login("root", "123456", "1.2.3.4"),
            login("root", "toor", "1.2.3.4"),
            login("admin", "123456", "5.6.7.8"),
            login("ubuntu", "ubuntu", "9.9.9.9"),
            command("ls"),
            command("uname -a"),
            command("ls"),
        ];
        let stats = OverviewStats::from_events(&events);

        assert_eq!(stats.total_events, 7);
        assert_eq!(stats.total_login_attempts, 4);
        assert_eq!(stats.total_commands, 3);
        assert_eq!(stats.unique_ips, 3);
        assert_eq!(
            stats.top_usernames,
            vec![
                ("root".to_string(), 2),
                ("admin".to_string(), 1),
                ("ubuntu".to_string(), 1)
            ]
        );
        assert_eq!(stats.top_passwords[0], ("123456".to_string(), 2));
        assert_eq!(stats.top_passwords[1], ("toor".to_string(), 1));
        assert_eq!(
            stats.top_commands,
            vec![("ls".to_string(), 2), ("uname -a".to_string(), 1)]
        );
    }

    #[test]
    fn test_overview_caps_at_ten() {
        let events: Vec<Event> = (0..15)
            .map(|i| login(&format!("user{}", i), "x", "1.2.3.4"))
            .collect();
        let stats = OverviewStats::from_events(&events);
        assert_eq!(stats.top_usernames.len(), 10);
        assert_eq!(stats.top_usernames[0].0, "user0");
        assert_eq!(stats.top_passwords, vec![("x".to_string(), 15)]);
    }

    #[tokio::test]
    async fn test_tail_delivers_appended_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("honeypot.log");
        write_log(&path, &[command("old")], &[]);

        let mut tail = LogTail::open(&path, Duration::from_millis(20)).await.unwrap();

        let first = command("first");
        let second = command("second");
        append_raw(&path, &format!("{}\nnonsense\n", first.to_line().unwrap()));
        // A line split across two writes is only delivered once complete.
        let line = second.to_line().unwrap();
        let (head, rest) = line.split_at(10);
        append_raw(&path, head);

        let got = tokio::time::timeout(Duration::from_secs(2), tail.next_event())
            .await
            .unwrap();
        assert_eq!(got, first);

        append_raw(&path, &format!("{}\n", rest));
        let got = tokio::time::timeout(Duration::from_secs(2), tail.next_event())
            .await
            .unwrap();
        assert_eq!(got, second);
    }

    #[tokio::test]
    async fn test_tail_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.log");

        let mut tail = LogTail::open(&path, Duration::from_millis(20)).await.unwrap();
        assert!(path.exists());

        let ev = login("root", "root", "1.2.3.4");
        append_raw(&path, &format!("{}\n", ev.to_line().unwrap()));
        let got = tokio::time::timeout(Duration::from_secs(2), tail.next_event())
            .await
            .unwrap();
        assert_eq!(got, ev);
    }

    #[tokio::test]
    async fn test_tail_restarts_after_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("honeypot.log");
        write_log(&path, &[command("one"), command("two"), command("three")], &[]);

        let mut tail = LogTail::open(&path, Duration::from_millis(20)).await.unwrap();
        let fresh = command("after-truncate");
        fs::write(&path, format!("{}\n", fresh.to_line().unwrap())).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), tail.next_event())
            .await
            .unwrap();
        assert_eq!(got, fresh);
    }
}
