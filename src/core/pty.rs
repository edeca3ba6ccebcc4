//! Shell process boundary
//!
//! A session talks to its shell only through tagged messages: it receives
//! `ProcessMessage`s (data, title, pid, exit) and sends `ProcessRequest`s
//! (input, resize). `PtyProcess` implements that channel on top of a native
//! pseudo terminal: a reader thread decodes PTY output into data messages,
//! then reports the exit code once the shell is gone.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::env::{EnvMap, ShellDescriptor};

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open pseudo terminal: {0}")]
    Open(#[source] anyhow::Error),

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to attach to PTY output: {0}")]
    Reader(#[source] anyhow::Error),

    #[error("Failed to attach to PTY input: {0}")]
    Writer(#[source] anyhow::Error),

    #[error("Failed to start PTY reader thread: {0}")]
    Thread(#[source] io::Error),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to resize PTY: {0}")]
    Resize(#[source] anyhow::Error),

    #[error("Process channel is disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// Message from the shell side to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessMessage {
    /// Output to display, verbatim
    Data(String),
    /// Title reported by the shell side
    Title(String),
    /// The shell is running with this process id
    Pid(u32),
    /// The shell exited; 0 is a clean exit
    Exit(i32),
}

/// Message from the session to the shell side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessRequest {
    Input(String),
    Resize { cols: u16, rows: u16 },
}

/// Everything needed to start a shell
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub shell: ShellDescriptor,
    pub cwd: String,
    pub env: EnvMap,
    pub cols: u16,
    pub rows: u16,
    /// Bound on undelivered output chunks
    pub output_queue_limit: usize,
}

/// Session-side handle on a running shell
pub trait ShellProcess {
    fn send(&mut self, request: ProcessRequest) -> Result<()>;
    /// Next pending message, if any, in send order
    fn try_recv(&mut self) -> Option<ProcessMessage>;
    fn is_connected(&self) -> bool;
    fn kill(&mut self);
}

/// Starts shells for sessions
pub trait ProcessSpawner {
    fn spawn(&self, launch: &LaunchConfig) -> Result<Box<dyn ShellProcess>>;
}

/// Spawns shells in native pseudo terminals
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl ProcessSpawner for PtySpawner {
    fn spawn(&self, launch: &LaunchConfig) -> Result<Box<dyn ShellProcess>> {
        Ok(Box::new(PtyProcess::spawn(launch)?))
    }
}

/// A shell running in a pseudo terminal
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    receiver: Receiver<ProcessMessage>,
    connected: Arc<AtomicBool>,
}

impl PtyProcess {
    pub fn spawn(launch: &LaunchConfig) -> Result<Self> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: launch.rows.max(1),
                cols: launch.cols.max(1),
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::Open)?;

        let mut cmd = CommandBuilder::new(&launch.shell.executable);
        cmd.args(&launch.shell.args);
        cmd.cwd(&launch.cwd);
        cmd.env_clear();
        for (key, value) in &launch.env {
            cmd.env(key, value);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|source| PtyError::Spawn {
            command: launch.shell.display_command(),
            source,
        })?;
        // Only the child keeps the slave side open, so reads see EOF on exit
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(PtyError::Reader)?;
        let writer = pair.master.take_writer().map_err(PtyError::Writer)?;
        let killer = child.clone_killer();

        let (tx, rx) = mpsc::sync_channel(launch.output_queue_limit.max(4));
        let connected = Arc::new(AtomicBool::new(true));

        if let Some(pid) = child.process_id() {
            info!("Shell started with pid {}", pid);
            let _ = tx.send(ProcessMessage::Pid(pid));
        }
        let _ = tx.send(ProcessMessage::Title(shell_name(&launch.shell.executable)));

        let running = connected.clone();
        thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || {
                pump_output(reader, &tx);
                let code = wait_exit_code(child.as_mut());
                running.store(false, Ordering::SeqCst);
                debug!("Shell exited with code {}", code);
                let _ = tx.send(ProcessMessage::Exit(code));
            })
            .map_err(PtyError::Thread)?;

        Ok(Self {
            master: pair.master,
            writer,
            killer,
            receiver: rx,
            connected,
        })
    }
}

impl ShellProcess for PtyProcess {
    fn send(&mut self, request: ProcessRequest) -> Result<()> {
        if !self.is_connected() {
            return Err(PtyError::Disconnected);
        }
        match request {
            ProcessRequest::Input(data) => {
                self.writer.write_all(data.as_bytes()).map_err(PtyError::Write)?;
                self.writer.flush().map_err(PtyError::Write)
            }
            ProcessRequest::Resize { cols, rows } => self
                .master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(PtyError::Resize),
        }
    }

    fn try_recv(&mut self) -> Option<ProcessMessage> {
        match self.receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.connected.store(false, Ordering::SeqCst);
                None
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kill(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.killer.kill() {
            warn!("Failed to kill shell: {}", e);
        }
    }
}

/// Read PTY output until EOF, forwarding decoded text and titles
fn pump_output(mut reader: Box<dyn Read + Send>, tx: &SyncSender<ProcessMessage>) {
    let mut buffer = vec![0u8; 4096];
    let mut decoder = Utf8Decoder::default();
    let mut titles = TitleScanner::default();

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buffer[..n]);
                if text.is_empty() {
                    continue;
                }
                for title in titles.feed(&text) {
                    if tx.send(ProcessMessage::Title(title)).is_err() {
                        return;
                    }
                }
                // Blocks while the queue is full, which stalls the shell
                // rather than growing memory
                if tx.send(ProcessMessage::Data(text)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // EIO on Linux once the slave side is closed
            Err(_) => break,
        }
    }
}

fn wait_exit_code(child: &mut (dyn Child + Send + Sync)) -> i32 {
    match child.wait() {
        Ok(status) => i32::try_from(status.exit_code()).unwrap_or(i32::MAX),
        Err(e) => {
            warn!("Failed to wait for shell: {}", e);
            1
        }
    }
}

/// Basename of an executable path, used as the initial title
pub fn shell_name(executable: &str) -> String {
    let name = executable.rsplit(['/', '\\']).next().unwrap_or(executable);
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

/// Incremental UTF-8 decoder that keeps split sequences between chunks
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        // Incomplete sequence at the end: wait for more bytes
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }
}

/// Longest unterminated OSC sequence carried into the next chunk
const MAX_OSC_CARRY: usize = 4096;

/// Finds OSC 0 / OSC 2 titles across chunk boundaries
#[derive(Debug, Default)]
pub struct TitleScanner {
    carry: String,
}

impl TitleScanner {
    /// Titles completed by `text`
    pub fn feed(&mut self, text: &str) -> Vec<String> {
        let mut joined = std::mem::take(&mut self.carry);
        joined.push_str(text);

        let (titles, open) = scan_osc_titles(&joined);
        if let Some(start) = open {
            if joined.len() - start <= MAX_OSC_CARRY {
                self.carry = joined[start..].to_string();
            }
        }
        titles
    }
}

/// Titles set through OSC 0 / OSC 2 sequences in `text`, plus the offset of
/// a trailing sequence still open
fn scan_osc_titles(text: &str) -> (Vec<String>, Option<usize>) {
    let mut titles = Vec::new();
    let mut offset = 0;

    while let Some(found) = text[offset..].find('\x1b') {
        let start = offset + found;
        let rest = &text[start + 1..];
        if rest.is_empty() {
            return (titles, Some(start));
        }
        if !rest.starts_with(']') {
            offset = start + 1;
            continue;
        }

        let body = &rest[1..];
        let Some(sep) = body.find(';') else {
            return (titles, Some(start));
        };
        let code = &body[..sep];
        let payload = &body[sep + 1..];

        let end = [payload.find('\x07'), payload.find("\x1b\\")]
            .into_iter()
            .flatten()
            .min();
        let Some(end) = end else {
            return (titles, Some(start));
        };

        if code == "0" || code == "2" {
            titles.push(payload[..end].to_string());
        }
        // Resume just past the first byte of the terminator
        offset = text.len() - payload.len() + end + 1;
    }
    (titles, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_decoder_keeps_split_sequences() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo→".as_bytes();
        let (a, b) = bytes.split_at(2);
        assert_eq!(decoder.decode(a), "h");
        assert_eq!(decoder.decode(b), "éllo→");
    }

    #[test]
    fn test_utf8_decoder_replaces_invalid() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn test_extract_osc_titles() {
        let text = "x\x1b]0;bash: ~\x07y\x1b]2;vim\x1b\\z\x1b]7;file:///tmp\x07";
        assert_eq!(TitleScanner::default().feed(text), vec!["bash: ~".to_string(), "vim".to_string()]);
        assert!(TitleScanner::default().feed("\x1b]0;unterminated").is_empty());
    }

    #[test]
    fn test_title_split_across_chunks() {
        let mut scanner = TitleScanner::default();
        assert!(scanner.feed("out\x1b]0;make: bu").is_empty());
        assert_eq!(scanner.feed("ild\x07more"), vec!["make: build".to_string()]);

        // Split inside the introducer and inside the ST terminator
        assert!(scanner.feed("x\x1b").is_empty());
        assert!(scanner.feed("]2;vim\x1b").is_empty());
        assert_eq!(scanner.feed("\\"), vec!["vim".to_string()]);
        assert!(scanner.feed("plain").is_empty());
    }

    #[test]
    fn test_shell_name() {
        assert_eq!(shell_name("/usr/bin/bash"), "bash");
        assert_eq!(shell_name("C:\\Windows\\System32\\cmd.exe"), "cmd");
        assert_eq!(shell_name("pwsh"), "pwsh");
    }

    #[cfg(unix)]
    #[test]
    fn test_pty_process_reports_pid_data_and_exit() {
        use std::time::{Duration, Instant};

        let launch = LaunchConfig {
            shell: ShellDescriptor::new("/bin/sh", vec!["-c".to_string(), "echo ready; exit 3".to_string()]),
            cwd: "/".to_string(),
            env: crate::core::env::current_env(),
            cols: 80,
            rows: 24,
            output_queue_limit: 16,
        };
        let mut process = PtySpawner.spawn(&launch).expect("spawn /bin/sh");

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut output = String::new();
        let mut pid = None;
        let mut exit = None;
        while Instant::now() < deadline && exit.is_none() {
            match process.try_recv() {
                Some(ProcessMessage::Data(text)) => output.push_str(&text),
                Some(ProcessMessage::Pid(p)) => pid = Some(p),
                Some(ProcessMessage::Exit(code)) => exit = Some(code),
                Some(ProcessMessage::Title(_)) => {}
                None => thread::sleep(Duration::from_millis(10)),
            }
        }

        assert!(pid.is_some());
        assert!(output.contains("ready"), "output was {:?}", output);
        assert_eq!(exit, Some(3));
        assert!(!process.is_connected());
    }
}
