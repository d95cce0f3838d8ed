//! Session wiring.
//!
//! A transfer always pairs one sender with one receiver over a byte stream:
//! an in-memory duplex for local↔local, the stdio of a spawned `ssh` child
//! for `[user@]host:path`, or a TCP socket to a daemon for `host::path`.
//! The `--server` entry point runs the matching role over stdio on the far
//! end.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::cli::Config;
use crate::error::{Result, SyncError};
use crate::path::SyncPath;
use crate::protocol::{recv_message, send_message, Message, PeerKind, StreamTransport};
use crate::session::receiver::Receiver;
use crate::session::sender::Sender;
use crate::session::{SessionConfig, SyncStats};

/// Connection to a remote `rsyn --server` over ssh.
struct RemoteSession {
    child: Child,
    stdin: tokio::process::ChildStdin,
    stdout: tokio::process::ChildStdout,
}

impl RemoteSession {
    async fn connect_ssh(user: Option<&str>, host: &str, argv: &[String]) -> Result<RemoteSession> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-e").arg("none");
        if let Some(user) = user {
            cmd.arg("-l").arg(user);
        }
        cmd.arg(host).arg("--").arg("rsyn").arg("--server");
        cmd.args(argv);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| SyncError::Transport(format!("cannot spawn ssh: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::Transport("ssh stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Transport("ssh stdout unavailable".into()))?;
        Ok(RemoteSession {
            child,
            stdin,
            stdout,
        })
    }
}

fn parsed_paths(config: &Config) -> (Vec<SyncPath>, Option<SyncPath>) {
    let sources = config.sources.iter().map(|s| SyncPath::parse(s)).collect();
    let dest = config.destination.as_deref().map(SyncPath::parse);
    (sources, dest)
}

fn validate_local_sources(sources: &[SyncPath]) -> Result<()> {
    for source in sources {
        if let SyncPath::Local { path } = source {
            if std::fs::metadata(path.trim_end_matches('/')).is_err() {
                return Err(SyncError::Path(format!("missing source {path}")));
            }
        }
    }
    Ok(())
}

/// Run a client invocation: dispatch on the path schemes and drive the
/// local role to completion. Returns the receiver-side stats for local
/// destinations.
pub async fn run_client(config: Config, argv: Vec<String>) -> Result<SyncStats> {
    let (sources, dest) = parsed_paths(&config);
    let dest = dest.ok_or_else(|| SyncError::Path("missing destination".into()))?;

    let remote_source = sources.iter().any(|s| s.is_remote());
    if remote_source && dest.is_remote() {
        return Err(SyncError::Usage(
            "source and destination cannot both be remote".into(),
        ));
    }
    if remote_source && sources.len() > 1 {
        return Err(SyncError::Usage(
            "multiple sources cannot be used with a remote source".into(),
        ));
    }
    validate_local_sources(&sources)?;

    let source_paths: Vec<String> = sources.iter().map(|s| s.path().to_string()).collect();

    match (&sources[0], &dest) {
        (SyncPath::Ssh { user, host, .. }, _) => {
            // Remote source: the far end sends, we receive.
            let session =
                RemoteSession::connect_ssh(user.as_deref(), host, &argv).await?;
            run_receiver_session(&config, source_paths, dest.path().to_string(), session).await
        }
        (_, SyncPath::Ssh { user, host, .. }) => {
            let session =
                RemoteSession::connect_ssh(user.as_deref(), host, &argv).await?;
            run_sender_session(&config, source_paths, session).await
        }
        (SyncPath::Daemon { host, .. }, _) => {
            let (read, write) = daemon_handshake(&config, host, &argv).await?;
            let session_config =
                SessionConfig::new(&config, source_paths, dest.path().to_string());
            let stats = Receiver::new(session_config).run(read, write).await?;
            report(&config, &stats);
            Ok(stats)
        }
        (_, SyncPath::Daemon { host, .. }) => {
            let (read, write) = daemon_handshake(&config, host, &argv).await?;
            let session_config = SessionConfig::new(&config, source_paths, String::new());
            let mut transport = StreamTransport::new(read, write, config.timeout);
            Sender::new(session_config).run(&mut transport).await?;
            Ok(SyncStats::default())
        }
        (SyncPath::Local { .. }, SyncPath::Local { path }) => {
            let stats = run_local(&config, source_paths, path.clone()).await?;
            report(&config, &stats);
            Ok(stats)
        }
    }
}

/// Local↔local transfer: both roles in-process over an in-memory duplex,
/// which keeps the protocol semantics identical to the remote case.
async fn run_local(
    config: &Config,
    source_paths: Vec<String>,
    dest: String,
) -> Result<SyncStats> {
    let (near, far) = tokio::io::duplex(256 * 1024);
    let (near_read, near_write) = tokio::io::split(near);
    let (far_read, far_write) = tokio::io::split(far);

    let sender_config = SessionConfig::new(config, source_paths.clone(), String::new());
    let timeout = config.timeout;
    let sender_task = tokio::spawn(async move {
        let mut transport = StreamTransport::new(far_read, far_write, timeout);
        Sender::new(sender_config).run(&mut transport).await
    });

    let receiver_config = SessionConfig::new(config, source_paths, dest);
    let stats = Receiver::new(receiver_config).run(near_read, near_write).await?;

    sender_task
        .await
        .map_err(|e| SyncError::Transport(format!("sender task failed: {e}")))??;
    Ok(stats)
}

async fn run_receiver_session(
    config: &Config,
    source_paths: Vec<String>,
    dest: String,
    session: RemoteSession,
) -> Result<SyncStats> {
    let RemoteSession {
        mut child,
        stdin,
        stdout,
    } = session;
    let session_config = SessionConfig::new(config, source_paths, dest);
    let stats = Receiver::new(session_config).run(stdout, stdin).await?;
    child.wait().await.ok();
    report(config, &stats);
    Ok(stats)
}

async fn run_sender_session(
    config: &Config,
    source_paths: Vec<String>,
    session: RemoteSession,
) -> Result<SyncStats> {
    let RemoteSession {
        mut child,
        stdin,
        stdout,
    } = session;
    let session_config = SessionConfig::new(config, source_paths, String::new());
    let mut transport = StreamTransport::new(stdout, stdin, config.timeout);
    Sender::new(session_config).run(&mut transport).await?;
    child.wait().await.ok();
    Ok(SyncStats::default())
}

/// Connect to a daemon: raw `run <argv>` preamble, then the framed
/// identification exchange before the protocol proper starts.
async fn daemon_handshake(
    config: &Config,
    host: &str,
    argv: &[String],
) -> Result<(
    tokio::net::tcp::OwnedReadHalf,
    tokio::net::tcp::OwnedWriteHalf,
)> {
    let stream = TcpStream::connect((host, config.port))
        .await
        .map_err(|e| SyncError::Transport(format!("cannot reach daemon at {host}: {e}")))?;

    let (mut read, mut write) = stream.into_split();
    write
        .write_all(format!("run {}\n", argv.join(" ")).as_bytes())
        .await
        .map_err(SyncError::Io)?;

    {
        let mut transport = StreamTransport::new(&mut read, &mut write, config.timeout);
        let framing = Default::default();
        send_message(
            &mut transport,
            &Message::SocketIdentification(PeerKind::Client),
            &framing,
        )
        .await?;
        match recv_message(&mut transport, &framing).await? {
            Message::SocketIdentification(PeerKind::Server) => {}
            other => {
                return Err(SyncError::Transport(format!(
                    "daemon did not identify itself (got {:?})",
                    other.tag()
                )))
            }
        }
    }
    Ok((read, write))
}

/// Serve one `--server` invocation over stdio. The remote machine hosts
/// whichever endpoint carried its hostname, so the forwarded argv decides
/// the role: a remote-scheme source means this process sends, otherwise it
/// receives into the destination.
pub async fn run_server(config: Config) -> Result<()> {
    let (sources, dest) = parsed_paths(&config);
    let source_paths: Vec<String> = sources.iter().map(|s| s.path().to_string()).collect();

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    if sources.iter().any(|s| s.is_remote()) {
        let session_config = SessionConfig::new(&config, source_paths, String::new());
        let mut transport = StreamTransport::new(stdin, stdout, config.timeout);
        Sender::new(session_config).run(&mut transport).await
    } else {
        let dest = dest.ok_or_else(|| SyncError::Path("missing destination".into()))?;
        let session_config =
            SessionConfig::new(&config, source_paths, dest.path().to_string());
        Receiver::new(session_config).run(stdin, stdout).await?;
        Ok(())
    }
}

fn report(config: &Config, stats: &SyncStats) {
    if !config.quiet {
        tracing::info!("{}", stats.summary());
    }
}

/// Answer a daemon liveness probe on an already-accepted socket. Used by
/// the daemon accept loop; lives here with the rest of the preamble logic.
pub async fn answer_ping<W: tokio::io::AsyncWrite + Unpin>(mut write: W) -> std::io::Result<()> {
    let reply = format!("ok {}\n", std::process::id());
    write.write_all(reply.as_bytes()).await?;
    write.flush().await
}

/// Read the newline-terminated daemon preamble from a socket reader.
pub async fn read_preamble<R: tokio::io::AsyncRead + Unpin>(
    read: R,
) -> std::io::Result<(String, BufReader<R>)> {
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok((line.trim_end().to_string(), reader))
}
