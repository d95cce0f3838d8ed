//! Daemon mode: a TCP accept loop serving transfer sessions.
//!
//! Each connection starts with a raw newline-terminated preamble (`ping`
//! for liveness, or `run <argv...>` carrying the client's options) followed
//! by the framed SOCKET_IDENTIFICATION exchange and the normal protocol.
//! Detaching from the terminal is left to the process supervisor; the
//! accept loop itself runs in the foreground.

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{tcp::OwnedReadHalf, tcp::OwnedWriteHalf, TcpListener, TcpStream};

use crate::cli::{Cli, Config};
use crate::error::{Result, SyncError};
use crate::path::SyncPath;
use crate::protocol::{recv_message, send_message, Message, PeerKind, StreamTransport};
use crate::session::receiver::Receiver;
use crate::session::sender::Sender;
use crate::session::SessionConfig;
use crate::transfer::{answer_ping, read_preamble};
use clap::Parser;

pub async fn run_daemon(config: Config) -> Result<()> {
    if let Some(pid) = probe_running(&config).await {
        return Err(SyncError::Usage(format!(
            "daemon already running with pid {pid}"
        )));
    }

    let listener = TcpListener::bind((config.address.as_str(), config.port))
        .await
        .map_err(|e| {
            SyncError::Transport(format!(
                "cannot bind {}:{}: {e}",
                config.address, config.port
            ))
        })?;
    tracing::info!("daemon listening on {}:{}", config.address, config.port);

    loop {
        let (stream, peer) = listener.accept().await.map_err(SyncError::Io)?;
        tracing::debug!("connection from {peer}");
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream).await {
                tracing::warn!("session from {peer} failed: {err}");
            }
        });
    }
}

/// Probe whether another daemon already answers on the configured port.
async fn probe_running(config: &Config) -> Option<u32> {
    let mut stream = TcpStream::connect((config.address.as_str(), config.port))
        .await
        .ok()?;
    stream.write_all(b"ping\n").await.ok()?;
    let mut reply = vec![0u8; 64];
    let n = stream.read(&mut reply).await.ok()?;
    let reply = String::from_utf8_lossy(&reply[..n]);
    reply
        .strip_prefix("ok ")
        .and_then(|pid| pid.trim().parse().ok())
}

async fn handle_connection(stream: TcpStream) -> Result<()> {
    let (read, write) = stream.into_split();
    let (line, reader) = read_preamble(read).await.map_err(SyncError::Io)?;

    if line == "ping" {
        return answer_ping(write).await.map_err(SyncError::Io);
    }

    let Some(args) = line.strip_prefix("run ") else {
        return Err(SyncError::Transport(format!("invalid command {line:?}")));
    };
    let argv: Vec<&str> = args.split_whitespace().collect();
    tracing::debug!("running session with args {argv:?}");

    let cli = Cli::try_parse_from(std::iter::once("rsyn").chain(argv))
        .map_err(|e| SyncError::Usage(e.to_string()))?;
    let config = Config::from_cli(cli)?;

    serve_session(config, reader, write).await
}

/// Run the role this daemon hosts. The endpoint whose argument carried the
/// daemon scheme lives on this machine: a daemon-scheme source makes this
/// process the sender, a daemon-scheme destination the receiver.
async fn serve_session(
    config: Config,
    mut reader: BufReader<OwnedReadHalf>,
    mut write: OwnedWriteHalf,
) -> Result<()> {
    {
        let mut transport = StreamTransport::new(&mut reader, &mut write, config.timeout);
        let framing = Default::default();
        match recv_message(&mut transport, &framing).await? {
            Message::SocketIdentification(PeerKind::Client) => {}
            other => {
                return Err(SyncError::Transport(format!(
                    "expected client identification, got {:?}",
                    other.tag()
                )))
            }
        }
        send_message(
            &mut transport,
            &Message::SocketIdentification(PeerKind::Server),
            &framing,
        )
        .await?;
    }

    let sources: Vec<SyncPath> = config.sources.iter().map(|s| SyncPath::parse(s)).collect();
    let source_paths: Vec<String> = sources.iter().map(|s| s.path().to_string()).collect();

    if sources.iter().any(|s| matches!(s, SyncPath::Daemon { .. })) {
        let session_config = SessionConfig::new(&config, source_paths, String::new());
        let mut transport = StreamTransport::new(reader, write, config.timeout);
        Sender::new(session_config).run(&mut transport).await
    } else {
        let dest = config
            .destination
            .as_deref()
            .map(SyncPath::parse)
            .ok_or_else(|| SyncError::Path("missing destination".into()))?;
        let session_config =
            SessionConfig::new(&config, source_paths, dest.path().to_string());
        Receiver::new(session_config).run(reader, write).await?;
        Ok(())
    }
}
