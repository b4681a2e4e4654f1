//! Terminal peer for the line protocol: answers the username prompt, forwards
//! stdin lines, and prints what the server sends.

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{debug, warn};

use crate::{
    cli::ClientArgs,
    config::DEFAULT_MAX_LINE_LEN,
    connection::{LineError, LineReader, write_line},
    protocol::{USERNAME_PROMPT, parse_roster},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut client = TerminalClient::connect(&args).await?;
    client.handshake(&args.username).await?;
    print_line(&format!("*** connected as {}", args.username)).await?;

    let outcome = client.pump(BufReader::new(io::stdin())).await;
    client.hang_up().await;
    outcome
}

/// Roster lines become a readable list; everything else is shown verbatim.
pub fn render_server_line(line: &str) -> String {
    match parse_roster(line) {
        Some(names) if names.is_empty() => "*** nobody online".to_string(),
        Some(names) => format!("*** online: {}", names.join(", ")),
        None => line.to_string(),
    }
}

/// Why the pump loop stopped or kept going.
enum Step {
    Continue,
    Stop,
}

struct TerminalClient {
    server: LineReader<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TerminalClient {
    async fn connect(args: &ClientArgs) -> Result<Self> {
        let stream = TcpStream::connect(args.server)
            .await
            .with_context(|| format!("failed to connect to {}", args.server))?;
        debug!(server = %args.server, "connected");

        let (reader, writer) = stream.into_split();
        Ok(Self {
            server: LineReader::new(BufReader::new(reader), DEFAULT_MAX_LINE_LEN),
            writer,
        })
    }

    async fn handshake(&mut self, username: &str) -> Result<()> {
        match self.server.read_line().await? {
            Some(prompt) if prompt == USERNAME_PROMPT => {}
            Some(other) => warn!(line = %other, "unexpected greeting from server"),
            None => anyhow::bail!("server closed the connection before prompting"),
        }
        write_line(&mut self.writer, username).await?;
        Ok(())
    }

    async fn pump(&mut self, mut stdin: BufReader<Stdin>) -> Result<()> {
        let mut typed = String::new();
        loop {
            let step = select! {
                line = self.server.read_line() => on_server_line(line).await?,
                read = stdin.read_line(&mut typed) => {
                    let step = self.on_typed_line(read?, &typed).await?;
                    typed.clear();
                    step
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        warn!(?err, "ctrl-c handler failed");
                    }
                    Step::Stop
                }
            };
            if let Step::Stop = step {
                return Ok(());
            }
        }
    }

    async fn on_typed_line(&mut self, bytes: usize, typed: &str) -> Result<Step> {
        if bytes == 0 {
            return Ok(Step::Stop);
        }
        let text = typed.trim_end();
        if text.is_empty() {
            return Ok(Step::Continue);
        }

        write_line(&mut self.writer, text).await?;
        if text.eq_ignore_ascii_case("/quit") {
            print_line("*** leaving chat").await?;
            return Ok(Step::Stop);
        }
        Ok(Step::Continue)
    }

    async fn hang_up(mut self) {
        if let Err(err) = self.writer.shutdown().await {
            warn!(?err, "failed to shut down connection cleanly");
        }
    }
}

async fn on_server_line(line: Result<Option<String>, LineError>) -> Result<Step> {
    match line? {
        Some(line) => {
            print_line(&render_server_line(&line)).await?;
            Ok(Step::Continue)
        }
        None => {
            print_line("*** server closed the connection").await?;
            Ok(Step::Stop)
        }
    }
}

async fn print_line(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(format!("{line}\n").as_bytes()).await?;
    stdout.flush().await
}
