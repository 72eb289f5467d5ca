//! Line-oriented chat client for a terminal.
//!
//! `@<userId> <text>` sends a message, `/quit` leaves. Every message the user
//! sends or receives is printed as `[#id] from -> to: text`.

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::{
    io::{self, AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{info, warn};

use crate::{
    cli::ChatArgs,
    error::TransportError,
    message::{Message, UserId},
    protocol::{ClientFrame, FrameReader, ServerFrame, frame_limit, write_frame},
};

const USAGE: &str = "usage: @<userId> <text>";

/// One line typed by the user.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Blank,
    Quit,
    Send { to_id: UserId, text: String },
    Invalid,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Blank;
        }
        if line.eq_ignore_ascii_case("/quit") {
            return Input::Quit;
        }

        let Some(rest) = line.strip_prefix('@') else {
            return Input::Invalid;
        };
        let Some((target, text)) = rest.split_once(char::is_whitespace) else {
            return Input::Invalid;
        };
        let text = text.trim();
        match target.parse::<u64>() {
            Ok(to_id) if !text.is_empty() => Input::Send {
                to_id: UserId(to_id),
                text: text.to_string(),
            },
            _ => Input::Invalid,
        }
    }
}

pub fn render_message(message: &Message) -> String {
    format!(
        "[#{}] {} -> {}: {}",
        message.id(),
        message.from_id(),
        message.to_id(),
        message.text()
    )
}

pub async fn run(args: ChatArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    let mut server = FrameReader::new(reader, frame_limit(args.max_text_len));
    send_handshake(&mut writer, args.user).await?;

    let mut input = FramedRead::new(
        tokio::io::stdin(),
        LinesCodec::new_with_max_length(frame_limit(args.max_text_len)),
    );

    select! {
        result = run_chat_loop(&mut server, &mut input, &mut writer) => result?,
        ctrl_c = tokio::signal::ctrl_c() => handle_ctrl_c(ctrl_c),
    }
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ChatArgs) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    Ok(stream.into_split())
}

async fn send_handshake(writer: &mut OwnedWriteHalf, user_id: UserId) -> Result<()> {
    write_frame(writer, &ClientFrame::Hello { user_id }).await?;
    Ok(())
}

/// Both sides are read through framed streams that keep partial lines
/// buffered, so losing a `select!` race never drops input.
async fn run_chat_loop<R, I, W>(
    server: &mut FrameReader<R>,
    input: &mut FramedRead<I, LinesCodec>,
    writer: &mut W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    I: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        select! {
            server_frame = server.next_frame::<ServerFrame>() => {
                if !handle_server_frame(server_frame).await? {
                    break;
                }
            }
            line = input.next() => {
                if !handle_input_line(line, writer).await? {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn handle_server_frame(frame: Result<Option<ServerFrame>, TransportError>) -> Result<bool> {
    match frame? {
        Some(frame) => {
            render_server_frame(frame).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_input_line<W>(
    line: Option<Result<String, LinesCodecError>>,
    writer: &mut W,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let Some(line) = line else {
        return Ok(false);
    };
    let line = line.context("failed to read from stdin")?;

    match Input::parse(&line) {
        Input::Blank => Ok(true),
        Input::Quit => {
            write_stdout("*** leaving chat").await?;
            Ok(false)
        }
        Input::Send { to_id, text } => {
            write_frame(writer, &ClientFrame::Send { to_id, text }).await?;
            Ok(true)
        }
        Input::Invalid => {
            write_stderr(&format!("!!! {USAGE}")).await?;
            Ok(true)
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown chat writer cleanly");
    }
}

async fn render_server_frame(frame: ServerFrame) -> io::Result<()> {
    match frame {
        ServerFrame::Welcome { user_id } => {
            write_stdout(&format!("*** connected as user {user_id}")).await
        }
        ServerFrame::Message { message } => write_stdout(&render_message(&message)).await,
        ServerFrame::Error { message } => write_stderr(&format!("!!! {message}")).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
