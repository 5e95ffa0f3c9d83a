use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing_subscriber::EnvFilter;

use adapter_console::http::HttpTransport;
use adapter_console::options::{
    parse_flag, SessionOptions, ToolCallMode, TransportOptions, DEFAULT_BASE_URL, DEFAULT_MODEL,
};
use adapter_console::proxy_api::{ConfigUpdate, ProxyApi};
use adapter_console::{ClientError, Completion, Message, Role, Session, SessionHandle};

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive test console for a tool-call adapter proxy", long_about = None)]
struct Cli {
    /// Base URL of the adapter proxy
    #[arg(long, env = "ADAPTER_CONSOLE_URL", default_value = DEFAULT_BASE_URL)]
    url: String,

    /// Model to request
    #[arg(short, long, env = "ADAPTER_CONSOLE_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Request streamed (SSE) completions
    #[arg(short, long, env = "ADAPTER_CONSOLE_STREAM")]
    stream: bool,

    /// File holding the system prompt (tool definitions included)
    #[arg(long)]
    system_prompt_file: Option<PathBuf>,

    /// How streamed tool-call deltas are shown
    #[arg(long, value_enum, default_value = "marker")]
    tool_calls: ToolCallArg,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Extra request header, `Name: value`; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Log filter
    #[arg(long, env = "RUST_LOG", default_value = "adapter_console=info")]
    log: String,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ToolCallArg {
    Marker,
    Structured,
}

impl From<ToolCallArg> for ToolCallMode {
    fn from(arg: ToolCallArg) -> Self {
        match arg {
            ToolCallArg::Marker => ToolCallMode::Marker,
            ToolCallArg::Structured => ToolCallMode::Structured,
        }
    }
}

/// One line of operator input.
#[derive(Debug, PartialEq)]
enum Input {
    Chat(String),
    System(Option<String>),
    Tools,
    Model(String),
    Stream(bool),
    Reset,
    History,
    Models,
    Probe,
    Config,
    ConfigSet(String, String),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Input::Chat(line.to_string());
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map(|(n, r)| (n, r.trim()))
            .unwrap_or((command, ""));

        match (name, rest) {
            ("system", "") => Input::System(None),
            ("system", prompt) => Input::System(Some(prompt.to_string())),
            ("tools", _) => Input::Tools,
            ("model", model) if !model.is_empty() => Input::Model(model.to_string()),
            ("stream", flag) if !flag.is_empty() => Input::Stream(parse_flag(flag)),
            ("reset", _) => Input::Reset,
            ("history", _) => Input::History,
            ("models", _) => Input::Models,
            ("probe", _) => Input::Probe,
            ("config", "") => Input::Config,
            ("config", args) => match args
                .strip_prefix("set")
                .map(str::trim)
                .and_then(|kv| kv.split_once(char::is_whitespace))
            {
                Some((key, value)) => Input::ConfigSet(key.to_string(), value.trim().to_string()),
                None => Input::Unknown(line.to_string()),
            },
            ("help", _) => Input::Help,
            ("quit", _) | ("exit", _) => Input::Quit,
            _ => Input::Unknown(line.to_string()),
        }
    }
}

const HELP: &str = "\
commands:
  <text>                      send as user message
  /system [prompt]            set (or clear) the raw system prompt
  /tools                      parse tool definitions from the system prompt via the proxy
  /model <id>                 switch model
  /stream on|off              toggle streaming
  /reset                      clear the conversation
  /history                    print the conversation
  /models                     list models through the proxy
  /probe                      check the proxy's upstream
  /config                     show proxy config
  /config set <key> <value>   update one proxy config field
  /quit";

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header must look like `Name: value`, got {:?}", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn print_message(index: usize, message: &Message) {
    println!("[{}] {}: {}", index, message.role(), message.text());
    for call in message.tool_calls() {
        println!(
            "      tool_call {} {}({})",
            call.id, call.function.name, call.function.arguments
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut transport_options = TransportOptions::default().with_base_url(cli.url.clone());
    if let Some(secs) = cli.timeout {
        transport_options = transport_options.with_timeout(Duration::from_secs(secs));
    }
    for raw in &cli.headers {
        let (name, value) = parse_header(raw)?;
        transport_options = transport_options.with_header(name, value);
    }

    let mut options = SessionOptions::new(cli.model.clone())
        .with_stream(cli.stream)
        .with_tool_call_mode(cli.tool_calls.into());
    if let Some(path) = &cli.system_prompt_file {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("reading system prompt from {}", path.display()))?;
        options = options.with_system_prompt(prompt);
    }

    let api = ProxyApi::new(transport_options.clone())?;
    let transport = HttpTransport::new(transport_options)?;
    let handle = SessionHandle::spawn(Session::new(transport, options));

    println!("adapter-console -> {} (type /help)", cli.url);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // Once a handler is registered SIGINT no longer terminates the process,
    // so the prompt listens for it as well.
    while let Some(line) = next_line_or_interrupt(&mut lines, tokio::signal::ctrl_c()).await? {
        match Input::parse(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Help => println!("{}", HELP),
            Input::Chat(text) => chat(&handle, text).await?,
            Input::System(prompt) => {
                let cleared = prompt.is_none();
                handle
                    .update_options(move |o| {
                        o.system_prompt = prompt;
                        o.processed_system_prompt = None;
                    })
                    .await?;
                println!("{}", if cleared { "system prompt cleared" } else { "system prompt set" });
            }
            Input::Tools => {
                let options = handle.options().await?;
                let Some(prompt) = options.system_prompt.filter(|p| !p.is_empty()) else {
                    println!("no system prompt set");
                    continue;
                };
                match api.parse_tools(&prompt, None).await {
                    Ok(definitions) => {
                        println!(
                            "{} tool(s): {}",
                            definitions.schemas.len(),
                            definitions.tool_names().join(", ")
                        );
                        handle.apply_tool_definitions(definitions).await?;
                    }
                    Err(e) => println!("tool parsing failed: {}", e),
                }
            }
            Input::Model(model) => {
                handle.update_options(move |o| o.model = model).await?;
            }
            Input::Stream(stream) => {
                handle.update_options(move |o| o.stream = stream).await?;
                println!("streaming {}", if stream { "on" } else { "off" });
            }
            Input::Reset => {
                handle.reset().await?;
                println!("conversation cleared");
            }
            Input::History => {
                for (i, message) in handle.messages().await?.iter().enumerate() {
                    print_message(i, message);
                }
            }
            Input::Models => match api.list_models().await {
                Ok(models) => models.data.iter().for_each(|m| println!("  {}", m.id)),
                Err(e) => println!("model listing failed: {}", e),
            },
            Input::Probe => match api.probe_upstream().await {
                Ok(probe) if probe.ok => println!(
                    "upstream ok (status {}, {:.0} ms)",
                    probe.status_code.unwrap_or_default(),
                    probe.latency_ms
                ),
                Ok(probe) => println!(
                    "upstream unreachable: {} ({:.0} ms)",
                    probe
                        .error
                        .or(probe.status_code.map(|s| format!("status {}", s)))
                        .unwrap_or_default(),
                    probe.latency_ms
                ),
                Err(e) => println!("probe failed: {}", e),
            },
            Input::Config => match api.config().await {
                Ok(config) => println!("{}", serde_json::to_string_pretty(&config)?),
                Err(e) => println!("config fetch failed: {}", e),
            },
            Input::ConfigSet(key, value) => {
                let mut update = ConfigUpdate::default();
                if let Err(e) = update.set(&key, &value) {
                    println!("{}", e);
                    continue;
                }
                match api.update_config(&update).await {
                    Ok(config) => println!("{}", serde_json::to_string_pretty(&config)?),
                    Err(e) => println!("config update failed: {}", e),
                }
            }
            Input::Unknown(line) => println!("unknown command: {} (type /help)", line),
        }
    }

    Ok(())
}

/// Next input line; `None` at end of input or once `interrupt` fires.
async fn next_line_or_interrupt<R, F>(
    lines: &mut Lines<R>,
    interrupt: F,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        signal = interrupt => {
            signal.context("installing Ctrl-C handler")?;
            println!();
            Ok(None)
        }
    }
}

/// Send one user message; Ctrl-C while waiting resets the session. A failure
/// to install the signal handler leaves the send running.
async fn chat(handle: &SessionHandle, text: String) -> Result<()> {
    let before = handle.messages().await?.len();

    let send = handle.send(Message::new(Role::User, text));
    tokio::pin!(send);
    let result = tokio::select! {
        result = &mut send => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            handle.reset().await?;
            send.await
        }
    };

    match result {
        Ok(completion) => {
            let messages = handle.messages().await?;
            for (i, message) in messages.iter().enumerate().skip(before + 1) {
                print_message(i, message);
            }
            match completion {
                Completion::Streamed(summary) => {
                    for error in &summary.errors {
                        println!("  stream error: {}", error);
                    }
                    println!(
                        "  ({} frame(s), {} skipped, {} message(s){}{})",
                        summary.frames,
                        summary.skipped,
                        summary.committed,
                        if summary.done { ", [DONE]" } else { "" },
                        if summary.implicit_finish { ", no finish_reason" } else { "" },
                    )
                }
                Completion::Document(document) => {
                    if document.get("choices").map_or(true, |c| c.as_array().map_or(true, Vec::is_empty)) {
                        println!("{}", serde_json::to_string_pretty(&document)?);
                    }
                }
            }
        }
        Err(ClientError::StreamCancelled) => println!("stream abandoned, conversation cleared"),
        Err(ClientError::UnsupportedStreaming) => {
            println!("streaming not supported by this response; try /stream off")
        }
        Err(e) => println!("request failed: {}", e),
    }
    Ok(())
}
