use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use hubwire::{
    ClientConfig, ClientError, Connection, ConnectionEvent, HubConnection, HubOptions, Net, NetError, StartOptions,
    StopOptions, TransportPreference,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("network setup failed: {0}")]
    Net(#[from] NetError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("failed to wait for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "hubwire", about = "Real-time hub client")]
struct Cli {
    #[arg(long, env = "HUBWIRE_URL")]
    url: String,

    /// `auto`, or a comma-separated list such as `webSockets,longPolling`.
    #[arg(long, env = "HUBWIRE_TRANSPORT", default_value = "auto")]
    transport: TransportPreference,

    #[arg(long, env = "HUBWIRE_JSONP", default_value_t = false)]
    jsonp: bool,

    /// Use the URL as given instead of appending `/signalr`.
    #[arg(long, default_value_t = false)]
    no_default_path: bool,

    #[arg(long, short, env = "HUBWIRE_VERBOSE", default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call a hub method and print its result.
    Invoke {
        #[arg(long)]
        hub: String,
        method: String,
        #[arg(help = "Arguments as JSON; anything unparsable is sent as a string")]
        args: Vec<String>,
    },
    /// Print server calls to the given hub events until ctrl-c.
    Listen {
        #[arg(long)]
        hub: String,
        #[arg(long = "event", required = true)]
        events: Vec<String>,
    },
    /// Send a raw payload on a persistent connection and print what comes back.
    Send {
        data: String,
        #[arg(long, default_value_t = 5)]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let mut config = ClientConfig::from_env();
    config.logging |= cli.verbose;
    let net = Net::standard()?;
    let options = StartOptions { transport: cli.transport, jsonp: cli.jsonp };
    let hub_options = HubOptions { use_default_path: !cli.no_default_path, query: None, config: config.clone() };

    match cli.command {
        Command::Invoke { hub, method, args } => {
            run_invoke(HubConnection::new(cli.url, hub_options, net), options, &hub, &method, &args).await
        }
        Command::Listen { hub, events } => {
            run_listen(HubConnection::new(cli.url, hub_options, net), options, &hub, &events).await
        }
        Command::Send { data, wait_secs } => {
            run_send(Connection::new(cli.url, config, net), options, data, Duration::from_secs(wait_secs)).await
        }
    }
}

async fn run_invoke(
    connection: HubConnection,
    options: StartOptions,
    hub: &str,
    method: &str,
    args: &[String],
) -> Result<(), CliError> {
    let proxy = connection.create_proxy(hub);
    connection.start(options).await?;

    let args = args.iter().map(|raw| parse_arg(raw)).collect();
    let outcome = proxy.invoke(method, args).await;
    connection.stop_with(StopOptions { wait_for_abort: true, notify_server: true }).await;

    print_json(&outcome?)
}

async fn run_listen(
    connection: HubConnection,
    options: StartOptions,
    hub: &str,
    events: &[String],
) -> Result<(), CliError> {
    let proxy = connection.create_proxy(hub);
    for event in events {
        let name = event.clone();
        proxy.on(event, move |args| {
            let line = serde_json::json!({ "event": name, "args": args });
            println!("{line}");
        });
    }
    log_lifecycle(connection.connection());

    connection.start(options).await?;
    tracing::info!(hub, "listening; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    connection.stop_with(StopOptions { wait_for_abort: true, notify_server: true }).await;
    Ok(())
}

async fn run_send(connection: Connection, options: StartOptions, data: String, wait: Duration) -> Result<(), CliError> {
    connection.subscribe(|event| {
        if let ConnectionEvent::Received(value) = event {
            println!("{value}");
        }
    });
    log_lifecycle(&connection);

    connection.start(options).await?;
    connection.send(data)?;
    tokio::select! {
        () = tokio::time::sleep(wait) => {}
        signal = tokio::signal::ctrl_c() => signal?,
    }
    connection.stop_with(StopOptions { wait_for_abort: true, notify_server: true }).await;
    Ok(())
}

fn log_lifecycle(connection: &Connection) {
    connection.subscribe(|event| match event {
        ConnectionEvent::StateChanged { old, new } => tracing::info!(%old, %new, "state changed"),
        ConnectionEvent::Error(err) => tracing::warn!(code = err.error_code(), error = %err, "connection error"),
        ConnectionEvent::ConnectionSlow => tracing::warn!("connection slow"),
        _ => {}
    });
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
