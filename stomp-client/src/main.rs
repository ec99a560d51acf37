use stomp_client::config::ClientConfig;
use stomp_client::{AckMode, Connection, Headers, Received, Subscription, Transaction};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "Available commands: SEND <dest> <body>, SUB <dest> [auto|client|client-individual], \
UNSUB <id>, RECV [ms], BEGIN, COMMIT, ABORT, quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration, then initialize logging from it
    let config = load_config()?;
    init_logging(&config);

    info!("STOMP Client v{}", env!("CARGO_PKG_VERSION"));
    if config.credentials.user.is_empty() {
        warn!("No credentials configured, connecting anonymously");
    }

    // Connect and log in to the broker
    let conn = config.connection();
    info!("Connecting to broker at {}...", conn.server());

    if let Err(e) = conn.connect(&config.login()).await {
        error!("Connect failed: {}", e);
        return Err(e.into());
    }

    println!("\nConnected to {}.", conn.server());
    println!("{}", HELP);
    println!("Type a command and press Enter:\n");

    // Interactive command loop
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();
    let mut transaction: Option<Transaction> = None;

    loop {
        print!("> ");
        // Manually flush stdout since print! doesn't auto-flush
        use std::io::Write;
        std::io::stdout().flush()?;

        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            info!("Exiting...");
            break;
        }

        // Parse command and up to two arguments
        let mut parts = input.splitn(3, ' ');
        let cmd = parts.next().unwrap_or_default().to_uppercase();
        let arg1 = parts.next();
        let arg2 = parts.next();

        let result = match (cmd.as_str(), arg1) {
            // Tagged with the open transaction, if any
            ("SEND", Some(dest)) => {
                let body = arg2.unwrap_or_default().to_string();
                match &transaction {
                    Some(tx) => tx.send(dest, body).await.map(|_| "sent in transaction".to_string()),
                    None => conn.send(dest, body, Headers::new()).await.map(|_| "sent".to_string()),
                }
            }
            ("SUB", Some(dest)) => match arg2.unwrap_or("auto").parse::<AckMode>() {
                Ok(mode) => conn
                    .subscribe(Subscription::new(dest, mode))
                    .await
                    .map(|sub| format!("subscribed as {}", sub.id())),
                Err(e) => {
                    println!("[ERROR] {}", e);
                    continue;
                }
            },
            ("UNSUB", Some(id)) => match conn.subscription_by_id(id).await {
                Ok(sub) => conn.unsubscribe(&sub).await.map(|_| format!("unsubscribed {}", id)),
                Err(e) => Err(e),
            },
            ("RECV", wait) => {
                let wait = match wait.map(str::parse::<u64>) {
                    Some(Ok(ms)) => Duration::from_millis(ms),
                    Some(Err(_)) => {
                        println!("[ERROR] RECV takes a timeout in milliseconds");
                        continue;
                    }
                    None => config.receive_timeout(),
                };
                receive(&conn, wait, transaction.as_ref()).await
            }
            ("BEGIN", None) if transaction.is_some() => {
                println!("[ERROR] a transaction is already open");
                continue;
            }
            ("BEGIN", None) => {
                let mut tx = Transaction::new();
                match conn.begin(&mut tx).await {
                    Ok(()) => {
                        let name = tx.name().to_string();
                        transaction = Some(tx);
                        Ok(format!("began {}", name))
                    }
                    Err(e) => Err(e),
                }
            }
            ("COMMIT", None) | ("ABORT", None) => match transaction.take() {
                Some(mut tx) if cmd == "COMMIT" => tx.commit().await.map(|_| format!("committed {}", tx.name())),
                Some(mut tx) => tx.rollback().await.map(|_| format!("aborted {}", tx.name())),
                None => {
                    println!("[ERROR] no open transaction");
                    continue;
                }
            },
            _ => {
                println!("Unknown command. {}", HELP);
                continue;
            }
        };

        match result {
            Ok(status) => println!("[OK] {}", status),
            Err(e) => {
                warn!("Command failed: {}", e);
                println!("[ERROR] {}", e);
            }
        }
    }

    // Say goodbye to the broker
    conn.disconnect().await?;
    Ok(())
}

/// Prints one inbound frame; client-mode messages are acked
async fn receive(
    conn: &Connection,
    wait: Duration,
    transaction: Option<&Transaction>,
) -> stomp_client::Result<String> {
    match conn.receive(Some(wait)).await? {
        Some(Received::Message(message)) => {
            println!(
                "MESSAGE {} from {}:\n{}",
                message.message_id(),
                message.destination(),
                String::from_utf8_lossy(message.body())
            );
            let needs_ack = message
                .subscription()
                .is_some_and(|sub| sub.ack_mode() != AckMode::Auto);
            if needs_ack {
                message.ack(transaction).await?;
                return Ok("received and acked".to_string());
            }
            Ok("received".to_string())
        }
        Some(Received::Frame(frame)) => {
            println!("{} {}", frame.command(), frame.body_text());
            Ok("received".to_string())
        }
        None => Ok("nothing received".to_string()),
    }
}

fn load_config() -> anyhow::Result<ClientConfig> {
    // Try configs/client.toml (development)
    if let Ok(config) = ClientConfig::from_file("configs/client.toml") {
        info!("Loaded config from configs/client.toml");
        return Ok(config);
    }

    // Try ./client.toml (current directory)
    if let Ok(config) = ClientConfig::from_file("client.toml") {
        info!("Loaded config from client.toml");
        return Ok(config);
    }

    // Use default config as last resort
    warn!("No config file found, using default configuration");
    Ok(ClientConfig::default_config())
}

fn init_logging(config: &ClientConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));

    if config.logging.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
