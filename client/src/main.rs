use clap::Parser;
use client::network::{Client, ClientOutcome};
use client::presentation::{end_banner, ConsolePresenter};
use log::info;
use shared::ParticipantClass;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Display name requested after joining
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Class requested after joining (agile or heavy)
    #[arg(short = 'c', long)]
    class: Option<ParticipantClass>,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    println!("{}", client::input::HELP);

    let (lines_tx, lines_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if lines_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut client = Client::new(&args.server, args.fake_ping, Box::new(ConsolePresenter::new()))
        .await?
        .with_profile(args.name, args.class);

    match client.run(lines_rx).await? {
        ClientOutcome::Finished { reason, .. } => println!("{}", end_banner(&reason)),
        ClientOutcome::Rejected(reason) => eprintln!("Server refused us: {}", reason),
        ClientOutcome::Disconnected(reason) => eprintln!("Disconnected: {}", reason),
        ClientOutcome::Quit => info!("Bye"),
    }

    Ok(())
}
