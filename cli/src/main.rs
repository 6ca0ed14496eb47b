mod client_cli;

use clap::{Parser, Subcommand};
use client_cli::ClientCli;
use std::path::PathBuf;

/// Talk to a jobrunner server over mutually-authenticated gRPC.
#[derive(Debug, Parser)]
struct Cli {
    /// Server address, host:port
    #[clap(long)]
    host: String,

    /// PEM file with the client certificate
    #[clap(long = "cert-path")]
    cert_path: PathBuf,

    /// PEM file with the client private key
    #[clap(long = "cert-key-path")]
    cert_key_path: PathBuf,

    /// PEM file with the CA that signed the server certificate
    #[clap(long = "ca-path")]
    ca_path: PathBuf,

    /// Name the server certificate is expected to carry
    #[clap(long = "server-name", default_value = "localhost")]
    server_name: String,

    /// The sub-command to issue
    #[clap(subcommand)]
    sub_command: SubCommand,
}

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
enum SubCommand {
    /// Start a command on the server
    Start {
        /// Command and arguments, after `--`
        #[clap(last = true, required = true)]
        command: Vec<String>,
    },
    /// Stop a running worker
    Stop {
        #[clap(long = "worker-id")]
        worker_id: String,
    },
    /// Query the lifecycle state of a worker
    GetStatus {
        #[clap(long = "worker-id")]
        worker_id: String,
    },
    /// Stream stdout/stderr from the start of execution
    StreamOutput {
        #[clap(long = "worker-id")]
        worker_id: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    if let Err(err) = run(args).await {
        println!("{}", serde_json::json!({ "error": err.to_string() }));
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let mut client = ClientCli::connect(
        &args.host,
        &args.cert_path,
        &args.cert_key_path,
        &args.ca_path,
        &args.server_name,
    )
    .await?;

    match args.sub_command {
        SubCommand::Start { command } => client.start_job(command).await,
        SubCommand::Stop { worker_id } => client.stop_job(worker_id).await,
        SubCommand::GetStatus { worker_id } => client.get_status(worker_id).await,
        SubCommand::StreamOutput { worker_id } => client.stream_output(worker_id).await,
    }
}
