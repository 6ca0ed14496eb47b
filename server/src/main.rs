mod interceptors;
mod services;

pub use cert::UserExtension;
use interceptors::cert;
pub use services::jobservice::JobRunnerService;

use anyhow::{bail, Context, Result};
use clap::Parser;
use jobexec::ExecConfig;
use jobrunner_proto::job_runner_server::JobRunnerServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_rustls::rustls::{
    self, ciphersuite::TLS13_AES_128_GCM_SHA256, ciphersuite::TLS13_AES_256_GCM_SHA384,
    ciphersuite::TLS13_CHACHA20_POLY1305_SHA256, AllowAnyAuthenticatedClient, ProtocolVersion,
    RootCertStore, ServerConfig,
};
use tonic::transport::{Server, ServerTlsConfig};
use tracing_subscriber::EnvFilter;

/// Serve the remote job runner over mutually-authenticated gRPC.
#[derive(Debug, Parser)]
struct ServerArgs {
    /// Address to listen on
    #[clap(short = 'l', long = "listen", default_value = "[::1]:50051")]
    listen: SocketAddr,

    /// PEM file with the server certificate chain
    #[clap(long = "cert-path")]
    cert_path: PathBuf,

    /// PEM file with the server private key
    #[clap(long = "cert-key-path")]
    cert_key_path: PathBuf,

    /// PEM file with the CA that client certificates must chain to
    #[clap(long = "client-ca-path")]
    client_ca_path: PathBuf,
}

struct TlsFiles {
    cert: PathBuf,
    key: PathBuf,
    client_ca: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = ServerArgs::parse();
    let tls = TlsFiles {
        cert: args.cert_path,
        key: args.cert_key_path,
        client_ca: args.client_ca_path,
    };
    let exec_config = ExecConfig::default();
    tracing::info!(
        helper = %exec_config.helper_path.display(),
        "using isolation helper"
    );
    serve(args.listen, tls, exec_config).await
}

async fn serve(addr: SocketAddr, tls: TlsFiles, exec_config: ExecConfig) -> Result<()> {
    // clients must present a certificate chaining to this CA
    let mut client_roots = RootCertStore::empty();
    for der in load_certs(&tls.client_ca)? {
        client_roots
            .add(&der)
            .map_err(|err| anyhow::anyhow!("bad client CA cert: {:?}", err))?;
    }
    let client_auth = AllowAnyAuthenticatedClient::new(client_roots);

    // TLS 1.3 only; every 1.3 suite is an ECDHE-keyed AEAD
    let cipher_suites = &[
        &TLS13_AES_256_GCM_SHA384,
        &TLS13_AES_128_GCM_SHA256,
        &TLS13_CHACHA20_POLY1305_SHA256,
    ];
    let mut rustls_config = ServerConfig::with_ciphersuites(client_auth, cipher_suites);
    rustls_config.versions = vec![ProtocolVersion::TLSv1_3];

    let server_cert_chain = load_certs(&tls.cert)?;
    let server_key = load_private_key(&tls.key)?;
    rustls_config
        .set_single_cert(server_cert_chain, server_key)
        .context("server cert/key mismatch")?;

    // use HTTP/2 over tls
    rustls_config.set_protocols(&[b"h2".to_vec()]);

    let tls_config = ServerTlsConfig::new()
        .rustls_server_config(rustls_config)
        .to_owned();
    let job_service = JobRunnerService::new(exec_config, 64);
    let job_server = JobRunnerServer::with_interceptor(job_service, cert::require_peer_identity);
    tracing::info!(%addr, "listening");

    Server::builder()
        .tls_config(tls_config)?
        .add_service(job_server)
        .serve(addr)
        .await?;

    Ok(())
}

fn load_certs(path: &std::path::Path) -> Result<Vec<rustls::Certificate>> {
    let pem = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .with_context(|| format!("parse certificates in {}", path.display()))?;
    if certs.is_empty() {
        bail!("no certificates found in {}", path.display());
    }
    Ok(certs.into_iter().map(rustls::Certificate).collect())
}

fn load_private_key(path: &std::path::Path) -> Result<rustls::PrivateKey> {
    let pem = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut reader = &pem[..];
    while let Some(item) =
        rustls_pemfile::read_one(&mut reader).context("parse server private key")?
    {
        match item {
            rustls_pemfile::Item::ECKey(key) | rustls_pemfile::Item::PKCS8Key(key) => {
                return Ok(rustls::PrivateKey(key));
            }
            _ => continue,
        }
    }
    bail!("no private key found in {}", path.display());
}
