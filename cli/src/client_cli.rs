use anyhow::{anyhow, Context, Result};
use jobrunner_proto::job_runner_client::JobRunnerClient;
use jobrunner_proto::output_chunk::Chunk;
use jobrunner_proto::status_response::JobState;
use jobrunner_proto::{OutputRequest, StartRequest, StatusRequest, StopRequest};
use serde_json::json;
use std::path::Path;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tonic::{Request, Status};

pub struct ClientCli {
    inner: JobRunnerClient<Channel>,
}

impl ClientCli {
    pub async fn connect(
        host: &str,
        cert_path: &Path,
        cert_key_path: &Path,
        ca_path: &Path,
        server_name: &str,
    ) -> Result<Self> {
        let tls = build_tls_config(cert_path, cert_key_path, ca_path, server_name).await?;

        let channel = Channel::from_shared(format!("https://{}", host))
            .context("bad server address")?
            .tls_config(tls)
            .context("tls config")?
            .connect()
            .await
            .with_context(|| format!("connect to {}", host))?;

        Ok(Self {
            inner: JobRunnerClient::new(channel),
        })
    }

    pub async fn start_job(&mut self, argv: Vec<String>) -> Result<()> {
        let request = Request::new(StartRequest { argv });
        let response = self.inner.start_job(request).await.map_err(rpc_error)?;
        let worker_id = response.into_inner().worker_id;
        println!("{}", json!({ "workerId": worker_id }));
        Ok(())
    }

    pub async fn stop_job(&mut self, worker_id: String) -> Result<()> {
        let request = Request::new(StopRequest {
            worker_id: worker_id.clone(),
        });
        let _ = self.inner.stop_job(request).await.map_err(rpc_error)?;
        println!("{}", json!({ "workerId": worker_id, "stopped": true }));
        Ok(())
    }

    pub async fn get_status(&mut self, worker_id: String) -> Result<()> {
        let request = Request::new(StatusRequest {
            worker_id: worker_id.clone(),
        });
        let response = self.inner.get_status(request).await.map_err(rpc_error)?;
        let response = response.into_inner();

        let mut out = serde_json::Map::new();
        out.insert("workerId".into(), json!(worker_id));
        if response.pid != 0 {
            out.insert("pid".into(), json!(response.pid));
        }
        match response
            .job_state
            .ok_or_else(|| anyhow!("server responded with empty job state"))?
        {
            JobState::Starting(_) => {
                out.insert("state".into(), json!("starting"));
                out.insert("done".into(), json!(false));
            }
            JobState::Running(_) => {
                out.insert("state".into(), json!("running"));
                out.insert("done".into(), json!(false));
            }
            JobState::Exited(exited) => {
                out.insert("state".into(), json!("exited"));
                out.insert("done".into(), json!(true));
                out.insert("exitCode".into(), json!(exited.code));
            }
            JobState::Failed(failed) => {
                out.insert("state".into(), json!("failed"));
                out.insert("done".into(), json!(true));
                out.insert("failureReason".into(), json!(failed.reason));
            }
        }
        println!("{}", serde_json::Value::Object(out));
        Ok(())
    }

    /// Stream output as one JSON object per chunk until the server closes
    /// the stream or the user interrupts.
    pub async fn stream_output(&mut self, worker_id: String) -> Result<()> {
        let request = Request::new(OutputRequest { worker_id });
        let response = self.inner.stream_output(request).await.map_err(rpc_error)?;
        let mut stream = response.into_inner();

        loop {
            tokio::select! {
                message = stream.message() => {
                    match message.map_err(rpc_error)? {
                        Some(chunk) => match chunk.chunk {
                            Some(Chunk::Stdout(data)) => {
                                println!("{}", json!({ "stdout": String::from_utf8_lossy(&data) }));
                            }
                            Some(Chunk::Stderr(data)) => {
                                println!("{}", json!({ "stderr": String::from_utf8_lossy(&data) }));
                            }
                            None => {}
                        },
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }
}

fn rpc_error(status: Status) -> anyhow::Error {
    anyhow!("{}", status.message())
}

async fn build_tls_config(
    cert_path: &Path,
    cert_key_path: &Path,
    ca_path: &Path,
    server_name: &str,
) -> Result<ClientTlsConfig> {
    let ca = tokio::fs::read(ca_path)
        .await
        .with_context(|| format!("failed to read {:?}", ca_path))?;
    let server_root_ca = Certificate::from_pem(ca);

    let client_cert = tokio::fs::read(cert_path)
        .await
        .with_context(|| format!("failed to read {:?}", cert_path))?;
    let client_key = tokio::fs::read(cert_key_path)
        .await
        .with_context(|| format!("failed to read {:?}", cert_key_path))?;
    let client_identity = Identity::from_pem(client_cert, client_key);

    Ok(ClientTlsConfig::new()
        .domain_name(server_name)
        .ca_certificate(server_root_ca)
        .identity(client_identity))
}
