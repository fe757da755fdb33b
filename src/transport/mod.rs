//! Transport layer: shared HTTP clients for catalog calls and artifact downloads.

use anyhow::Context;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("CrocStore/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct Transport {
  api: reqwest::Client,
  download: reqwest::Client,
}

impl Transport {
  pub fn new() -> anyhow::Result<Self> {
    Ok(Self {
      api: build_client(ClientKind::Api)?,
      download: build_client(ClientKind::Download)?,
    })
  }

  /// Client for small request/response calls; bounded end to end.
  pub fn api(&self) -> &reqwest::Client {
    &self.api
  }

  /// Client for artifact bodies; only connect and per-read stalls are bounded so large ROMs can finish.
  pub fn download(&self) -> &reqwest::Client {
    &self.download
  }

  pub fn parse_download_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
  }
}

enum ClientKind {
  Api,
  Download,
}

fn build_client(kind: ClientKind) -> anyhow::Result<reqwest::Client> {
  let b = reqwest::Client::builder()
    .user_agent(USER_AGENT)
    .redirect(reqwest::redirect::Policy::limited(10))
    .connect_timeout(Duration::from_secs(15));
  let b = match kind {
    ClientKind::Api => b.timeout(Duration::from_secs(20)),
    ClientKind::Download => b.read_timeout(Duration::from_secs(60)),
  };
  b.build().context("failed to build reqwest client")
}
