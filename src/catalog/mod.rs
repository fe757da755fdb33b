use crate::{
  error::StoreError,
  model::{Platform, RomRecord},
  transport::Transport,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

/// Largest page the catalog accepts.
pub const MAX_RESULTS: u32 = 100;
const UNKNOWN: &str = "Unknown";

const FALLBACK_PLATFORMS: &[(&str, &str, &str)] = &[
  ("nes", "Nintendo Entertainment System", "NES"),
  ("snes", "Super Nintendo Entertainment System", "SNES"),
  ("gba", "Game Boy Advance", "GBA"),
  ("n64", "Nintendo 64", "N64"),
  ("psx", "PlayStation", "PSX"),
  ("genesis", "Sega Genesis", "Genesis"),
];

/// Client for the remote ROM catalog. Never surfaces errors: failures are logged and
/// turned into an empty result list or the built-in platform list.
#[derive(Clone)]
pub struct CatalogClient {
  transport: Transport,
  base_url: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
  data: Option<T>,
  #[serde(default)]
  info: Info,
}

#[derive(Debug, Default, Deserialize)]
struct Info {
  error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
  #[serde(default)]
  results: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEntry {
  slug: Option<String>,
  rom_id: Option<String>,
  title: Option<String>,
  platform: Option<String>,
  boxart_url: Option<String>,
  regions: Option<Vec<String>>,
  links: Option<Vec<RawLink>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLink {
  url: Option<String>,
  size_str: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlatformsData {
  #[serde(default)]
  platforms: BTreeMap<String, RawPlatform>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlatform {
  name: Option<String>,
}

impl CatalogClient {
  pub fn new(transport: Transport, base_url: &str) -> Self {
    Self {
      transport,
      base_url: Arc::from(base_url.trim().trim_end_matches('/')),
    }
  }

  pub async fn search(&self, query: &str, platform: &str, limit: u32) -> Vec<RomRecord> {
    match self.try_search(query, platform, limit).await {
      Ok(roms) => {
        tracing::debug!(query = %query, platform = %platform, count = roms.len(), "catalog search");
        roms
      }
      Err(e) => {
        tracing::error!(query = %query, platform = %platform, error = %e, "error searching roms");
        Vec::new()
      }
    }
  }

  /// Sorted by display name. Falls back to the built-in list when the catalog is
  /// unreachable or reports no platforms.
  pub async fn list_platforms(&self) -> Vec<Platform> {
    match self.try_list_platforms().await {
      Ok(platforms) if !platforms.is_empty() => platforms,
      Ok(_) => {
        tracing::warn!("catalog returned no platforms, using built-in list");
        fallback_platforms()
      }
      Err(e) => {
        tracing::error!(error = %e, "error fetching platforms, using built-in list");
        fallback_platforms()
      }
    }
  }

  async fn try_search(&self, query: &str, platform: &str, limit: u32) -> Result<Vec<RomRecord>, StoreError> {
    let body = search_body(query, platform, limit);
    let url = format!("{}/search", self.base_url);
    let resp = self.transport.api().post(&url).json(&body).send().await?;
    let data: SearchData = read_envelope(resp, &url).await?;

    Ok(data.results.into_iter().filter_map(rom_from_value).collect())
  }

  async fn try_list_platforms(&self) -> Result<Vec<Platform>, StoreError> {
    let url = format!("{}/platforms", self.base_url);
    let resp = self.transport.api().get(&url).send().await?;
    let data: PlatformsData = read_envelope(resp, &url).await?;

    let mut platforms: Vec<Platform> = data
      .platforms
      .into_iter()
      .map(|(id, raw)| Platform {
        name: raw.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| id.clone()),
        short_name: id.to_uppercase(),
        id,
      })
      .collect();
    sort_by_name(&mut platforms);
    Ok(platforms)
  }
}

fn search_body(query: &str, platform: &str, limit: u32) -> Value {
  let mut body = serde_json::Map::new();
  if !query.trim().is_empty() {
    body.insert("search_key".into(), Value::from(query.trim()));
  }
  if !platform.trim().is_empty() {
    body.insert("platforms".into(), Value::from(vec![platform.trim()]));
  }
  body.insert("max_results".into(), Value::from(limit.clamp(1, MAX_RESULTS)));
  body.insert("page".into(), Value::from(1));
  Value::Object(body)
}

async fn read_envelope<T: DeserializeOwned>(resp: reqwest::Response, url: &str) -> Result<T, StoreError> {
  let status = resp.status();
  if !status.is_success() {
    return Err(StoreError::HttpStatus {
      status: status.as_u16(),
      url: url.to_string(),
    });
  }
  let text = resp.text().await?;
  let envelope: Envelope<T> =
    serde_json::from_str(&text).map_err(|e| StoreError::MalformedResponse(e.to_string()))?;
  if let Some(err) = envelope.info.error.filter(|e| !e.trim().is_empty()) {
    return Err(StoreError::MalformedResponse(format!("catalog reported: {err}")));
  }
  envelope
    .data
    .ok_or_else(|| StoreError::MalformedResponse("response has no data".to_string()))
}

fn rom_from_value(value: Value) -> Option<RomRecord> {
  let raw: RawEntry = match serde_json::from_value(value) {
    Ok(raw) => raw,
    Err(e) => {
      tracing::debug!(error = %e, "skipping unreadable catalog entry");
      return None;
    }
  };

  let id = non_blank(raw.slug).or_else(|| non_blank(raw.rom_id))?;
  let regions: Vec<String> = raw
    .regions
    .unwrap_or_default()
    .iter()
    .filter(|r| !r.trim().is_empty())
    .map(|r| normalize_region(r))
    .collect();
  let link = raw.links.and_then(|l| l.into_iter().next()).unwrap_or_default();

  Some(RomRecord {
    name: non_blank(raw.title).unwrap_or_else(|| id.clone()),
    platform: non_blank(raw.platform).unwrap_or_else(|| UNKNOWN.to_string()),
    region: if regions.is_empty() {
      UNKNOWN.to_string()
    } else {
      regions.join(", ")
    },
    language: UNKNOWN.to_string(),
    size: non_blank(link.size_str).unwrap_or_else(|| UNKNOWN.to_string()),
    description: String::new(),
    download_url: link.url.unwrap_or_default(),
    image_url: raw.boxart_url.unwrap_or_default(),
    id,
  })
}

fn non_blank(s: Option<String>) -> Option<String> {
  s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

pub fn normalize_region(code: &str) -> String {
  let code = code.trim();
  match code.to_ascii_lowercase().as_str() {
    "us" => "USA".to_string(),
    "eu" => "Europe".to_string(),
    "jp" => "Japan".to_string(),
    "other" => "Other".to_string(),
    _ => code.to_uppercase(),
  }
}

pub fn fallback_platforms() -> Vec<Platform> {
  let mut platforms: Vec<Platform> = FALLBACK_PLATFORMS
    .iter()
    .map(|(id, name, short)| Platform {
      id: id.to_string(),
      name: name.to_string(),
      short_name: short.to_string(),
    })
    .collect();
  sort_by_name(&mut platforms);
  platforms
}

fn sort_by_name(platforms: &mut [Platform]) {
  platforms.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
}
