use crate::library::ROM_EXTENSIONS;
use sanitize_filename::sanitize;
use std::path::Path;
use url::Url;

const FALLBACK_EXTENSION: &str = "zip";
const UNKNOWN_PLATFORM: &str = "Unknown";

/// Extension for the stored file: taken from the download URL when it names a ROM or
/// archive format we recognize, otherwise `zip`.
pub fn extension_for(download_url: &str) -> String {
  let ext = Url::parse(download_url.trim())
    .ok()
    .and_then(|u| {
      u.path_segments()
        .and_then(|mut s| s.next_back())
        .map(decode_segment)
    })
    .and_then(|seg| {
      Path::new(&seg)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
    });
  match ext {
    Some(e) if is_known_extension(&e) => e,
    _ => FALLBACK_EXTENSION.to_string(),
  }
}

fn is_known_extension(ext: &str) -> bool {
  ext == "7z" || ROM_EXTENSIONS.contains(&ext)
}

fn decode_segment(s: &str) -> String {
  match urlencoding::decode(s) {
    Ok(v) => v.into_owned(),
    Err(_) => s.to_string(),
  }
}

/// Sanitized display name, falling back to the rom id and then to `download`.
pub fn display_stem(rom_id: &str, name: &str) -> String {
  [name, rom_id]
    .iter()
    .map(|s| sanitize(s.trim()))
    .map(|s| s.trim().to_string())
    .find(|s| !s.is_empty() && s != "." && s != "..")
    .unwrap_or_else(|| "download".to_string())
}

pub fn platform_dir_name(platform: &str) -> String {
  let p = sanitize(platform.trim());
  let p = p.trim();
  if p.is_empty() || p == "." || p == ".." {
    UNKNOWN_PLATFORM.to_string()
  } else {
    p.to_string()
  }
}

/// `Foo.zip`
pub fn plain_filename(stem: &str, ext: &str) -> String {
  format!("{stem}.{ext}")
}

/// `Foo [rom_1].zip`; unique per platform directory because catalog ids are unique.
pub fn disambiguated_filename(stem: &str, rom_id: &str, ext: &str) -> String {
  let id = sanitize(rom_id.trim());
  let id = if id.is_empty() { "unknown".to_string() } else { id };
  format!("{stem} [{id}].{ext}")
}
