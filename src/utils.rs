use std::path::Path;

use anyhow::Context;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

lazy_static! {
    /// Archival endpoint the submission engine POSTs to.
    pub static ref ENDPOINT_URL: String = {
        match std::env::var("LINKHARVEST_ENDPOINT") {
            Ok(e) if !e.is_empty() => e,
            _ => "https://web.archive.org/save".into(),
        }
    };
    /// Well-known seed used when no seed file and no frontier log exist.
    pub static ref DEFAULT_SEED_URL: String = {
        match std::env::var("LINKHARVEST_SEED") {
            Ok(e) if !e.is_empty() => e,
            _ => "https://www.nj.gov/".into(),
        }
    };
}

pub fn user_agent() -> String {
    format!("{}/{}", APP_NAME, APP_VERSION)
}

/// Reads a newline-delimited url file, skipping blank lines.
pub fn read_url_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .context(format!("could not read url file at {:?}", path))?;
    Ok(content
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}
