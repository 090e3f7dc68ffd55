use std::{collections::HashMap, path::Path};

use anyhow::Context;
use reqwest::Url;

// entries the archival endpoint should never see
const DISALLOWED_EXTENSIONS: [&str; 1] = [".pdf"];

/// One-shot batch pass over the external-url sink: repairs the
/// `http://https://` artifact left by pages that glue absolute urls together,
/// drops non-archivable entries, collapses http/https and trailing-slash
/// variants onto one schemeless key, and emits a sorted unique list.
pub fn normalize_lines(lines: &[String]) -> Vec<String> {
    let mut by_key: HashMap<String, String> = HashMap::new();

    for line in lines {
        let mut candidate = line.trim_start();
        if candidate.is_empty() {
            continue;
        }
        if DISALLOWED_EXTENSIONS
            .iter()
            .any(|ext| candidate.to_ascii_lowercase().ends_with(ext))
        {
            continue;
        }
        if candidate.starts_with("http://https://") {
            candidate = &candidate["http://".len()..];
        }

        let url = match Url::parse(candidate) {
            Ok(u) => u,
            Err(_) => continue,
        };
        let host = match url.host_str() {
            Some(h) => h,
            None => continue,
        };
        if !host.contains('.') {
            continue;
        }

        // Url serialization percent-encodes the path for us
        let serialized = url.to_string();
        let schemeless = match serialized.split_once("://") {
            Some((_, rest)) => rest.to_string(),
            None => continue,
        };
        let key = if schemeless.ends_with('/') {
            schemeless
        } else {
            format!("{}/", schemeless)
        };

        match by_key.get(&key) {
            Some(existing) => {
                let prefer_https = url.scheme() == "https";
                let prefer_slash = serialized.ends_with('/') && !existing.ends_with('/');
                if prefer_https || prefer_slash {
                    by_key.insert(key, serialized);
                }
            }
            None => {
                by_key.insert(key, serialized);
            }
        }
    }

    let mut out: Vec<String> = by_key.into_values().collect();
    out.sort();
    out
}

/// Reads the sink file, writes the normalized list, returns how many urls
/// survived.
pub fn normalize_file(input: &Path, output: &Path) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(input)
        .context(format!("could not read sink file at {:?}", input))?;
    let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();

    let normalized = normalize_lines(&lines);

    let mut body = normalized.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    std::fs::write(output, body)
        .context(format!("could not write normalized file at {:?}", output))?;

    info!(
        "normalized {} sink lines down to {} urls",
        lines.len(),
        normalized.len()
    );
    Ok(normalized.len())
}

#[cfg(test)]
mod test {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn drops_disallowed_extensions_case_insensitively() {
        let out = normalize_lines(&lines(&[
            "https://ext.example/report.pdf",
            "https://ext.example/REPORT.PDF",
            "https://ext.example/page",
        ]));
        assert_eq!(out, vec!["https://ext.example/page"]);
    }

    #[test]
    fn repairs_the_double_scheme_artifact() {
        let out = normalize_lines(&lines(&["http://https://ext.example/x"]));
        assert_eq!(out, vec!["https://ext.example/x"]);
    }

    #[test]
    fn drops_hosts_without_a_dot_and_unparseable_lines() {
        let out = normalize_lines(&lines(&[
            "https://localhost/x",
            "not a url",
            "https://ext.example/ok",
        ]));
        assert_eq!(out, vec!["https://ext.example/ok"]);
    }

    #[test]
    fn prefers_https_over_http_for_the_same_key() {
        let out = normalize_lines(&lines(&[
            "http://ext.example/x",
            "https://ext.example/x",
        ]));
        assert_eq!(out, vec!["https://ext.example/x"]);

        // order must not matter
        let out = normalize_lines(&lines(&[
            "https://ext.example/x",
            "http://ext.example/x",
        ]));
        assert_eq!(out, vec!["https://ext.example/x"]);
    }

    #[test]
    fn prefers_the_trailing_slash_form() {
        let out = normalize_lines(&lines(&[
            "https://ext.example/sub",
            "https://ext.example/sub/",
        ]));
        assert_eq!(out, vec!["https://ext.example/sub/"]);
    }

    #[test]
    fn output_is_sorted_and_unique() {
        let out = normalize_lines(&lines(&[
            "https://z.example/",
            "https://a.example/",
            "https://z.example/",
        ]));
        assert_eq!(out, vec!["https://a.example/", "https://z.example/"]);
    }

    #[test]
    fn percent_encodes_paths() {
        let out = normalize_lines(&lines(&["https://ext.example/a b"]));
        assert_eq!(out, vec!["https://ext.example/a%20b"]);
    }
}
