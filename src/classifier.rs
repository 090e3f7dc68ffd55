use reqwest::Url;

/// Outcome of classifying one href found on a crawled page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Invalid,
    Internal(String),
    External(String),
}

// two-label public suffixes whose registrable domain keeps a third label
// (www.example.co.uk -> example.co.uk)
const TWO_LABEL_SUFFIXES: [&str; 13] = [
    "co.uk", "org.uk", "gov.uk", "ac.uk", "co.jp", "co.nz", "co.in", "co.za", "com.au", "net.au",
    "org.au", "com.br", "com.mx",
];

pub fn registrable_domain(host: &str) -> String {
    let host = host
        .trim_end_matches('.')
        .trim_matches(|c| c == '[' || c == ']')
        .to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    if TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        return labels[labels.len() - 3..].join(".");
    }
    last_two
}

/// Decides whether an href is followable within `reference_domain` or belongs
/// to the external-url sink. Relative hrefs do not parse on their own and are
/// Invalid, so only absolute same-domain http(s) links are followed. External
/// urls lose their query string here; the rest of the normalization happens in
/// the one-shot pass over the sink file.
pub fn classify(href: &str, reference_domain: &str) -> Link {
    let url = match Url::parse(href) {
        Ok(u) => u,
        Err(_) => return Link::Invalid,
    };
    let host = match url.host_str() {
        Some(h) => h,
        None => return Link::Invalid,
    };
    if registrable_domain(host) != registrable_domain(reference_domain) {
        let mut external = url;
        external.set_query(None);
        return Link::External(external.to_string());
    }
    match url.scheme() {
        "http" | "https" => Link::Internal(url.to_string()),
        _ => Link::Invalid,
    }
}
