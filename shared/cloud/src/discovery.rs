use std::net::IpAddr;
use thiserror::Error;
use tracing::info;

pub const PUBLIC_IP_ENDPOINT: &str = "https://api.ipify.org";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{0:?} is not an IP address")]
    InvalidAddress(String),
}

/// Asks a plain-text "what is my IP" endpoint for this host's public address.
pub async fn discover_public_ip(endpoint: &str) -> Result<IpAddr, DiscoveryError> {
    let request_error = |source| DiscoveryError::Request {
        endpoint: endpoint.to_string(),
        source,
    };
    let body = reqwest::get(endpoint)
        .await
        .and_then(|response| response.error_for_status())
        .map_err(request_error)?
        .text()
        .await
        .map_err(request_error)?;
    let ip = parse_public_ip(&body)?;
    info!("External IP address: {ip}");
    Ok(ip)
}

pub fn parse_public_ip(body: &str) -> Result<IpAddr, DiscoveryError> {
    let trimmed = body.trim();
    trimmed
        .parse()
        .map_err(|_| DiscoveryError::InvalidAddress(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_with_trailing_newline() {
        assert_eq!(
            parse_public_ip("203.0.113.7\n").unwrap(),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn rejects_html_error_page() {
        assert!(matches!(
            parse_public_ip("<html>rate limited</html>"),
            Err(DiscoveryError::InvalidAddress(_))
        ));
    }
}
