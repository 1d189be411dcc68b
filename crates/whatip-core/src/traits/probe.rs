// # Address Probe Trait
//
// Defines the interface for discovering the host's external address.
//
// ## Implementations
//
// - HTTP discovery endpoint: `whatip-probe-http` crate
//
// ## Accepted response shapes
//
// Discovery services answer either with the bare address (`203.0.113.7\n`) or
// with a small JSON envelope (`{"ip": "203.0.113.7"}`). [`parse_discovery_body`]
// accepts both so every probe implementation classifies bodies the same way.

use async_trait::async_trait;

use crate::address::ExternalAddress;
use crate::error::ProbeError;

/// JSON keys accepted as the address field of an envelope
const ENVELOPE_KEYS: &[&str] = &["ip", "IpAddress", "ip_address", "address"];

/// Trait for external address probes
///
/// A probe performs a single request per call and holds no state between
/// calls. It never touches persisted state and never retries; the scheduler
/// decides what a failure means for the cycle.
#[async_trait]
pub trait AddressProbe: Send + Sync {
    /// Fetch the current external address from `endpoint`
    ///
    /// # Returns
    ///
    /// - `Ok(ExternalAddress)`: the address reported by the endpoint
    /// - `Err(ProbeError::EmptyResponse)`: blank body
    /// - `Err(ProbeError::Unparseable)`: body is neither an address nor a known envelope
    /// - `Err(ProbeError::Network)`: connectivity, HTTP status or timeout failure
    async fn fetch(&self, endpoint: &str) -> Result<ExternalAddress, ProbeError>;

    /// Probe name (for logging)
    fn probe_name(&self) -> &'static str;
}

/// Classify a discovery response body
pub fn parse_discovery_body(body: &str) -> Result<ExternalAddress, ProbeError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ProbeError::EmptyResponse);
    }

    if trimmed.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| ProbeError::Unparseable(format!("invalid JSON envelope: {}", e)))?;

        let field = ENVELOPE_KEYS
            .iter()
            .find_map(|key| value.get(key))
            .ok_or_else(|| ProbeError::Unparseable(format!("no address field in {}", trimmed)))?;

        return match field.as_str() {
            Some(text) if text.trim().is_empty() => Err(ProbeError::EmptyResponse),
            Some(text) => ExternalAddress::parse(text),
            None => Err(ProbeError::Unparseable(format!(
                "address field is not a string: {}",
                field
            ))),
        };
    }

    ExternalAddress::parse(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_body() {
        let addr = parse_discovery_body("198.51.100.9\n").unwrap();
        assert_eq!(addr.to_string(), "198.51.100.9");
    }

    #[test]
    fn test_json_envelope() {
        let addr = parse_discovery_body(r#"{ "ip": "2001:db8::1" }"#).unwrap();
        assert_eq!(addr.to_string(), "2001:db8::1");

        let legacy = parse_discovery_body(r#"{"IpAddress":"203.0.113.7"}"#).unwrap();
        assert_eq!(legacy.to_string(), "203.0.113.7");
    }

    #[test]
    fn test_blank_bodies() {
        assert_eq!(parse_discovery_body(""), Err(ProbeError::EmptyResponse));
        assert_eq!(parse_discovery_body("   "), Err(ProbeError::EmptyResponse));
        assert_eq!(
            parse_discovery_body(r#"{"ip": ""}"#),
            Err(ProbeError::EmptyResponse)
        );
    }

    #[test]
    fn test_unparseable_bodies() {
        for body in [
            "<html>blocked</html>",
            r#"{"origin": "203.0.113.7"}"#,
            r#"{"ip": 42}"#,
            "{not json",
        ] {
            assert!(
                matches!(parse_discovery_body(body), Err(ProbeError::Unparseable(_))),
                "{} should be unparseable",
                body
            );
        }
    }
}
