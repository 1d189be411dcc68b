// # HTTP Address Probe
//
// Discovers the external address by asking a public discovery endpoint
// (api.ipify.org, icanhazip.com, ifconfig.me, ...).
//
// ## Behaviour
//
// One GET per call, no caching and no retries: the scheduler owns timing and
// decides what a failure means for the cycle. The body may be the bare
// address or a small JSON envelope such as `{"ip": "203.0.113.7"}`.

use async_trait::async_trait;
use std::time::Duration;

use whatip_core::ExternalAddress;
use whatip_core::error::ProbeError;
use whatip_core::traits::{AddressProbe, parse_discovery_body};

/// Well-known discovery endpoints returning the bare address
pub const KNOWN_ENDPOINTS: &[&str] = &[
    "https://api.ipify.org",
    "https://icanhazip.com",
    "https://ifconfig.me/ip",
];

/// HTTP(S) discovery probe
pub struct HttpAddressProbe {
    client: reqwest::Client,
}

impl HttpAddressProbe {
    /// Create a probe without a request timeout of its own
    ///
    /// The caller bounds each fetch; the scheduler applies the configured
    /// `operation_timeout`, which may change on reload.
    pub fn new() -> Self {
        Self::from_builder(reqwest::Client::builder())
    }

    /// Create a probe whose requests give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::from_builder(reqwest::Client::builder().timeout(timeout))
    }

    fn from_builder(builder: reqwest::ClientBuilder) -> Self {
        Self {
            client: builder
                .user_agent(concat!("whatip/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }
}

fn classify(error: reqwest::Error) -> ProbeError {
    if error.is_timeout() {
        ProbeError::Network(format!("request timed out: {}", error))
    } else {
        ProbeError::Network(format!("request failed: {}", error))
    }
}

impl Default for HttpAddressProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressProbe for HttpAddressProbe {
    async fn fetch(&self, endpoint: &str) -> Result<ExternalAddress, ProbeError> {
        let response = self
            .client
            .get(endpoint)
            .header(reqwest::header::ACCEPT, "text/plain, application/json")
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Network(format!("HTTP error: {}", status)));
        }

        let body = response.text().await.map_err(classify)?;
        let address = parse_discovery_body(&body)?;
        tracing::debug!("{} reported {}", endpoint, address);
        Ok(address)
    }

    fn probe_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_bare_address() {
        let server = serve(200, "203.0.113.7\n").await;
        let address = HttpAddressProbe::new()
            .fetch(&format!("{}/ip", server.uri()))
            .await
            .unwrap();
        assert_eq!(address, ExternalAddress::parse("203.0.113.7").unwrap());
    }

    #[tokio::test]
    async fn test_json_envelope() {
        let server = serve(200, r#"{"ip":"2001:db8::7"}"#).await;
        let address = HttpAddressProbe::new()
            .fetch(&format!("{}/ip", server.uri()))
            .await
            .unwrap();
        assert_eq!(address, ExternalAddress::parse("2001:db8::7").unwrap());
    }

    #[tokio::test]
    async fn test_empty_body() {
        let server = serve(200, "").await;
        let err = HttpAddressProbe::new()
            .fetch(&format!("{}/ip", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::EmptyResponse);
    }

    #[tokio::test]
    async fn test_garbage_body() {
        let server = serve(200, "<html>rate limited</html>").await;
        let err = HttpAddressProbe::new()
            .fetch(&format!("{}/ip", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Unparseable(_)));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = serve(503, "203.0.113.7").await;
        let err = HttpAddressProbe::new()
            .fetch(&format!("{}/ip", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Network(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("203.0.113.7")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = HttpAddressProbe::with_timeout(Duration::from_millis(100))
            .fetch(&server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Network(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_caller_bounds_untimed_client() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("203.0.113.7")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let probe = HttpAddressProbe::new();
        let short = tokio::time::timeout(Duration::from_millis(50), probe.fetch(&server.uri())).await;
        assert!(short.is_err());

        let long = tokio::time::timeout(Duration::from_secs(5), probe.fetch(&server.uri()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(long, ExternalAddress::parse("203.0.113.7").unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let err = HttpAddressProbe::with_timeout(Duration::from_secs(1))
            .fetch("http://127.0.0.1:9/")
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Network(_)));
    }
}
