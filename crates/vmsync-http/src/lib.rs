// # HTTP Endpoint Caller
//
// This crate provides the reqwest-backed EndpointCaller for the VM
// inventory sync system.
//
// ## Behavior
//
// - One HTTP request per call, built from the endpoint's method, URL,
//   headers and body template
// - Non-2xx statuses, transport errors and malformed JSON are errors
// - No retry: the next scheduled pass is the retry
// - Header values are never logged
//
// The engine wraps every call in its own deadline; the client timeout
// configured here only bounds a call made outside the engine.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use vmsync_core::config::{EndpointConfig, HttpMethod};
use vmsync_core::registry::Registry;
use vmsync_core::traits::{EndpointCaller, EndpointCallerFactory};
use vmsync_core::{Error, Result};

/// Default HTTP client timeout
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// Longest response excerpt carried into an error message
const ERROR_BODY_EXCERPT: usize = 200;

/// reqwest-backed endpoint caller
pub struct HttpEndpointCaller {
    /// HTTP client
    client: reqwest::Client,
}

impl HttpEndpointCaller {
    /// Create a caller with the default timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
    }

    /// Create a caller with a custom client timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn request(&self, endpoint: &EndpointConfig) -> reqwest::RequestBuilder {
        let mut request = match endpoint.method {
            HttpMethod::Get => self.client.get(&endpoint.url),
            HttpMethod::Post => self.client.post(&endpoint.url),
            HttpMethod::Put => self.client.put(&endpoint.url),
        };

        for (name, value) in &endpoint.headers {
            request = request.header(name, value);
        }

        match &endpoint.payload {
            Some(body) if endpoint.method != HttpMethod::Get => request.json(body),
            _ => request,
        }
    }
}

#[async_trait]
impl EndpointCaller for HttpEndpointCaller {
    async fn call(&self, endpoint: &EndpointConfig) -> Result<Value> {
        debug!(
            "{} {} (endpoint {})",
            endpoint.method.as_str(),
            endpoint.url,
            endpoint.name
        );

        let response = self
            .request(endpoint)
            .send()
            .await
            .map_err(|e| Error::endpoint(&endpoint.name, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            let excerpt: String = error_text.chars().take(ERROR_BODY_EXCERPT).collect();

            return Err(match status.as_u16() {
                401 | 403 => Error::endpoint(
                    &endpoint.name,
                    format!("Authentication failed: check the endpoint credentials. Status: {}", status),
                ),
                404 => Error::endpoint(&endpoint.name, format!("Resource not found. Status: {}", status)),
                429 => Error::endpoint(
                    &endpoint.name,
                    format!("Rate limit exceeded. Status: {}", status),
                ),
                500..=599 => Error::endpoint(
                    &endpoint.name,
                    format!("Platform server error (transient): {} - {}", status, excerpt),
                ),
                _ => Error::endpoint(&endpoint.name, format!("Request failed: {} - {}", status, excerpt)),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::endpoint(&endpoint.name, format!("Failed to parse response: {}", e)))
    }

    fn caller_name(&self) -> &'static str {
        "http"
    }
}

/// Factory configuration for the `http` caller
#[derive(Debug, Default, Deserialize)]
struct HttpCallerConfig {
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Factory for creating HTTP endpoint callers
pub struct HttpEndpointCallerFactory;

impl EndpointCallerFactory for HttpEndpointCallerFactory {
    fn create(&self, config: &Value) -> Result<Box<dyn EndpointCaller>> {
        let config: HttpCallerConfig = if config.is_null() {
            HttpCallerConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| Error::config(format!("Invalid http caller config: {}", e)))?
        };

        let caller = match config.timeout_secs {
            Some(0) => return Err(Error::config("HTTP caller timeout must be > 0")),
            Some(secs) => HttpEndpointCaller::with_timeout(Duration::from_secs(secs))?,
            None => HttpEndpointCaller::new()?,
        };

        Ok(Box::new(caller))
    }
}

/// Register the HTTP endpoint caller with a registry
///
/// # Example
///
/// ```rust
/// use vmsync_core::Registry;
///
/// let registry = Registry::new();
/// vmsync_http::register(&registry);
/// assert!(registry.has_caller("http"));
/// ```
pub fn register(registry: &Registry) {
    registry.register_caller("http", Box::new(HttpEndpointCallerFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vmsync_core::model::{Platform, ResourceKind, ResourceTag};

    fn endpoint(url: &str) -> EndpointConfig {
        EndpointConfig::new(
            "vc-east",
            ResourceTag::new(Platform::Vmware, ResourceKind::Vm),
            url,
        )
    }

    #[test]
    fn test_factory_creation() {
        let factory = HttpEndpointCallerFactory;

        assert!(factory.create(&Value::Null).is_ok());
        assert!(factory.create(&json!({"timeout_secs": 30})).is_ok());
        assert!(factory.create(&json!({"timeout_secs": 0})).is_err());
        assert!(factory.create(&json!({"timeout_secs": "soon"})).is_err());
    }

    #[test]
    fn test_register() {
        let registry = Registry::new();
        register(&registry);
        assert!(registry.has_caller("http"));
        assert!(registry.create_caller("http", &Value::Null).is_ok());
    }

    #[test]
    fn test_caller_name() {
        let caller = HttpEndpointCaller::new().unwrap();
        assert_eq!(caller.caller_name(), "http");
    }

    #[test]
    fn test_request_carries_method_headers_and_body() {
        let caller = HttpEndpointCaller::new().unwrap();
        let config = endpoint("https://vcenter.example.com/api/vms")
            .with_method(HttpMethod::Post)
            .with_header("Authorization", "Bearer secret")
            .with_payload(json!({"kind": "vm"}));

        let request = caller.request(&config).build().unwrap();
        assert_eq!(request.method(), &reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "https://vcenter.example.com/api/vms");
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Bearer secret"
        );
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(body).unwrap(), json!({"kind": "vm"}));
    }

    #[test]
    fn test_get_request_has_no_body() {
        let caller = HttpEndpointCaller::new().unwrap();
        let config = endpoint("https://vcenter.example.com/api/vms").with_payload(json!({"x": 1}));

        let request = caller.request(&config).build().unwrap();
        assert_eq!(request.method(), &reqwest::Method::GET);
        assert!(request.body().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_endpoint_error() {
        let caller = HttpEndpointCaller::with_timeout(Duration::from_secs(2)).unwrap();
        // Port 9 on localhost: nothing listens there in a test environment
        let result = caller.call(&endpoint("http://127.0.0.1:9/vms")).await;

        match result {
            Err(Error::Endpoint { endpoint, .. }) => assert_eq!(endpoint, "vc-east"),
            other => panic!("expected endpoint error, got {:?}", other.map(|_| ())),
        }
    }
}
