// # Endpoint Caller Trait
//
// Defines the interface for calling a configured platform API endpoint.
//
// ## Implementations
//
// - reqwest-based: `vmsync-http` crate
// - Test doubles: scripted callers in the contract tests
//
// ## Usage
//
// ```rust,ignore
// use vmsync_core::EndpointCaller;
//
// let caller = /* EndpointCaller implementation */;
// let payload = caller.call(&endpoint).await?;
// ```

use async_trait::async_trait;

use crate::config::EndpointConfig;

/// Trait for endpoint caller implementations
///
/// A caller turns an [`EndpointConfig`] (method, URL, headers, body
/// template) into parsed JSON. It does not interpret the payload and does
/// not retry: the next scheduled pass is the retry.
///
/// Transport errors, non-2xx statuses and malformed JSON are all reported
/// as `Err`. The engine applies its own deadline around every call, so an
/// implementation's internal timeout is a second line only.
#[async_trait]
pub trait EndpointCaller: Send + Sync {
    /// Call the endpoint and return its parsed JSON body
    ///
    /// # Parameters
    ///
    /// - `endpoint`: The endpoint to call
    ///
    /// # Returns
    ///
    /// - `Ok(Value)`: Parsed response body
    /// - `Err(Error)`: Transport, status or decoding failure
    async fn call(&self, endpoint: &EndpointConfig) -> Result<serde_json::Value, crate::Error>;

    /// Get the caller name (for logging)
    fn caller_name(&self) -> &'static str;
}

/// Helper trait for constructing endpoint callers from configuration
pub trait EndpointCallerFactory: Send + Sync {
    /// Create an EndpointCaller instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration specific to this caller type
    ///
    /// # Returns
    ///
    /// A boxed EndpointCaller trait object
    fn create(&self, config: &serde_json::Value) -> Result<Box<dyn EndpointCaller>, crate::Error>;
}
