//! The capability the limiter needs from its host pipeline.

/// Per-operation access to the host.
///
/// The limiter only needs to identify the caller and write a response; it
/// knows nothing about routing or payloads. Implement this for whatever your
/// pipeline passes between stages.
pub trait OperationContext {
    /// The caller's network address, used as the default key.
    fn remote_key(&self) -> String;

    /// Set an outgoing header or equivalent response field.
    fn set_header(&mut self, name: &str, value: String);

    /// Set the response status and body.
    fn respond(&mut self, status: u16, body: &str);
}
