mod http_transport;
mod request;
mod retry_policy;

pub use http_transport::HttpTransport;
pub use request::TurnRequest;
