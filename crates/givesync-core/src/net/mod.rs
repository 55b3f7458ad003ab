//! Network access: the transport port and the request interceptor.

mod interceptor;
mod transport;

pub use interceptor::NetworkInterceptor;
pub use transport::{HttpTransport, Transport, IDEMPOTENCY_HEADER};
