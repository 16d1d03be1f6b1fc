//! Network listeners.
//!
//! - [`http::RdapServer`] serves RDAP over HTTP through axum
//! - [`tcp::WhoisServer`] serves WHOIS over raw TCP, one query per connection
//!
//! Both stop accepting once the shared shutdown flag flips to `true`.

pub mod http;
pub mod tcp;

pub use http::RdapServer;
pub use tcp::WhoisServer;

use tokio::sync::watch;

/// Resolve once shutdown is requested or the sender is gone.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
