//! Integration tests for faultline-delivery
//!
//! Uses wiremock to simulate the notices API and verifies end-to-end
//! behavior of the HTTP transport and the notifier.

mod common;

mod test_deploy;
mod test_http_transport;
mod test_notifier;
