//! The HTTP-carried key agreement.
//!
//! A Sush handshake is one HTTP/1.1 request and response whose bodies
//! carry the key agreement of [`message`]; the shell itself is cosmetic.
//! [`client`] and [`server`] implement the two halves; both are generic
//! over `AsyncRead + AsyncWrite` streams.

pub mod http;

mod client;
mod message;
mod server;

pub use client::{ClientConfig, HandshakeClient};
pub use http::ParsedHttpRequest;
pub use message::{HandshakeRequest, HandshakeResponse, PolicyGrant, PolicyRequest};
pub use server::{HandshakeCarriage, HandshakeServer};
