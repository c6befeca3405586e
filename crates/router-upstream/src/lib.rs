//! # Router Upstream
//!
//! Upstream backend adapters for the LLM router.
//!
//! Every configured backend gets one [`UpstreamClient`], which normalizes
//! chat-completion calls and model listings to and from that backend's wire
//! format, including transcoding streamed Server-Sent Events into the
//! router's canonical frame format.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod transcode;

pub use client::UpstreamClient;
