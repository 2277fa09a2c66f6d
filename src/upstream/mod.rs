//! HLS origin access: session resolution, segment streaming and key fetching

pub mod client;
pub mod fetcher;
pub mod resolver;

pub use client::{ByteStream, HttpOriginClient, OriginClient, OriginResponse};
pub use fetcher::{KeyFetcher, SegmentFetcher, decode_key_path};
pub use resolver::{UpstreamResolver, UpstreamSession, render_playlist, rewrite_keys};
