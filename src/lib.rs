//! Chunked HTTP downloader: splits a resource into byte ranges, fetches them
//! one by one or all at once, and reassembles them in order.

pub mod core;
pub mod plugins;
