//! Sources a [`partial::Config`](crate::config::partial::Config) can be
//! loaded from

pub mod toml;
