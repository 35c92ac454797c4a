//! Configuration of an epochnet node
//!
//! ```
//! use epochnet_configs::{loaders, Config, Environment};
//!
//! let partial = loaders::toml::from_str(
//!     r#"
//!     environment = "testnet"
//!
//!     [connections]
//!     outbound_limit = 2
//!     "#,
//! )
//! .unwrap();
//!
//! let config = Config::from_partial(&partial);
//!
//! assert_eq!(config.environment, Environment::Testnet);
//! assert_eq!(config.connections.outbound_limit, 2);
//! ```

pub mod config;
pub mod defaults;
pub mod loaders;

pub use config::{Config, Environment};
