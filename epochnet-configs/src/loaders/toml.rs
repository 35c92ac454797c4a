//! TOML files

use std::{fs, io, path::Path};

use thiserror::Error;

use crate::config::partial::Config;

#[derive(Debug, Error)]
pub enum Error {
    #[error("can't read config file: {0}")]
    IOError(#[from] io::Error),

    #[error("invalid config: {0}")]
    ParseError(#[from] toml::de::Error),
}

pub fn from_file(path: &Path) -> Result<Config, Error> {
    let contents = fs::read_to_string(path)?;
    from_str(&contents)
}

pub fn from_str(contents: &str) -> Result<Config, Error> {
    Ok(toml::from_str(contents)?)
}
