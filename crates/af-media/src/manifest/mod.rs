//! Smooth Streaming manifest parsing.
//!
//! - [`server`] -- the SMIL server manifest (`.ism`) listing an asset's tracks.
//! - [`client`] -- the client manifest (`.ismc`) indexing live-archive
//!   fragments per logical stream.

mod client;
mod server;

pub use client::parse_client_manifest;
pub use server::parse_server_manifest;

use std::collections::HashMap;

use af_core::{Error, Result};
use quick_xml::events::BytesStart;

/// Collect an element's attributes with lowercased local names.
fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| Error::Manifest(err.to_string()))?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(|err| Error::Manifest(err.to_string()))?
            .to_ascii_lowercase();
        let value = attr
            .unescape_value()
            .map_err(|err| Error::Manifest(err.to_string()))?
            .to_string();
        map.insert(key, value);
    }
    Ok(map)
}

/// Lowercased local name of an element.
fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}
