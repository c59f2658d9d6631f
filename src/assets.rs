//! Loading assets from an object store.
//!
//! An asset container holds a server manifest (`<name>.ism`), a client
//! manifest (`<name>.ismc`) for live archives, and optionally an
//! `asset.json` with storage-encryption material.

use std::collections::HashMap;

use af_core::{has_extension, AssetDetails, DecryptionInfo, Error, Result};
use af_source::ObjectStore;
use base64::Engine;
use serde::Deserialize;

/// Name of the optional metadata object.
pub const METADATA_OBJECT: &str = "asset.json";

const SERVER_MANIFEST_EXTENSION: &str = ".ism";
const CLIENT_MANIFEST_EXTENSION: &str = ".ismc";

#[derive(Debug, Deserialize)]
struct AssetMetadata {
    #[serde(default)]
    storage_encryption: Option<StorageEncryption>,
}

#[derive(Debug, Deserialize)]
struct StorageEncryption {
    /// Base64 content key.
    key: String,
    #[serde(default)]
    ivs: HashMap<String, u64>,
}

/// Load the manifests and decryption material of `container`.
///
/// A missing container or server manifest is [`Error::NotFound`]; callers
/// treat that as a precondition failure and skip the asset.
pub async fn load_asset(store: &dyn ObjectStore, container: &str) -> Result<AssetDetails> {
    if !store.container_exists(container).await? {
        return Err(Error::not_found("container", container));
    }

    // Manifests sit at the top of the container; fragments live below.
    let objects: Vec<String> = store
        .list(container, "")
        .await?
        .into_iter()
        .filter(|name| !name.contains('/'))
        .collect();

    let server_names: Vec<&String> = objects
        .iter()
        .filter(|n| has_extension(n, SERVER_MANIFEST_EXTENSION))
        .collect();
    let server_name = match server_names.as_slice() {
        [] => return Err(Error::not_found("server manifest", container)),
        [only] => *only,
        [first, ..] => {
            tracing::warn!(
                container,
                count = server_names.len(),
                using = %first,
                "Container has several server manifests"
            );
            *first
        }
    };

    let xml = store.read_to_string(container, server_name).await?;
    let manifest = af_media::parse_server_manifest(server_name, &xml)?;

    let client_manifest = match client_manifest_name(&objects, server_name) {
        Some(name) => {
            let xml = store.read_to_string(container, name).await?;
            Some(af_media::parse_client_manifest(&xml)?)
        }
        None => {
            if manifest.is_live_archive {
                tracing::warn!(
                    container,
                    "Live archive has no client manifest; fragmented tracks cannot be rebuilt"
                );
            }
            None
        }
    };

    let decryption = if objects.iter().any(|n| n == METADATA_OBJECT) {
        let json = store.read_to_string(container, METADATA_OBJECT).await?;
        parse_metadata(&json)?
    } else {
        None
    };

    tracing::debug!(
        container,
        manifest = %manifest.file_name,
        tracks = manifest.tracks.len(),
        live_archive = manifest.is_live_archive,
        encrypted = decryption.is_some(),
        "Loaded asset"
    );

    Ok(AssetDetails {
        container: container.to_string(),
        manifest,
        client_manifest,
        decryption,
    })
}

/// The client manifest matching `server_name`, else the only one present.
fn client_manifest_name<'a>(objects: &'a [String], server_name: &str) -> Option<&'a String> {
    let expected = format!("{server_name}c");
    let candidates: Vec<&String> = objects
        .iter()
        .filter(|n| has_extension(n, CLIENT_MANIFEST_EXTENSION))
        .collect();
    candidates
        .iter()
        .find(|n| n.eq_ignore_ascii_case(&expected))
        .copied()
        .or(match candidates.as_slice() {
            [only] => Some(*only),
            _ => None,
        })
}

/// Parse `asset.json` into decryption material, if the asset is encrypted.
pub fn parse_metadata(json: &str) -> Result<Option<DecryptionInfo>> {
    let metadata: AssetMetadata = serde_json::from_str(json)
        .map_err(|e| Error::Validation(format!("invalid {METADATA_OBJECT}: {e}")))?;
    let Some(encryption) = metadata.storage_encryption else {
        return Ok(None);
    };

    let key = base64::engine::general_purpose::STANDARD
        .decode(encryption.key.trim())
        .map_err(|e| Error::Decryption(format!("content key is not valid base64: {e}")))?;
    if key.len() != 16 && key.len() != 32 {
        return Err(Error::Decryption(format!(
            "content key must be 16 or 32 bytes, got {}",
            key.len()
        )));
    }

    Ok(Some(DecryptionInfo {
        key,
        ivs: encryption.ivs,
    }))
}
