//! Storage key derivation from public object URLs.

use url::Url;

/// Path marker separating the public URL prefix from the bucket-relative key.
const BUCKET_MARKER: &str = "/product-files/";

/// Derives the bucket-relative storage key from a public `glb_url`.
///
/// `https://<project>/storage/v1/object/public/product-files/abc/def.glb` yields
/// `abc/def.glb`. Returns `None` when the URL does not parse or its path
/// does not contain the bucket marker; such rows are skipped by the sweep
/// and left with their `glb_url` intact.
pub fn storage_key(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let (_, key) = parsed.path().split_once(BUCKET_MARKER)?;
    if key.is_empty() {
        return None;
    }
    Some(key.to_string())
}
