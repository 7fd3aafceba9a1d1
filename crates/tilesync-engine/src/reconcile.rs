//! Tile reconciliation - merging two versions of the same tile.
//!
//! This is the only place tile bytes are interpreted as images. Two versions
//! are merged by ordering them by timestamp, decoding the elder as the base
//! and the younger as an overlay, and drawing the overlay *under* the base
//! (destination-over):
//!
//! ```text
//! base pixel opaque      → base pixel kept
//! base pixel transparent → overlay pixel used
//! partial alpha          → Porter-Duff dst-over blend
//! ```
//!
//! Two peers that explored different parts of a tile therefore both keep
//! their pixels. The merged image is re-encoded as PNG and only persisted if
//! it differs byte-for-byte from the stored copy, which makes a repeated merge
//! of the same input a no-op.
//!
//! Equal timestamps treat the incoming version as the elder, so its pixels
//! win where both sides are opaque.

use crate::error::{Error, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, Rgba, RgbaImage};
use tilesync_store::{now_millis, TileId, TileRecord, TileStore};
use tracing::debug;

/// Outcome of reconciling an incoming tile against the stored one.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// The canonical record now held by the store.
    pub result: TileRecord,
    /// Whether the store was written.
    pub changed: bool,
    /// Whether the canonical bytes differ from what the sender sent.
    pub notify_sender: bool,
}

/// Pure merge decision, before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    /// Nothing stored yet: take the incoming version as is.
    Adopt,
    /// The composite equals the stored bytes.
    Unchanged { notify_sender: bool },
    /// The composite must replace the stored bytes.
    Replace { bytes: Vec<u8>, notify_sender: bool },
}

/// Decide how `incoming` merges into `existing` without touching the store.
pub fn merge(existing: Option<&TileRecord>, incoming: &TileRecord) -> Result<Merge> {
    let Some(existing) = existing else {
        return Ok(Merge::Adopt);
    };

    let incoming_is_newer = incoming.modified_at > existing.modified_at;
    let (elder, younger) = if incoming_is_newer {
        (&existing.bytes, &incoming.bytes)
    } else {
        (&incoming.bytes, &existing.bytes)
    };

    let composite = composite_under(&incoming.id, elder, younger)?;
    let notify_sender = composite != incoming.bytes;

    if composite == existing.bytes {
        Ok(Merge::Unchanged { notify_sender })
    } else {
        Ok(Merge::Replace {
            bytes: composite,
            notify_sender,
        })
    }
}

/// Merge `incoming` into the store given the currently stored version.
///
/// The caller holds the tile's lock for the whole call. A decode failure
/// leaves the store untouched.
pub fn reconcile(
    store: &TileStore,
    existing: Option<TileRecord>,
    incoming: TileRecord,
) -> Result<Reconciliation> {
    let decision = merge(existing.as_ref(), &incoming)?;
    match (decision, existing) {
        (Merge::Unchanged { notify_sender }, Some(result)) => Ok(Reconciliation {
            result,
            changed: false,
            notify_sender,
        }),
        (Merge::Adopt, _) | (Merge::Unchanged { .. }, None) => {
            store.put(&incoming.id, &incoming.bytes, incoming.modified_at)?;
            debug!("Created: {}", incoming.id);
            Ok(Reconciliation {
                result: incoming,
                changed: true,
                notify_sender: false,
            })
        }
        (
            Merge::Replace {
                bytes,
                notify_sender,
            },
            _,
        ) => {
            let timestamp = now_millis();
            store.put(&incoming.id, &bytes, timestamp)?;
            debug!("Updated: {} ({} bytes)", incoming.id, bytes.len());
            Ok(Reconciliation {
                result: TileRecord::new(incoming.id, bytes, timestamp),
                changed: true,
                notify_sender,
            })
        }
    }
}

/// Decode both images, draw `overlay` under `base` and encode the result.
///
/// The overlay is anchored at the top-left corner and clipped to the base's
/// dimensions.
pub fn composite_under(id: &TileId, base: &[u8], overlay: &[u8]) -> Result<Vec<u8>> {
    let mut canvas = decode(id, base)?;
    let overlay = decode(id, overlay)?;

    let (width, height) = (
        canvas.width().min(overlay.width()),
        canvas.height().min(overlay.height()),
    );
    for y in 0..height {
        for x in 0..width {
            let dst = canvas.get_pixel_mut(x, y);
            *dst = dst_over(*dst, *overlay.get_pixel(x, y));
        }
    }

    encode(id, &canvas)
}

fn decode(id: &TileId, bytes: &[u8]) -> Result<RgbaImage> {
    image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map(|img| img.to_rgba8())
        .map_err(|source| Error::Decode {
            id: id.clone(),
            source,
        })
}

/// Encode an RGBA image as PNG.
pub fn encode(id: &TileId, image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|source| Error::Encode {
            id: id.clone(),
            source,
        })?;
    Ok(out)
}

/// Porter-Duff destination-over on straight (non-premultiplied) RGBA.
fn dst_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let da = dst[3] as u32;
    let sa = src[3] as u32;
    if da == 255 || sa == 0 {
        return dst;
    }
    if da == 0 {
        return src;
    }

    // Output alpha scaled by 255.
    let alpha = da * 255 + sa * (255 - da);
    let mut out = [0u8; 4];
    for c in 0..3 {
        let num = dst[c] as u32 * da * 255 + src[c] as u32 * sa * (255 - da);
        out[c] = ((num + alpha / 2) / alpha) as u8;
    }
    out[3] = ((alpha + 127) / 255) as u8;
    Rgba(out)
}
