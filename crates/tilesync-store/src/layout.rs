//! Directory layout: `<root>/<world>/<layer>/<x>,<y>.png`.

use crate::error::{Error, Result};
use crate::tile::TileId;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Two signed decimal integers separated by a comma, with a `.png` suffix.
static TILE_FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+),(-?\d+)\.png$").expect("valid regex"));

/// Whether `name` looks like a tile file name.
pub fn is_tile_file_name(name: &str) -> bool {
    TILE_FILE_NAME.is_match(name)
}

/// Parse the coordinate pair out of a tile file name.
///
/// Returns `None` when the name does not match the pattern or a coordinate
/// does not fit in an `i32`.
pub fn parse_tile_file_name(name: &str) -> Option<(i32, i32)> {
    let caps = TILE_FILE_NAME.captures(name)?;
    let x = caps[1].parse().ok()?;
    let y = caps[2].parse().ok()?;
    Some((x, y))
}

/// Build a [`TileId`] from a tile file path.
///
/// The parent directory names the layer and the grandparent names the world.
pub fn parse_tile_path(path: &Path) -> Result<TileId> {
    let invalid = || Error::InvalidTilePath(path.to_path_buf());

    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
    let (x, y) = parse_tile_file_name(name).ok_or_else(invalid)?;

    let layer_dir = path.parent().ok_or_else(invalid)?;
    let layer = layer_dir.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
    let world = layer_dir
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .ok_or_else(invalid)?;

    Ok(TileId::new(world, layer, x, y))
}

/// Check that a world or layer name is usable as a single directory name.
pub fn check_component(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::InvalidComponent(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn accepts_signed_coordinates() {
        assert_eq!(parse_tile_file_name("3,-2.png"), Some((3, -2)));
        assert_eq!(parse_tile_file_name("-10,0.png"), Some((-10, 0)));
        assert!(is_tile_file_name("0,0.png"));
    }

    #[test]
    fn rejects_other_names() {
        for name in ["3,2.jpg", "3;2.png", "a,b.png", ",1.png", "1,2.png.tmp", ".1,2.png.tmp-1", "1,2,3.png"] {
            assert!(!is_tile_file_name(name), "{name} should not match");
        }
    }

    #[test]
    fn overflowing_coordinate_is_rejected() {
        assert!(is_tile_file_name("99999999999,0.png"));
        assert_eq!(parse_tile_file_name("99999999999,0.png"), None);
    }

    #[test]
    fn path_to_id() {
        let path = PathBuf::from("/data/tiles/overworld/day/3,-2.png");
        let id = parse_tile_path(&path).unwrap();
        assert_eq!(id, TileId::new("overworld", "day", 3, -2));
    }

    #[test]
    fn malformed_path_is_an_error() {
        let path = PathBuf::from("/data/tiles/overworld/day/readme.txt");
        assert!(matches!(parse_tile_path(&path), Err(Error::InvalidTilePath(_))));
    }

    #[test]
    fn components() {
        assert!(check_component("the_nether").is_ok());
        assert!(check_component("").is_err());
        assert!(check_component("..").is_err());
        assert!(check_component("a/b").is_err());
    }
}
