//! Locating and loading the scan inside its zip archive.

use crate::ply::parse_ply;
use anyhow::{Context, Result};
use cloud_render::PointCloud;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const DEFAULT_SCENE_ENTRY: &str = "pointcloud.ply";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("no file matching '{0}' in archive")]
    Missing(String),

    #[error("more than one file matching '{pattern}' in archive: {matches:?}")]
    Ambiguous { pattern: String, matches: Vec<String> },
}

/// Shell-style match over the whole name: `*` spans any run of characters
/// (slashes included) and `?` a single character.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    // Position after the last `*` and the name index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;

    while ni < n.len() {
        match p.get(pi) {
            Some('*') => {
                backtrack = Some((pi + 1, ni));
                pi += 1;
            }
            Some(&c) if c == '?' || c == n[ni] => {
                pi += 1;
                ni += 1;
            }
            _ => match backtrack {
                Some((star_p, star_n)) => {
                    pi = star_p;
                    ni = star_n + 1;
                    backtrack = Some((star_p, star_n + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

/// The single entry name matching `pattern`.
pub fn find_entry<'a>(names: impl IntoIterator<Item = &'a str>, pattern: &str) -> Result<String, SceneError> {
    let matches: Vec<String> = names
        .into_iter()
        .filter(|name| wildcard_match(pattern, name))
        .map(str::to_string)
        .collect();
    match matches.len() {
        0 => Err(SceneError::Missing(pattern.to_string())),
        1 => Ok(matches.into_iter().next().unwrap_or_default()),
        _ => Err(SceneError::Ambiguous {
            pattern: pattern.to_string(),
            matches,
        }),
    }
}

/// Resolves the PLY entry: an explicit pattern, or `pointcloud.ply` at the
/// archive root falling back to one directory down.
pub fn select_entry(names: &[&str], pattern: Option<&str>) -> Result<String, SceneError> {
    match pattern {
        Some(pattern) => find_entry(names.iter().copied(), pattern),
        None => match find_entry(names.iter().copied(), DEFAULT_SCENE_ENTRY) {
            Err(SceneError::Missing(_)) => {
                find_entry(names.iter().copied(), &format!("*/{DEFAULT_SCENE_ENTRY}"))
            }
            other => other,
        },
    }
}

/// Reads the scan from `archive`.
pub fn load_point_cloud(archive: &Path, pattern: Option<&str>) -> Result<PointCloud> {
    let file = File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file).with_context(|| format!("reading zip {}", archive.display()))?;

    let names: Vec<String> = zip.file_names().map(str::to_string).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let entry = select_entry(&names, pattern).with_context(|| format!("locating scan in {}", archive.display()))?;

    tracing::info!(archive = %archive.display(), entry, "loading point cloud");
    let mut data = Vec::new();
    zip.by_name(&entry)
        .with_context(|| format!("opening {entry}"))?
        .read_to_end(&mut data)
        .with_context(|| format!("decompressing {entry}"))?;

    let cloud = parse_ply(&data).with_context(|| format!("parsing {entry}"))?;
    tracing::info!(points = cloud.len(), "point cloud loaded");
    Ok(cloud)
}
