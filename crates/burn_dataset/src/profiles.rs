//! Indexing of the per-person training tree.
//!
//! Layout: `data_dir/<id>_<gender>_<race>_<age>/<stem>.<ext>`, one directory per
//! person with seven images each (`mask1`..`mask5`, `incorrect_mask`, `normal`).

use crate::types::{DatasetError, DatasetResult, ProfileDataset, Sample};
use data_contracts::{AgeLabel, GenderLabel, MaskLabel, MultiLabel};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Attributes parsed from a profile directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileMeta {
    pub gender: GenderLabel,
    pub age: AgeLabel,
}

pub fn parse_profile_name(path: &Path) -> DatasetResult<ProfileMeta> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| DatasetError::ProfileName {
            path: path.to_path_buf(),
            msg: "not valid utf-8".into(),
        })?;
    let parts: Vec<&str> = name.split('_').collect();
    if parts.len() != 4 {
        return Err(DatasetError::ProfileName {
            path: path.to_path_buf(),
            msg: format!("expected 4 '_'-separated fields, got {}", parts.len()),
        });
    }
    let label_err = |source| DatasetError::Label {
        path: path.to_path_buf(),
        source,
    };
    let gender = GenderLabel::parse(parts[1]).map_err(label_err)?;
    let age = AgeLabel::parse(parts[3]).map_err(label_err)?;
    Ok(ProfileMeta { gender, age })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.starts_with('.'))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn sorted_entries(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| DatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| !is_hidden(p))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Walk `data_dir` and label every image by its profile directory and file stem.
///
/// Directories and files are visited in sorted order so sample indices are stable
/// across runs, which the seeded fold splitter relies on.
pub fn index_profiles(data_dir: &Path) -> DatasetResult<ProfileDataset> {
    let mut dataset = ProfileDataset::default();
    for profile_dir in sorted_entries(data_dir)? {
        if !profile_dir.is_dir() {
            continue;
        }
        let meta = parse_profile_name(&profile_dir)?;
        let profile = dataset.profiles.len();
        let mut found = 0usize;
        for image in sorted_entries(&profile_dir)? {
            if !image.is_file() || !is_image(&image) {
                continue;
            }
            let Some(stem) = image.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let mask = MaskLabel::from_file_stem(stem).map_err(|source| DatasetError::Label {
                path: image.clone(),
                source,
            })?;
            dataset.samples.push(Sample {
                image,
                label: MultiLabel::new(mask, meta.gender, meta.age),
                profile,
            });
            found += 1;
        }
        if found == 0 {
            tracing::warn!(dir = %profile_dir.display(), "profile directory has no images");
        }
        let name = profile_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        dataset.profiles.push(name);
    }
    if dataset.is_empty() {
        return Err(DatasetError::Empty(data_dir.to_path_buf()));
    }
    tracing::info!(
        profiles = dataset.profiles.len(),
        samples = dataset.len(),
        dir = %data_dir.display(),
        "indexed training profiles"
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_name_fields() {
        let meta = parse_profile_name(Path::new("/data/000001_female_Asian_45")).unwrap();
        assert_eq!(meta.gender, GenderLabel::Female);
        assert_eq!(meta.age, AgeLabel::Middle);
    }

    #[test]
    fn malformed_profile_name_is_rejected() {
        assert!(matches!(
            parse_profile_name(Path::new("000001_female_45")),
            Err(DatasetError::ProfileName { .. })
        ));
        assert!(matches!(
            parse_profile_name(Path::new("000001_robot_Asian_45")),
            Err(DatasetError::Label { .. })
        ));
    }

    #[test]
    fn hidden_and_non_image_files_are_skipped() {
        assert!(is_hidden(Path::new("dir/._mask1.jpg")));
        assert!(!is_image(Path::new("dir/notes.txt")));
        assert!(is_image(Path::new("dir/mask1.JPG")));
    }
}
