use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of combined (mask, gender, age) classes.
pub const NUM_CLASSES: usize = 18;
/// Output widths of the mask, gender and age heads, in that order.
pub const HEAD_WIDTHS: [usize; 3] = [3, 2, 3];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MaskLabel {
    Wear = 0,
    Incorrect = 1,
    NotWear = 2,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GenderLabel {
    Male = 0,
    Female = 1,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgeLabel {
    Young = 0,
    Middle = 1,
    Old = 2,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("unknown mask file stem: {0}")]
    UnknownMaskStem(String),
    #[error("unknown gender: {0}")]
    UnknownGender(String),
    #[error("invalid age: {0}")]
    InvalidAge(String),
    #[error("{head} index {index} out of range")]
    OutOfRange { head: &'static str, index: u8 },
}

impl MaskLabel {
    pub const ALL: [MaskLabel; 3] = [MaskLabel::Wear, MaskLabel::Incorrect, MaskLabel::NotWear];

    /// Maps an image file stem (`mask1`..`mask5`, `incorrect_mask`, `normal`) to a label.
    pub fn from_file_stem(stem: &str) -> Result<Self, LabelError> {
        match stem {
            "mask1" | "mask2" | "mask3" | "mask4" | "mask5" => Ok(MaskLabel::Wear),
            "incorrect_mask" => Ok(MaskLabel::Incorrect),
            "normal" => Ok(MaskLabel::NotWear),
            other => Err(LabelError::UnknownMaskStem(other.to_string())),
        }
    }

    pub fn from_index(index: u8) -> Result<Self, LabelError> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or(LabelError::OutOfRange { head: "mask", index })
    }
}

impl GenderLabel {
    pub const ALL: [GenderLabel; 2] = [GenderLabel::Male, GenderLabel::Female];

    pub fn parse(value: &str) -> Result<Self, LabelError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(GenderLabel::Male),
            "female" => Ok(GenderLabel::Female),
            _ => Err(LabelError::UnknownGender(value.to_string())),
        }
    }

    pub fn from_index(index: u8) -> Result<Self, LabelError> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or(LabelError::OutOfRange {
                head: "gender",
                index,
            })
    }
}

impl AgeLabel {
    pub const ALL: [AgeLabel; 3] = [AgeLabel::Young, AgeLabel::Middle, AgeLabel::Old];

    /// Buckets an age in years: under 30, under 60, 60 and over.
    pub fn from_years(years: u32) -> Self {
        if years < 30 {
            AgeLabel::Young
        } else if years < 60 {
            AgeLabel::Middle
        } else {
            AgeLabel::Old
        }
    }

    pub fn parse(value: &str) -> Result<Self, LabelError> {
        value
            .trim()
            .parse::<u32>()
            .map(Self::from_years)
            .map_err(|_| LabelError::InvalidAge(value.to_string()))
    }

    pub fn from_index(index: u8) -> Result<Self, LabelError> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or(LabelError::OutOfRange { head: "age", index })
    }
}

/// The three attribute labels of one image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MultiLabel {
    pub mask: MaskLabel,
    pub gender: GenderLabel,
    pub age: AgeLabel,
}

impl MultiLabel {
    pub fn new(mask: MaskLabel, gender: GenderLabel, age: AgeLabel) -> Self {
        Self { mask, gender, age }
    }

    /// Combined class id in `0..NUM_CLASSES`: `mask * 6 + gender * 3 + age`.
    pub fn encode(self) -> u8 {
        self.mask as u8 * 6 + self.gender as u8 * 3 + self.age as u8
    }

    /// Inverse of [`MultiLabel::encode`]; `None` for ids outside `0..NUM_CLASSES`.
    pub fn decode(id: u8) -> Option<Self> {
        if id as usize >= NUM_CLASSES {
            return None;
        }
        Some(Self {
            mask: MaskLabel::from_index((id / 6) % 3).ok()?,
            gender: GenderLabel::from_index((id / 3) % 2).ok()?,
            age: AgeLabel::from_index(id % 3).ok()?,
        })
    }

    /// Builds a label from per-head class indices (mask, gender, age).
    pub fn from_indices(mask: u8, gender: u8, age: u8) -> Result<Self, LabelError> {
        Ok(Self {
            mask: MaskLabel::from_index(mask)?,
            gender: GenderLabel::from_index(gender)?,
            age: AgeLabel::from_index(age)?,
        })
    }

    pub fn indices(self) -> [u8; 3] {
        [self.mask as u8, self.gender as u8, self.age as u8]
    }

    /// Every combination, ordered by combined id.
    pub fn all() -> impl Iterator<Item = MultiLabel> {
        (0..NUM_CLASSES as u8).filter_map(MultiLabel::decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_documented_layout() {
        let label = MultiLabel::new(MaskLabel::Incorrect, GenderLabel::Female, AgeLabel::Old);
        assert_eq!(label.encode(), 6 + 3 + 2);
        let label = MultiLabel::new(MaskLabel::Wear, GenderLabel::Male, AgeLabel::Young);
        assert_eq!(label.encode(), 0);
        let label = MultiLabel::new(MaskLabel::NotWear, GenderLabel::Female, AgeLabel::Old);
        assert_eq!(label.encode(), 17);
    }

    #[test]
    fn decode_rejects_out_of_range() {
        assert!(MultiLabel::decode(18).is_none());
        assert!(MultiLabel::decode(u8::MAX).is_none());
    }

    #[test]
    fn age_buckets() {
        assert_eq!(AgeLabel::from_years(29), AgeLabel::Young);
        assert_eq!(AgeLabel::from_years(30), AgeLabel::Middle);
        assert_eq!(AgeLabel::from_years(59), AgeLabel::Middle);
        assert_eq!(AgeLabel::from_years(60), AgeLabel::Old);
    }

    #[test]
    fn mask_stems() {
        assert_eq!(MaskLabel::from_file_stem("mask3"), Ok(MaskLabel::Wear));
        assert_eq!(
            MaskLabel::from_file_stem("incorrect_mask"),
            Ok(MaskLabel::Incorrect)
        );
        assert_eq!(MaskLabel::from_file_stem("normal"), Ok(MaskLabel::NotWear));
        assert!(MaskLabel::from_file_stem("mask6").is_err());
    }

    #[test]
    fn gender_is_case_insensitive() {
        assert_eq!(GenderLabel::parse("Female"), Ok(GenderLabel::Female));
        assert!(GenderLabel::parse("other").is_err());
    }
}
