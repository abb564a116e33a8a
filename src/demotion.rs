use std::path::Path;

use serde::{Deserialize, Serialize};
use tantivy::Score;

use crate::{
    error::{Error, Result},
    query_factory::FieldTerm,
};

/// A term whose matching documents get their score multiplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemotedTerm {
    pub term: FieldTerm,
    pub multiplier: Score,
}

/// Turns integer preferences into score multipliers for one field.
///
/// Preferences range over `center - range ..= center + range` and map
/// linearly onto multipliers: the lower bound to 0, the center to 1 and
/// the upper bound to 2.
#[derive(Debug, Clone)]
pub struct DemotionLoader {
    field: String,
    center: i64,
    range: i64,
    min: i64,
    max: i64,
}

impl DemotionLoader {
    pub fn new(
        field: impl Into<String>,
        center: i64,
        range: i64,
    ) -> Result<Self> {
        let field = field.into();
        if field.is_empty() {
            return Err(Error::Config("field name must not be empty".into()));
        }
        if range <= 0 {
            return Err(Error::Config(format!(
                "preference range must be positive, got {range}"
            )));
        }
        let (Some(min), Some(max)) =
            (center.checked_sub(range), center.checked_add(range))
        else {
            return Err(Error::Config(format!(
                "preference bounds {center} +/- {range} do not fit in i64"
            )));
        };
        Ok(Self {
            field,
            center,
            range,
            min,
            max,
        })
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    /// The demotion for `key`, or `None` when the preference is neutral.
    pub fn demotion(
        &self,
        key: &str,
        preference: i64,
    ) -> Result<Option<DemotedTerm>> {
        if preference == self.center {
            return Ok(None);
        }
        self.create(key, preference as f64).map(Some)
    }

    /// Like [`DemotionLoader::demotion`], treating preferences within
    /// `deviation` of the center as neutral.
    pub fn demotion_with_deviation(
        &self,
        key: &str,
        preference: f64,
        deviation: f64,
    ) -> Result<Option<DemotedTerm>> {
        let center = self.center as f64;
        if center < preference + deviation && center > preference - deviation
        {
            return Ok(None);
        }
        self.create(key, preference).map(Some)
    }

    /// Reads `key=value` preference lines. Blank lines and lines starting
    /// with `#` or `!` are skipped; `:` is accepted as a separator too.
    pub fn load_file(&self, path: &Path) -> Result<Vec<DemotedTerm>> {
        let raw = std::fs::read_to_string(path)?;
        self.load_str(&raw)
    }

    pub fn load_str(&self, raw: &str) -> Result<Vec<DemotedTerm>> {
        let mut terms = Vec::new();
        for (number, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!')
            {
                continue;
            }
            let Some((key, value)) = line.split_once(['=', ':']) else {
                return Err(Error::Config(format!(
                    "line {}: expected key=value",
                    number + 1
                )));
            };
            let preference: i64 = value.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "line {}: {:?} is not an integer",
                    number + 1,
                    value.trim()
                ))
            })?;
            if let Some(term) = self.demotion(key.trim(), preference)? {
                terms.push(term);
            }
        }
        Ok(terms)
    }

    fn create(&self, key: &str, preference: f64) -> Result<DemotedTerm> {
        if preference < self.min() as f64 || preference > self.max() as f64 {
            return Err(Error::Config(format!(
                "preference {preference} outside {}..={}",
                self.min(),
                self.max()
            )));
        }
        let offset = (preference - self.center as f64) / self.range as f64;
        Ok(DemotedTerm {
            term: FieldTerm::new(self.field.as_str(), key),
            multiplier: (1.0 + offset) as Score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_preferences_linearly() {
        let loader = DemotionLoader::new("name", 5, 5).unwrap();

        assert!(loader.demotion("car", 5).unwrap().is_none());
        let multiplier =
            |p| loader.demotion("car", p).unwrap().unwrap().multiplier;
        assert_eq!(multiplier(0), 0.0);
        assert_eq!(multiplier(10), 2.0);

        let half = loader.demotion("car", 3).unwrap().unwrap();
        assert!((half.multiplier - 0.6).abs() < 1e-6);
        assert_eq!(half.term, FieldTerm::new("name", "car"));
    }

    #[test]
    fn rejects_out_of_range() {
        let loader = DemotionLoader::new("name", 5, 5).unwrap();
        assert!(loader.demotion("car", 11).is_err());
        assert!(loader.demotion("car", -1).is_err());
        assert!(DemotionLoader::new("name", 5, 0).is_err());
        assert!(DemotionLoader::new("", 5, 1).is_err());
    }

    #[test]
    fn rejects_bounds_outside_i64() {
        assert!(DemotionLoader::new("name", i64::MAX, 1).is_err());
        assert!(DemotionLoader::new("name", i64::MIN, 1).is_err());
        assert!(DemotionLoader::new("name", 0, i64::MAX).is_ok());

        let loader = DemotionLoader::new("name", 0, i64::MAX).unwrap();
        assert_eq!(loader.min(), -i64::MAX);
        assert_eq!(loader.max(), i64::MAX);
    }

    #[test]
    fn deviation_treats_near_center_as_neutral() {
        let loader = DemotionLoader::new("name", 5, 5).unwrap();
        assert!(
            loader
                .demotion_with_deviation("car", 5.2, 0.5)
                .unwrap()
                .is_none()
        );
        assert!(
            loader
                .demotion_with_deviation("car", 6.0, 0.5)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn loads_properties() {
        let loader = DemotionLoader::new("name", 5, 5).unwrap();
        let terms = loader
            .load_str("# demotions\n\ncar=2\nhorse : 5\n! note\ntrain=9\n")
            .unwrap();

        let keys: Vec<&str> =
            terms.iter().map(|t| t.term.value.as_str()).collect();
        assert_eq!(keys, ["car", "train"]);
        assert!(loader.load_str("car").is_err());
        assert!(loader.load_str("car=x").is_err());
    }

    #[test]
    fn load_file_reads_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("demotions.properties");
        std::fs::write(&path, "blob=0\n").unwrap();

        let loader = DemotionLoader::new("name", 5, 5).unwrap();
        let terms = loader.load_file(&path).unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].multiplier, 0.0);
    }
}
