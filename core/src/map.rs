//! The static landmark map.
//!
//! Landmarks are surveyed once in the map frame and never change during the filter's lifetime. The map keeps the
//! landmarks in their original (file) order, which is the enumeration order used for range queries and therefore
//! for nearest-neighbor tie-breaking. Lookups by landmark id go through a hash index rather than assuming the ids
//! are contiguous positions in the collection.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display};
use std::path::Path;

use crate::error::{FilterError, Result};

/// A single surveyed landmark in the map frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapLandmark {
    /// Landmark x-coordinate in meters
    pub x: f64,
    /// Landmark y-coordinate in meters
    pub y: f64,
    /// Persistent landmark identifier
    pub id: i32,
}
impl Display for MapLandmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapLandmark({}: {:.3}, {:.3})", self.id, self.x, self.y)
    }
}
impl MapLandmark {
    pub fn new(id: i32, x: f64, y: f64) -> Self {
        MapLandmark { x, y, id }
    }
}

/// Immutable, ordered collection of map landmarks.
#[derive(Clone, Debug, Default)]
pub struct LandmarkMap {
    landmarks: Vec<MapLandmark>,
    index_by_id: HashMap<i32, usize>,
}
impl LandmarkMap {
    /// Build a map from landmarks in enumeration order.
    ///
    /// Returns an error if two landmarks share an id.
    pub fn new(landmarks: Vec<MapLandmark>) -> Result<Self> {
        let mut index_by_id = HashMap::with_capacity(landmarks.len());
        for (i, landmark) in landmarks.iter().enumerate() {
            if index_by_id.insert(landmark.id, i).is_some() {
                return Err(FilterError::InvalidParameter(format!(
                    "duplicate landmark id {} in map",
                    landmark.id
                )));
            }
        }
        Ok(LandmarkMap {
            landmarks,
            index_by_id,
        })
    }
    /// Reads a landmark map from a delimited text file with rows `x y id`.
    ///
    /// The delimiter (tab, comma or space) is detected from the first line; there is no header row.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mcl::map::LandmarkMap;
    ///
    /// let map = LandmarkMap::from_file("./data/map_data.txt").expect("Failed to read map");
    /// println!("Loaded {} landmarks", map.len());
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, Box<dyn Error>> {
        let landmarks: Vec<MapLandmark> = crate::sim::read_records(path)?;
        Ok(LandmarkMap::new(landmarks)?)
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
    /// All landmarks in enumeration order.
    pub fn landmarks(&self) -> &[MapLandmark] {
        &self.landmarks
    }
    pub fn iter(&self) -> std::slice::Iter<'_, MapLandmark> {
        self.landmarks.iter()
    }
    /// Look up a landmark by its persistent id.
    pub fn get(&self, id: i32) -> Option<&MapLandmark> {
        self.index_by_id.get(&id).map(|&i| &self.landmarks[i])
    }
    /// Enumeration position of a landmark id.
    pub fn position(&self, id: i32) -> Option<usize> {
        self.index_by_id.get(&id).copied()
    }
}
impl<'a> IntoIterator for &'a LandmarkMap {
    type Item = &'a MapLandmark;
    type IntoIter = std::slice::Iter<'a, MapLandmark>;
    fn into_iter(self) -> Self::IntoIter {
        self.landmarks.iter()
    }
}
