//! Source locations
//!
//! Format: `<line>|<begin_column>|<end_column>`, several locations joined
//! with `,`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A point or range on one line of a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub line_no: u32,
    pub begin_column: u32,
    /// Same as `begin_column` for a single point
    pub end_column: u32,
}

impl SourceLocation {
    pub fn new(line_no: u32, begin_column: u32, end_column: Option<u32>) -> Self {
        Self {
            line_no,
            begin_column,
            end_column: end_column.unwrap_or(begin_column),
        }
    }

    /// Parse `line|begin|end`
    pub fn parse(location: &str) -> Result<Self> {
        let points: Vec<&str> = location.split('|').collect();
        if points.len() != 3 {
            return Err(Error::Parse(format!("Invalid location string: {}", location)));
        }

        let number = |s: &str| {
            s.trim()
                .parse::<u32>()
                .map_err(|_| Error::Parse(format!("Invalid location string: {}", location)))
        };

        Ok(Self {
            line_no: number(points[0])?,
            begin_column: number(points[1])?,
            end_column: number(points[2])?,
        })
    }

    /// Parse a comma-separated list; the empty string is an empty list
    pub fn parse_list(locations: &str) -> Result<Vec<Self>> {
        if locations.is_empty() {
            return Ok(Vec::new());
        }
        locations.split(',').map(Self::parse).collect()
    }

    pub fn join_list(locations: &[SourceLocation]) -> String {
        locations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.line_no, self.begin_column, self.end_column)
    }
}

impl FromStr for SourceLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for SourceLocation {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SourceLocation {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SourceLocation::parse(&s).map_err(serde::de::Error::custom)
    }
}
