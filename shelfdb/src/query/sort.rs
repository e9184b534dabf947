use super::{JsonPath, Literal};
use crate::error::{Result, ShelfError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One sort key: a document path and a direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub path: JsonPath,
    pub direction: SortDirection,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl SortSpec {
    /// Parse `path<`, `path>`, `path=asc` or `path==DESC`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();

        let (raw_path, direction) = if let Some(path) = trimmed.strip_suffix('<') {
            (path, SortDirection::Asc)
        } else if let Some(path) = trimmed.strip_suffix('>') {
            (path, SortDirection::Desc)
        } else if let Some((path, dir)) = trimmed.split_once('=') {
            let dir = dir.strip_prefix('=').unwrap_or(dir).trim();
            let direction = if dir.eq_ignore_ascii_case("asc") {
                SortDirection::Asc
            } else if dir.eq_ignore_ascii_case("desc") {
                SortDirection::Desc
            } else {
                return Err(ShelfError::malformed_sort(
                    input,
                    format!("direction must be ASC or DESC, got '{dir}'"),
                ));
            };
            (path, direction)
        } else {
            return Err(ShelfError::malformed_sort(
                input,
                "expected a trailing '<' or '>' or '=ASC' / '=DESC'",
            ));
        };

        let path = JsonPath::parse(raw_path).map_err(|reason| ShelfError::malformed_sort(input, reason))?;
        Ok(SortSpec { path, direction })
    }

    pub fn asc(field: &str) -> Result<Self> {
        Self::parse(&format!("{field}<"))
    }

    pub fn desc(field: &str) -> Result<Self> {
        Self::parse(&format!("{field}>"))
    }

    /// `ORDER BY` fragment and the path parameter it binds.
    pub fn to_sql(&self) -> (String, Literal) {
        (
            format!("ORDER BY json_extract(value, ?) {}", self.direction.keyword()),
            Literal::Text(self.path.to_sql_path()),
        )
    }
}

impl std::str::FromStr for SortSpec {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self> {
        SortSpec::parse(s)
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Asc => write!(f, "{}<", self.path),
            SortDirection::Desc => write!(f, "{}>", self.path),
        }
    }
}
