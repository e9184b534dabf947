use std::fmt;

/// A field path into a document, e.g. `owner.pets[0].name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Field(String),
    Index(usize),
}

impl JsonPath {
    /// Parse a dotted path. Returns a human-readable reason on failure.
    pub fn parse(input: &str) -> std::result::Result<Self, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("empty field path".into());
        }

        let mut segments = Vec::new();
        let mut chars = input.char_indices().peekable();
        let mut expect_field = true;

        while let Some(&(start, c)) = chars.peek() {
            if expect_field {
                if !is_ident_char(c) {
                    return Err(format!("unexpected '{c}' in field path '{input}'"));
                }
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                segments.push(Segment::Field(input[start..end].to_string()));
                expect_field = false;
                continue;
            }

            match c {
                '.' => {
                    chars.next();
                    expect_field = true;
                }
                '[' => {
                    chars.next();
                    let mut digits = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if !c.is_ascii_digit() {
                            break;
                        }
                        digits.push(c);
                        chars.next();
                    }
                    match chars.next() {
                        Some((_, ']')) if !digits.is_empty() => {}
                        _ => return Err(format!("bad array index in field path '{input}'")),
                    }
                    let index = digits
                        .parse()
                        .map_err(|_| format!("array index out of range in '{input}'"))?;
                    segments.push(Segment::Index(index));
                }
                other => return Err(format!("unexpected '{other}' in field path '{input}'")),
            }
        }

        if expect_field {
            return Err(format!("field path '{input}' ends with '.'"));
        }

        Ok(JsonPath { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// SQLite JSON path rooted at the document, e.g. `$.owner.pets[0]`.
    pub fn to_sql_path(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.segments {
            match segment {
                Segment::Field(name) => {
                    out.push('.');
                    out.push_str(name);
                }
                Segment::Index(i) => {
                    out.push_str(&format!("[{i}]"));
                }
            }
        }
        out
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Field(name) if i == 0 => write!(f, "{name}")?,
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for JsonPath {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        JsonPath::parse(s)
    }
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Identifiers that end up inside SQL text (collection names, identity fields).
pub(crate) fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
