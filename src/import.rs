use chrono::NaiveDateTime;

/// Marker in field 1 that identifies a structured scanner record. The Opticon
/// readers emit it verbatim, so the match is case-sensitive.
const SCANNER_TAG: &str = "Codabar";

const SCANNER_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Per-line import failure. The raw line travels with the error so the caller
/// can keep it in the retry buffer for correction and resubmission.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportError {
    pub reason: ImportReason,
    pub raw_line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportReason {
    InvalidFormat,
    InvalidUser,
    InvalidDate,
    InvalidStatus,
    InvalidSession,
}

impl ImportReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidFormat => "invalidformat",
            Self::InvalidUser => "invaliduser",
            Self::InvalidDate => "invaliddate",
            Self::InvalidStatus => "invalidstatus",
            Self::InvalidSession => "invalidsession",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidFormat => "line shape not recognized",
            Self::InvalidUser => "identifier did not resolve to a user",
            Self::InvalidDate => "scanner date is unparseable",
            Self::InvalidStatus => "status token did not resolve",
            Self::InvalidSession => "no session covers the resolved time",
        }
    }
}

impl ImportError {
    pub fn new(reason: ImportReason, raw_line: &str) -> Self {
        Self {
            reason,
            raw_line: raw_line.to_string(),
        }
    }
}

/// One import line, parsed but not yet resolved against the store. The two
/// dialects are decided by field count and the scanner tag, never inferred
/// from content.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// Single bare identifier; timestamp and status come from the defaults.
    Bare { id_token: String },
    /// Tagged scanner record with optional timestamp and status token.
    Scanner {
        id_token: String,
        time: Option<i64>,
        status_token: Option<String>,
    },
}

impl ParsedLine {
    pub fn id_token(&self) -> &str {
        match self {
            ParsedLine::Bare { id_token } => id_token,
            ParsedLine::Scanner { id_token, .. } => id_token,
        }
    }
}

pub fn parse_line(line: &str) -> Result<ParsedLine, ImportError> {
    let fields = tokenize(line);

    if fields.len() == 1 {
        return Ok(ParsedLine::Bare {
            id_token: fields[0].trim().to_string(),
        });
    }

    if fields[1].trim() == SCANNER_TAG {
        let time = match fields.get(2).map(|f| f.trim()) {
            Some(raw) if !raw.is_empty() => Some(parse_scanner_time(raw).ok_or_else(|| {
                ImportError::new(ImportReason::InvalidDate, line)
            })?),
            _ => None,
        };
        let status_token = match fields.get(3).map(|f| f.trim()) {
            Some(raw) if !raw.is_empty() => Some(raw.to_string()),
            _ => None,
        };
        return Ok(ParsedLine::Scanner {
            id_token: fields[0].trim().to_string(),
            time,
            status_token,
        });
    }

    Err(ImportError::new(ImportReason::InvalidFormat, line))
}

/// Comma-separated fields with minimal double-quote handling, enough for
/// scanner output and hand-typed lines. A quoted field may contain commas.
fn tokenize(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

fn parse_scanner_time(raw: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(raw, SCANNER_DATE_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Format a unix timestamp the way check-off remarks display it.
pub fn format_user_date(timestamp: i64) -> String {
    match chrono::DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => dt.format("%d/%m/%Y %H:%M").to_string(),
        None => String::new(),
    }
}
