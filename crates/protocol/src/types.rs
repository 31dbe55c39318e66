use serde::{Deserialize, Serialize};

/// One byte-range unit of a chunked upload.
///
/// `start_byte` is inclusive, `end_byte` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Part {
    pub number: u32,
    pub start_byte: u64,
    pub end_byte: u64,
}

impl Part {
    /// Number of bytes covered by this part, 0 when `end_byte` does not
    /// follow `start_byte`.
    pub fn len(&self) -> u64 {
        self.end_byte.saturating_sub(self.start_byte)
    }

    /// Whether the part covers no bytes (never true for a valid part).
    pub fn is_empty(&self) -> bool {
        self.end_byte <= self.start_byte
    }
}

/// Run-length encoding of contiguous, equally sized parts.
///
/// Part `number + i` spans `[start_byte + i * part_size, start_byte + (i + 1) * part_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRange {
    /// First part number. Sent as `start_number`.
    #[serde(rename = "start_number")]
    pub number: u32,
    pub start_byte: u64,
    pub number_of_parts: u32,
    pub part_size: u64,
}

impl PartRange {
    /// A range holding exactly `part`.
    pub fn single(part: Part) -> Self {
        Self {
            number: part.number,
            start_byte: part.start_byte,
            number_of_parts: 1,
            part_size: part.len(),
        }
    }

    /// First part number after this range.
    pub fn end_number(&self) -> u32 {
        self.number + self.number_of_parts
    }

    /// First byte after this range.
    pub fn end_byte(&self) -> u64 {
        self.start_byte + self.total_bytes()
    }

    /// Total bytes covered by the range.
    pub fn total_bytes(&self) -> u64 {
        u64::from(self.number_of_parts) * self.part_size
    }

    /// Whether `number` falls inside this range.
    pub fn contains(&self, number: u32) -> bool {
        number >= self.number && number < self.end_number()
    }

    /// Returns the part with the given number. The caller must check
    /// [`contains`](Self::contains) first.
    pub fn part(&self, number: u32) -> Part {
        let offset = u64::from(number - self.number) * self.part_size;
        let start_byte = self.start_byte + offset;
        Part {
            number,
            start_byte,
            end_byte: start_byte + self.part_size,
        }
    }

    /// Iterates every part in the range in ascending order.
    pub fn parts(&self) -> impl Iterator<Item = Part> + '_ {
        (self.number..self.end_number()).map(move |n| self.part(n))
    }
}

/// A part description as sent by the server: either a single part or a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartEntry {
    Range(PartRange),
    Single(Part),
}

impl PartEntry {
    /// Normalizes the entry into a range.
    pub fn into_range(self) -> PartRange {
        match self {
            PartEntry::Range(range) => range,
            PartEntry::Single(part) => PartRange::single(part),
        }
    }
}

/// Credentials for observing one job over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub uid: String,
    pub jwt: String,
}

/// Server-issued authorization for a chunked upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInfo {
    pub uid: String,
    pub jwt: String,
    pub parts: Vec<PartEntry>,
    /// Present only if the post-upload processing step can be tracked live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobRef>,
}

/// Visual hint accompanying a progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Indicator {
    Spinner,
    Bar { at: u64, of: u64 },
}

/// A human-readable progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub message: String,
    pub indicator: Option<Indicator>,
}

impl Progress {
    pub fn new(message: impl Into<String>, indicator: Option<Indicator>) -> Self {
        Self {
            message: message.into(),
            indicator,
        }
    }

    /// A message with a spinner.
    pub fn spinner(message: impl Into<String>) -> Self {
        Self::new(message, Some(Indicator::Spinner))
    }

    /// A message with a progress bar.
    pub fn bar(message: impl Into<String>, at: u64, of: u64) -> Self {
        Self::new(message, Some(Indicator::Bar { at, of }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_range_addresses_parts() {
        let range = PartRange {
            number: 10,
            start_byte: 300,
            number_of_parts: 2,
            part_size: 50,
        };
        assert!(range.contains(10));
        assert!(range.contains(11));
        assert!(!range.contains(12));
        assert_eq!(
            range.part(11),
            Part {
                number: 11,
                start_byte: 350,
                end_byte: 400
            }
        );
        assert_eq!(range.end_byte(), 400);
        assert_eq!(range.parts().count(), 2);
    }

    #[test]
    fn upload_info_parses_mixed_entries() {
        let json = r#"{
            "uid": "oseh_fu_1",
            "jwt": "token",
            "parts": [
                {"start_number": 1, "start_byte": 0, "number_of_parts": 3, "part_size": 100},
                {"number": 4, "start_byte": 300, "end_byte": 320}
            ],
            "progress": {"uid": "oseh_j_1", "jwt": "job-token"}
        }"#;
        let info: UploadInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.parts.len(), 2);
        assert!(matches!(info.parts[0], PartEntry::Range(_)));
        assert_eq!(
            info.parts[1].into_range(),
            PartRange {
                number: 4,
                start_byte: 300,
                number_of_parts: 1,
                part_size: 20
            }
        );
        assert_eq!(info.progress.unwrap().uid, "oseh_j_1");
    }

    #[test]
    fn upload_info_without_progress() {
        let json = r#"{"uid": "u", "jwt": "j", "parts": []}"#;
        let info: UploadInfo = serde_json::from_str(json).unwrap();
        assert!(info.progress.is_none());
        let out = serde_json::to_string(&info).unwrap();
        assert!(!out.contains("progress"));
    }

    #[test]
    fn indicator_wire_format() {
        let bar = serde_json::to_value(Indicator::Bar { at: 3, of: 10 }).unwrap();
        assert_eq!(bar, serde_json::json!({"type": "bar", "at": 3, "of": 10}));
        let spinner = serde_json::to_value(Indicator::Spinner).unwrap();
        assert_eq!(spinner, serde_json::json!({"type": "spinner"}));
    }
}
