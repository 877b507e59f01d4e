use serde::{Deserialize, Serialize};
use std::fmt;

/// Families of human-readable document numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    Batch,
    Claim,
    Ticket,
}

impl SequenceKind {
    pub fn prefix(self) -> &'static str {
        match self {
            SequenceKind::Batch => "BATCH",
            SequenceKind::Claim => "WAR",
            SequenceKind::Ticket => "RPR",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SequenceKind::Batch => "batch",
            SequenceKind::Claim => "claim",
            SequenceKind::Ticket => "ticket",
        }
    }

    /// `<PREFIX>-<YYYY>-<6-digit zero-padded sequence>`.
    pub fn format(self, year: i16, sequence: u64) -> String {
        format!("{}-{:04}-{:06}", self.prefix(), year, sequence)
    }

    /// Splits a document number back into its year and sequence.
    pub fn parse(self, number: &str) -> Option<(i16, u64)> {
        let rest = number.strip_prefix(self.prefix())?.strip_prefix('-')?;
        let (year, seq) = rest.split_once('-')?;
        if year.len() != 4 || seq.len() < 6 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((year.parse().ok()?, seq.parse().ok()?))
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_family() {
        assert_eq!(SequenceKind::Claim.format(2024, 1), "WAR-2024-000001");
        assert_eq!(SequenceKind::Ticket.format(2024, 42), "RPR-2024-000042");
        assert_eq!(SequenceKind::Batch.format(2025, 123456), "BATCH-2025-123456");
    }

    #[test]
    fn parses_back() {
        assert_eq!(SequenceKind::Claim.parse("WAR-2024-000017"), Some((2024, 17)));
        assert_eq!(SequenceKind::Claim.parse("RPR-2024-000017"), None);
        assert_eq!(SequenceKind::Batch.parse("BATCH-24-000001"), None);
        assert_eq!(SequenceKind::Ticket.parse("RPR-2024-12"), None);
    }
}
