//! Memory sizing helpers (spec.md §4.B, tested against §8 S7).
//!
//! Pure, table-tested functions computing the DB's transaction-memory
//! budget from a configured heap size. Transaction-memory total defaults to
//! 70% of heap; per-transaction limit defaults to 10% of that with a 256
//! MiB floor. The parser accepts `k|m|g` suffixes (case-insensitive) and
//! fractional values (e.g. `1.5g`).

const TRANSACTION_TOTAL_FRACTION: f64 = 0.70;
const PER_TRANSACTION_FRACTION: f64 = 0.10;
pub const PER_TRANSACTION_FLOOR_MIB: f64 = 256.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySize {
    mib: f64,
}

impl MemorySize {
    pub fn from_mib(mib: f64) -> Self {
        Self { mib }
    }

    pub fn mib(&self) -> f64 {
        self.mib
    }

    /// Parse a `k|m|g` (case-insensitive) suffixed, possibly fractional,
    /// quantity into a `MemorySize` normalized to MiB.
    pub fn parse(s: &str) -> Result<Self, MemorySizeError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MemorySizeError::Malformed(s.to_string()));
        }
        let (number_part, unit) = match s.chars().last() {
            Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - 1], c.to_ascii_lowercase()),
            _ => return Err(MemorySizeError::Malformed(s.to_string())),
        };
        let value: f64 = number_part
            .parse()
            .map_err(|_| MemorySizeError::Malformed(s.to_string()))?;
        if value < 0.0 {
            return Err(MemorySizeError::Malformed(s.to_string()));
        }
        let mib = match unit {
            'k' => value / 1024.0,
            'm' => value,
            'g' => value * 1024.0,
            _ => return Err(MemorySizeError::UnknownUnit(unit)),
        };
        Ok(MemorySize { mib })
    }

    /// Render back to a `k|m|g` suffixed string with one decimal place,
    /// choosing the largest unit that keeps the value >= 1.
    pub fn format(&self) -> String {
        if self.mib >= 1024.0 {
            format!("{:.1}g", self.mib / 1024.0)
        } else if self.mib >= 1.0 {
            format!("{:.1}m", self.mib)
        } else {
            format!("{:.1}k", self.mib * 1024.0)
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemorySizeError {
    #[error("malformed memory quantity: {0}")]
    Malformed(String),
    #[error("unknown memory unit: {0}")]
    UnknownUnit(char),
}

/// Computed transaction-memory budget for a given heap size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransactionMemoryBudget {
    pub total: MemorySize,
    pub per_transaction: MemorySize,
}

/// Compute the transaction-memory budget from a heap size, honoring an
/// optional user override for either field (preserved exactly, not
/// recomputed).
pub fn transaction_memory_budget(
    heap: &str,
    total_override: Option<&str>,
    per_tx_override: Option<&str>,
) -> Result<TransactionMemoryBudget, MemorySizeError> {
    let heap_size = MemorySize::parse(heap)?;

    let total = match total_override {
        Some(o) => MemorySize::parse(o)?,
        None => MemorySize::from_mib(heap_size.mib() * TRANSACTION_TOTAL_FRACTION),
    };

    let per_transaction = match per_tx_override {
        Some(o) => MemorySize::parse(o)?,
        None => {
            let computed = total.mib() * PER_TRANSACTION_FRACTION;
            MemorySize::from_mib(computed.max(PER_TRANSACTION_FLOOR_MIB))
        }
    };

    Ok(TransactionMemoryBudget {
        total,
        per_transaction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 0.05
    }

    #[test]
    fn parses_suffixes_and_fractions() {
        assert!(approx(MemorySize::parse("4g").unwrap().mib(), 4096.0));
        assert!(approx(MemorySize::parse("1.5g").unwrap().mib(), 1536.0));
        assert!(approx(MemorySize::parse("512m").unwrap().mib(), 512.0));
        assert!(approx(MemorySize::parse("2048k").unwrap().mib(), 2.0));
    }

    #[test]
    fn rejects_malformed_or_unknown_unit() {
        assert!(MemorySize::parse("").is_err());
        assert!(MemorySize::parse("4x").is_err());
        assert!(MemorySize::parse("abc").is_err());
    }

    // S7 from spec.md §8.
    #[test]
    fn s7_heap_4g_defaults() {
        let budget = transaction_memory_budget("4g", None, None).unwrap();
        assert!(approx(budget.total.mib(), 2867.2)); // 2.8g
        assert!(approx(budget.per_transaction.mib(), 286.72)); // 286.7m
    }

    #[test]
    fn s7_heap_1g_hits_floor() {
        let budget = transaction_memory_budget("1g", None, None).unwrap();
        assert!(approx(budget.per_transaction.mib(), 256.0));
    }

    #[test]
    fn s7_user_override_preserved_exactly() {
        let budget = transaction_memory_budget("4g", Some("3g"), Some("300m")).unwrap();
        assert!(approx(budget.total.mib(), 3072.0));
        assert!(approx(budget.per_transaction.mib(), 300.0));
    }

    #[test]
    fn format_round_trips_through_largest_unit() {
        assert_eq!(MemorySize::from_mib(2867.2).format(), "2.8g");
        assert_eq!(MemorySize::from_mib(286.7).format(), "286.7m");
    }
}
