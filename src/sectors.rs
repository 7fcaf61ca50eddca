use crate::error::ForecastError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TECH_INSTRUMENTS: [&str; 25] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "ADBE", "AVGO", "CRM", "INTC", "AMD", "CSCO",
    "QCOM", "TXN", "INTU", "ORCL", "IBM", "V", "PYPL", "ADI", "SNOW", "SHOP", "NOW", "SQ", "MA",
];

const FINANCE_INSTRUMENTS: [&str; 25] = [
    "JPM", "BAC", "WFC", "GS", "MS", "PNC", "USB", "AXP", "RY", "TD", "SPGI", "CB", "CME", "MET",
    "ICE", "HSBC", "MCO", "SCHW", "COF", "C", "BLK", "BNS", "MUFG", "BMO", "CINF",
];

const HEALTH_INSTRUMENTS: [&str; 25] = [
    "JNJ", "PFE", "MRK", "TMO", "UNH", "ABBV", "LLY", "BMY", "AMGN", "CVS", "MDT", "ABT", "SYK",
    "DHR", "BSX", "GILD", "HCA", "EW", "REGN", "CI", "IQV", "ILMN", "HUM", "ZBH", "BAX",
];

/// Sector grouping that shares one trained model pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sector {
    Tech,
    Finance,
    Health,
}

impl Sector {
    pub fn all() -> [Sector; 3] {
        [Sector::Tech, Sector::Finance, Sector::Health]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::Tech => "tech",
            Sector::Finance => "finance",
            Sector::Health => "health",
        }
    }

    pub fn instruments(&self) -> &'static [&'static str] {
        match self {
            Sector::Tech => &TECH_INSTRUMENTS,
            Sector::Finance => &FINANCE_INSTRUMENTS,
            Sector::Health => &HEALTH_INSTRUMENTS,
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sector {
    type Err = ForecastError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tech" => Ok(Sector::Tech),
            "finance" => Ok(Sector::Finance),
            "health" => Ok(Sector::Health),
            other => Err(ForecastError::InvalidArgument(format!(
                "unknown sector {other} (expected tech, finance or health)"
            ))),
        }
    }
}

/// Normalizes an instrument identifier by trimming whitespace and uppercasing.
pub fn normalize_instrument(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Maps an instrument to its sector. Identifiers outside the static tables
/// are rejected rather than defaulted, since the sector picks the model pair.
pub fn resolve(instrument: &str) -> Result<Sector, ForecastError> {
    let Some(symbol) = normalize_instrument(instrument) else {
        return Err(ForecastError::UnknownInstrument(instrument.to_string()));
    };

    Sector::all()
        .into_iter()
        .find(|sector| sector.instruments().contains(&symbol.as_str()))
        .ok_or(ForecastError::UnknownInstrument(symbol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn resolves_known_instruments() {
        assert_eq!(resolve("AAPL").unwrap(), Sector::Tech);
        assert_eq!(resolve("jpm").unwrap(), Sector::Finance);
        assert_eq!(resolve("  UNH ").unwrap(), Sector::Health);
    }

    #[test]
    fn unknown_instrument_is_a_hard_failure() {
        let err = resolve("UNKNOWN_TICKER").unwrap_err();
        assert!(matches!(err, ForecastError::UnknownInstrument(ref id) if id == "UNKNOWN_TICKER"));
        assert!(matches!(
            resolve("   ").unwrap_err(),
            ForecastError::UnknownInstrument(_)
        ));
    }

    #[test]
    fn sector_tables_are_a_partition() {
        let mut seen = HashSet::new();
        for sector in Sector::all() {
            for instrument in sector.instruments() {
                assert!(seen.insert(*instrument), "{instrument} listed twice");
                assert_eq!(resolve(instrument).unwrap(), sector);
            }
        }
        assert_eq!(seen.len(), 75);
    }

    #[test]
    fn sector_round_trips_through_display() {
        for sector in Sector::all() {
            assert_eq!(sector.to_string().parse::<Sector>().unwrap(), sector);
        }
    }
}
