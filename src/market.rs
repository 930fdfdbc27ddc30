//! The five tracked jurisdictions.
//!
//! Declaration order is the canonical market order: it drives the stable sort of
//! pooled fetch results and every per-market listing in the dashboard feed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Serializes as the uppercase code; deserializes through `FromStr`, so config files
/// may write "us" or "Japan".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Market {
    US,
    UK,
    FR,
    DE,
    JP,
}

impl Market {
    pub const ALL: [Market; 5] = [Market::US, Market::UK, Market::FR, Market::DE, Market::JP];

    /// Order the dashboard uses for its "top articles" table.
    pub const DISPLAY_ORDER: [Market; 5] =
        [Market::US, Market::UK, Market::DE, Market::JP, Market::FR];

    pub fn code(self) -> &'static str {
        match self {
            Market::US => "US",
            Market::UK => "UK",
            Market::FR => "FR",
            Market::DE => "DE",
            Market::JP => "JP",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Market::US => "United States",
            Market::UK => "United Kingdom",
            Market::FR => "France",
            Market::DE => "Germany",
            Market::JP => "Japan",
        }
    }

    /// ISO-3166 alpha-3, used by the choropleth view.
    pub fn iso3(self) -> &'static str {
        match self {
            Market::US => "USA",
            Market::UK => "GBR",
            Market::FR => "FRA",
            Market::DE => "DEU",
            Market::JP => "JPN",
        }
    }

    /// Default news search query for this market.
    pub fn search_query(self) -> &'static str {
        match self {
            Market::US => r#"("SEC" OR "Federal Reserve" OR "CFTC" OR "FDIC") regulation"#,
            Market::UK => r#"("Bank of England" OR "FCA" OR "PRA") regulation"#,
            Market::FR => r#"("AMF" OR "Banque de France" OR "ACPR") France regulation"#,
            Market::DE => r#"("BaFin" OR "Bundesbank") Germany regulation"#,
            Market::JP => r#"("Bank of Japan" OR "FSA" OR "BOJ") Japan regulation"#,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Market {
    type Err = String;

    /// Accepts codes and display names, case-insensitive. "GB" is an alias of UK.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        for m in Market::ALL {
            if t.eq_ignore_ascii_case(m.code()) || t.eq_ignore_ascii_case(m.display_name()) {
                return Ok(m);
            }
        }
        if t.eq_ignore_ascii_case("GB") {
            return Ok(Market::UK);
        }
        Err(format!("unknown market '{t}'"))
    }
}

impl TryFrom<String> for Market {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
