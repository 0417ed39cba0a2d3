use std::fmt;

/// Points are whole, indivisible units. Balances never go below zero,
/// but the type is signed so that invalid input can be detected and rejected.
pub type Points = i64;

/// Users are identified by the numeric id the caller supplies.
pub type UserId = i64;

/// Parse a user-supplied point amount.
/// Example: "500" -> 500, "1_000" -> 1000, " 30 " -> 30
pub fn parse_points(input: &str) -> Result<Points, ParsePointsError> {
    let cleaned: String = input.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return Err(ParsePointsError::Empty);
    }
    cleaned
        .parse::<Points>()
        .map_err(|_| ParsePointsError::InvalidFormat(input.trim().to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsePointsError {
    Empty,
    InvalidFormat(String),
}

impl fmt::Display for ParsePointsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsePointsError::Empty => write!(f, "empty point amount"),
            ParsePointsError::InvalidFormat(s) => write!(f, "invalid point amount '{}'", s),
        }
    }
}

impl std::error::Error for ParsePointsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_points() {
        assert_eq!(parse_points("500"), Ok(500));
        assert_eq!(parse_points(" 30 "), Ok(30));
        assert_eq!(parse_points("1_000"), Ok(1000));
        assert_eq!(parse_points("-10"), Ok(-10)); // Rejected later by the ledger
        assert_eq!(parse_points("0"), Ok(0));
    }

    #[test]
    fn test_parse_points_invalid() {
        assert_eq!(parse_points(""), Err(ParsePointsError::Empty));
        assert!(parse_points("12.5").is_err());
        assert!(parse_points("abc").is_err());
        assert!(parse_points("99999999999999999999").is_err());
    }
}
