use crate::error::Error;
use crate::types::define_wire_enum;

define_wire_enum! {
    /// Exchange identity. `All` is a query-only wildcard and never appears
    /// on a tick.
    Exchange, Error::InvalidExchange {
        All => "all",
        Exchange1 => "exchange1",
        Exchange2 => "exchange2",
        Exchange3 => "exchange3",
        TestExchange1 => "test-exchange1",
        TestExchange2 => "test-exchange2",
        TestExchange3 => "test-exchange3",
    }
}

impl Exchange {
    /// Real network feeds.
    pub const LIVE: [Exchange; 3] = [Exchange::Exchange1, Exchange::Exchange2, Exchange::Exchange3];

    /// Synthetic generators used in test mode.
    pub const TEST: [Exchange; 3] = [
        Exchange::TestExchange1,
        Exchange::TestExchange2,
        Exchange::TestExchange3,
    ];

    /// Every identity a tick may carry.
    pub const SOURCES: [Exchange; 6] = [
        Exchange::Exchange1,
        Exchange::Exchange2,
        Exchange::Exchange3,
        Exchange::TestExchange1,
        Exchange::TestExchange2,
        Exchange::TestExchange3,
    ];

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Exchange::All)
    }

    pub fn is_source(&self) -> bool {
        Self::SOURCES.contains(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_wire_names() {
        for exchange in Exchange::SOURCES {
            assert_eq!(exchange.as_str().parse::<Exchange>().unwrap(), exchange);
        }
        assert_eq!("all".parse::<Exchange>().unwrap(), Exchange::All);
    }

    #[test]
    fn test_unknown_exchange_rejected() {
        let err = "binance".parse::<Exchange>().unwrap_err();
        assert!(matches!(err, Error::InvalidExchange(name) if name == "binance"));
    }

    #[test]
    fn test_wildcard_is_not_a_source() {
        assert!(Exchange::All.is_wildcard());
        assert!(!Exchange::All.is_source());
        assert!(Exchange::TestExchange2.is_source());
    }
}
