use crate::error::Error;
use crate::types::define_wire_enum;

define_wire_enum! {
    Symbol, Error::InvalidSymbol {
        BtcUsdt => "BTCUSDT",
        DogeUsdt => "DOGEUSDT",
        TonUsdt => "TONUSDT",
        SolUsdt => "SOLUSDT",
        EthUsdt => "ETHUSDT",
    }
}

impl Symbol {
    pub const ALL: [Symbol; 5] = [
        Symbol::BtcUsdt,
        Symbol::DogeUsdt,
        Symbol::TonUsdt,
        Symbol::SolUsdt,
        Symbol::EthUsdt,
    ];

    /// Reference price the synthetic generator perturbs around.
    pub fn baseline_price(&self) -> f64 {
        match self {
            Symbol::BtcUsdt => 100_000.0,
            Symbol::EthUsdt => 5_000.0,
            Symbol::SolUsdt => 200.0,
            Symbol::TonUsdt => 99.0,
            Symbol::DogeUsdt => 0.27,
        }
    }

    pub fn is_valid(&self) -> bool {
        Self::ALL.contains(self)
    }
}
