use serde::{Deserialize, Serialize};
use crate::types::exchange::Exchange;

/// Operating state of the ingestion pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Live,
    Test,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Test => "test",
        }
    }

    pub fn exchanges(&self) -> [Exchange; 3] {
        match self {
            Mode::Live => Exchange::LIVE,
            Mode::Test => Exchange::TEST,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
