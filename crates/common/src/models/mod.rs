pub mod signal;
pub mod status;
pub mod trade_config;

pub use signal::{Direction, Signal, SourceTag, UnknownDirection};
pub use status::StatusEvent;
pub use trade_config::{
    Credentials, DirectionPolicy, StaticConfigLookup, TradeConfig, TradeConfigLookup,
    normalize_instrument,
};
