use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::SkipReason;

pub const KEY_EXCHANGE: &str = "exchange";
pub const KEY_COIN: &str = "coin";
pub const KEY_COIN_CUSTOM: &str = "coin_custom";
pub const KEY_CURRENCY: &str = "currency";
pub const KEY_CURRENCY_CUSTOM: &str = "currency_custom";

/// Keys loaded into a [`ConfigRecord`] snapshot before a transform runs.
pub const RECORD_KEYS: [&str; 5] =
    [KEY_EXCHANGE, KEY_COIN, KEY_COIN_CUSTOM, KEY_CURRENCY, KEY_CURRENCY_CUSTOM];

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declares a closed set of canonical identifiers whose names are their
/// persisted spelling.
macro_rules! canonical_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant)),+
                }
            }

            #[must_use]
            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $(stringify!($variant) => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

canonical_enum! {
    /// Exchanges and price providers a widget can be configured against.
    Exchange {
        BIT2C,
        BITBAY,
        BITFINEX,
        BITMARKET24,
        BITMARKETPL,
        BITSTAMP,
        BITTREX,
        BINANCE,
        COINBASE,
        COINBASEPRO,
        COINMARKETCAP,
        GEMINI,
        INDEPENDENT_RESERVE,
        ITBIT,
        KOINEX,
        KRAKEN,
        LUNO,
        PARIBU,
        POLONIEX,
        QUOINE,
        WEX,
    }
}

canonical_enum! {
    Coin {
        BCH,
        BTC,
        DASH,
        DOGE,
        ETC,
        ETH,
        IOTA,
        LTC,
        NEO,
        XMR,
        XRP,
        ZEC,
    }
}

canonical_enum! {
    Currency {
        AUD,
        BRL,
        CAD,
        CHF,
        CNY,
        EUR,
        GBP,
        ILS,
        INR,
        JPY,
        KRW,
        NZD,
        PLN,
        RUB,
        TRY,
        USD,
        ZAR,
    }
}

/// Snapshot of one persisted widget configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigRecord {
    pub id: RecordId,
    pub values: BTreeMap<String, String>,
}

impl ConfigRecord {
    #[must_use]
    pub fn new(id: RecordId) -> Self {
        Self { id, values: BTreeMap::new() }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Resolve the stored exchange to a canonical identifier.
    ///
    /// # Errors
    /// Returns [`SkipReason::Unresolved`] when the exchange is absent or no longer known.
    pub fn exchange(&self) -> Result<Exchange, SkipReason> {
        let raw =
            self.get(KEY_EXCHANGE).ok_or_else(|| SkipReason::unresolved(KEY_EXCHANGE, None))?;
        Exchange::parse(raw).ok_or_else(|| SkipReason::unresolved(KEY_EXCHANGE, Some(raw)))
    }

    /// Resolve the stored coin, `None` when the record has no coin.
    ///
    /// # Errors
    /// Returns [`SkipReason::Unresolved`] when a stored coin is no longer known.
    pub fn coin(&self) -> Result<Option<Coin>, SkipReason> {
        self.get(KEY_COIN)
            .map(|raw| Coin::parse(raw).ok_or_else(|| SkipReason::unresolved(KEY_COIN, Some(raw))))
            .transpose()
    }

    /// Resolve the stored currency, `None` when the record has no currency.
    ///
    /// # Errors
    /// Returns [`SkipReason::Unresolved`] when a stored currency is no longer known.
    pub fn currency(&self) -> Result<Option<Currency>, SkipReason> {
        self.get(KEY_CURRENCY)
            .map(|raw| {
                Currency::parse(raw).ok_or_else(|| SkipReason::unresolved(KEY_CURRENCY, Some(raw)))
            })
            .transpose()
    }

    /// Name the exchange uses for the coin: the override when present, else the stored coin.
    #[must_use]
    pub fn exchange_coin_name(&self) -> Option<&str> {
        self.get(KEY_COIN_CUSTOM).or_else(|| self.get(KEY_COIN))
    }
}
