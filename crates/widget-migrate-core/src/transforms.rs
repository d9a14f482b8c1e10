use crate::domain::{Coin, ConfigRecord, Currency, Exchange};
use crate::{RecordWrite, SkipReason, KEY_COIN, KEY_COIN_CUSTOM, KEY_CURRENCY_CUSTOM, KEY_EXCHANGE};

// Flag names are persisted on every installation and must never change.
pub const EXCHANGE_OVERRIDE: &str = "exchange_override";
pub const QUOINE: &str = "quoine";
pub const COINMARKETCAP: &str = "coinmarketcap";
pub const BITTREX_TO_BCH: &str = "bittrex_to_bch";
pub const GDAX_TO_COINBASEPRO: &str = "gdax_to_coinbasepro";

const COIN_OVERRIDES: &[(Exchange, Coin, &str)] = &[
    (Exchange::BIT2C, Coin::BTC, "Btc"),
    (Exchange::BIT2C, Coin::BCH, "Bch"),
    (Exchange::BIT2C, Coin::LTC, "Ltc"),
    (Exchange::BITBAY, Coin::BCH, "BCC"),
    (Exchange::BITFINEX, Coin::DASH, "dsh"),
    (Exchange::BITFINEX, Coin::IOTA, "iot"),
    (Exchange::BITMARKET24, Coin::BCH, "BCC"),
    (Exchange::BITMARKETPL, Coin::BCH, "BCC"),
    (Exchange::BITTREX, Coin::BCH, "BCC"),
    (Exchange::INDEPENDENT_RESERVE, Coin::BTC, "xbt"),
    (Exchange::ITBIT, Coin::BTC, "XBT"),
    (Exchange::KOINEX, Coin::IOTA, "MIOTA"),
    (Exchange::KRAKEN, Coin::BTC, "XBT"),
    (Exchange::LUNO, Coin::BTC, "XBT"),
    (Exchange::WEX, Coin::DASH, "DSH"),
];

const CURRENCY_OVERRIDES: &[(Exchange, Currency, &str)] = &[
    (Exchange::BITTREX, Currency::USD, "USDT"),
    (Exchange::PARIBU, Currency::TRY, "TL"),
    (Exchange::POLONIEX, Currency::USD, "USDT"),
];

/// Populate the exchange-specific coin and currency names that used to be hard coded.
///
/// # Errors
/// Returns [`SkipReason::Unresolved`] when the exchange, coin or currency is no longer known.
pub fn exchange_override(record: &ConfigRecord) -> Result<Vec<RecordWrite>, SkipReason> {
    let exchange = record.exchange()?;
    let coin = record.coin()?;
    let currency = record.currency()?;

    let mut writes = Vec::new();
    if let Some(name) = coin.and_then(|coin| lookup(COIN_OVERRIDES, exchange, coin)) {
        writes.push(RecordWrite::new(KEY_COIN_CUSTOM, name));
    }
    if let Some(name) = currency.and_then(|currency| lookup(CURRENCY_OVERRIDES, exchange, currency))
    {
        writes.push(RecordWrite::new(KEY_CURRENCY_CUSTOM, name));
    }
    Ok(writes)
}

fn lookup<T: Copy + Eq>(
    table: &[(Exchange, T, &'static str)],
    exchange: Exchange,
    value: T,
) -> Option<&'static str> {
    table
        .iter()
        .find(|(entry_exchange, entry_value, _)| {
            *entry_exchange == exchange && *entry_value == value
        })
        .map(|(_, _, name)| *name)
}

/// QUOINE was once persisted as `QUIONE`.
///
/// # Errors
/// Never fails; the signature matches the other transforms.
pub fn quoine_spelling(record: &ConfigRecord) -> Result<Vec<RecordWrite>, SkipReason> {
    Ok(rename_exchange(record, "QUIONE", Exchange::QUOINE.as_str()))
}

/// Coinmarketcap v2 keys coins by ticker, except IOTA which it lists as MIOTA.
///
/// # Errors
/// Returns [`SkipReason::Unresolved`] when the record's coin is absent or no longer known.
pub fn coinmarketcap_v2(record: &ConfigRecord) -> Result<Vec<RecordWrite>, SkipReason> {
    if record.get(KEY_EXCHANGE) != Some(Exchange::COINMARKETCAP.as_str()) {
        return Ok(Vec::new());
    }
    if record.exchange_coin_name() == Some("iota") {
        return Ok(vec![RecordWrite::new(KEY_COIN_CUSTOM, "MIOTA")]);
    }
    let coin = record.coin()?.ok_or_else(|| SkipReason::unresolved(KEY_COIN, None))?;
    Ok(vec![RecordWrite::new(KEY_COIN_CUSTOM, coin.as_str())])
}

/// Bittrex moved Bitcoin Cash from `BCC` to `BCH`.
///
/// # Errors
/// Never fails; the signature matches the other transforms.
pub fn bittrex_to_bch(record: &ConfigRecord) -> Result<Vec<RecordWrite>, SkipReason> {
    if record.get(KEY_EXCHANGE) == Some(Exchange::BITTREX.as_str())
        && record.exchange_coin_name() == Some("BCC")
    {
        return Ok(vec![RecordWrite::new(KEY_COIN_CUSTOM, Coin::BCH.as_str())]);
    }
    Ok(Vec::new())
}

/// GDAX rebranded as Coinbase Pro.
///
/// # Errors
/// Never fails; the signature matches the other transforms.
pub fn gdax_to_coinbasepro(record: &ConfigRecord) -> Result<Vec<RecordWrite>, SkipReason> {
    Ok(rename_exchange(record, "GDAX", Exchange::COINBASEPRO.as_str()))
}

fn rename_exchange(record: &ConfigRecord, from: &str, to: &str) -> Vec<RecordWrite> {
    if record.get(KEY_EXCHANGE) == Some(from) {
        vec![RecordWrite::new(KEY_EXCHANGE, to)]
    } else {
        Vec::new()
    }
}
