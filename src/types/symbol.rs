//! Symbols are opaque keys like "BTCUSDT". The only structure this layer
//! reads into them is the quote-asset suffix, for display splitting and the
//! top-currencies filter.

/// Known quote assets, longest first so suffix matching picks the most
/// specific one (FDUSD before USD)
pub const QUOTE_ASSETS: &[&str] = &[
    "FDUSD", "USDT", "USDC", "TUSD", "BUSD", "USD", "EUR", "TRY", "BTC", "ETH", "BNB",
];

pub fn quote_asset(symbol: &str) -> Option<&'static str> {
    QUOTE_ASSETS
        .iter()
        .copied()
        .find(|quote| symbol.len() > quote.len() && symbol.ends_with(quote))
}

/// Split "BTCUSDT" into ("BTC", "USDT"). Symbols with no recognized quote
/// suffix come back whole, with an empty quote.
pub fn split_symbol(symbol: &str) -> (&str, &str) {
    match quote_asset(symbol) {
        Some(quote) => symbol.split_at(symbol.len() - quote.len()),
        None => (symbol, ""),
    }
}

pub fn is_quoted_in(symbol: &str, quote: &str) -> bool {
    symbol.len() > quote.len() && symbol.ends_with(quote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_usdt_pair() {
        assert_eq!(split_symbol("BTCUSDT"), ("BTC", "USDT"));
    }

    #[test]
    fn splits_btc_quoted_pair() {
        assert_eq!(split_symbol("ETHBTC"), ("ETH", "BTC"));
    }

    #[test]
    fn prefers_longest_quote_suffix() {
        assert_eq!(split_symbol("BTCFDUSD"), ("BTC", "FDUSD"));
    }

    #[test]
    fn unknown_quote_returns_whole_symbol() {
        assert_eq!(split_symbol("ABCXYZ"), ("ABCXYZ", ""));
    }

    #[test]
    fn bare_quote_asset_does_not_split_to_empty_base() {
        assert_eq!(split_symbol("USDT"), ("USDT", ""));
    }

    #[test]
    fn quote_filter_matches_suffix_only() {
        assert!(is_quoted_in("BTCUSDT", "USDT"));
        assert!(!is_quoted_in("USDTBTC", "USDT"));
        assert!(!is_quoted_in("USDT", "USDT"));
    }
}
