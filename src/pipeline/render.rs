//! Notification rendering (Telegram Markdown)

use super::config::ChainConfig;
use super::types::{ChainId, TradeRecord};
use chrono::{TimeZone, Utc};
use std::collections::HashMap;

pub const VIDEO_UNAVAILABLE_NOTICE: &str = "⚠️ Video unavailable, please check bot configuration.";

/// A message ready for a NotificationSink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub media: Option<String>,
}

impl RenderedMessage {
    /// Text-only variant sent when the rich-media delivery fails
    pub fn text_only(&self) -> RenderedMessage {
        RenderedMessage {
            text: format!("{}\n\n{}", self.text, VIDEO_UNAVAILABLE_NOTICE),
            media: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MarketLinks {
    chart_url: String,
    swap_url: String,
}

/// Bot header and link footer around every notification
///
/// The default renders neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBranding {
    pub bot_handle: Option<String>,
    pub staking_url: Option<String>,
    pub merch_url: Option<String>,
    markets: HashMap<ChainId, MarketLinks>,
}

impl MessageBranding {
    pub fn new(bot_handle: Option<String>, staking_url: Option<String>, merch_url: Option<String>) -> Self {
        Self {
            bot_handle,
            staking_url,
            merch_url,
            markets: HashMap::new(),
        }
    }

    /// Add chart and buy links for each chain's pool and token
    pub fn with_markets(mut self, chains: &[ChainConfig]) -> Self {
        for config in chains {
            self.markets.insert(
                config.chain,
                MarketLinks {
                    chart_url: config.chain.chart_url(&config.pool_address),
                    swap_url: config.chain.swap_url(&config.token_address),
                },
            );
        }
        self
    }

    fn footer(&self, chain: ChainId, token_symbol: &str) -> Option<String> {
        let market = self.markets.get(&chain);
        let mut links = Vec::new();

        if let Some(url) = &self.staking_url {
            links.push(format!("📍 [Staking]({})", url));
        }
        if let Some(market) = market {
            links.push(format!("📊 [Chart]({})", market.chart_url));
        }
        if let Some(url) = &self.merch_url {
            links.push(format!("🛍️ [Merch]({})", url));
        }
        if let Some(market) = market {
            links.push(format!("💰 [Buy ${}]({})", token_symbol, market.swap_url));
        }

        if links.is_empty() {
            None
        } else {
            Some(links.join("  "))
        }
    }
}

pub fn render_trade(record: &TradeRecord, token_symbol: &str, branding: &MessageBranding) -> RenderedMessage {
    let seen_at = Utc
        .timestamp_millis_opt(record.discovered_at)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| record.discovered_at.to_string());

    let text = format!(
        "{label} - {pair}\n\
         {display}\n\
         **💰 Value**: {fiat}\n\
         **🧳 Holdings**: {amount:.2} ${symbol}\n\
         **👤 Holder**: ...{tail} (`{recipient}`)\n\
         **📦 Block**: {block}\n\
         **🕒 Seen**: {seen_at}\n\
         [{explorer}]({url}) | [Video]({media})",
        label = record.category.label(),
        pair = record.chain.pair_label(),
        display = record.category.media_display(),
        fiat = record.fiat_value,
        amount = record.token_amount,
        symbol = token_symbol,
        tail = record.holder_tail(),
        recipient = record.recipient,
        block = record.block_number,
        seen_at = seen_at,
        explorer = record.chain.explorer_name(),
        url = record.chain.explorer_tx_url(&record.tx_hash),
        media = record.media_ref,
    );

    let mut text = match &branding.bot_handle {
        Some(handle) => format!("{}\n{}", handle, text),
        None => text,
    };
    if let Some(footer) = branding.footer(record.chain, token_symbol) {
        text.push_str("\n\n");
        text.push_str(&footer);
    }

    RenderedMessage {
        text,
        media: Some(record.media_ref.clone()).filter(|m| !m.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{ChainId, FiatValue, SizeCategory};

    fn record() -> TradeRecord {
        TradeRecord {
            chain: ChainId::Bsc,
            tx_hash: "0xfeed".to_string(),
            recipient: "0x1234567890abcdef1234567890abcdef12345678".to_string(),
            token_amount: 5_000.0,
            category: SizeCategory::Medium,
            fiat_value: FiatValue::Usd(50.0),
            discovered_at: 1_700_000_000_000,
            media_ref: "https://media.example.org/MEDIUMBUY_MPEG_e02zdz.mp4".to_string(),
            block_number: 997,
        }
    }

    #[test]
    fn test_render_includes_record_fields() {
        let message = render_trade(&record(), "PETS", &MessageBranding::default());

        assert!(message.text.starts_with("Medium Bullish Buy - BNB Pair"));
        assert!(message.text.contains("$50.00"));
        assert!(message.text.contains("5000.00 $PETS"));
        assert!(message.text.contains("...5678"));
        assert!(message.text.contains("0x1234567890abcdef1234567890abcdef12345678"));
        assert!(message.text.contains("https://bscscan.com/tx/0xfeed"));
        assert!(message.text.contains("2023-11-14 22:13:20 UTC"));
        assert!(message.text.contains("997"));
        assert_eq!(message.media.as_deref(), Some("https://media.example.org/MEDIUMBUY_MPEG_e02zdz.mp4"));
    }

    #[test]
    fn test_unknown_value_and_text_fallback() {
        let mut record = record();
        record.fiat_value = FiatValue::Unknown;
        let message = render_trade(&record, "PETS", &MessageBranding::default());
        let fallback = message.text_only();

        assert!(message.text.contains("**💰 Value**: unknown"));
        assert!(fallback.media.is_none());
        assert!(fallback.text.ends_with(VIDEO_UNAVAILABLE_NOTICE));
    }

    #[test]
    fn test_branding_header_and_footer() {
        let bsc = ChainConfig {
            chain: ChainId::Bsc,
            rpc_url: "https://bsc.example.org".to_string(),
            token_address: "0x2466858ab5edad0bb597fe9f008f568b00d25fe3".to_string(),
            pool_address: "0x4bdece4e422fa015336234e4fc4d39ae6dd75b01".to_string(),
            price_asset: "micropets".to_string(),
            token_decimals: 18,
            poll_interval: std::time::Duration::from_secs(60),
            lookback_blocks: 50,
            max_blocks_per_poll: 500,
        };
        let branding = MessageBranding::new(
            Some("@MicroPetsBuy_bot".to_string()),
            Some("https://pets.micropets.io/petdex".to_string()),
            None,
        )
        .with_markets(&[bsc]);

        let message = render_trade(&record(), "PETS", &branding);

        assert!(message.text.starts_with("@MicroPetsBuy_bot\nMedium Bullish Buy - BNB Pair"));
        assert!(message.text.ends_with(
            "📍 [Staking](https://pets.micropets.io/petdex)  \
             📊 [Chart](https://www.dextools.io/app/en/bnb/pair-explorer/0x4bdece4e422fa015336234e4fc4d39ae6dd75b01)  \
             💰 [Buy $PETS](https://pancakeswap.finance/swap?outputCurrency=0x2466858ab5edad0bb597fe9f008f568b00d25fe3)"
        ));
        assert!(!message.text.contains("Merch"));

        // No market configured for Ethereum: only the chain-independent links
        let mut eth = record();
        eth.chain = ChainId::Ethereum;
        let message = render_trade(&eth, "PETS", &branding);
        assert!(message.text.ends_with("📍 [Staking](https://pets.micropets.io/petdex)"));
    }
}
