//! Destination canonicalization and builders for the price-feed topics

/// Normalize a destination: single leading slash, no repeated or trailing slashes
pub fn canonicalize_topic(topic: &str) -> String {
    if topic.is_empty() {
        return "/".to_string();
    }

    let mut result = if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    };

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

/// Builders for the destinations the price server publishes on
pub struct TopicBuilder;

impl TopicBuilder {
    /// Real-time ETF price stream: `/topic/etf/{code}/price`
    pub fn etf_price(etf_code: &str) -> String {
        canonicalize_topic(&format!("/topic/etf/{}/price", etf_code.trim()))
    }

    /// Real-time stock quote stream: `/topic/stocks/{code}`
    pub fn stock_price(stock_code: &str) -> String {
        canonicalize_topic(&format!("/topic/stocks/{}", stock_code.trim()))
    }
}
