//! Shared detection patterns for commerce transcripts.
//!
//! The state extractor and the consistency/adherence/hallucination
//! metrics all read order ids, dollar amounts and decisions out of free
//! text. Keeping the patterns here means the extractor and the metrics can
//! never disagree about what counts as an order id or an amount.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::Decision;

lazy_static! {
    // =========================================================================
    // ENTITY PATTERNS
    // =========================================================================

    /// Order id, either labelled ("order A1", "Order ID is A-1001") or
    /// hash-prefixed ("#12345").
    pub static ref ORDER_PATTERN: Regex = Regex::new(
        r"(?i)\border(?:\s+(?:id|number|no\.?))?(?:\s+is)?\s*[:#]?\s*([a-z]{0,3}-?\d[a-z0-9-]*)|#([a-z]{0,3}\d[a-z0-9-]*)"
    ).unwrap();

    /// Any dollar amount: "$10", "$1,250.00", "25 USD", "25 dollars".
    pub static ref AMOUNT_PATTERN: Regex = Regex::new(
        r"(?i)\$\s?(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)|\b(\d+(?:\.\d+)?)\s?(?:usd|dollars)\b"
    ).unwrap();

    /// Amounts explicitly labelled as a refund: "refund of $5",
    /// "refund amount: $10", "$99 refund".
    pub static ref REFUND_AMOUNT_PATTERN: Regex = Regex::new(
        r"(?i)\brefund(?:ed|s)?\s*(?:of|for|amount(?:\s*(?:of|is|:))?|is|:)?\s*\$\s?(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)|\$\s?(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s+refund"
    ).unwrap();

    /// Promise to refund once the item has shipped.
    pub static ref REFUND_AFTER_SHIP_PATTERN: Regex = Regex::new(
        r"(?i)refund[\w\s]{0,80}after (?:it'?s )?shipp(?:ed|ing)"
    ).unwrap();

    pub static ref REFUND_WORD_PATTERN: Regex = Regex::new(r"(?i)refund").unwrap();

    /// Machine-readable summary line the system prompt asks for.
    pub static ref FINAL_STATE_PATTERN: Regex = Regex::new(
        r"FINAL_STATE:\s*(\{.*\})"
    ).unwrap();

    // =========================================================================
    // DECISION PATTERNS
    // =========================================================================

    static ref DECISION_ALLOW: Regex = Regex::new(
        r"(?i)\b(approve(d)?|allow(ed)?|grant(ed)?)\b"
    ).unwrap();

    static ref DECISION_DENY: Regex = Regex::new(
        r"(?i)\b(deny|denied|cannot|can't|not able|refuse|refusal)\b"
    ).unwrap();

    static ref DECISION_PARTIAL: Regex = Regex::new(r"(?i)\b(partial|partly)\b").unwrap();

    // =========================================================================
    // POLICY FLAG PATTERNS
    // =========================================================================

    static ref POLICY_FLAG_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("after_shipment", Regex::new(r"(?i)\b(already shipped|after (it'?s )?shipp(ed|ing)|in transit)\b").unwrap()),
        ("outside_return_window", Regex::new(r"(?i)\b(outside|past|beyond) (the )?(return|refund) (window|period)\b").unwrap()),
        ("final_sale", Regex::new(r"(?i)\bfinal[- ]sale\b").unwrap()),
        ("restocking_fee", Regex::new(r"(?i)\brestocking fee\b").unwrap()),
        ("requires_documentation", Regex::new(r"(?i)\b(proof of purchase|receipt|photo(s)? of the (damage|item))\b").unwrap()),
    ];
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

/// Order ids mentioned in `text`, upper-cased, in order of appearance.
pub fn extract_order_ids(text: &str) -> Vec<String> {
    ORDER_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim_end_matches('-').to_ascii_uppercase())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Every dollar amount in `text`.
pub fn extract_amounts(text: &str) -> Vec<f64> {
    AMOUNT_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter_map(|m| parse_amount(m.as_str()))
        .collect()
}

/// Amounts explicitly labelled as refunds.
pub fn extract_refund_amounts(text: &str) -> Vec<f64> {
    REFUND_AMOUNT_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter_map(|m| parse_amount(m.as_str()))
        .collect()
}

/// Decision expressed in free text. Approval wins over denial, denial
/// over partial.
pub fn detect_decision(text: &str) -> Option<Decision> {
    if DECISION_ALLOW.is_match(text) {
        Some(Decision::Allow)
    } else if DECISION_DENY.is_match(text) {
        Some(Decision::Deny)
    } else if DECISION_PARTIAL.is_match(text) {
        Some(Decision::Partial)
    } else {
        None
    }
}

pub fn mentions_refund(text: &str) -> bool {
    REFUND_WORD_PATTERN.is_match(text)
}

pub fn promises_refund_after_shipping(text: &str) -> bool {
    REFUND_AFTER_SHIP_PATTERN.is_match(text)
}

/// Policy flags whose trigger phrases appear in `text`.
pub fn detect_policy_flags(text: &str) -> Vec<&'static str> {
    POLICY_FLAG_PATTERNS
        .iter()
        .filter(|(_, regex)| regex.is_match(text))
        .map(|(flag, _)| *flag)
        .collect()
}

/// JSON body of the last `FINAL_STATE: {...}` line, if any.
pub fn final_state_json(text: &str) -> Option<&str> {
    FINAL_STATE_PATTERN
        .captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_detection() {
        assert_eq!(extract_order_ids("I want a refund for order A1"), vec!["A1"]);
        assert_eq!(extract_order_ids("Order ID is A1."), vec!["A1"]);
        assert_eq!(extract_order_ids("Your order #12345 shipped"), vec!["12345"]);
        assert_eq!(extract_order_ids("order number: b-77"), vec!["B-77"]);
        assert!(extract_order_ids("Please share the order ID.").is_empty());
        assert!(extract_order_ids("a refund of $10 for your order").is_empty());
    }

    #[test]
    fn test_amount_detection() {
        assert_eq!(extract_amounts("We can issue refund of $10."), vec![10.0]);
        assert_eq!(extract_amounts("Total $1,250.50 and $3"), vec![1250.5, 3.0]);
        assert_eq!(extract_amounts("That is 25 USD"), vec![25.0]);
        assert!(extract_amounts("delivered 12 days ago").is_empty());
    }

    #[test]
    fn test_refund_amount_detection() {
        assert_eq!(extract_refund_amounts("a refund of $5 for order A2"), vec![5.0]);
        assert_eq!(extract_refund_amounts("Assistant: refund $10"), vec![10.0]);
        assert_eq!(extract_refund_amounts("refund amount: $7.25"), vec![7.25]);
        assert_eq!(extract_refund_amounts("I see a $99 refund available"), vec![99.0]);
        assert!(extract_refund_amounts("We will process a refund after it's shipped of $25.").is_empty());
    }

    #[test]
    fn test_decision_detection() {
        assert_eq!(detect_decision("Your refund is approved."), Some(Decision::Allow));
        assert_eq!(detect_decision("We deny this request"), Some(Decision::Deny));
        assert_eq!(detect_decision("I can't do that"), Some(Decision::Deny));
        assert_eq!(detect_decision("A partial credit applies"), Some(Decision::Partial));
        assert_eq!(detect_decision("Please share the order ID."), None);
    }

    #[test]
    fn test_refund_after_shipping() {
        assert!(promises_refund_after_shipping("We will process a refund after it's shipped."));
        assert!(promises_refund_after_shipping("Refund will happen after shipping"));
        assert!(!promises_refund_after_shipping("Refunds are issued before dispatch"));
    }

    #[test]
    fn test_final_state_json_takes_last_line() {
        let text = "Done.\nFINAL_STATE: {\"decision\": \"DENY\"}\nFINAL_STATE: {\"decision\": \"ALLOW\"}";
        assert_eq!(final_state_json(text), Some("{\"decision\": \"ALLOW\"}"));
        assert_eq!(final_state_json("no summary"), None);
    }

    #[test]
    fn test_policy_flags() {
        let flags = detect_policy_flags("Since it already shipped, a restocking fee applies.");
        assert_eq!(flags, vec!["after_shipment", "restocking_fee"]);
    }
}
