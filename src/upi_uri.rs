use crate::model::Payee;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;
use url::form_urlencoded::byte_serialize;

pub const UPI_PAY_BASE: &str = "upi://pay";

/// A `upi://pay` request, either built for launch or parsed from a shared link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLink {
    pub payee: Payee,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub note: Option<String>,
    pub transaction_ref: Option<String>,
}

// Percent-encoding with spaces as %20. byte_serialize escapes a literal '+' as
// %2B, so every remaining '+' stands for a space.
fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Build the outbound URI handed to the OS.
/// `am` is omitted for zero/absent amounts, `tn` for empty notes and `tr`
/// unless the launch is trackable.
pub fn build_payment_uri(link: &PaymentLink, default_currency: &str) -> String {
    let mut params: Vec<(&str, String)> = vec![
        ("pa", link.payee.external_id.clone()),
        ("pn", link.payee.display_name.clone()),
    ];

    if let Some(amount) = link.amount.filter(|a| !a.is_zero()) {
        params.push(("am", format!("{:.2}", amount)));
    }

    let currency = link.currency.as_deref().unwrap_or(default_currency);
    params.push(("cu", currency.to_string()));

    if let Some(note) = link.note.as_deref().filter(|n| !n.trim().is_empty()) {
        params.push(("tn", note.to_string()));
    }

    if let Some(tr) = link.transaction_ref.as_deref() {
        params.push(("tr", tr.to_string()));
    }

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", UPI_PAY_BASE, query)
}

/// Parse an inbound `upi://pay` link. Returns None when it is not one or
/// carries no payee address.
pub fn parse_payment_uri(uri: &str) -> Option<PaymentLink> {
    let url = Url::parse(uri.trim()).ok()?;
    if !url.scheme().eq_ignore_ascii_case("upi") || url.host_str() != Some("pay") {
        return None;
    }

    let mut pa = None;
    let mut pn = None;
    let mut am = None;
    let mut cu = None;
    let mut tn = None;
    let mut tr = None;

    for (key, value) in url.query_pairs() {
        let value = value.trim().to_string();
        match key.as_ref() {
            "pa" => pa = Some(value),
            "pn" => pn = Some(value),
            "am" => am = Decimal::from_str(&value).ok(),
            "cu" => cu = Some(value),
            "tn" => tn = Some(value),
            "tr" => tr = Some(value),
            _ => {}
        }
    }

    let external_id = pa.filter(|p| !p.is_empty())?;
    let display_name = pn
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| external_id.clone());

    Some(PaymentLink {
        payee: Payee::new(external_id, display_name),
        amount: am.filter(|a| *a > Decimal::ZERO),
        currency: cu.filter(|c| !c.is_empty()),
        note: tn.filter(|n| !n.is_empty()),
        transaction_ref: tr.filter(|t| !t.is_empty()),
    })
}
