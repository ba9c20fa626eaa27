//! Live order venue backed by the Polymarket CLOB REST API.

use std::str::FromStr;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::order::{
    CancelOutcome, OrderRequest, OrderState, OrderStatus, PlaceAck, Side, VenueOrder, VenueTrade,
};
use super::venue::OrderVenue;
use crate::error::TradingError;
use crate::market::PolymarketClient;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Order submission body.
#[derive(Debug, Clone, Serialize)]
struct SignedOrder {
    token_id: String,
    side: String,
    price: String,
    size: String,
    fee_rate_bps: String,
    nonce: String,
    expiration: String,
    taker: String,
    maker: String,
    signer: String,
    signature_type: u8,
    signature: String,
    order_type: String,
    neg_risk: bool,
}

impl PolymarketClient {
    async fn authed(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, TradingError> {
        let headers = self.signer()?.auth_headers().await?;
        Ok(headers
            .into_iter()
            .fold(builder, |req, (key, value)| req.header(key, value)))
    }

    async fn sign_order(&self, request: &OrderRequest) -> Result<SignedOrder, TradingError> {
        let signer = self.signer()?;
        let nonce = chrono::Utc::now().timestamp_millis().to_string();
        let expiration = (chrono::Utc::now().timestamp() + 3600).to_string();
        let side = request.side.to_string();

        let message = format!(
            "{}:{}:{}:{}:{}:{}",
            request.token_id, side, request.price, request.size, nonce, expiration
        );
        let signature = signer.sign_hex(message.as_bytes()).await?;

        Ok(SignedOrder {
            token_id: request.token_id.clone(),
            side,
            price: request.price.to_string(),
            size: request.size.to_string(),
            fee_rate_bps: "0".to_string(),
            nonce,
            expiration,
            taker: ZERO_ADDRESS.to_string(),
            maker: signer.maker_address(),
            signer: signer.address(),
            signature_type: signer.kind().signature_type(),
            signature,
            order_type: request.style.venue_order_type().to_string(),
            // Up/down series are neg-risk markets.
            neg_risk: true,
        })
    }
}

#[async_trait]
impl OrderVenue for PolymarketClient {
    #[instrument(skip(self, request), fields(token = %request.token_id, side = %request.side, style = %request.style))]
    async fn place(&self, request: &OrderRequest) -> Result<PlaceAck, TradingError> {
        request.validate().map_err(TradingError::InvalidParams)?;
        let body = self.sign_order(request).await?;

        let builder = self.http().post(format!("{}/order", self.clob_url())).json(&body);
        let response = self
            .authed(builder)
            .await?
            .send()
            .await
            .map_err(|e| TradingError::Transport(format!("order post failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TradingError::RateLimited {
                retry_after_seconds: 1,
            });
        }
        if status.is_server_error() {
            return Err(TradingError::Transport(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TradingError::OrderRejected {
                reason: format!("HTTP {} - {}", status, body),
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| TradingError::Transport(format!("unreadable order response: {}", e)))?;
        let ack = parse_place_ack(&json, request)?;
        debug!(order_id = ?ack.order_id, status = %ack.status, filled = %ack.filled_size, "Order acknowledged");
        Ok(ack)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, order_id: &str) -> Result<CancelOutcome, TradingError> {
        let builder = self
            .http()
            .delete(format!("{}/order", self.clob_url()))
            .json(&serde_json::json!({ "orderID": order_id }));
        let response = self
            .authed(builder)
            .await?
            .send()
            .await
            .map_err(|e| TradingError::CancelFailed {
                order_id: order_id.to_string(),
                reason: e.to_string(),
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TradingError::UnknownOrder(order_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(TradingError::CancelFailed {
                order_id: order_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let json: Value = response.json().await.unwrap_or_default();
        if let Some(outcome) = parse_cancel_outcome(order_id, &json) {
            info!(order_id, outcome = %outcome, "Cancel processed");
            return Ok(outcome);
        }

        // Venue gave no verdict; ask for the order's state.
        match self.status(order_id).await?.status {
            OrderStatus::Filled => Ok(CancelOutcome::AlreadyFilled),
            OrderStatus::Cancelled => Ok(CancelOutcome::AlreadyCancelled),
            other => Err(TradingError::CancelFailed {
                order_id: order_id.to_string(),
                reason: format!("order still {}", other),
            }),
        }
    }

    async fn status(&self, order_id: &str) -> Result<OrderState, TradingError> {
        let status_failed = |reason: String| TradingError::StatusFailed {
            order_id: order_id.to_string(),
            reason,
        };

        let builder = self
            .http()
            .get(format!("{}/data/order/{}", self.clob_url(), order_id));
        let response = self
            .authed(builder)
            .await?
            .send()
            .await
            .map_err(|e| status_failed(format!("HTTP request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(TradingError::UnknownOrder(order_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(status_failed(format!("HTTP {}", response.status())));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| status_failed(format!("Failed to parse response: {}", e)))?;
        parse_order_state(order_id, &json).ok_or_else(|| status_failed("no status field".to_string()))
    }

    async fn open_orders(&self, token_id: &str) -> Result<Vec<VenueOrder>, TradingError> {
        let builder = self
            .http()
            .get(format!("{}/data/orders", self.clob_url()))
            .query(&[("asset_id", token_id)]);
        let response = self
            .authed(builder)
            .await?
            .send()
            .await
            .map_err(|e| TradingError::Transport(format!("open orders request failed: {}", e)))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Failed to list open orders");
            return Err(TradingError::Transport(format!("HTTP {}", response.status())));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| TradingError::Transport(format!("unreadable open orders: {}", e)))?;
        Ok(parse_open_orders(token_id, &json))
    }

    async fn recent_trades(&self, token_id: &str) -> Result<Vec<VenueTrade>, TradingError> {
        let after = (chrono::Utc::now().timestamp() - 300).to_string();
        let builder = self
            .http()
            .get(format!("{}/data/trades", self.clob_url()))
            .query(&[("asset_id", token_id), ("after", after.as_str())]);
        let response = self
            .authed(builder)
            .await?
            .send()
            .await
            .map_err(|e| TradingError::Transport(format!("trades request failed: {}", e)))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Failed to list trades");
            return Err(TradingError::Transport(format!("HTTP {}", response.status())));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| TradingError::Transport(format!("unreadable trades: {}", e)))?;
        Ok(parse_trades(token_id, &json))
    }
}

/// Extract order ID from API response.
pub fn extract_order_id(result: &Value) -> Option<String> {
    for key in ["orderID", "orderId", "order_id", "id"] {
        if let Some(id) = result.get(key).and_then(|v| v.as_str()) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }

    for key in ["order", "data", "result"] {
        if let Some(nested) = result.get(key) {
            if let Some(id) = extract_order_id(nested) {
                return Some(id);
            }
        }
    }

    None
}

/// Parse a decimal field from JSON, trying multiple field names.
fn parse_decimal_field(json: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().filter_map(|key| json.get(*key)).find_map(|value| {
        value
            .as_str()
            .and_then(|s| s.parse::<Decimal>().ok())
            .or_else(|| value.as_f64().and_then(|n| Decimal::try_from(n).ok()))
    })
}

fn parse_status_field(json: &Value) -> Option<OrderStatus> {
    ["status", "orderStatus", "order_status"]
        .iter()
        .filter_map(|key| json.get(*key).and_then(|v| v.as_str()))
        .find_map(|s| OrderStatus::from_str(s).ok())
}

/// Interpret an order post response.
fn parse_place_ack(json: &Value, request: &OrderRequest) -> Result<PlaceAck, TradingError> {
    let order_id = extract_order_id(json);
    let error = json
        .get("errorMsg")
        .or_else(|| json.get("error"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    let success = json.get("success").and_then(|v| v.as_bool());

    if order_id.is_none() && (error.is_some() || success == Some(false)) {
        return Err(TradingError::OrderRejected {
            reason: error.unwrap_or("success=false").to_string(),
        });
    }

    let status = parse_status_field(json).unwrap_or(OrderStatus::Open);

    // Shares move on the taking side of a buy and the making side of a sell.
    let (share_key, cash_key) = match request.side {
        Side::Buy => ("takingAmount", "makingAmount"),
        Side::Sell => ("makingAmount", "takingAmount"),
    };
    let shares = parse_decimal_field(json, &[share_key]).filter(|d| *d > Decimal::ZERO);
    let cash = parse_decimal_field(json, &[cash_key]).filter(|d| *d > Decimal::ZERO);

    let filled_size = match (shares, status) {
        (Some(s), _) => s,
        (None, OrderStatus::Filled) => request.size,
        (None, _) => Decimal::ZERO,
    };
    let avg_fill_price = match (shares, cash) {
        (Some(s), Some(c)) => Some(c / s),
        _ if filled_size > Decimal::ZERO => Some(request.price),
        _ => None,
    };

    Ok(PlaceAck {
        order_id,
        status,
        filled_size,
        avg_fill_price,
    })
}

/// Interpret a single order lookup.
fn parse_order_state(order_id: &str, json: &Value) -> Option<OrderState> {
    let json = json.get("order").unwrap_or(json);
    let mut status = parse_status_field(json)?;
    let filled_size = parse_decimal_field(
        json,
        &["size_matched", "sizeMatched", "filled", "filledSize", "filled_size"],
    )
    .unwrap_or(Decimal::ZERO);
    let original = parse_decimal_field(json, &["original_size", "originalSize", "size"]);

    if status == OrderStatus::Open && filled_size > Decimal::ZERO {
        status = OrderStatus::PartiallyFilled;
    }
    if status.is_open() && original.is_some_and(|o| filled_size >= o) {
        status = OrderStatus::Filled;
    }

    let price = parse_decimal_field(json, &["associated_trades_avg_price", "avgPrice", "price"]);
    Some(OrderState {
        order_id: order_id.to_string(),
        status,
        filled_size,
        avg_fill_price: price.filter(|_| filled_size > Decimal::ZERO),
    })
}

/// Interpret a cancel response; `None` when it says nothing about the order.
fn parse_cancel_outcome(order_id: &str, json: &Value) -> Option<CancelOutcome> {
    let cancelled = json
        .get("canceled")
        .and_then(|v| v.as_array())
        .is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(order_id)));
    if cancelled {
        return Some(CancelOutcome::Cancelled);
    }

    let reason = json
        .get("not_canceled")
        .and_then(|v| v.get(order_id))
        .and_then(|v| v.as_str())?
        .to_ascii_lowercase();
    if reason.contains("matched") || reason.contains("filled") {
        Some(CancelOutcome::AlreadyFilled)
    } else if reason.contains("cancel") {
        Some(CancelOutcome::AlreadyCancelled)
    } else {
        None
    }
}

/// Interpret an open-orders listing.
fn parse_open_orders(token_id: &str, json: &Value) -> Vec<VenueOrder> {
    let rows = json
        .as_array()
        .or_else(|| json.get("data").and_then(|v| v.as_array()));

    rows.into_iter()
        .flatten()
        .filter_map(|row| {
            let asset = row
                .get("asset_id")
                .or_else(|| row.get("assetId"))
                .and_then(|v| v.as_str())
                .unwrap_or(token_id);
            if asset != token_id {
                return None;
            }
            let created_at = parse_unix_seconds(row, "created_at")? * 1000;
            Some(VenueOrder {
                order_id: extract_order_id(row)?,
                token_id: asset.to_string(),
                side: row
                    .get("side")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Side::from_str(s).ok())?,
                price: parse_decimal_field(row, &["price"])?,
                size: parse_decimal_field(row, &["original_size", "originalSize", "size"])?,
                created_at,
            })
        })
        .collect()
}

fn parse_unix_seconds(json: &Value, key: &str) -> Option<i64> {
    json.get(key).and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

/// Interpret a trade history listing as executions of our own orders.
///
/// As taker the row itself is ours; as maker only the maker orders owned by
/// the same key are.
fn parse_trades(token_id: &str, json: &Value) -> Vec<VenueTrade> {
    let rows = json
        .as_array()
        .or_else(|| json.get("data").and_then(|v| v.as_array()));

    let mut trades = Vec::new();
    for row in rows.into_iter().flatten() {
        let Some(matched_at) = parse_unix_seconds(row, "match_time").map(|s| s * 1000) else {
            continue;
        };
        let side = |v: &Value| {
            v.get("side")
                .and_then(|s| s.as_str())
                .and_then(|s| Side::from_str(s).ok())
        };
        let asset = |v: &Value| v.get("asset_id").and_then(|a| a.as_str()).map(str::to_string);

        let is_maker = row.get("trader_side").and_then(|v| v.as_str()) == Some("MAKER");
        if !is_maker {
            let order_id = row.get("taker_order_id").and_then(|v| v.as_str());
            if let (Some(order_id), Some(side), Some(price), Some(size)) = (
                order_id,
                side(row),
                parse_decimal_field(row, &["price"]),
                parse_decimal_field(row, &["size"]),
            ) {
                if asset(row).as_deref().unwrap_or(token_id) == token_id {
                    trades.push(VenueTrade {
                        order_id: order_id.to_string(),
                        token_id: token_id.to_string(),
                        side,
                        price,
                        size,
                        matched_at,
                    });
                }
            }
            continue;
        }

        let owner = row.get("owner").and_then(|v| v.as_str());
        let makers = row.get("maker_orders").and_then(|v| v.as_array());
        for maker in makers.into_iter().flatten() {
            if owner.is_some() && maker.get("owner").and_then(|v| v.as_str()) != owner {
                continue;
            }
            if asset(maker).as_deref() != Some(token_id) {
                continue;
            }
            if let (Some(order_id), Some(side), Some(price), Some(size)) = (
                maker.get("order_id").and_then(|v| v.as_str()),
                side(maker),
                parse_decimal_field(maker, &["price"]),
                parse_decimal_field(maker, &["matched_amount"]),
            ) {
                trades.push(VenueTrade {
                    order_id: order_id.to_string(),
                    token_id: token_id.to_string(),
                    side,
                    price,
                    size,
                    matched_at,
                });
            }
        }
    }
    trades
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::OrderStyle;
    use crate::market::Leg;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn request(side: Side) -> OrderRequest {
        OrderRequest {
            leg: Leg::Down,
            token_id: "down".to_string(),
            side,
            price: dec!(0.50),
            size: dec!(10),
            style: OrderStyle::Immediate,
        }
    }

    #[test]
    fn extract_order_id_various_formats() {
        let json1 = serde_json::json!({"orderID": "abc123"});
        assert_eq!(extract_order_id(&json1), Some("abc123".to_string()));

        let json2 = serde_json::json!({"orderId": "def456"});
        assert_eq!(extract_order_id(&json2), Some("def456".to_string()));

        let json3 = serde_json::json!({"order": {"id": "ghi789"}});
        assert_eq!(extract_order_id(&json3), Some("ghi789".to_string()));

        let json4 = serde_json::json!({"orderID": ""});
        assert_eq!(extract_order_id(&json4), None);
    }

    #[test]
    fn parse_decimal_field_accepts_strings_and_numbers() {
        let json = serde_json::json!({"filled": "10.5", "remaining": 5.25});
        assert_eq!(parse_decimal_field(&json, &["filled"]), Some(dec!(10.5)));
        assert_eq!(parse_decimal_field(&json, &["x", "remaining"]), Some(dec!(5.25)));
        assert_eq!(parse_decimal_field(&json, &["missing"]), None);
    }

    #[test]
    fn matched_buy_reports_fill_and_price() {
        let json = serde_json::json!({
            "success": true,
            "orderID": "0xabc",
            "status": "matched",
            "makingAmount": "2.94",
            "takingAmount": "6"
        });
        let ack = parse_place_ack(&json, &request(Side::Buy)).unwrap();
        assert_eq!(ack.order_id.as_deref(), Some("0xabc"));
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.filled_size, dec!(6));
        assert_eq!(ack.avg_fill_price, Some(dec!(0.49)));
    }

    #[test]
    fn rejection_without_id_is_an_error() {
        let json = serde_json::json!({"success": false, "errorMsg": "not enough balance"});
        assert!(matches!(
            parse_place_ack(&json, &request(Side::Buy)),
            Err(TradingError::OrderRejected { .. })
        ));
    }

    #[test]
    fn live_ack_without_id_is_ambiguous_not_rejected() {
        let json = serde_json::json!({"success": true, "status": "live"});
        let ack = parse_place_ack(&json, &request(Side::Sell)).unwrap();
        assert_eq!(ack.order_id, None);
        assert_eq!(ack.status, OrderStatus::Open);
        assert_eq!(ack.filled_size, Decimal::ZERO);
    }

    #[test]
    fn order_state_tracks_partial_fill() {
        let json = serde_json::json!({
            "status": "LIVE",
            "size_matched": "4",
            "original_size": "10",
            "price": "0.41"
        });
        let state = parse_order_state("o1", &json).unwrap();
        assert_eq!(state.status, OrderStatus::PartiallyFilled);
        assert_eq!(state.filled_size, dec!(4));
        assert_eq!(state.avg_fill_price, Some(dec!(0.41)));
    }

    #[test]
    fn cancel_outcomes() {
        let ok = serde_json::json!({"canceled": ["o1"], "not_canceled": {}});
        assert_eq!(parse_cancel_outcome("o1", &ok), Some(CancelOutcome::Cancelled));

        let filled = serde_json::json!({"canceled": [], "not_canceled": {"o1": "order already matched"}});
        assert_eq!(parse_cancel_outcome("o1", &filled), Some(CancelOutcome::AlreadyFilled));

        let gone = serde_json::json!({"canceled": [], "not_canceled": {"o1": "order already canceled"}});
        assert_eq!(parse_cancel_outcome("o1", &gone), Some(CancelOutcome::AlreadyCancelled));

        assert_eq!(parse_cancel_outcome("o1", &serde_json::json!({})), None);
    }

    #[test]
    fn open_orders_filtered_by_token() {
        let json = serde_json::json!([
            {"id": "a", "asset_id": "down", "side": "BUY", "price": "0.41", "original_size": "10", "created_at": 1700000000},
            {"id": "b", "asset_id": "up", "side": "BUY", "price": "0.41", "original_size": "10", "created_at": 1700000000},
            {"id": "c", "asset_id": "down", "side": "SELL", "price": "0.3", "original_size": "5", "created_at": "1700000005"}
        ]);
        let orders = parse_open_orders("down", &json);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].side, Side::Sell);
        assert_eq!(orders[1].created_at, 1_700_000_005_000);
    }

    #[test]
    fn trades_keep_our_side_of_each_match() {
        let json = serde_json::json!([
            {
                "taker_order_id": "0xtaker", "asset_id": "down", "side": "BUY",
                "size": "6", "price": "0.5", "match_time": "1700000010", "trader_side": "TAKER"
            },
            {
                "taker_order_id": "0xsomeone", "asset_id": "down", "side": "SELL",
                "size": "4", "price": "0.41", "match_time": "1700000020", "trader_side": "MAKER",
                "owner": "key-1",
                "maker_orders": [
                    {"order_id": "0xmine", "owner": "key-1", "asset_id": "down", "side": "BUY", "matched_amount": "4", "price": "0.41"},
                    {"order_id": "0xother", "owner": "key-2", "asset_id": "down", "side": "BUY", "matched_amount": "3", "price": "0.41"}
                ]
            },
            {"taker_order_id": "0xup", "asset_id": "up", "side": "BUY", "size": "1", "price": "0.5", "match_time": "1700000030"}
        ]);
        let trades = parse_trades("down", &json);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].order_id, "0xtaker");
        assert_eq!(trades[0].matched_at, 1_700_000_010_000);
        assert_eq!(trades[1].order_id, "0xmine");
        assert_eq!(trades[1].side, Side::Buy);
        assert_eq!(trades[1].size, dec!(4));
    }
}
