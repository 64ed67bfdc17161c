//! Alpaca REST client
//!
//! Trading calls go to the paper or live base url; market data (latest
//! trade, minute bars) goes to the data url. Alpaca encodes decimals as
//! JSON strings, hence the string fields on the payload structs.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{
    AccountSnapshot, BrokerPosition, OrderIntent, OrderSnapshot, OrderStatus, OrderType,
};
use super::Broker;
use crate::config::BrokerSettings;
use crate::errors::BotError;

const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_BASE_URL: &str = "https://api.alpaca.markets";

pub struct AlpacaClient {
    http: reqwest::Client,
    base_url: String,
    data_url: String,
    key_id: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct OrderRequest {
    symbol: String,
    qty: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    client_order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    symbol: String,
    qty: String,
    avg_entry_price: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    equity: String,
    cash: String,
    buying_power: String,
}

#[derive(Debug, Deserialize)]
struct LatestTradeResponse {
    trade: LatestTrade,
}

#[derive(Debug, Deserialize)]
struct LatestTrade {
    p: f64,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Vec<Bar>,
}

#[derive(Debug, Deserialize)]
struct Bar {
    c: f64,
}

impl AlpacaClient {
    /// Build a client from config, reading credentials from the environment
    pub fn from_settings(settings: &BrokerSettings, force_paper: bool) -> Result<Self> {
        let key_id = std::env::var(&settings.key_id_env)
            .map_err(|_| BotError::Config(format!("missing env var {}", settings.key_id_env)))?;
        let secret = std::env::var(&settings.secret_env)
            .map_err(|_| BotError::Config(format!("missing env var {}", settings.secret_env)))?;

        let base_url = if settings.paper || force_paper {
            PAPER_BASE_URL.to_string()
        } else {
            LIVE_BASE_URL.to_string()
        };

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            data_url: settings.data_url.clone(),
            key_id,
            secret,
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret)
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!(BotError::Broker(format!(
            "{} failed: HTTP {} {}",
            what, status, body
        ))))
    }

    fn parse_status(status: &str) -> OrderStatus {
        match status {
            "new" | "pending_new" => OrderStatus::New,
            "accepted" | "pending_cancel" | "pending_replace" => OrderStatus::Accepted,
            "partially_filled" => OrderStatus::PartiallyFilled,
            "filled" => OrderStatus::Filled,
            "canceled" | "done_for_day" | "replaced" => OrderStatus::Canceled,
            "expired" => OrderStatus::Expired,
            "rejected" | "stopped" | "suspended" => OrderStatus::Rejected,
            _ => OrderStatus::Unknown,
        }
    }

    /// Newest-first bars payload to the oldest-first close sequence that
    /// indicator seeding expects
    fn closes_oldest_first(resp: BarsResponse) -> Vec<f64> {
        resp.bars.iter().rev().map(|b| b.c).collect()
    }

    fn snapshot_from(resp: OrderResponse) -> OrderSnapshot {
        let filled_qty = resp
            .filled_qty
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .map(|q| q.round() as i64)
            .unwrap_or(0);
        let avg_fill_price = resp
            .filled_avg_price
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok());
        OrderSnapshot {
            order_id: resp.id,
            status: Self::parse_status(&resp.status),
            filled_qty,
            avg_fill_price,
        }
    }
}

#[async_trait]
impl Broker for AlpacaClient {
    async fn submit_order(&self, intent: &OrderIntent) -> Result<String> {
        let (order_type, time_in_force) = match intent.order_type {
            OrderType::Market => ("market", "day"),
            OrderType::Limit => ("limit", "day"),
            OrderType::ImmediateOrCancel => ("limit", "ioc"),
        };
        let body = OrderRequest {
            symbol: intent.symbol.clone(),
            qty: intent.qty.to_string(),
            side: intent.side.as_str().to_string(),
            order_type: order_type.to_string(),
            time_in_force: time_in_force.to_string(),
            limit_price: intent.limit_price.map(|p| format!("{:.2}", p)),
            client_order_id: intent.client_id.clone(),
        };

        let resp = self
            .auth(self.http.post(format!("{}/v2/orders", self.base_url)))
            .json(&body)
            .send()
            .await
            .context("order submit request")?;
        let resp = Self::check(resp, "order submit").await?;
        let order: OrderResponse = resp.json().await.context("order submit response")?;
        Ok(order.id)
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot> {
        let resp = self
            .auth(
                self.http
                    .get(format!("{}/v2/orders/{}", self.base_url, order_id)),
            )
            .send()
            .await
            .context("order status request")?;
        let resp = Self::check(resp, "order status").await?;
        let order: OrderResponse = resp.json().await.context("order status response")?;
        Ok(Self::snapshot_from(order))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let resp = self
            .auth(
                self.http
                    .delete(format!("{}/v2/orders/{}", self.base_url, order_id)),
            )
            .send()
            .await
            .context("order cancel request")?;
        // 404 means the order already reached a terminal state; not a fault
        if resp.status().as_u16() == 404 {
            return Ok(());
        }
        Self::check(resp, "order cancel").await?;
        Ok(())
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>> {
        let resp = self
            .auth(self.http.get(format!("{}/v2/positions", self.base_url)))
            .send()
            .await
            .context("positions request")?;
        let resp = Self::check(resp, "positions").await?;
        let raw: Vec<PositionResponse> = resp.json().await.context("positions response")?;
        let mut positions = Vec::with_capacity(raw.len());
        for p in raw {
            positions.push(BrokerPosition {
                symbol: p.symbol,
                qty: p
                    .qty
                    .parse::<f64>()
                    .map(|q| q.round() as i64)
                    .unwrap_or(0),
                avg_entry_price: p.avg_entry_price.parse::<f64>().unwrap_or(0.0),
            });
        }
        Ok(positions)
    }

    async fn get_account(&self) -> Result<AccountSnapshot> {
        let resp = self
            .auth(self.http.get(format!("{}/v2/account", self.base_url)))
            .send()
            .await
            .context("account request")?;
        let resp = Self::check(resp, "account").await?;
        let acct: AccountResponse = resp.json().await.context("account response")?;
        Ok(AccountSnapshot {
            equity: acct.equity.parse().unwrap_or(0.0),
            cash: acct.cash.parse().unwrap_or(0.0),
            buying_power: acct.buying_power.parse().unwrap_or(0.0),
        })
    }

    async fn latest_trade(&self, symbol: &str) -> Result<f64> {
        let resp = self
            .auth(self.http.get(format!(
                "{}/v2/stocks/{}/trades/latest",
                self.data_url, symbol
            )))
            .send()
            .await
            .context("latest trade request")?;
        let resp = Self::check(resp, "latest trade").await?;
        let latest: LatestTradeResponse = resp.json().await.context("latest trade response")?;
        Ok(latest.trade.p)
    }

    async fn recent_closes(&self, symbol: &str, count: usize) -> Result<Vec<f64>> {
        // sort=desc so the limit takes the newest bars, not the oldest of
        // the venue's default window
        let resp = self
            .auth(self.http.get(format!(
                "{}/v2/stocks/{}/bars?timeframe=1Min&limit={}&sort=desc",
                self.data_url, symbol, count
            )))
            .send()
            .await
            .context("bars request")?;
        let resp = Self::check(resp, "bars").await?;
        let bars: BarsResponse = resp.json().await.context("bars response")?;
        Ok(Self::closes_oldest_first(bars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_terminal_states() {
        assert_eq!(AlpacaClient::parse_status("filled"), OrderStatus::Filled);
        assert_eq!(AlpacaClient::parse_status("rejected"), OrderStatus::Rejected);
        assert_eq!(AlpacaClient::parse_status("expired"), OrderStatus::Expired);
        assert_eq!(AlpacaClient::parse_status("canceled"), OrderStatus::Canceled);
        assert_eq!(
            AlpacaClient::parse_status("partially_filled"),
            OrderStatus::PartiallyFilled
        );
        assert_eq!(AlpacaClient::parse_status("weird"), OrderStatus::Unknown);
    }

    #[test]
    fn bars_reverse_into_trailing_window() {
        // The venue returns newest first under sort=desc
        let resp = BarsResponse {
            bars: vec![Bar { c: 102.0 }, Bar { c: 101.0 }, Bar { c: 100.0 }],
        };
        assert_eq!(
            AlpacaClient::closes_oldest_first(resp),
            vec![100.0, 101.0, 102.0]
        );
    }
}
