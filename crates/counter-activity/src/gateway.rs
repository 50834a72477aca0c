//! Catalog gateway used to validate and price order items.

use std::collections::HashMap;

use async_trait::async_trait;
use counter_order::{ItemDetails, Station};
use tracing::debug;

/// Errors from the catalog gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
  /// The catalog has no such item.
  #[error("item not found: {0}")]
  NotFound(String),

  /// The catalog could not be reached or answered with a server error.
  #[error("catalog unavailable: {0}")]
  Unavailable(String),
}

/// Source of item details. Safe to call repeatedly.
#[async_trait]
pub trait CatalogGateway: Send + Sync {
  async fn fetch_item(&self, item_id: &str) -> Result<ItemDetails, GatewayError>;
}

/// Catalog backed by a fixed item list.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
  items: HashMap<String, ItemDetails>,
}

impl StaticCatalog {
  pub fn with_items(items: impl IntoIterator<Item = ItemDetails>) -> Self {
    Self {
      items: items
        .into_iter()
        .map(|item| (item.id.clone(), item))
        .collect(),
    }
  }

  /// The coffee shop menu.
  pub fn coffee_menu() -> Self {
    const MENU: &[(&str, Station, u32)] = &[
      ("CAPPUCCINO", Station::Barista, 450),
      ("COFFEE_BLACK", Station::Barista, 300),
      ("COFFEE_WITH_ROOM", Station::Barista, 300),
      ("ESPRESSO", Station::Barista, 350),
      ("ESPRESSO_DOUBLE", Station::Barista, 450),
      ("LATTE", Station::Barista, 450),
      ("CAKEPOP", Station::Kitchen, 250),
      ("CROISSANT", Station::Kitchen, 325),
      ("MUFFIN", Station::Kitchen, 300),
      ("CROISSANT_CHOCOLATE", Station::Kitchen, 350),
    ];

    Self::with_items(MENU.iter().map(|(id, station, price_cents)| ItemDetails {
      id: id.to_string(),
      name: id.replace('_', " ").to_lowercase(),
      station: *station,
      price_cents: *price_cents,
    }))
  }
}

#[async_trait]
impl CatalogGateway for StaticCatalog {
  async fn fetch_item(&self, item_id: &str) -> Result<ItemDetails, GatewayError> {
    self
      .items
      .get(item_id)
      .cloned()
      .ok_or_else(|| GatewayError::NotFound(item_id.to_string()))
  }
}

/// Catalog served by the product service over HTTP.
///
/// Calls `GET {base_url}/v1/api/items/{id}`. A 404 maps to
/// [`GatewayError::NotFound`]; transport errors and other non-success
/// statuses map to [`GatewayError::Unavailable`].
pub struct HttpCatalogGateway {
  client: reqwest::Client,
  base_url: String,
}

impl HttpCatalogGateway {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self::with_client(reqwest::Client::new(), base_url)
  }

  pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
    Self {
      client,
      base_url: base_url.into().trim_end_matches('/').to_string(),
    }
  }

  fn item_url(&self, item_id: &str) -> String {
    format!("{}/v1/api/items/{}", self.base_url, item_id)
  }
}

#[async_trait]
impl CatalogGateway for HttpCatalogGateway {
  async fn fetch_item(&self, item_id: &str) -> Result<ItemDetails, GatewayError> {
    let url = self.item_url(item_id);
    debug!(url = %url, "fetching catalog item");

    let response = self
      .client
      .get(&url)
      .send()
      .await
      .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Err(GatewayError::NotFound(item_id.to_string()));
    }

    let response = response
      .error_for_status()
      .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

    response
      .json::<ItemDetails>()
      .await
      .map_err(|e| GatewayError::Unavailable(format!("invalid catalog response: {e}")))
  }
}
