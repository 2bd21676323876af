//! Interpretation of decoded payloads.
//!
//! The scan core hands payloads over as opaque strings. Menu codes carry a
//! URL shaped `https://<host>/menu/{menuId}/{itemId?}`; a payload with no
//! scheme is accepted as a bare menu identifier.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors from payload interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload is empty")]
    Empty,
    #[error("payload is not a valid URL: {0}")]
    InvalidUrl(String),
    #[error("URL path is not /menu/{{id}}/{{item?}}: {0}")]
    UnexpectedPath(String),
}

/// A menu reference decoded from a scanned code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuLink {
    /// Menu identifier.
    pub menu_id: String,
    /// Optional item within the menu.
    pub item_id: Option<String>,
}

impl MenuLink {
    /// Creates a link to a whole menu.
    pub fn new(menu_id: impl Into<String>) -> Self {
        Self {
            menu_id: menu_id.into(),
            item_id: None,
        }
    }

    /// Narrows the link to one item.
    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// Parses a scanned payload.
    pub fn from_payload(payload: &str) -> Result<Self, PayloadError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(PayloadError::Empty);
        }

        if !payload.contains("://") {
            return Self::from_identifier(payload);
        }

        let url = Url::parse(payload).map_err(|e| PayloadError::InvalidUrl(e.to_string()))?;
        let mut segments = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty());

        match (segments.next(), segments.next(), segments.next()) {
            (Some("menu"), Some(menu_id), item_id) => Ok(Self {
                menu_id: menu_id.to_string(),
                item_id: item_id.map(str::to_string),
            }),
            _ => Err(PayloadError::UnexpectedPath(url.path().to_string())),
        }
    }

    fn from_identifier(id: &str) -> Result<Self, PayloadError> {
        if id.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(PayloadError::UnexpectedPath(id.to_string()));
        }
        Ok(Self::new(id))
    }

    /// App route for this link: `/menu/{id}` or `/menu/{id}/{item}`.
    pub fn route(&self) -> String {
        match &self.item_id {
            Some(item) => format!("/menu/{}/{}", self.menu_id, item),
            None => format!("/menu/{}", self.menu_id),
        }
    }

    /// Full URL for printing as a test code under `origin`.
    pub fn to_url(&self, origin: &Url) -> Result<Url, PayloadError> {
        origin
            .join(&self.route())
            .map_err(|e| PayloadError::InvalidUrl(e.to_string()))
    }
}

impl fmt::Display for MenuLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.route())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_url() {
        let link = MenuLink::from_payload("https://example.com/menu/demo1").unwrap();
        assert_eq!(link, MenuLink::new("demo1"));
        assert_eq!(link.route(), "/menu/demo1");
    }

    #[test]
    fn test_menu_item_url() {
        let link = MenuLink::from_payload("https://example.com/menu/demo1/burger/").unwrap();
        assert_eq!(link, MenuLink::new("demo1").with_item("burger"));
        assert_eq!(link.to_string(), "/menu/demo1/burger");
    }

    #[test]
    fn test_bare_identifier() {
        assert_eq!(
            MenuLink::from_payload(" demo2 ").unwrap(),
            MenuLink::new("demo2")
        );
    }

    #[test]
    fn test_rejects_other_paths() {
        assert!(matches!(
            MenuLink::from_payload("https://example.com/about"),
            Err(PayloadError::UnexpectedPath(_))
        ));
        assert!(matches!(
            MenuLink::from_payload("https://example.com/menu"),
            Err(PayloadError::UnexpectedPath(_))
        ));
        assert_eq!(MenuLink::from_payload("   "), Err(PayloadError::Empty));
        assert!(matches!(
            MenuLink::from_payload("http://[bad"),
            Err(PayloadError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_to_url_round_trips_through_parser() {
        let origin = Url::parse("https://example.com").unwrap();
        let link = MenuLink::new("demo1");
        let url = link.to_url(&origin).unwrap();

        assert_eq!(url.as_str(), "https://example.com/menu/demo1");
        assert_eq!(MenuLink::from_payload(url.as_str()).unwrap(), link);
    }
}
