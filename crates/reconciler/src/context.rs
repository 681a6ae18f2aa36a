use reqwest::Url;
use serde::Serialize;

/// Which kind of foreign view the current address presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageContext {
    /// Owned-item listing; annotated with stack totals.
    Inventory,
    /// Merchant tiles with local prices; annotated with delta badges.
    Merchant,
}

impl PageContext {
    /// Detects the context from an absolute address or a bare path.
    #[must_use]
    pub fn detect(address: &str) -> Option<Self> {
        let path = match Url::parse(address) {
            Ok(url) => url.path().to_string(),
            Err(_) => address
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };
        let page = path.rsplit('/').next().unwrap_or_default().to_ascii_lowercase();
        match page.as_str() {
            "item.php" => Some(Self::Inventory),
            "imarket.php" | "shop.php" | "shops.php" => Some(Self::Merchant),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inventory => "inventory",
            Self::Merchant => "merchant",
        }
    }
}

impl std::fmt::Display for PageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
