use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Receives a notice after a ledger write has committed.
///
/// Implementations may fail; callers go through [`notify`], which logs the
/// failure and carries on. The committed write is never rolled back.
pub trait LedgerObserver {
    fn on_ledger_change(&self, account_id: Uuid, effective_date: NaiveDate) -> Result<()>;
}

pub struct NoopObserver;

impl LedgerObserver for NoopObserver {
    fn on_ledger_change(&self, account_id: Uuid, effective_date: NaiveDate) -> Result<()> {
        debug!(%account_id, %effective_date, "ledger change (no observer configured)");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct LedgerChangeNotice {
    account_id: Uuid,
    effective_date: NaiveDate,
}

/// Posts a JSON notice to an external recalculation service.
pub struct WebhookObserver {
    url: String,
    client: Client,
}

impl WebhookObserver {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent(concat!("paydown/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl LedgerObserver for WebhookObserver {
    fn on_ledger_change(&self, account_id: Uuid, effective_date: NaiveDate) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&LedgerChangeNotice {
                account_id,
                effective_date,
            })
            .send()
            .with_context(|| format!("Failed to reach recalculation webhook {}", self.url))?;

        if !resp.status().is_success() {
            return Err(anyhow!(
                "Recalculation webhook {} answered HTTP {}",
                self.url,
                resp.status()
            ));
        }
        Ok(())
    }
}

pub fn observer_from_config(webhook: Option<&str>) -> Result<Box<dyn LedgerObserver>> {
    match webhook {
        Some(url) if !url.trim().is_empty() => Ok(Box::new(WebhookObserver::new(url.trim())?)),
        _ => Ok(Box::new(NoopObserver)),
    }
}

/// Best-effort delivery. Errors stop here.
pub fn notify(observer: &dyn LedgerObserver, account_id: Uuid, effective_date: NaiveDate) {
    if let Err(err) = observer.on_ledger_change(account_id, effective_date) {
        warn!(%account_id, %effective_date, error = %format!("{err:#}"), "ledger observer failed");
    }
}
