use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// A change reported by the file watcher or by an environment diff
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchEvent {
  Create(PathBuf),
  Update(PathBuf),
  Delete(PathBuf),
  /// An environment variable changed. `None` means it was unset.
  Env { name: String, value: Option<String> },
  /// Invalidate every request of a kind
  InvalidateKind(String),
}

pub type WatchEvents = Vec<WatchEvent>;

/// Delivers watch events to a request tracker, including while a build is running
#[derive(Clone, Debug)]
pub struct WatchEventSender {
  tx: UnboundedSender<WatchEvents>,
}

impl WatchEventSender {
  pub(crate) fn new(tx: UnboundedSender<WatchEvents>) -> Self {
    Self { tx }
  }

  pub fn send(&self, events: WatchEvents) -> anyhow::Result<()> {
    self
      .tx
      .send(events)
      .map_err(|_| anyhow::anyhow!("The request tracker is no longer receiving watch events"))
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn deserializes_watcher_payloads() -> anyhow::Result<()> {
    let events = serde_json::from_str::<WatchEvents>(
      r#"[
        { "update": "/project/a.js" },
        { "env": { "name": "NODE_ENV", "value": null } },
        { "invalidateKind": "config_request" }
      ]"#,
    )?;

    assert_eq!(
      events,
      vec![
        WatchEvent::Update(PathBuf::from("/project/a.js")),
        WatchEvent::Env {
          name: String::from("NODE_ENV"),
          value: None
        },
        WatchEvent::InvalidateKind(String::from("config_request")),
      ]
    );

    Ok(())
  }
}
