//! In-memory hot window for tests and single-node development.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use crate::{HotWindow, LIMIT, Result};

/// Sorted-set semantics over a `HashMap` of score-ordered vectors.
#[derive(Default)]
pub struct InMemoryHotWindow {
    windows: Mutex<HashMap<String, Vec<(f64, String)>>>,
}

impl InMemoryHotWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current window size for a conversation.
    pub fn len(&self, conversation_id: &str) -> usize {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.get(conversation_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, conversation_id: &str) -> bool {
        self.len(conversation_id) == 0
    }
}

#[async_trait]
impl HotWindow for InMemoryHotWindow {
    async fn append(&self, conversation_id: &str, payload: &str, sent_at: f64) -> Result<()> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.entry(conversation_id.to_string()).or_default();

        // Same member again only updates its score.
        if let Some(entry) = window.iter_mut().find(|(_, p)| p == payload) {
            entry.0 = sent_at;
        } else {
            window.push((sent_at, payload.to_string()));
        }
        window.sort_by(|a, b| a.0.total_cmp(&b.0));
        if window.len() > LIMIT {
            let excess = window.len() - LIMIT;
            window.drain(..excess);
        }
        Ok(())
    }

    async fn after(&self, conversation_id: &str, since: f64) -> Result<Vec<String>> {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(windows
            .get(conversation_id)
            .map(|window| {
                window
                    .iter()
                    .filter(|(score, _)| *score > since)
                    .map(|(_, payload)| payload.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_never_exceeds_the_limit() {
        let hot = InMemoryHotWindow::new();
        for i in 0..150 {
            hot.append("c1", &format!("m{i}"), f64::from(i)).await.unwrap();
            assert!(hot.len("c1") <= LIMIT);
        }
        assert_eq!(hot.len("c1"), LIMIT);

        // Oldest entries were trimmed away; the newest survive.
        let all = hot.after("c1", f64::NEG_INFINITY).await.unwrap();
        assert_eq!(all.first().map(String::as_str), Some("m50"));
        assert_eq!(all.last().map(String::as_str), Some("m149"));
    }

    #[tokio::test]
    async fn replaying_a_payload_keeps_one_entry() {
        let hot = InMemoryHotWindow::new();
        hot.append("c1", "payload", 10.0).await.unwrap();
        hot.append("c1", "payload", 10.0).await.unwrap();
        assert_eq!(hot.len("c1"), 1);
    }

    #[tokio::test]
    async fn after_is_strictly_exclusive_and_ascending() {
        let hot = InMemoryHotWindow::new();
        hot.append("c1", "a", 100.0).await.unwrap();
        hot.append("c1", "b", 150.0).await.unwrap();
        hot.append("c1", "c", 190.0).await.unwrap();

        let delta = hot.after("c1", 100.0).await.unwrap();
        assert_eq!(delta, vec!["b".to_string(), "c".to_string()]);
        assert!(hot.after("c1", 190.0).await.unwrap().is_empty());
        assert!(hot.after("c2", 0.0).await.unwrap().is_empty());
    }
}
