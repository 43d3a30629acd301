//! Client-facing realtime protocol
//!
//! On connect the server sends a `connected` frame. Clients may ping (the
//! server answers `pong`) and install a subscription filter; every other
//! server-to-client frame is a bus event envelope forwarded verbatim.

use chrono::{DateTime, Utc};
use scout_common::events::ScoutEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Frames a client may send
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Ping,
    Subscribe {
        #[serde(rename = "projectIds", default)]
        project_ids: Option<Vec<Uuid>>,
        #[serde(rename = "eventTypes", default)]
        event_types: Option<Vec<String>>,
    },
    Unsubscribe,
}

/// Frames the server originates (bus envelopes are forwarded as-is)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Connected {
        message: String,
        #[serde(rename = "clientId")]
        client_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

/// Per-connection subscription filter. An empty filter matches everything;
/// empty lists count as "no constraint" on that axis.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    project_ids: Option<HashSet<Uuid>>,
    event_types: Option<HashSet<String>>,
}

impl SubscriptionFilter {
    pub fn set(&mut self, project_ids: Option<Vec<Uuid>>, event_types: Option<Vec<String>>) {
        self.project_ids = project_ids.filter(|ids| !ids.is_empty()).map(HashSet::from_iter);
        self.event_types = event_types
            .filter(|types| !types.is_empty())
            .map(HashSet::from_iter);
    }

    pub fn clear(&mut self) {
        self.project_ids = None;
        self.event_types = None;
    }

    pub fn matches(&self, event: &ScoutEvent) -> bool {
        if let Some(ids) = &self.project_ids {
            if !ids.contains(&event.project_id()) {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.contains(event.event_type()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(project_id: Uuid) -> ScoutEvent {
        ScoutEvent::AnalysisCompleted {
            project_id,
            data: json!({}),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_client_frame_parsing() {
        let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientFrame::Ping));

        let id = Uuid::new_v4();
        let subscribe: ClientFrame = serde_json::from_str(&format!(
            r#"{{"type":"subscribe","projectIds":["{id}"],"eventTypes":["analysis:completed"]}}"#
        ))
        .unwrap();
        match subscribe {
            ClientFrame::Subscribe {
                project_ids,
                event_types,
            } => {
                assert_eq!(project_ids.unwrap(), vec![id]);
                assert_eq!(event_types.unwrap(), vec!["analysis:completed".to_string()]);
            }
            _ => panic!("expected subscribe"),
        }

        // Filters are optional
        let bare: ClientFrame = serde_json::from_str(r#"{"type":"subscribe"}"#).unwrap();
        assert!(matches!(
            bare,
            ClientFrame::Subscribe {
                project_ids: None,
                event_types: None
            }
        ));
    }

    #[test]
    fn test_server_frame_wire_format() {
        let frame = ServerFrame::Connected {
            message: "connected to scout-rt".to_string(),
            client_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"clientId\""));

        let pong = serde_json::to_string(&ServerFrame::Pong {
            timestamp: Utc::now(),
        })
        .unwrap();
        assert!(pong.contains("\"type\":\"pong\""));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = SubscriptionFilter::default();
        assert!(filter.matches(&event(Uuid::new_v4())));
    }

    #[test]
    fn test_project_filter() {
        let id = Uuid::new_v4();
        let mut filter = SubscriptionFilter::default();
        filter.set(Some(vec![id]), None);

        assert!(filter.matches(&event(id)));
        assert!(!filter.matches(&event(Uuid::new_v4())));
    }

    #[test]
    fn test_event_type_filter() {
        let mut filter = SubscriptionFilter::default();
        filter.set(None, Some(vec!["analysis:failed".to_string()]));
        assert!(!filter.matches(&event(Uuid::new_v4())));

        filter.set(None, Some(vec!["analysis:completed".to_string()]));
        assert!(filter.matches(&event(Uuid::new_v4())));
    }

    #[test]
    fn test_empty_lists_mean_no_constraint() {
        let mut filter = SubscriptionFilter::default();
        filter.set(Some(vec![]), Some(vec![]));
        assert!(filter.matches(&event(Uuid::new_v4())));
    }

    #[test]
    fn test_clear_restores_match_all() {
        let mut filter = SubscriptionFilter::default();
        filter.set(None, Some(vec!["project:added".to_string()]));
        assert!(!filter.matches(&event(Uuid::new_v4())));

        filter.clear();
        assert!(filter.matches(&event(Uuid::new_v4())));
    }
}
