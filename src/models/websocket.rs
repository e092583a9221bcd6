use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InsertFilter<'a> {
    pub table: &'a str,
    /// Row filter in query-API syntax, e.g. `poll_id=eq.<id>`.
    pub filter: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage<'a> {
    SubscribeInserts {
        topic: String,
        #[serde(rename = "accessToken")]
        access_token: &'a str,
        changes: InsertFilter<'a>,
    },
    TrackPresence {
        topic: String,
        #[serde(rename = "accessToken")]
        access_token: &'a str,
        key: &'a str,
    },
    Heartbeat,
    Leave {
        topic: String,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A row matching the subscription's filter was inserted.
    Insert {
        table: String,
        #[serde(default)]
        record: serde_json::Value,
    },
    /// Full presence membership, keyed by connection key.
    PresenceState { keys: Vec<String> },
    PresenceDiff {
        #[serde(default)]
        joins: Vec<String>,
        #[serde(default)]
        leaves: Vec<String>,
    },
    Reply {
        status: String,
        #[serde(default)]
        message: Option<String>,
    },
    Error { message: String },
}

pub fn poll_topic(poll_id: &str) -> String {
    format!("poll-{}", poll_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_message_shape() {
        let msg = ClientMessage::SubscribeInserts {
            topic: poll_topic("p1"),
            access_token: "key",
            changes: InsertFilter {
                table: "votes",
                filter: "poll_id=eq.p1".to_owned(),
            },
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "subscribe_inserts",
                "topic": "poll-p1",
                "accessToken": "key",
                "changes": {"table": "votes", "filter": "poll_id=eq.p1"}
            })
        );
    }

    #[test]
    fn heartbeat_is_bare_tag() {
        assert_eq!(
            serde_json::to_string(&ClientMessage::Heartbeat).unwrap(),
            r#"{"type":"heartbeat"}"#
        );
    }

    #[test]
    fn parses_server_messages() {
        let insert: ServerMessage = serde_json::from_str(
            r#"{"type":"insert","table":"votes","record":{"selected_options":["A"]}}"#,
        )
        .unwrap();
        assert!(matches!(insert, ServerMessage::Insert { ref table, .. } if table == "votes"));

        let diff: ServerMessage =
            serde_json::from_str(r#"{"type":"presence_diff","joins":["k1"]}"#).unwrap();
        assert_eq!(
            diff,
            ServerMessage::PresenceDiff {
                joins: vec!["k1".into()],
                leaves: vec![]
            }
        );

        assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"bogus"}"#).is_err());
    }
}
