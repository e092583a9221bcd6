use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollSettings {
    #[serde(rename = "allowMultiple", default)]
    pub allow_multiple: bool,
    #[serde(rename = "showResultsBeforeVoting", default)]
    pub show_results_before_voting: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub settings: PollSettings,
    #[serde(rename = "ends_at", default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(rename = "created_by", default)]
    pub created_by: Option<String>,
}

impl Poll {
    /// A poll is ended once `ends_at` lies strictly before `now`.
    pub fn is_ended_at(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|ends_at| ends_at < now)
    }

    pub fn results_visible(&self, has_voted: bool, now: DateTime<Utc>) -> bool {
        has_voted || self.settings.show_results_before_voting || self.is_ended_at(now)
    }

    /// Checks the shape rules a stored poll must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("poll id is empty".to_owned());
        }
        if self.question.trim().is_empty() {
            return Err(format!("poll {} has an empty question", self.id));
        }
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&self.options.len()) {
            return Err(format!(
                "poll {} has {} options, expected {}..={}",
                self.id,
                self.options.len(),
                MIN_OPTIONS,
                MAX_OPTIONS
            ));
        }

        let mut seen = HashSet::with_capacity(self.options.len());
        for option in &self.options {
            if option.trim().is_empty() {
                return Err(format!("poll {} has an empty option", self.id));
            }
            if !seen.insert(option.as_str()) {
                return Err(format!("poll {} repeats option {:?}", self.id, option));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn poll(options: &[&str]) -> Poll {
        Poll {
            id: "p1".into(),
            question: "Lunch?".into(),
            options: options.iter().map(|o| o.to_string()).collect(),
            settings: PollSettings::default(),
            ends_at: None,
            created_by: Some("owner".into()),
        }
    }

    #[test]
    fn deserializes_backend_row() {
        let raw = r#"{
            "id": "p1",
            "question": "Best editor?",
            "options": ["vim", "emacs"],
            "settings": {"allowMultiple": true, "showResultsBeforeVoting": false},
            "ends_at": "2030-01-01T00:00:00Z",
            "created_by": "u1"
        }"#;
        let poll: Poll = serde_json::from_str(raw).unwrap();
        assert!(poll.settings.allow_multiple);
        assert!(!poll.settings.show_results_before_voting);
        assert_eq!(poll.ends_at.unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");
        assert_eq!(poll.created_by.as_deref(), Some("u1"));
    }

    #[test]
    fn null_ends_at_means_open_forever() {
        let raw = r#"{"id":"p1","question":"q","options":["a","b"],"settings":{},"ends_at":null}"#;
        let poll: Poll = serde_json::from_str(raw).unwrap();
        assert!(poll.ends_at.is_none());
        assert!(!poll.is_ended_at(Utc::now()));
    }

    #[test]
    fn ended_only_after_deadline() {
        let now = Utc::now();
        let mut p = poll(&["a", "b"]);
        p.ends_at = Some(now + Duration::minutes(5));
        assert!(!p.is_ended_at(now));
        p.ends_at = Some(now - Duration::seconds(1));
        assert!(p.is_ended_at(now));
    }

    #[test]
    fn results_visibility_rules() {
        let now = Utc::now();
        let mut p = poll(&["a", "b"]);
        assert!(!p.results_visible(false, now));
        assert!(p.results_visible(true, now));

        p.settings.show_results_before_voting = true;
        assert!(p.results_visible(false, now));

        p.settings.show_results_before_voting = false;
        p.ends_at = Some(now - Duration::hours(1));
        assert!(p.results_visible(false, now));
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        assert!(poll(&["a", "b"]).validate().is_ok());
        assert!(poll(&["a"]).validate().is_err());
        assert!(poll(&["a", "a"]).validate().is_err());
        assert!(poll(&["a", "  "]).validate().is_err());

        let eleven: Vec<String> = (0..11).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = eleven.iter().map(String::as_str).collect();
        assert!(poll(&refs).validate().is_err());

        let mut blank = poll(&["a", "b"]);
        blank.question = " ".into();
        assert!(blank.validate().is_err());
    }
}
