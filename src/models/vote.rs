use serde::{Deserialize, Serialize};

/// The projection of a vote row needed to compute a tally.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteRow {
    #[serde(rename = "selected_options")]
    pub selected_options: Vec<String>,
}

impl VoteRow {
    pub fn new<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected_options: options.into_iter().map(Into::into).collect(),
        }
    }
}

/// Who is casting a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoterIdentity {
    Authenticated(String),
    /// Pseudo-identity token persisted in the local store.
    Anonymous(String),
}

impl VoterIdentity {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated(id) => Some(id),
            Self::Anonymous(_) => None,
        }
    }

    /// Key the backend deduplicates votes on.
    pub fn token(&self) -> &str {
        match self {
            Self::Authenticated(id) | Self::Anonymous(id) => id,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous(_))
    }
}

/// Insert payload for the votes collection.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NewVote {
    #[serde(rename = "poll_id")]
    pub poll_id: String,
    #[serde(rename = "selected_options")]
    pub selected_options: Vec<String>,
    #[serde(rename = "user_id")]
    pub user_id: Option<String>,
    #[serde(rename = "voter_token")]
    pub voter_token: String,
}

impl NewVote {
    pub fn new(poll_id: &str, selected_options: Vec<String>, voter: &VoterIdentity) -> Self {
        Self {
            poll_id: poll_id.to_owned(),
            selected_options,
            user_id: voter.user_id().map(str::to_owned),
            voter_token: voter.token().to_owned(),
        }
    }
}
