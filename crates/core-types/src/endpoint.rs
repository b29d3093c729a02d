use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The family an upstream endpoint belongs to.
///
/// The kind decides which logical raw table a payload lands in and which
/// projection the ETL stage applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    League,
    Users,
    Rosters,
    Matchups,
    Transactions,
    Players,
    State,
    DraftPicks,
    TradedPicks,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::League => "league",
            EndpointKind::Users => "users",
            EndpointKind::Rosters => "rosters",
            EndpointKind::Matchups => "matchups",
            EndpointKind::Transactions => "transactions",
            EndpointKind::Players => "players",
            EndpointKind::State => "state",
            EndpointKind::DraftPicks => "draft_picks",
            EndpointKind::TradedPicks => "traded_picks",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "league" => Ok(EndpointKind::League),
            "users" => Ok(EndpointKind::Users),
            "rosters" => Ok(EndpointKind::Rosters),
            "matchups" => Ok(EndpointKind::Matchups),
            "transactions" => Ok(EndpointKind::Transactions),
            "players" => Ok(EndpointKind::Players),
            "state" => Ok(EndpointKind::State),
            "draft_picks" => Ok(EndpointKind::DraftPicks),
            "traded_picks" => Ok(EndpointKind::TradedPicks),
            other => Err(CoreError::InvalidInput(
                "endpoint kind".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// A single logical read against the upstream API.
///
/// An `Endpoint` is both the request descriptor handed to the fetcher and the
/// identifier a snapshot is stored under (via [`Endpoint::path`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    League { league_id: String },
    Users { league_id: String },
    Rosters { league_id: String },
    Matchups { league_id: String, week: u32 },
    Transactions { league_id: String, week: u32 },
    TradedPicks { league_id: String },
    DraftPicks { draft_id: String },
    Players,
    State,
}

impl Endpoint {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::League { .. } => EndpointKind::League,
            Endpoint::Users { .. } => EndpointKind::Users,
            Endpoint::Rosters { .. } => EndpointKind::Rosters,
            Endpoint::Matchups { .. } => EndpointKind::Matchups,
            Endpoint::Transactions { .. } => EndpointKind::Transactions,
            Endpoint::TradedPicks { .. } => EndpointKind::TradedPicks,
            Endpoint::DraftPicks { .. } => EndpointKind::DraftPicks,
            Endpoint::Players => EndpointKind::Players,
            Endpoint::State => EndpointKind::State,
        }
    }

    /// The URL path relative to the API base, e.g. `/league/123/matchups/4`.
    pub fn path(&self) -> String {
        match self {
            Endpoint::League { league_id } => format!("/league/{league_id}"),
            Endpoint::Users { league_id } => format!("/league/{league_id}/users"),
            Endpoint::Rosters { league_id } => format!("/league/{league_id}/rosters"),
            Endpoint::Matchups { league_id, week } => {
                format!("/league/{league_id}/matchups/{week}")
            }
            Endpoint::Transactions { league_id, week } => {
                format!("/league/{league_id}/transactions/{week}")
            }
            Endpoint::TradedPicks { league_id } => format!("/league/{league_id}/traded_picks"),
            Endpoint::DraftPicks { draft_id } => format!("/draft/{draft_id}/picks"),
            Endpoint::Players => "/players/nfl".to_string(),
            Endpoint::State => "/state/nfl".to_string(),
        }
    }

    /// The natural key of the logical "latest payload" row this endpoint maps to.
    ///
    /// League-wide endpoints are keyed by league id, weekly endpoints by
    /// `league_id:week`. Global endpoints use a fixed key.
    pub fn logical_key(&self) -> String {
        match self {
            Endpoint::League { league_id }
            | Endpoint::Users { league_id }
            | Endpoint::Rosters { league_id }
            | Endpoint::TradedPicks { league_id } => league_id.clone(),
            Endpoint::Matchups { league_id, week } | Endpoint::Transactions { league_id, week } => {
                format!("{league_id}:{week}")
            }
            Endpoint::DraftPicks { draft_id } => draft_id.clone(),
            Endpoint::Players => "nfl".to_string(),
            Endpoint::State => "nfl".to_string(),
        }
    }

    /// The league this endpoint is scoped to, if any.
    pub fn league_id(&self) -> Option<&str> {
        match self {
            Endpoint::League { league_id }
            | Endpoint::Users { league_id }
            | Endpoint::Rosters { league_id }
            | Endpoint::Matchups { league_id, .. }
            | Endpoint::Transactions { league_id, .. }
            | Endpoint::TradedPicks { league_id } => Some(league_id),
            _ => None,
        }
    }

    /// Parses a stored endpoint path back into its descriptor.
    pub fn parse(path: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidInput("endpoint".to_string(), path.to_string());
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        let week = |raw: &str| raw.parse::<u32>().map_err(|_| invalid());
        let id = |raw: &str| {
            if raw.is_empty() {
                Err(invalid())
            } else {
                Ok(raw.to_string())
            }
        };

        match segments.as_slice() {
            ["league", league_id] => Ok(Endpoint::League { league_id: id(*league_id)? }),
            ["league", league_id, "users"] => Ok(Endpoint::Users { league_id: id(*league_id)? }),
            ["league", league_id, "rosters"] => Ok(Endpoint::Rosters { league_id: id(*league_id)? }),
            ["league", league_id, "traded_picks"] => Ok(Endpoint::TradedPicks {
                league_id: id(*league_id)?,
            }),
            ["league", league_id, "matchups", w] => Ok(Endpoint::Matchups {
                league_id: id(*league_id)?,
                week: week(*w)?,
            }),
            ["league", league_id, "transactions", w] => Ok(Endpoint::Transactions {
                league_id: id(*league_id)?,
                week: week(*w)?,
            }),
            ["draft", draft_id, "picks"] => Ok(Endpoint::DraftPicks { draft_id: id(*draft_id)? }),
            ["players", "nfl"] => Ok(Endpoint::Players),
            ["state", "nfl"] => Ok(Endpoint::State),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_parse_back_to_the_same_endpoint() {
        let endpoints = [
            Endpoint::League { league_id: "L1".into() },
            Endpoint::Matchups { league_id: "L1".into(), week: 3 },
            Endpoint::Transactions { league_id: "L1".into(), week: 17 },
            Endpoint::DraftPicks { draft_id: "D9".into() },
            Endpoint::Players,
            Endpoint::State,
        ];
        for endpoint in endpoints {
            assert_eq!(Endpoint::parse(&endpoint.path()).unwrap(), endpoint);
        }
    }

    #[test]
    fn weekly_endpoints_are_keyed_by_league_and_week() {
        let endpoint = Endpoint::Matchups { league_id: "L1".into(), week: 2 };
        assert_eq!(endpoint.logical_key(), "L1:2");
        assert_eq!(endpoint.kind(), EndpointKind::Matchups);
        assert_eq!(endpoint.league_id(), Some("L1"));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(Endpoint::parse("/league/L1/matchups/two").is_err());
        assert!(Endpoint::parse("/league//users").is_err());
        assert!(Endpoint::parse("/unknown").is_err());
    }

    #[test]
    fn kinds_round_trip_through_their_names() {
        assert_eq!("traded_picks".parse::<EndpointKind>().unwrap(), EndpointKind::TradedPicks);
        assert!("roster".parse::<EndpointKind>().is_err());
    }
}
