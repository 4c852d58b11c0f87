//! Sport adapter registry.
//!
//! Each sport is a static `AdapterConfig`: the feeds to pull, the shape of
//! each feed's records, and the target table + natural key. Adding a sport
//! means adding an entry here; the reconciler never changes.

use crate::error::SyncError;
use crate::models::SportId;

/// Target type of a normalized column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    Date,
}

/// One column of a feed's record schema.
///
/// `sources` lists candidate JSON paths tried in order; providers rename
/// fields across endpoints. Nested objects are addressed with a dotted
/// path (`teamStats.Defense.sacks`).
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub column: &'static str,
    pub sources: &'static [&'static str],
    pub kind: FieldKind,
    pub required: bool,
}

/// Shape of the provider response envelope's `body`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `body` is an array of record objects.
    BodyArray,
    /// `body` is a map of id -> record object; records carry their own ids.
    BodyMap,
}

/// Per-entity fan-out: the feed is fetched once per value of a previously
/// synced column, with the value passed as a query parameter and stamped
/// into every returned record under that same parameter name.
#[derive(Debug, Clone)]
pub struct FanOutSpec {
    pub source_table: &'static str,
    pub source_column: &'static str,
    pub param: &'static str,
}

/// One endpoint worth of records, mapped onto one table.
#[derive(Debug, Clone)]
pub struct FeedSpec {
    pub name: &'static str,
    pub path: &'static str,
    pub query: &'static [(&'static str, &'static str)],
    pub shape: ResponseShape,
    pub table: &'static str,
    pub key: &'static [FieldSpec],
    pub fields: &'static [FieldSpec],
    /// Existing rows are never updated (`ON CONFLICT DO NOTHING`).
    pub insert_only: bool,
    /// Query parameter carrying the incremental date cursor, if the
    /// endpoint supports one (value formatted as YYYYMMDD).
    pub since_param: Option<&'static str>,
    /// Fan the fetch out over entities synced by an earlier feed. Such
    /// feeds must come after their source feed in the adapter's list.
    pub fan_out: Option<FanOutSpec>,
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub sport: SportId,
    pub feeds: &'static [FeedSpec],
}

/// Resolve a sport to its adapter. The only place sport-specific
/// configuration lives.
pub fn resolve(sport: SportId) -> &'static AdapterConfig {
    match sport {
        SportId::Mlb => &MLB,
        SportId::Wnba => &WNBA,
        SportId::Nfl => &NFL,
    }
}

/// Resolve from a raw identifier, for callers holding a string.
pub fn resolve_str(sport: &str) -> Result<&'static AdapterConfig, SyncError> {
    Ok(resolve(SportId::parse(sport)?))
}

const fn text(column: &'static str, sources: &'static [&'static str]) -> FieldSpec {
    FieldSpec { column, sources, kind: FieldKind::Text, required: false }
}

const fn int(column: &'static str, sources: &'static [&'static str]) -> FieldSpec {
    FieldSpec { column, sources, kind: FieldKind::Integer, required: false }
}

const fn real(column: &'static str, sources: &'static [&'static str]) -> FieldSpec {
    FieldSpec { column, sources, kind: FieldKind::Real, required: false }
}

const fn required(spec: FieldSpec) -> FieldSpec {
    FieldSpec { required: true, ..spec }
}

// ---------------------------------------------------------------------------
// MLB
// ---------------------------------------------------------------------------

static MLB_TEAM_KEY: &[FieldSpec] = &[required(text("team_abv", &["teamAbv"]))];
static MLB_TEAM_FIELDS: &[FieldSpec] = &[
    required(text("team_city", &["teamCity"])),
    required(text("team_name", &["teamName"])),
    text("conference", &["conference"]),
    text("division", &["division"]),
    int("rs", &["RS"]),
    int("ra", &["RA"]),
    int("wins", &["wins"]),
    int("losses", &["loss"]),
    int("run_diff", &["DIFF"]),
];

static MLB_PLAYER_KEY: &[FieldSpec] = &[required(text("player_id", &["playerID"]))];
static MLB_PLAYER_FIELDS: &[FieldSpec] = &[
    required(text("long_name", &["longName"])),
    text("team_abv", &["teamAbv", "team"]),
    text("pos", &["pos"]),
    text("bat", &["bat"]),
    text("throw", &["throw"]),
    text("b_day", &["bDay"]),
];

// Box-score records come back keyed by (player, game); the player id is
// stamped into each record by the fan-out machinery.
static MLB_PLAYER_GAME_KEY: &[FieldSpec] = &[
    required(text("player_id", &["playerID"])),
    required(text("game_id", &["gameID"])),
];
static MLB_PLAYER_GAME_FIELDS: &[FieldSpec] = &[
    text("team", &["team"]),
    int("at_bats", &["Hitting.AB"]),
    int("hits", &["Hitting.H"]),
    int("home_runs", &["Hitting.HR"]),
    int("rbi", &["Hitting.RBI"]),
    int("runs", &["Hitting.R"]),
    int("strikeouts", &["Hitting.SO"]),
    real("avg", &["Hitting.AVG"]),
    int("earned_runs", &["Pitching.ER"]),
    real("innings_pitched", &["Pitching.InningsPitched"]),
];

static MLB_GAME_KEY: &[FieldSpec] = &[required(text("game_id", &["gameID"]))];
static MLB_GAME_FIELDS: &[FieldSpec] = &[
    required(FieldSpec {
        column: "game_date",
        sources: &["gameDate"],
        kind: FieldKind::Date,
        required: true,
    }),
    required(text("home", &["home"])),
    required(text("away", &["away"])),
    int("home_score", &["homeR", "homeScore", "homePts"]),
    int("away_score", &["awayR", "awayScore", "awayPts"]),
    text("game_status", &["gameStatus", "currentInning"]),
];

static MLB_FEEDS: &[FeedSpec] = &[
    FeedSpec {
        name: "teams",
        path: "/getMLBTeams",
        query: &[("teamStats", "true"), ("rosters", "false"), ("schedules", "false")],
        shape: ResponseShape::BodyArray,
        table: "mlb_teams",
        key: MLB_TEAM_KEY,
        fields: MLB_TEAM_FIELDS,
        insert_only: false,
        since_param: None,
        fan_out: None,
    },
    FeedSpec {
        name: "players",
        path: "/getMLBPlayerList",
        query: &[],
        shape: ResponseShape::BodyArray,
        table: "mlb_players",
        key: MLB_PLAYER_KEY,
        fields: MLB_PLAYER_FIELDS,
        insert_only: false,
        since_param: None,
        fan_out: None,
    },
    FeedSpec {
        name: "scores",
        path: "/getMLBScoresOnly",
        query: &[],
        shape: ResponseShape::BodyMap,
        table: "mlb_games",
        key: MLB_GAME_KEY,
        fields: MLB_GAME_FIELDS,
        insert_only: false,
        since_param: Some("gameDate"),
        fan_out: None,
    },
    FeedSpec {
        name: "player_games",
        path: "/getMLBGamesForPlayer",
        query: &[],
        shape: ResponseShape::BodyMap,
        table: "mlb_player_game_stats",
        key: MLB_PLAYER_GAME_KEY,
        fields: MLB_PLAYER_GAME_FIELDS,
        insert_only: true,
        since_param: None,
        fan_out: Some(FanOutSpec {
            source_table: "mlb_players",
            source_column: "player_id",
            param: "playerID",
        }),
    },
];

static MLB: AdapterConfig = AdapterConfig {
    sport: SportId::Mlb,
    feeds: MLB_FEEDS,
};

// ---------------------------------------------------------------------------
// WNBA
// ---------------------------------------------------------------------------

static WNBA_TEAM_KEY: &[FieldSpec] = &[required(text("team_abv", &["teamAbv"]))];
static WNBA_TEAM_FIELDS: &[FieldSpec] = &[
    required(text("name", &["teamName"])),
    required(text("team_city", &["teamCity"])),
    text("conference", &["conference"]),
    int("wins", &["wins"]),
    int("losses", &["loss"]),
    real("ppg", &["ppg"]),
    real("oppg", &["oppg"]),
];

static WNBA_PLAYER_KEY: &[FieldSpec] = &[required(int("player_id", &["playerID"]))];
static WNBA_PLAYER_FIELDS: &[FieldSpec] = &[
    required(text("name", &["longName"])),
    text("position", &["pos"]),
    text("team_abv", &["team", "teamAbv"]),
    text("player_pic", &["espnHeadshot"]),
];

static WNBA_PLAYER_GAME_KEY: &[FieldSpec] = &[
    required(int("player_id", &["playerID"])),
    required(text("game_id", &["gameID"])),
];
static WNBA_PLAYER_GAME_FIELDS: &[FieldSpec] = &[
    text("team_abv", &["teamAbv"]),
    real("minutes", &["mins"]),
    int("points", &["pts"]),
    int("rebounds", &["reb"]),
    int("assists", &["ast"]),
    int("steals", &["stl"]),
    int("blocks", &["blk"]),
    int("turnovers", &["TOV"]),
    real("fantasy_points", &["fantasyPoints"]),
];

static WNBA_GAME_KEY: &[FieldSpec] = &[required(text("game_id", &["gameID"]))];
static WNBA_GAME_FIELDS: &[FieldSpec] = &[
    required(FieldSpec {
        column: "game_date",
        sources: &["gameDate"],
        kind: FieldKind::Date,
        required: true,
    }),
    required(text("home", &["home"])),
    required(text("away", &["away"])),
    int("home_score", &["homePts", "homeScore"]),
    int("away_score", &["awayPts", "awayScore"]),
    text("game_status", &["gameStatus"]),
];

static WNBA_FEEDS: &[FeedSpec] = &[
    FeedSpec {
        name: "teams",
        path: "/getWNBATeams",
        query: &[("teamStats", "true"), ("rosters", "false"), ("schedules", "false")],
        shape: ResponseShape::BodyArray,
        table: "wnba_teams",
        key: WNBA_TEAM_KEY,
        fields: WNBA_TEAM_FIELDS,
        insert_only: false,
        since_param: None,
        fan_out: None,
    },
    FeedSpec {
        name: "players",
        path: "/getWNBAPlayerList",
        query: &[],
        shape: ResponseShape::BodyArray,
        table: "wnba_players",
        key: WNBA_PLAYER_KEY,
        fields: WNBA_PLAYER_FIELDS,
        insert_only: false,
        since_param: None,
        fan_out: None,
    },
    FeedSpec {
        name: "scores",
        path: "/getWNBAScoresOnly",
        query: &[],
        shape: ResponseShape::BodyMap,
        table: "wnba_games",
        key: WNBA_GAME_KEY,
        fields: WNBA_GAME_FIELDS,
        insert_only: false,
        since_param: Some("gameDate"),
        fan_out: None,
    },
    // Unlike the other sports, per-game stat lines are corrected after the
    // fact, so existing rows do get updated.
    FeedSpec {
        name: "player_games",
        path: "/getWNBAGamesForPlayer",
        query: &[("fantasyPoints", "true")],
        shape: ResponseShape::BodyMap,
        table: "wnba_player_game_stats",
        key: WNBA_PLAYER_GAME_KEY,
        fields: WNBA_PLAYER_GAME_FIELDS,
        insert_only: false,
        since_param: None,
        fan_out: Some(FanOutSpec {
            source_table: "wnba_players",
            source_column: "player_id",
            param: "playerID",
        }),
    },
];

static WNBA: AdapterConfig = AdapterConfig {
    sport: SportId::Wnba,
    feeds: WNBA_FEEDS,
};

// ---------------------------------------------------------------------------
// NFL
// ---------------------------------------------------------------------------

static NFL_TEAM_KEY: &[FieldSpec] = &[required(text("team_code", &["teamAbv"]))];
static NFL_TEAM_FIELDS: &[FieldSpec] = &[
    required(text("team_city", &["teamCity"])),
    required(text("team_name", &["teamName"])),
    int("wins", &["wins"]),
    int("losses", &["loss"]),
    int("ties", &["tie"]),
    int("points_for", &["pf"]),
    int("points_against", &["pa"]),
    real("sacks", &["teamStats.Defense.sacks"]),
    real("total_tackles", &["teamStats.Defense.totalTackles"]),
    real("defensive_interceptions", &["teamStats.Defense.defensiveInterceptions"]),
];

static NFL_PLAYER_KEY: &[FieldSpec] = &[required(int("player_id", &["espnID"]))];
static NFL_PLAYER_FIELDS: &[FieldSpec] = &[
    required(text("name", &["espnName", "longName"])),
    text("position", &["pos"]),
    text("team_code", &["team"]),
    text("height", &["height"]),
];

static NFL_PLAYER_GAME_KEY: &[FieldSpec] = &[
    required(int("player_id", &["playerID"])),
    required(text("game_id", &["gameID"])),
];
static NFL_PLAYER_GAME_FIELDS: &[FieldSpec] = &[
    text("team_abv", &["teamAbv"]),
    int("pass_yds", &["Passing.passYds"]),
    int("pass_td", &["Passing.passTD"]),
    int("rush_yds", &["Rushing.rushYds"]),
    int("rush_td", &["Rushing.rushTD"]),
    int("receptions", &["Receiving.receptions"]),
    int("rec_yds", &["Receiving.recYds"]),
    int("rec_td", &["Receiving.recTD"]),
    real("sacks", &["Defense.sacks"]),
    real("fantasy_points", &["fantasyPoints"]),
];

static NFL_GAME_KEY: &[FieldSpec] = &[required(text("game_id", &["gameID"]))];
static NFL_GAME_FIELDS: &[FieldSpec] = &[
    required(FieldSpec {
        column: "game_date",
        sources: &["gameDate"],
        kind: FieldKind::Date,
        required: true,
    }),
    required(text("home", &["home"])),
    required(text("away", &["away"])),
    int("home_score", &["homePts", "homeScore"]),
    int("away_score", &["awayPts", "awayScore"]),
    text("game_status", &["gameStatus"]),
];

static NFL_FEEDS: &[FeedSpec] = &[
    FeedSpec {
        name: "teams",
        path: "/getNFLTeams",
        query: &[
            ("sortBy", "standings"),
            ("rosters", "false"),
            ("schedules", "false"),
            ("teamStats", "true"),
        ],
        shape: ResponseShape::BodyArray,
        table: "nfl_teams",
        key: NFL_TEAM_KEY,
        fields: NFL_TEAM_FIELDS,
        insert_only: false,
        since_param: None,
        fan_out: None,
    },
    FeedSpec {
        name: "players",
        path: "/getNFLPlayerList",
        query: &[],
        shape: ResponseShape::BodyArray,
        table: "nfl_players",
        key: NFL_PLAYER_KEY,
        fields: NFL_PLAYER_FIELDS,
        insert_only: false,
        since_param: None,
        fan_out: None,
    },
    FeedSpec {
        name: "scores",
        path: "/getNFLScoresOnly",
        query: &[],
        shape: ResponseShape::BodyMap,
        table: "nfl_games",
        key: NFL_GAME_KEY,
        fields: NFL_GAME_FIELDS,
        insert_only: false,
        since_param: Some("gameDate"),
        fan_out: None,
    },
    FeedSpec {
        name: "player_games",
        path: "/getNFLGamesForPlayer",
        query: &[],
        shape: ResponseShape::BodyMap,
        table: "nfl_player_game_stats",
        key: NFL_PLAYER_GAME_KEY,
        fields: NFL_PLAYER_GAME_FIELDS,
        insert_only: true,
        since_param: None,
        fan_out: Some(FanOutSpec {
            source_table: "nfl_players",
            source_column: "player_id",
            param: "playerID",
        }),
    },
];

static NFL: AdapterConfig = AdapterConfig {
    sport: SportId::Nfl,
    feeds: NFL_FEEDS,
};
