use serde::{Deserialize, Serialize};

/// Where the fiddle under test comes from.
///
/// Externally tagged so the wire form is `{"filePath": ...}` or
/// `{"gistId": ...}`, matching the execution host's request shape. A `GistId`
/// always holds a 32-character lowercase hex string; the resolver enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiddleSource {
    #[serde(rename = "filePath")]
    FilePath(String),
    #[serde(rename = "gistId")]
    GistId(String),
}

/// Distribution tracks the host can draw versions from. `Stable` has no CLI
/// flag but is part of the host's channel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    Stable,
    Beta,
    Nightly,
}

/// Channels explicitly included or excluded for a run. A channel never sits
/// in both sets; channels nobody mentioned appear in neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFilter {
    pub show_channels: Vec<ReleaseChannel>,
    pub hide_channels: Vec<ReleaseChannel>,
}

/// Per-run setup shared by both request kinds. Immutable once built.
///
/// Field order follows the host's stable key order: fiddle, hideChannels,
/// showChannels, version. `version` stays off the wire when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub fiddle: FiddleSource,
    pub hide_channels: Vec<ReleaseChannel>,
    pub show_channels: Vec<ReleaseChannel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Setup {
    pub fn new(fiddle: FiddleSource, filter: ChannelFilter, version: Option<String>) -> Self {
        Self {
            fiddle,
            hide_channels: filter.hide_channels,
            show_channels: filter.show_channels,
            version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRequest {
    pub setup: Setup,
}

/// Versions are carried verbatim in the order given on the command line;
/// deciding what lies between them is the host's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BisectRequest {
    pub bad_version: String,
    pub good_version: String,
    pub setup: Setup,
}

/// One request per process invocation, consumed exactly once by dispatch.
/// Untagged: the request kind travels as the event identifier, not in the
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RunRequest {
    Test(TestRequest),
    Bisect(BisectRequest),
}

/// One line of run output from the host. Printed on receipt, never stored.
/// `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub text: String,
    pub timestamp: i64,
}

/// The host's verdict on a run. Arrives at most once and ends the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    Success,
    Failure,
    Invalid,
}

impl RunResult {
    /// Process exit status for this verdict.
    pub fn exit_code(self) -> i32 {
        match self {
            RunResult::Success => 0,
            RunResult::Failure => 1,
            RunResult::Invalid => 2,
        }
    }
}
