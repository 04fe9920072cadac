//! Spawn requests and the immutable worker descriptor derived from them.

use serde::{Deserialize, Serialize};

use crate::models::message::Envelope;
use crate::{AppError, Result};

/// Reserved delimiter used to join list-valued launch attributes.
///
/// Workers split on this exact character; it must never change.
pub const STRING_DELIMITER: char = '\u{0001}';

/// Raw `childProcess/spawn` payload as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// Request id chosen by the requester.
    #[serde(alias = "requestId")]
    pub requestid: i64,
    /// Namespace the exit notification is addressed to.
    pub requester: String,
    /// Command (plugin) name to launch.
    pub plugin: String,
    /// Ordered command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment entries (`KEY=VALUE`).
    #[serde(default)]
    pub envs: Option<Vec<String>>,
    /// Working directory inside the worker.
    #[serde(default)]
    pub currentworkingdirectory: Option<String>,
    /// Descriptor argument placeholders; entries may be null.
    #[serde(default)]
    pub preopened_fd_args: Option<Vec<Option<String>>>,
    /// Backing paths for the placeholders; entries may be null.
    #[serde(default)]
    pub preopened_fd_names: Option<Vec<Option<String>>>,
}

/// Pre-opened descriptor bindings as two parallel lists.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreopenedFds {
    /// Argument placeholders.
    pub args: Vec<Option<String>>,
    /// Backing paths.
    pub names: Vec<Option<String>>,
}

/// Immutable description of one logical spawn request.
///
/// `requester` plus `request_id` identify the request across every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    /// Command name.
    pub plugin: String,
    /// Ordered arguments.
    pub args: Vec<String>,
    /// Optional environment list.
    pub envs: Option<Vec<String>>,
    /// Optional working directory.
    pub cwd: Option<String>,
    /// Pre-opened bindings; only present when both lists were supplied.
    pub preopened: Option<PreopenedFds>,
    /// Namespace that receives the exit notification.
    pub requester: String,
    /// Request id echoed in the exit notification.
    pub request_id: i64,
}

impl TryFrom<SpawnRequest> for WorkerDescriptor {
    type Error = AppError;

    fn try_from(req: SpawnRequest) -> Result<Self> {
        let preopened = match (req.preopened_fd_args, req.preopened_fd_names) {
            (Some(args), Some(names)) => {
                if args.len() != names.len() {
                    return Err(AppError::Spawn(format!(
                        "preopened fd lists differ in length: {} args, {} names",
                        args.len(),
                        names.len()
                    )));
                }
                Some(PreopenedFds { args, names })
            }
            _ => None,
        };

        Ok(Self {
            plugin: req.plugin,
            args: req.args,
            envs: req.envs,
            cwd: req.currentworkingdirectory,
            preopened,
            requester: req.requester,
            request_id: req.requestid,
        })
    }
}

impl WorkerDescriptor {
    /// Short label for logs: `requester:id:command`.
    #[must_use]
    pub fn label(&self) -> String {
        let command = self.args.first().map_or(self.plugin.as_str(), String::as_str);
        format!("{}:{}:{command}", self.requester, self.request_id)
    }

    /// Exit notification for this request.
    #[must_use]
    pub fn exit_message(&self, result: i64) -> Envelope {
        Envelope::exit(&self.requester, self.request_id, result)
    }

    /// Launch attributes handed to the worker runtime.
    ///
    /// List values are joined with [`STRING_DELIMITER`]. Absent optional
    /// lists are omitted rather than sent empty.
    #[must_use]
    pub fn launch_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![
            ("BRIDGE_PLUGIN_TYPE", self.plugin.clone()),
            ("BRIDGE_ARGS", join_list(self.args.iter().map(Some))),
            ("BRIDGE_REQUEST_ID", self.request_id.to_string()),
            ("BRIDGE_REQUESTER", self.requester.clone()),
        ];
        if let Some(envs) = &self.envs {
            attrs.push(("BRIDGE_ENVS", join_list(envs.iter().map(Some))));
        }
        if let Some(cwd) = &self.cwd {
            attrs.push(("BRIDGE_CWD", cwd.clone()));
        }
        if let Some(fds) = &self.preopened {
            attrs.push((
                "BRIDGE_PREOPENED_FD_ARGS",
                join_list(fds.args.iter().map(Option::as_ref)),
            ));
            attrs.push((
                "BRIDGE_PREOPENED_FD_NAMES",
                join_list(fds.names.iter().map(Option::as_ref)),
            ));
        }
        attrs
    }
}

/// Join list entries with [`STRING_DELIMITER`]; `None` entries become empty.
#[must_use]
pub fn join_list<'a, I>(items: I) -> String
where
    I: IntoIterator<Item = Option<&'a String>>,
{
    let mut out = String::new();
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push(STRING_DELIMITER);
        }
        if let Some(s) = item {
            out.push_str(s);
        }
    }
    out
}

/// Inverse of [`join_list`]; an empty string yields an empty list.
#[must_use]
pub fn split_list(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(STRING_DELIMITER).map(str::to_owned).collect()
}
