//! Stage Descriptor Table and per-stage runtime records.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sys::Pid;

/// One pipeline position: a program and the arguments that follow it.
///
/// `args` does not repeat the program name; `argv()` prepends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl StageDescriptor {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Full argument vector as handed to `execvp`: `[name, args...]`.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn validate(&self, position: usize) -> Result<()> {
        let key = format!("stages[{}]", position);

        if self.name.trim().is_empty() {
            return Err(Error::config_invalid_value(
                format!("{}.name", key),
                None,
                format!("stage {} has an empty program name", position),
            ));
        }

        if self.name.contains('\0') {
            return Err(Error::config_invalid_value(
                format!("{}.name", key),
                Some(self.name.clone()),
                format!("stage {} program name contains a NUL byte", position),
            ));
        }

        if let Some(arg) = self.args.iter().find(|arg| arg.contains('\0')) {
            return Err(Error::config_invalid_value(
                format!("{}.args", key),
                Some(arg.clone()),
                format!("stage {} has an argument containing a NUL byte", position),
            ));
        }

        Ok(())
    }
}

/// Ordered, immutable list of stages. Position is a stage's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTable {
    stages: Vec<StageDescriptor>,
}

impl StageTable {
    pub fn new(stages: Vec<StageDescriptor>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::config_invalid_value(
                "stages",
                None,
                "at least one stage is required",
            ));
        }

        for (position, stage) in stages.iter().enumerate() {
            stage.validate(position)?;
        }

        Ok(Self { stages })
    }

    pub(crate) fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StageDescriptor> {
        self.stages.iter()
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }
}

impl<'a> IntoIterator for &'a StageTable {
    type Item = &'a StageDescriptor;
    type IntoIter = std::slice::Iter<'a, StageDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}

/// Identity of a launched stage.
///
/// Filled in once at launch, by the child for itself and by the supervisor
/// for its bookkeeping. Never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRuntime<'a> {
    pub descriptor: &'a StageDescriptor,
    pub position: usize,
    pub pid: Pid,
    pub ppid: Pid,
}

impl<'a> StageRuntime<'a> {
    pub fn new(descriptor: &'a StageDescriptor, position: usize, pid: Pid, ppid: Pid) -> Self {
        Self {
            descriptor,
            position,
            pid,
            ppid,
        }
    }
}
