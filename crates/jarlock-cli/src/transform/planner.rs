//! Injection planning.
//!
//! Picks the methods that receive a gate call: `onEnable()V` on the
//! plugin's main class, plus the callbacks of command and listener
//! classes. Candidate classes go through two stages. A class on the
//! declared allow-list (caller-supplied names and names derived from the
//! descriptor's commands) is taken as declared; anything else is only
//! considered when its simple name looks like a listener, command or
//! executor. Both stages require at least one callback-shaped method.

use std::collections::BTreeSet;
use std::fmt;

use jarlock_core::classfile::{MethodInfo, ACC_BRIDGE, ACC_SYNTHETIC};
use jarlock_core::{ClassError, ClassFile};
use tracing::debug;

use crate::plugin::PluginDescriptor;

pub const ENABLE_METHOD: &str = "onEnable";
pub const ENABLE_DESCRIPTOR: &str = "()V";
pub const COMMAND_METHOD: &str = "onCommand";

/// Simple-name fragments that make a class a heuristic candidate.
pub const HEURISTIC_MARKERS: [&str; 3] = ["Listener", "Command", "Executor"];

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("main class {main} not found in the package")]
    NoEntryPointFound { main: String },

    #[error("{entry}: {source}")]
    Class {
        entry: String,
        #[source]
        source: ClassError,
    },
}

/// A decoded class together with where it came from.
#[derive(Debug, Clone)]
pub struct DecodedClass {
    pub entry: String,
    pub name: String,
    pub class: ClassFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetReason {
    EntryPoint,
    DeclaredCallback,
    HeuristicCallback,
}

impl fmt::Display for TargetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetReason::EntryPoint => "entry point",
            TargetReason::DeclaredCallback => "declared callback",
            TargetReason::HeuristicCallback => "heuristic callback",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Interface,
    NoCallbacks,
    NotCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Declared,
    Heuristic,
    Rejected(RejectReason),
}

impl Classification {
    fn reason(self) -> Option<TargetReason> {
        match self {
            Classification::Declared => Some(TargetReason::DeclaredCallback),
            Classification::Heuristic => Some(TargetReason::HeuristicCallback),
            Classification::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionTarget {
    pub entry: String,
    pub class_name: String,
    pub method_index: usize,
    pub name: String,
    pub descriptor: String,
    pub reason: TargetReason,
}

impl fmt::Display for InjectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

/// Class names the caller and the descriptor vouch for.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    classes: BTreeSet<String>,
    simple_names: BTreeSet<String>,
}

impl AllowList {
    /// `classes` may be dotted or internal names.
    pub fn new(descriptor: &PluginDescriptor, classes: &[String]) -> Self {
        let classes = classes.iter().map(|c| c.trim().replace('.', "/")).collect();
        let simple_names = descriptor
            .commands
            .iter()
            .flat_map(|cmd| {
                let cmd = cmd.to_ascii_lowercase();
                [
                    format!("{cmd}command"),
                    format!("{cmd}executor"),
                    format!("{cmd}commandexecutor"),
                ]
            })
            .collect();
        Self { classes, simple_names }
    }

    pub fn contains(&self, internal_name: &str) -> bool {
        self.classes.contains(internal_name)
            || self
                .simple_names
                .contains(&simple_name(internal_name).to_ascii_lowercase())
    }
}

/// Last path segment of an internal name, without any outer class prefix.
pub fn simple_name(internal_name: &str) -> &str {
    let base = internal_name.rsplit('/').next().unwrap_or(internal_name);
    base.rsplit('$').next().unwrap_or(base)
}

/// `onCommand`, or `on` followed by an upper-case letter.
pub fn is_callback_name(name: &str) -> bool {
    name == COMMAND_METHOD
        || name
            .strip_prefix("on")
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_uppercase())
}

/// Methods with code that the compiler did not synthesize.
fn is_injectable(method: &MethodInfo) -> bool {
    method.code().is_some() && method.access_flags & (ACC_BRIDGE | ACC_SYNTHETIC) == 0
}

fn callback_methods(class: &ClassFile) -> Result<Vec<usize>, ClassError> {
    let mut out = Vec::new();
    for (i, method) in class.methods.iter().enumerate() {
        if is_injectable(method) && is_callback_name(&class.method_name(method)?) {
            out.push(i);
        }
    }
    Ok(out)
}

/// Two-stage decision for a non-entry class.
pub fn classify(class: &ClassFile, internal_name: &str, allow: &AllowList) -> Result<Classification, ClassError> {
    if class.is_interface() || class.is_annotation() {
        return Ok(Classification::Rejected(RejectReason::Interface));
    }
    let has_callbacks = !callback_methods(class)?.is_empty();
    let verdict = if allow.contains(internal_name) {
        if has_callbacks {
            Classification::Declared
        } else {
            Classification::Rejected(RejectReason::NoCallbacks)
        }
    } else if HEURISTIC_MARKERS
        .iter()
        .any(|m| simple_name(internal_name).contains(m))
    {
        if has_callbacks {
            Classification::Heuristic
        } else {
            Classification::Rejected(RejectReason::NoCallbacks)
        }
    } else {
        Classification::Rejected(RejectReason::NotCandidate)
    };
    Ok(verdict)
}

/// Everything the planner decided, for reporting.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub entry_point: String,
    pub classified: Vec<(String, Classification)>,
    pub targets: Vec<InjectionTarget>,
}

/// Plan the injection over `classes`, which are in package order.
pub fn plan(
    descriptor: &PluginDescriptor,
    classes: &[DecodedClass],
    callback_classes: &[String],
) -> Result<Plan, PlanError> {
    let main = descriptor.main_internal_name();
    let entry_index = classes
        .iter()
        .position(|c| c.name == main)
        .ok_or_else(|| PlanError::NoEntryPointFound { main: descriptor.main.clone() })?;
    let allow = AllowList::new(descriptor, callback_classes);

    let mut out = Plan {
        entry_point: main.clone(),
        ..Plan::default()
    };
    for (i, decoded) in classes.iter().enumerate() {
        let class_err = |source| PlanError::Class {
            entry: decoded.entry.clone(),
            source,
        };
        if i == entry_index {
            let selected = decoded
                .class
                .find_method(ENABLE_METHOD, ENABLE_DESCRIPTOR)
                .filter(|&m| is_injectable(&decoded.class.methods[m]));
            match selected {
                Some(m) => out.targets.push(target(decoded, m, TargetReason::EntryPoint).map_err(class_err)?),
                None => debug!(class = %main, "main class has no onEnable()V body"),
            }
            continue;
        }

        let verdict = classify(&decoded.class, &decoded.name, &allow).map_err(class_err)?;
        debug!(class = %decoded.name, ?verdict, "classified");
        if let Some(reason) = verdict.reason() {
            for m in callback_methods(&decoded.class).map_err(class_err)? {
                out.targets.push(target(decoded, m, reason).map_err(class_err)?);
            }
        }
        if verdict != Classification::Rejected(RejectReason::NotCandidate) {
            out.classified.push((decoded.name.clone(), verdict));
        }
    }
    Ok(out)
}

fn target(decoded: &DecodedClass, method_index: usize, reason: TargetReason) -> Result<InjectionTarget, ClassError> {
    let method = &decoded.class.methods[method_index];
    Ok(InjectionTarget {
        entry: decoded.entry.clone(),
        class_name: decoded.name.clone(),
        method_index,
        name: decoded.class.method_name(method)?,
        descriptor: decoded.class.method_descriptor(method)?,
        reason,
    })
}
