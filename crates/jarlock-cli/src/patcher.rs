//! The patch pipeline.
//!
//! open → descriptor → decode classes (parallel) → plan → inject →
//! re-encode → add gate and `license.properties` → strip signatures →
//! write. Any container or class failure aborts before output exists.

use jarlock_core::policy::PROPERTIES_PATH;
use jarlock_core::{ClassError, ClassFile, LicensePolicy};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::container::{ContainerError, Package};
use crate::plugin::{DescriptorError, PluginDescriptor};
use crate::transform::planner::{self, DecodedClass, InjectionTarget, Plan, PlanError};
use crate::transform::prologue::{self, InjectError, PrologueOptions};
use crate::transform::{gate_shim, GATE_ENTRY};

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("{entry}: {source}")]
    Class {
        entry: String,
        #[source]
        source: ClassError,
    },

    #[error("{target}: {source}")]
    Inject {
        target: String,
        #[source]
        source: InjectError,
    },

    #[error("package already contains the license gate; refusing to patch twice")]
    AlreadyLicensed,

    #[error("none of the {attempted} targets could be patched")]
    NoTargetsPatched { attempted: usize },
}

#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub policy: LicensePolicy,
    /// Extra classes to treat as declared callback holders.
    pub callback_classes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PatchSummary {
    pub plugin: String,
    pub attempted: usize,
    pub patched: Vec<InjectionTarget>,
    pub skipped: Vec<(InjectionTarget, String)>,
    pub stripped_signatures: Vec<String>,
}

/// What `analyze` reports.
#[derive(Debug)]
pub struct Analysis {
    pub descriptor: PluginDescriptor,
    pub classes: usize,
    pub plan: Plan,
}

/// Signature files that would fail verification once classes change.
pub fn is_signature_file(path: &str) -> bool {
    let Some(name) = path.strip_prefix("META-INF/") else {
        return false;
    };
    !name.contains('/')
        && [".SF", ".RSA", ".DSA", ".EC"]
            .iter()
            .any(|ext| name.to_ascii_uppercase().ends_with(ext))
}

/// Classes considered for injection: everything outside `META-INF/`.
fn is_plugin_class(path: &str) -> bool {
    path.ends_with(".class") && !path.starts_with("META-INF/") && !path.ends_with("module-info.class")
}

fn decode_classes(package: &mut Package) -> Result<Vec<DecodedClass>, PatchError> {
    let paths: Vec<String> = package
        .entries()
        .filter(|p| is_plugin_class(p))
        .map(str::to_string)
        .collect();
    let mut raw = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = package.read(&path)?;
        raw.push((path, bytes));
    }
    raw.into_par_iter()
        .map(|(entry, bytes)| {
            let class_err = |source| PatchError::Class { entry: entry.clone(), source };
            let class = ClassFile::decode(&bytes).map_err(class_err)?;
            let name = class.name().map_err(class_err)?;
            debug!(entry = %entry, class = %name, "decoded");
            Ok(DecodedClass { entry, name, class })
        })
        .collect()
}

pub fn analyze(input: Vec<u8>, callback_classes: &[String]) -> Result<Analysis, PatchError> {
    let mut package = Package::open(input)?;
    let descriptor = PluginDescriptor::from_package(&mut package)?;
    let classes = decode_classes(&mut package)?;
    let plan = planner::plan(&descriptor, &classes, callback_classes)?;
    Ok(Analysis {
        descriptor,
        classes: classes.len(),
        plan,
    })
}

/// Patch the jar in `input`. Returns the new jar and what was done.
pub fn patch(input: Vec<u8>, options: &PatchOptions) -> Result<(Vec<u8>, PatchSummary), PatchError> {
    let mut package = Package::open(input)?;
    if package.contains(GATE_ENTRY) {
        return Err(PatchError::AlreadyLicensed);
    }
    let descriptor = PluginDescriptor::from_package(&mut package)?;
    info!(plugin = %descriptor.name, main = %descriptor.main, "patching plugin");

    let mut classes = decode_classes(&mut package)?;
    let plan = planner::plan(&descriptor, &classes, &options.callback_classes)?;
    info!(classes = classes.len(), targets = plan.targets.len(), "planned injection");

    let prologue_options = PrologueOptions {
        shape: options.policy.mode.shape(),
        approximate_defaults: options.policy.approximate_defaults,
    };
    let mut summary = PatchSummary {
        plugin: descriptor.name.clone(),
        attempted: plan.targets.len(),
        ..PatchSummary::default()
    };
    let mut touched: Vec<usize> = Vec::new();
    for target in plan.targets {
        let Some(slot) = classes.iter().position(|c| c.entry == target.entry) else {
            continue;
        };
        let decoded = &mut classes[slot];
        match prologue::inject(&mut decoded.class, target.method_index, prologue_options) {
            Ok(len) => {
                debug!(method = %target, reason = %target.reason, len, "gate injected");
                if !touched.contains(&slot) {
                    touched.push(slot);
                }
                summary.patched.push(target);
            }
            Err(e) if e.is_recoverable() => {
                warn!(method = %target, error = %e, "skipping target");
                summary.skipped.push((target, e.to_string()));
            }
            Err(source) => {
                return Err(PatchError::Inject {
                    target: target.to_string(),
                    source,
                })
            }
        }
    }
    if summary.patched.is_empty() {
        return Err(PatchError::NoTargetsPatched { attempted: summary.attempted });
    }

    for slot in touched {
        let decoded = &classes[slot];
        let bytes = decoded.class.encode().map_err(|source| PatchError::Class {
            entry: decoded.entry.clone(),
            source,
        })?;
        package.replace(&decoded.entry, bytes)?;
    }

    let gate = gate_shim::build(options.policy.mode).map_err(|source| PatchError::Class {
        entry: GATE_ENTRY.to_string(),
        source,
    })?;
    package.add(GATE_ENTRY, gate)?;
    let properties = options.policy.to_properties().into_bytes();
    if package.contains(PROPERTIES_PATH) {
        warn!("replacing existing {PROPERTIES_PATH}");
        package.replace(PROPERTIES_PATH, properties)?;
    } else {
        package.add(PROPERTIES_PATH, properties)?;
    }

    let signatures: Vec<String> = package
        .entries()
        .filter(|p| is_signature_file(p))
        .map(str::to_string)
        .collect();
    for path in signatures {
        warn!(entry = %path, "removing jar signature");
        package.remove(&path)?;
        summary.stripped_signatures.push(path);
    }

    let output = package.write()?;
    info!(
        patched = summary.patched.len(),
        skipped = summary.skipped.len(),
        bytes = output.len(),
        "patch complete"
    );
    Ok((output, summary))
}
