//! Deterministic output-path allocation for task outputs
//!
//! Each output slot gets `{output_dir}/{base}.{ext}` on the first
//! allocation of its file type and `{output_dir}/{base}-{k}.{ext}`
//! afterwards, where `k` is the run-wide counter value before the call.
//! Mutable-file pairs alias an output slot to an input path instead of
//! allocating a new one.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::RunContext;
use crate::error::{BindingError, Result};
use crate::types::FileType;

static RX_MUTABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$(inputs|outputs)\.([0-9]+)$").expect("valid mutable file regex"));

/// Parse a mutable-file spec of shape `$inputs.I` or `$outputs.J`
fn parse_mutable_index(spec: &str, expected_kind: &str) -> Result<usize> {
    let caps = RX_MUTABLE.captures(spec).ok_or_else(|| {
        BindingError::MalformedBinding(format!(
            "mutable file spec '{}' must match {}",
            spec,
            RX_MUTABLE.as_str()
        ))
    })?;
    if &caps[1] != expected_kind {
        return Err(BindingError::MalformedBinding(format!(
            "mutable file spec '{}' expected to reference {}",
            spec, expected_kind
        )));
    }
    caps[2].parse().map_err(|_| {
        BindingError::MalformedBinding(format!("mutable file spec '{}' has a bad index", spec))
    })
}

/// Allocate output paths for one task invocation
///
/// `override_names` supplies per-slot `(base_name, ext)` pairs; a length
/// mismatch against `output_types` is ignored with a warning. Each
/// `mutable_files` pair `($inputs.I, $outputs.J)` makes output `J` alias
/// the path of input `I`.
pub fn resolve_output_paths(
    ctx: &mut RunContext,
    output_dir: &Path,
    input_files: &[PathBuf],
    output_types: &[FileType],
    override_names: Option<&[(String, String)]>,
    mutable_files: Option<&[(String, String)]>,
) -> Result<Vec<PathBuf>> {
    let overrides: Vec<Option<&(String, String)>> = match override_names {
        Some(names) if names.len() == output_types.len() => names.iter().map(Some).collect(),
        Some(names) => {
            log::warn!(
                "Ignoring override file names: {} names for {} output types",
                names.len(),
                output_types.len()
            );
            vec![None; output_types.len()]
        }
        None => vec![None; output_types.len()],
    };

    // {output index -> input index}
    let mut aliases: Vec<Option<usize>> = vec![None; output_types.len()];
    if let Some(pairs) = mutable_files {
        for (in_spec, out_spec) in pairs {
            let in_index = parse_mutable_index(in_spec, "inputs")?;
            let out_index = parse_mutable_index(out_spec, "outputs")?;
            if out_index >= output_types.len() {
                return Err(BindingError::MalformedBinding(format!(
                    "mutable output index {} exceeds {} output slots",
                    out_index,
                    output_types.len()
                )));
            }
            aliases[out_index] = Some(in_index);
        }
    }

    let mut paths = Vec::with_capacity(output_types.len());
    for (j, file_type) in output_types.iter().enumerate() {
        if let Some(in_index) = aliases[j] {
            let aliased = input_files.get(in_index).ok_or_else(|| {
                BindingError::MalformedBinding(format!(
                    "mutable input index {} exceeds {} input files",
                    in_index,
                    input_files.len()
                ))
            })?;
            paths.push(aliased.clone());
            continue;
        }

        let (base_name, ext) = match overrides[j] {
            Some((base, ext)) => (base.as_str(), ext.as_str()),
            None => (file_type.base_name.as_str(), file_type.ext.as_str()),
        };
        let (base_name, ext) = if base_name.is_empty() {
            ("file", "txt")
        } else {
            (base_name, ext)
        };

        let instance = ctx.next_file_instance(&file_type.file_type_id);
        let name = if instance == 0 {
            format!("{}.{}", base_name, ext)
        } else {
            format!("{}-{}.{}", base_name, instance, ext)
        };
        paths.push(output_dir.join(name));
    }

    log::debug!("Allocated {} output paths in {}", paths.len(), output_dir.display());
    Ok(paths)
}
